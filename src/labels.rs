use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maps distinct label values to dense ids `0..num_classes`.
///
/// Classes are kept sorted, numerically when every value parses as a
/// number and lexicographically otherwise, so the id assignment does not
/// depend on row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = labels.into_iter().collect();
        let mut classes: Vec<String> = distinct.into_iter().map(str::to_string).collect();

        let numeric: Option<Vec<f64>> = classes.iter().map(|c| c.parse().ok()).collect();
        if let Some(values) = numeric {
            let mut paired: Vec<(f64, String)> = values.into_iter().zip(classes).collect();
            paired.sort_by(|(a, sa), (b, sb)| a.total_cmp(b).then_with(|| sa.cmp(sb)));
            classes = paired.into_iter().map(|(_, c)| c).collect();
        }

        tracing::info!(?classes, "fitted label encoder");
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn transform_one(&self, label: &str) -> Result<u32, DataError> {
        self.classes
            .iter()
            .position(|c| c == label)
            .map(|i| i as u32)
            .ok_or_else(|| DataError::UnseenLabel(label.to_string()))
    }

    pub fn transform<'a, I>(&self, labels: I) -> Result<Vec<u32>, DataError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels.into_iter().map(|l| self.transform_one(l)).collect()
    }

    pub fn inverse_transform(&self, id: u32) -> Result<&str, DataError> {
        self.classes
            .get(id as usize)
            .map(String::as_str)
            .ok_or(DataError::UnknownLabelId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_sorted_dense_ids() {
        let enc = LabelEncoder::fit(["yes", "no", "yes", "no"]);
        assert_eq!(enc.classes(), &["no", "yes"]);
        assert_eq!(enc.transform(["yes", "no", "no"]).unwrap(), vec![1, 0, 0]);
    }

    #[test]
    fn numeric_labels_sort_numerically() {
        let enc = LabelEncoder::fit(["10", "9", "10", "2"]);
        assert_eq!(enc.classes(), &["2", "9", "10"]);
    }

    #[test]
    fn encoding_is_a_bijection_and_idempotent() {
        let raw = ["1", "0", "0", "1", "1"];
        let enc = LabelEncoder::fit(raw);
        assert_eq!(enc.num_classes(), 2);
        for label in raw {
            let id = enc.transform_one(label).unwrap();
            assert!((id as usize) < enc.num_classes());
            assert_eq!(enc.transform_one(label).unwrap(), id);
            assert_eq!(enc.inverse_transform(id).unwrap(), label);
        }
        assert_ne!(
            enc.transform_one("0").unwrap(),
            enc.transform_one("1").unwrap()
        );
    }

    #[test]
    fn unseen_label_fails() {
        let enc = LabelEncoder::fit(["0", "1"]);
        assert!(matches!(
            enc.transform_one("maybe"),
            Err(DataError::UnseenLabel(l)) if l == "maybe"
        ));
        assert!(matches!(
            enc.inverse_transform(2),
            Err(DataError::UnknownLabelId(2))
        ));
    }
}
