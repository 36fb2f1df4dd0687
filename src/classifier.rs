use crate::error::DataError;
use crate::labels::LabelEncoder;
use crate::model::HateSpeechLstm;
use crate::persist::{load_model, load_preprocessing, preprocessing_path};
use crate::vectorizer::TextVectorizer;
use candle_core::{Device, Tensor};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub probability: f32,
    pub label: String,
}

/// A persisted model together with its preprocessing, ready to label raw
/// comments.
pub struct Classifier {
    model: HateSpeechLstm,
    vectorizer: TextVectorizer,
    labels: LabelEncoder,
    device: Device,
}

impl Classifier {
    pub fn load(model_path: &Path, device: &Device) -> anyhow::Result<Self> {
        let (model, config) = load_model(model_path, device)?;
        let preprocessing = load_preprocessing(&preprocessing_path(model_path))?;
        let num_words = preprocessing.vectorizer.config.num_words;
        if num_words > config.vocab_size {
            return Err(DataError::MalformedArtifact(format!(
                "vectorizer emits ids below {num_words} but the embedding only has {} rows",
                config.vocab_size
            ))
            .into());
        }
        let vectorizer = TextVectorizer::from_state(preprocessing.vectorizer)?;
        if vectorizer.seq_len() != config.seq_len {
            return Err(DataError::MalformedArtifact(format!(
                "vectorizer pads to {} tokens but the model expects {}",
                vectorizer.seq_len(),
                config.seq_len
            ))
            .into());
        }
        Ok(Self {
            model,
            vectorizer,
            labels: preprocessing.labels,
            device: device.clone(),
        })
    }

    pub fn classify(&self, texts: &[&str]) -> anyhow::Result<Vec<Prediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<u32> = self
            .vectorizer
            .vectorize_all(texts.iter().copied())?
            .concat();
        let xs = Tensor::from_vec(ids, (texts.len(), self.vectorizer.seq_len()), &self.device)?;
        let probs = self.model.predict(&xs)?.to_vec1::<f32>()?;

        probs
            .into_iter()
            .map(|probability| -> anyhow::Result<Prediction> {
                let id = u32::from(probability >= 0.5);
                Ok(Prediction {
                    probability,
                    label: self.labels.inverse_transform(id)?.to_string(),
                })
            })
            .collect()
    }
}
