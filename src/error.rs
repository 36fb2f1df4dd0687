use thiserror::Error;

/// Failures in the data and artifact layers that callers may want to match on.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("column `{0}` not found in CSV header")]
    MissingColumn(String),
    #[error("dataset is empty")]
    Empty,
    #[error("label `{0}` was not seen when the encoder was fitted")]
    UnseenLabel(String),
    #[error("label id {0} is out of range")]
    UnknownLabelId(u32),
    #[error("expected exactly 2 label classes for a sigmoid output, found {0}")]
    NotBinary(usize),
    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
    #[error("split of {total} samples leaves an empty partition ({train} train / {test} test)")]
    EmptyPartition {
        total: usize,
        train: usize,
        test: usize,
    },
    #[error("model artifact is malformed: {0}")]
    MalformedArtifact(String),
}
