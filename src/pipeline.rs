use crate::classifier::Classifier;
use crate::data::{load_records, train_test_split, Dataset, Partition, Record};
use crate::error::DataError;
use crate::labels::LabelEncoder;
use crate::model::ModelConfig;
use crate::persist::{preprocessing_path, save_model, save_preprocessing, Preprocessing};
use crate::train::{training_loop, EpochMetrics, TrainConfig};
use crate::vectorizer::{TextVectorizer, VectorizerConfig};
use candle_core::Device;
use std::path::PathBuf;

/// Which rows the vocabulary and label encoding are fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitScope {
    /// Every row, held-out ones included.
    #[default]
    FullCorpus,
    /// Training rows only; held-out words fall back to the OOV id.
    #[allow(dead_code)]
    TrainOnly,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_path: PathBuf,
    pub text_column: String,
    pub label_column: String,
    pub model_path: PathBuf,
    pub test_fraction: f64,
    pub seed: u64,
    pub fit_scope: FitScope,
    pub vectorizer: VectorizerConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("HateSpeech_cleaned.csv"),
            text_column: "Comment".to_string(),
            label_column: "Hateful".to_string(),
            model_path: PathBuf::from("/model.safetensors"),
            test_fraction: 0.2,
            seed: 42,
            fit_scope: FitScope::default(),
            vectorizer: VectorizerConfig::default(),
            model: ModelConfig::default(),
            train: TrainConfig::default(),
        }
    }
}

pub struct Prepared {
    pub dataset: Dataset,
    pub vectorizer: TextVectorizer,
    pub labels: LabelEncoder,
    pub model: ModelConfig,
    /// Raw held-out rows, in the same order as `dataset.test_data`.
    pub test_records: Vec<Record>,
}

pub struct RunSummary {
    pub history: Vec<EpochMetrics>,
    /// Held-out accuracy of the persisted artifacts, classifying raw text.
    pub reloaded_accuracy: f64,
    pub model_path: PathBuf,
    pub preprocessing_path: PathBuf,
}

/// Model shape driven by the vectorizer: the embedding covers every id the
/// vectorizer can emit and sequences are as long as the padding length.
fn model_config(cfg: &PipelineConfig) -> ModelConfig {
    let vocab_size = cfg.vectorizer.num_words;
    let seq_len = cfg.vectorizer.seq_len;
    if cfg.model.vocab_size != vocab_size || cfg.model.seq_len != seq_len {
        tracing::warn!(
            model_vocab = cfg.model.vocab_size,
            model_seq_len = cfg.model.seq_len,
            vocab_size,
            seq_len,
            "model input shape disagrees with the vectorizer, using the vectorizer's"
        );
    }
    ModelConfig {
        vocab_size,
        seq_len,
        ..cfg.model.clone()
    }
}

/// Loads, fits preprocessing, vectorizes, encodes and splits the corpus.
pub fn prepare(cfg: &PipelineConfig) -> anyhow::Result<Prepared> {
    let records = load_records(&cfg.data_path, &cfg.text_column, &cfg.label_column)?;
    if records.is_empty() {
        return Err(DataError::Empty.into());
    }
    let split = train_test_split(records.len(), cfg.test_fraction, cfg.seed)?;

    let fit_rows: Vec<&Record> = match cfg.fit_scope {
        FitScope::FullCorpus => records.iter().collect(),
        FitScope::TrainOnly => split.train.iter().map(|&i| &records[i]).collect(),
    };
    let mut vectorizer = TextVectorizer::new(cfg.vectorizer.clone())?;
    vectorizer.fit(fit_rows.iter().map(|r| r.comment.as_str()))?;
    let labels = LabelEncoder::fit(fit_rows.iter().map(|r| r.label.as_str()));
    if labels.num_classes() != 2 {
        return Err(DataError::NotBinary(labels.num_classes()).into());
    }

    let sequences = vectorizer.vectorize_all(records.iter().map(|r| r.comment.as_str()))?;
    let label_ids = labels.transform(records.iter().map(|r| r.label.as_str()))?;

    let train = Partition::select(&sequences, &label_ids, &split.train);
    let test = Partition::select(&sequences, &label_ids, &split.test);
    tracing::info!(
        train = train.len(),
        test = test.len(),
        vocab = vectorizer.vocab_size(),
        classes = ?labels.classes(),
        fit_scope = ?cfg.fit_scope,
        "prepared dataset"
    );

    Ok(Prepared {
        dataset: Dataset::new(train, test, vectorizer.seq_len(), cfg.seed),
        vectorizer,
        labels,
        model: model_config(cfg),
        test_records: split.test.iter().map(|&i| records[i].clone()).collect(),
    })
}

/// Runs the whole pipeline once: prepare, train, persist, reload-check.
pub fn run(cfg: &PipelineConfig, dev: &Device) -> anyhow::Result<RunSummary> {
    let Prepared {
        mut dataset,
        vectorizer,
        labels,
        model,
        test_records,
    } = prepare(cfg)?;

    let trained = training_loop(&mut dataset, &model, &cfg.train, dev)?;

    save_model(&trained.varmap, &model, &cfg.model_path)?;
    let preprocess_path = preprocessing_path(&cfg.model_path);
    save_preprocessing(
        &Preprocessing {
            vectorizer: vectorizer.state(),
            labels,
        },
        &preprocess_path,
    )?;

    let classifier = Classifier::load(&cfg.model_path, dev)?;
    let mut correct = 0usize;
    for chunk in test_records.chunks(cfg.train.batch_size.max(1)) {
        let texts: Vec<&str> = chunk.iter().map(|r| r.comment.as_str()).collect();
        let predictions = classifier.classify(&texts)?;
        correct += predictions
            .iter()
            .zip(chunk)
            .filter(|(p, r)| p.label == r.label)
            .count();
    }
    let reloaded_accuracy = correct as f64 / test_records.len().max(1) as f64;
    tracing::info!(
        val_accuracy = reloaded_accuracy,
        "reloaded model from {}",
        cfg.model_path.display()
    );

    Ok(RunSummary {
        history: trained.history,
        reloaded_accuracy,
        model_path: cfg.model_path.clone(),
        preprocessing_path: preprocess_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use std::fmt::Write;

    const HATEFUL: [&str; 4] = ["vile", "scum", "vermin", "filth"];
    const BENIGN: [&str; 8] = [
        "lovely", "sunny", "garden", "music", "friends", "coffee", "weekend", "books",
    ];

    /// `n` comments, 30% hateful, with a unique marker word per row.
    fn synthetic_csv(n: usize, seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut csv = String::from("Comment,Hateful\n");
        for i in 0..n {
            let hateful = i % 10 < 3;
            let words = if hateful { &HATEFUL[..] } else { &BENIGN[..] };
            let len = rng.gen_range(2..=5);
            let comment: Vec<&str> = (0..len).map(|_| *words.choose(&mut rng).unwrap()).collect();
            writeln!(csv, "\"{}, marker{i}!\",{}", comment.join(" "), hateful as u8).unwrap();
        }
        csv
    }

    fn small_config(dir: &tempfile::TempDir, csv: &str) -> PipelineConfig {
        let data_path = dir.path().join("comments.csv");
        std::fs::write(&data_path, csv).unwrap();
        PipelineConfig {
            data_path,
            model_path: dir.path().join("model.safetensors"),
            vectorizer: VectorizerConfig {
                num_words: 64,
                seq_len: 8,
                ..Default::default()
            },
            model: ModelConfig {
                vocab_size: 64,
                seq_len: 8,
                embed_dim: 16,
                lstm1_hidden: 16,
                lstm2_hidden: 8,
                dense_dim: 8,
                dropout: 0.5,
            },
            train: TrainConfig {
                epochs: 30,
                batch_size: 16,
                learning_rate: 1e-2,
            },
            ..Default::default()
        }
    }

    #[test]
    fn trains_above_majority_baseline_and_persists() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = small_config(&dir, &synthetic_csv(250, 7));
        let summary = run(&cfg, &Device::Cpu)?;

        assert_eq!(summary.history.len(), 30);
        let last = summary.history.last().unwrap();
        assert!(last.val.accuracy > 0.7, "val accuracy {}", last.val.accuracy);
        assert!(summary.model_path.exists());
        assert!(summary.preprocessing_path.exists());
        assert_eq!(summary.reloaded_accuracy, last.val.accuracy);

        let classifier = Classifier::load(&cfg.model_path, &Device::Cpu)?;
        let predictions = classifier.classify(&["vile scum filth", "lovely sunny garden music"])?;
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].label, "1");
        assert_eq!(predictions[1].label, "0");
        assert!(classifier.classify(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn prepare_splits_and_pads() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = small_config(&dir, &synthetic_csv(50, 1));
        let prepared = prepare(&cfg)?;

        let ds = &prepared.dataset;
        assert_eq!(ds.test_data.len(), 10);
        assert_eq!(ds.train_data.len(), 40);
        assert!(ds
            .train_data
            .sequences
            .iter()
            .chain(&ds.test_data.sequences)
            .all(|s| s.len() == 8));
        assert_eq!(prepared.labels.classes(), &["0", "1"]);
        assert_eq!(prepared.model.seq_len, 8);
        Ok(())
    }

    #[test]
    fn fit_scope_changes_vocabulary_not_partition() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = small_config(&dir, &synthetic_csv(30, 3));
        cfg.vectorizer.num_words = 1000;

        let full = prepare(&cfg)?;
        cfg.fit_scope = FitScope::TrainOnly;
        let train_only = prepare(&cfg)?;

        assert_eq!(full.dataset.train_data.labels, train_only.dataset.train_data.labels);
        assert_eq!(full.dataset.test_data.labels, train_only.dataset.test_data.labels);

        let full_words: HashSet<String> = full.vectorizer.state().words.into_iter().collect();
        let train_words: HashSet<String> =
            train_only.vectorizer.state().words.into_iter().collect();
        let markers = |words: &HashSet<String>| words.iter().filter(|w| w.starts_with("marker")).count();
        assert_eq!(markers(&full_words), 30);
        assert_eq!(markers(&train_words), 24);
        Ok(())
    }

    #[test]
    fn rejects_more_than_two_classes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(&dir, "Comment,Hateful\na,0\nb,1\nc,2\nd,0\ne,1\n");
        let err = prepare(&cfg).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::NotBinary(3))
        ));
    }

    #[test]
    fn rejects_single_class_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(&dir, "Comment,Hateful\na,0\nb,0\nc,0\nd,0\ne,0\n");
        let err = run(&cfg, &Device::Cpu).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::NotBinary(1))
        ));
        assert!(!cfg.model_path.exists());
        assert!(!preprocessing_path(&cfg.model_path).exists());
    }

    #[test]
    fn rejects_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(&dir, "Comment,Hateful\n");
        let err = prepare(&cfg).err().unwrap();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::Empty)));
    }

    #[test]
    fn missing_label_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(&dir, "Comment,Label\nhello,0\n");
        assert!(prepare(&cfg).is_err());
    }
}
