use crate::error::DataError;
use anyhow::Context;
use candle_core::{Device, Result, Tensor};
use csv::ReaderBuilder;
use flate2::bufread::GzDecoder;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One CSV row: the free-text comment and its raw label value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub comment: String,
    pub label: String,
}

fn open_data(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let bufreader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(bufreader)))
    } else {
        Ok(Box::new(bufreader))
    }
}

/// Reads `path` (plain or gzip-compressed CSV with a header row) keeping
/// only the text and label columns. Row order is preserved.
pub fn load_records(
    path: impl AsRef<Path>,
    text_column: &str,
    label_column: &str,
) -> anyhow::Result<Vec<Record>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_data(path)?);

    let headers = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    };
    let text_idx = column(text_column)?;
    let label_idx = column(label_column)?;

    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record =
            result.with_context(|| format!("parsing row {} of {}", row + 1, path.display()))?;
        records.push(Record {
            comment: record.get(text_idx).unwrap_or_default().to_string(),
            label: record.get(label_idx).unwrap_or_default().trim().to_string(),
        });
    }

    tracing::info!(
        rows = records.len(),
        text_column,
        label_column,
        "loaded {}",
        path.display()
    );
    Ok(records)
}

/// Row indices of the two disjoint partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Seeded shuffle split of `0..n`: `ceil(test_fraction * n)` indices go to
/// the test partition, the rest to training.
pub fn train_test_split(
    n: usize,
    test_fraction: f64,
    seed: u64,
) -> std::result::Result<SplitIndices, DataError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(DataError::InvalidFraction(test_fraction));
    }
    let n_test = (test_fraction * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 || n_train == 0 {
        return Err(DataError::EmptyPartition {
            total: n,
            train: n_train,
            test: n_test,
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train = order.split_off(n_test);

    tracing::debug!(train = train.len(), test = order.len(), seed, "split dataset");
    Ok(SplitIndices { train, test: order })
}

/// Vectorized samples with their encoded labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub sequences: Vec<Vec<u32>>,
    pub labels: Vec<u32>,
}

impl Partition {
    pub fn select(sequences: &[Vec<u32>], labels: &[u32], indices: &[usize]) -> Self {
        Self {
            sequences: indices.iter().map(|&i| sequences[i].clone()).collect(),
            labels: indices.iter().map(|&i| labels[i]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

fn chunk_indices(order: &[usize], batch_size: usize) -> Vec<Vec<usize>> {
    order
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub struct Dataset {
    pub train_data: Partition,
    pub test_data: Partition,
    pub seq_len: usize,
    rng: StdRng,
}

impl Dataset {
    /// `seed` drives the per-epoch reshuffling of training batches.
    pub fn new(train_data: Partition, test_data: Partition, seq_len: usize, seed: u64) -> Self {
        Self {
            train_data,
            test_data,
            seq_len,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn partition(&self, mode: Mode) -> &Partition {
        match mode {
            Mode::Train => &self.train_data,
            Mode::Test => &self.test_data,
        }
    }

    /// Index batches covering the training partition once, reshuffled on
    /// every call. The final batch may be short.
    pub fn shuffled_batches(&mut self, batch_size: usize) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.train_data.len()).collect();
        order.shuffle(&mut self.rng);
        chunk_indices(&order, batch_size)
    }

    /// Index batches covering the partition once, in row order.
    pub fn ordered_batches(&self, mode: Mode, batch_size: usize) -> Vec<Vec<usize>> {
        let order: Vec<usize> = (0..self.partition(mode).len()).collect();
        chunk_indices(&order, batch_size)
    }

    /// Returns `(inputs, labels)` with shapes `(batch, seq_len)` as u32 and
    /// `(batch,)` as f32.
    pub fn get_batch(
        &self,
        mode: Mode,
        indices: &[usize],
        device: &Device,
    ) -> Result<(Tensor, Tensor)> {
        let part = self.partition(mode);
        let mut ids: Vec<u32> = Vec::with_capacity(indices.len() * self.seq_len);
        let mut labels: Vec<f32> = Vec::with_capacity(indices.len());
        for &i in indices {
            ids.extend_from_slice(&part.sequences[i]);
            labels.push(part.labels[i] as f32);
        }
        let inputs = Tensor::from_vec(ids, (indices.len(), self.seq_len), device)?;
        let labels = Tensor::from_vec(labels, indices.len(), device)?;
        Ok((inputs, labels))
    }
}
