mod classifier;
mod data;
mod error;
mod labels;
mod model;
mod persist;
mod pipeline;
mod train;
mod vectorizer;

use crate::pipeline::{run, PipelineConfig};
use candle_core::Device;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hatespeech_lstm=info")),
        )
        .init();

    let cfg = PipelineConfig::default();
    let dev = Device::cuda_if_available(0)?;
    let summary = run(&cfg, &dev)?;
    if let Some(last) = summary.history.last() {
        tracing::info!(
            epochs = last.epoch,
            train_loss = last.train.loss,
            val_accuracy = last.val.accuracy,
            reloaded_accuracy = summary.reloaded_accuracy,
            "training finished, model at {} with preprocessing at {}",
            summary.model_path.display(),
            summary.preprocessing_path.display()
        );
    }
    Ok(())
}
