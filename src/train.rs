use crate::data::{Dataset, Mode};
use crate::model::{binary_cross_entropy, correct_predictions, HateSpeechLstm, ModelConfig};
use candle_core::{DType, Device, Result};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 64,
            learning_rate: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: Evaluation,
    pub val: Evaluation,
}

pub struct TrainedModel {
    pub varmap: VarMap,
    pub history: Vec<EpochMetrics>,
}

/// Loss and accuracy over a whole partition, without touching parameters.
pub fn evaluate(
    model: &HateSpeechLstm,
    ds: &Dataset,
    mode: Mode,
    batch_size: usize,
    dev: &Device,
) -> Result<Evaluation> {
    let mut loss_sum = 0f64;
    let mut correct = 0usize;
    let mut seen = 0usize;
    for batch in ds.ordered_batches(mode, batch_size) {
        let (xs, ys) = ds.get_batch(mode, &batch, dev)?;
        let probs = model.predict(&xs)?;
        let loss = binary_cross_entropy(&probs, &ys)?.to_scalar::<f32>()?;
        loss_sum += loss as f64 * batch.len() as f64;
        correct += correct_predictions(&probs, &ys)?;
        seen += batch.len();
    }
    let seen = seen.max(1) as f64;
    Ok(Evaluation {
        loss: loss_sum / seen,
        accuracy: correct as f64 / seen,
    })
}

/// Builds a fresh model and runs `cfg.epochs` full passes over the training
/// partition, evaluating on the held-out partition after each one. Every
/// epoch runs even if the loss diverges.
pub fn training_loop(
    ds: &mut Dataset,
    model_cfg: &ModelConfig,
    cfg: &TrainConfig,
    dev: &Device,
) -> anyhow::Result<TrainedModel> {
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, dev);
    let model = HateSpeechLstm::new(model_cfg, vs)?;

    let params = ParamsAdamW {
        lr: cfg.learning_rate,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-8,
        weight_decay: 0.0,
    };
    let mut optim = AdamW::new(varmap.all_vars(), params)?;

    tracing::info!(
        train = ds.train_data.len(),
        test = ds.test_data.len(),
        epochs = cfg.epochs,
        batch_size = cfg.batch_size,
        "starting training"
    );

    let mut history = Vec::with_capacity(cfg.epochs);
    for epoch in 1..=cfg.epochs {
        let mut loss_sum = 0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;
        for batch in ds.shuffled_batches(cfg.batch_size) {
            let (xs, ys) = ds.get_batch(Mode::Train, &batch, dev)?;
            let probs = model.forward(&xs, true)?;
            let loss = binary_cross_entropy(&probs, &ys)?;
            optim.backward_step(&loss)?;

            loss_sum += loss.to_scalar::<f32>()? as f64 * batch.len() as f64;
            correct += correct_predictions(&probs, &ys)?;
            seen += batch.len();
        }
        let seen = seen.max(1) as f64;
        let train = Evaluation {
            loss: loss_sum / seen,
            accuracy: correct as f64 / seen,
        };
        let val = evaluate(&model, ds, Mode::Test, cfg.batch_size, dev)?;

        if !train.loss.is_finite() || !val.loss.is_finite() {
            tracing::warn!(epoch, "loss is not finite, continuing");
        }
        tracing::info!(
            "epoch {}/{}: loss {:.4} acc {:.4} | val_loss {:.4} val_acc {:.4}",
            epoch,
            cfg.epochs,
            train.loss,
            train.accuracy,
            val.loss,
            val.accuracy
        );
        history.push(EpochMetrics { epoch, train, val });
    }

    Ok(TrainedModel {
        varmap,
        history,
    })
}
