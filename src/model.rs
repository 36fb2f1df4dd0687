use candle_core::{bail, DType, Result, Tensor, D};
use candle_nn::{
    linear, ops,
    rnn::{lstm, LSTMConfig, LSTM},
    Dropout, Embedding, Init, Linear, Module, ModuleT, VarBuilder, RNN,
};

/// Probabilities are clamped away from 0 and 1 before taking logs.
const BCE_EPS: f64 = 1e-7;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub seq_len: usize,
    pub embed_dim: usize,
    pub lstm1_hidden: usize,
    pub lstm2_hidden: usize,
    pub dense_dim: usize,
    pub dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 5000,
            seq_len: 1000,
            embed_dim: 128,
            lstm1_hidden: 128,
            lstm2_hidden: 64,
            dense_dim: 64,
            dropout: 0.5,
        }
    }
}

/// Embedding -> LSTM (sequence) -> LSTM (last state) -> Dense+ReLU ->
/// Dropout -> Dense+sigmoid.
pub struct HateSpeechLstm {
    embedding: Embedding,
    lstm1: LSTM,
    lstm2: LSTM,
    dense: Linear,
    dropout: Dropout,
    output: Linear,
}

impl HateSpeechLstm {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let table = vb.pp("embedding").get_with_hints(
            (config.vocab_size, config.embed_dim),
            "weight",
            Init::Uniform {
                lo: -0.05,
                up: 0.05,
            },
        )?;
        let embedding = Embedding::new(table, config.embed_dim);
        let lstm1 = lstm(
            config.embed_dim,
            config.lstm1_hidden,
            LSTMConfig::default(),
            vb.pp("lstm1"),
        )?;
        let lstm2 = lstm(
            config.lstm1_hidden,
            config.lstm2_hidden,
            LSTMConfig::default(),
            vb.pp("lstm2"),
        )?;
        let dense = linear(config.lstm2_hidden, config.dense_dim, vb.pp("dense"))?;
        let output = linear(config.dense_dim, 1, vb.pp("output"))?;

        Ok(Self {
            embedding,
            lstm1,
            lstm2,
            dense,
            dropout: Dropout::new(config.dropout),
            output,
        })
    }

    /// `xs` holds token ids of shape `(batch, seq_len)`. Returns the
    /// positive-class probability per sample, shape `(batch,)`. Dropout is
    /// only active when `train` is set.
    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.embedding.forward(xs)?;

        let states = self.lstm1.seq(&out)?;
        let out = self.lstm1.states_to_tensor(&states)?;

        let states = self.lstm2.seq(&out)?;
        let last = match states.last() {
            Some(state) => state.h(),
            None => bail!("cannot classify an empty sequence"),
        };

        let out = self.dense.forward(last)?.relu()?;
        let out = self.dropout.forward_t(&out, train)?;
        let logits = self.output.forward(&out)?;
        ops::sigmoid(&logits)?.squeeze(D::Minus1)
    }

    pub fn predict(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward(xs, false)
    }
}

/// Mean binary cross-entropy between probabilities and 0/1 targets.
pub fn binary_cross_entropy(probs: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let p = probs.clamp(BCE_EPS, 1.0 - BCE_EPS)?;
    let pos = targets.mul(&p.log()?)?;
    let neg = targets
        .affine(-1., 1.)?
        .mul(&p.affine(-1., 1.)?.log()?)?;
    pos.add(&neg)?.mean_all()?.neg()
}

/// Number of samples whose thresholded probability matches the target.
pub fn correct_predictions(probs: &Tensor, targets: &Tensor) -> Result<usize> {
    let preds = probs.ge(0.5f32)?.to_dtype(DType::F32)?;
    let correct = preds.eq(targets)?.to_dtype(DType::F32)?.sum_all()?;
    Ok(correct.to_scalar::<f32>()? as usize)
}
