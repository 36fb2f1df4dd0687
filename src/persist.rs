use crate::error::DataError;
use crate::labels::LabelEncoder;
use crate::model::{HateSpeechLstm, ModelConfig};
use crate::vectorizer::VectorizerState;
use anyhow::{anyhow, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIMS: &str = "config.dims";
const CONFIG_DROPOUT: &str = "config.dropout";

/// Everything needed to turn raw text into model input and model output
/// back into a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessing {
    pub vectorizer: VectorizerState,
    pub labels: LabelEncoder,
}

/// `/model.safetensors` -> `/model.preprocess.json`
pub fn preprocessing_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("preprocess.json")
}

/// Writes through a sibling temp file and renames it over `path`, so an
/// existing file is replaced whole or not at all.
fn write_atomically<F>(path: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} is not a file path", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
    write(&tmp).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("moving {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Saves all parameters plus the architecture as a single safetensors file.
pub fn save_model(varmap: &VarMap, config: &ModelConfig, path: &Path) -> anyhow::Result<()> {
    let mut tensors: HashMap<String, Tensor> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| anyhow!("parameter map is poisoned: {e}"))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    };
    let dims = [
        config.vocab_size,
        config.seq_len,
        config.embed_dim,
        config.lstm1_hidden,
        config.lstm2_hidden,
        config.dense_dim,
    ]
    .map(|d| d as u32);
    tensors.insert(CONFIG_DIMS.to_string(), Tensor::new(&dims, &Device::Cpu)?);
    tensors.insert(
        CONFIG_DROPOUT.to_string(),
        Tensor::new(&[config.dropout], &Device::Cpu)?,
    );

    write_atomically(path, |tmp| Ok(candle_core::safetensors::save(&tensors, tmp)?))?;
    tracing::info!(params = tensors.len() - 2, "saved model to {}", path.display());
    Ok(())
}

/// Rebuilds the model described by a file written with [`save_model`].
pub fn load_model(path: &Path, dev: &Device) -> anyhow::Result<(HateSpeechLstm, ModelConfig)> {
    let mut tensors = candle_core::safetensors::load(path, dev)
        .with_context(|| format!("loading model {}", path.display()))?;

    let dims = tensors
        .remove(CONFIG_DIMS)
        .ok_or_else(|| DataError::MalformedArtifact(format!("missing `{CONFIG_DIMS}`")))?
        .to_vec1::<u32>()?;
    let &[vocab_size, seq_len, embed_dim, lstm1_hidden, lstm2_hidden, dense_dim] = dims.as_slice()
    else {
        return Err(DataError::MalformedArtifact(format!(
            "`{CONFIG_DIMS}` has {} entries, expected 6",
            dims.len()
        ))
        .into());
    };
    let dropout = tensors
        .remove(CONFIG_DROPOUT)
        .ok_or_else(|| DataError::MalformedArtifact(format!("missing `{CONFIG_DROPOUT}`")))?
        .to_vec1::<f32>()?
        .first()
        .copied()
        .ok_or_else(|| DataError::MalformedArtifact(format!("empty `{CONFIG_DROPOUT}`")))?;

    let config = ModelConfig {
        vocab_size: vocab_size as usize,
        seq_len: seq_len as usize,
        embed_dim: embed_dim as usize,
        lstm1_hidden: lstm1_hidden as usize,
        lstm2_hidden: lstm2_hidden as usize,
        dense_dim: dense_dim as usize,
        dropout,
    };
    let vb = VarBuilder::from_tensors(tensors, DType::F32, dev);
    let model = HateSpeechLstm::new(&config, vb)?;
    Ok((model, config))
}

pub fn save_preprocessing(preprocessing: &Preprocessing, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(preprocessing)?;
    write_atomically(path, |tmp| Ok(fs::write(tmp, &json)?))?;
    tracing::info!("saved preprocessing to {}", path.display());
    Ok(())
}

pub fn load_preprocessing(path: &Path) -> anyhow::Result<Preprocessing> {
    let json = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorizer::VectorizerConfig;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            vocab_size: 10,
            seq_len: 4,
            embed_dim: 6,
            lstm1_hidden: 5,
            lstm2_hidden: 3,
            dense_dim: 4,
            dropout: 0.5,
        }
    }

    #[test]
    fn reloaded_model_predicts_identically() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let config = tiny_config();
        let model = HateSpeechLstm::new(&config, vb)?;
        let xs = Tensor::new(&[[2u32, 5, 9, 0], [1, 1, 1, 1], [0, 0, 0, 0]], &dev)?;
        let expected = model.predict(&xs)?.to_vec1::<f32>()?;

        save_model(&varmap, &config, &path)?;
        let (restored, restored_config) = load_model(&path, &dev)?;
        assert_eq!(restored_config, config);
        assert_eq!(restored.predict(&xs)?.to_vec1::<f32>()?, expected);
        Ok(())
    }

    #[test]
    fn save_overwrites_existing_file() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");
        fs::write(&path, b"stale")?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        HateSpeechLstm::new(&tiny_config(), vb)?;
        save_model(&varmap, &tiny_config(), &path)?;

        assert!(load_model(&path, &dev).is_ok());
        let leftovers: Vec<_> = fs::read_dir(dir.path())?.collect();
        assert_eq!(leftovers.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_architecture_is_rejected() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert("dense.weight".to_string(), Tensor::zeros((2, 2), DType::F32, &dev)?);
        candle_core::safetensors::save(&tensors, &path)?;

        let err = load_model(&path, &dev).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::MalformedArtifact(_))
        ));
        Ok(())
    }

    #[test]
    fn preprocessing_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = preprocessing_path(&dir.path().join("model.safetensors"));
        assert_eq!(path.file_name().unwrap(), "model.preprocess.json");

        let preprocessing = Preprocessing {
            vectorizer: VectorizerState {
                config: VectorizerConfig::default(),
                words: vec!["you".into(), "are".into()],
            },
            labels: LabelEncoder::fit(["0", "1"]),
        };
        save_preprocessing(&preprocessing, &path)?;
        assert_eq!(load_preprocessing(&path)?, preprocessing);
        Ok(())
    }
}
