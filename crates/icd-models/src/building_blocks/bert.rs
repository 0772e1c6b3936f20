use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::building_blocks::embedding::padding_mask;
use crate::models::model_interface::create_var_map;

const BERT_CONFIG_FILE: &str = "config.json";
const BERT_WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Deserialize)]
struct BertDims {
    hidden_size: usize,
}

/// Maps a checkpoint tensor name onto the `prefix` scope used by our models,
/// dropping heads we never use.
fn remap_bert_name(name: &str, prefix: &str) -> Option<String> {
    let name = name.strip_prefix("bert.").unwrap_or(name);
    if !(name.starts_with("embeddings.") || name.starts_with("encoder.")) {
        return None;
    }
    let name = if let Some(stem) = name.strip_suffix(".gamma") {
        format!("{}.weight", stem)
    } else if let Some(stem) = name.strip_suffix(".beta") {
        format!("{}.bias", stem)
    } else {
        name.to_string()
    };
    Some(format!("{}.{}", prefix, name))
}

/// BERT encoder whose configuration (and optionally weights) live in a
/// HuggingFace-style directory.
pub struct BertBackbone {
    bert: BertModel,
    hidden_size: usize,
}

impl BertBackbone {
    /// Reads `config.json` from `bert_dir`. When `model.safetensors` is present
    /// its tensors are registered in `varmap` under `prefix` before the encoder
    /// is built, otherwise the encoder starts from random weights.
    pub fn load(
        bert_dir: &Path,
        varmap: &VarMap,
        vb: VarBuilder,
        prefix: &str,
        device: &Device,
    ) -> Result<Self> {
        let config_path = bert_dir.join(BERT_CONFIG_FILE);
        let config_json = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read BERT config: {:?}", config_path))?;
        let config: Config = serde_json::from_str(&config_json)
            .with_context(|| format!("Invalid BERT config: {:?}", config_path))?;
        let dims: BertDims = serde_json::from_str(&config_json)?;

        let weights_path = bert_dir.join(BERT_WEIGHTS_FILE);
        if weights_path.exists() {
            let tensors = candle_core::safetensors::load(&weights_path, device)
                .with_context(|| format!("Failed to read BERT weights: {:?}", weights_path))?;
            let tensors = tensors
                .into_iter()
                .filter_map(|(name, t)| remap_bert_name(&name, prefix).map(|n| (n, t)))
                .map(|(name, t)| Ok((name, t.to_dtype(DType::F32)?)))
                .collect::<Result<Vec<_>>>()?;
            log::info!(
                "Loaded {} pretrained BERT tensors from {:?}",
                tensors.len(),
                weights_path
            );
            create_var_map(varmap, tensors)?;
        } else {
            log::warn!(
                "No {} in {:?}; BERT encoder starts from random weights",
                BERT_WEIGHTS_FILE,
                bert_dir
            );
        }

        let bert = BertModel::load(vb, &config)?;
        Ok(Self {
            bert,
            hidden_size: dims.hidden_size,
        })
    }

    /// `(batch, seq)` token ids to `(batch, seq, hidden)`. Id 0 is padding.
    pub fn forward(&self, ids: &Tensor) -> candle_core::Result<Tensor> {
        let token_type_ids = ids.zeros_like()?;
        let mask = padding_mask(ids)?;
        self.bert.forward(ids, &token_type_ids, Some(&mask))
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

impl fmt::Debug for BertBackbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BertBackbone")
            .field("bert", &"<BertModel>")
            .field("hidden_size", &self.hidden_size)
            .finish()
    }
}
