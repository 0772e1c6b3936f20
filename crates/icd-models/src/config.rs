use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Run configuration for building a classifier.
///
/// Every field may be omitted from a JSON config file; missing fields fall
/// back to the defaults below. Fields wrapped in `Option` are the ones that
/// are recorded by `make_param_dict` only when set.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ModelArgs {
    /// Architecture selector, see `factory::MODEL_ARCHS`.
    pub model: String,
    /// Multi-task mode. Only `sp-mtl` is understood.
    pub mode: Option<String>,

    #[serde(rename = "Y")]
    pub y: Option<String>,
    pub data_path: Option<String>,
    pub vocab: Option<String>,
    pub version: Option<String>,
    pub command: Option<String>,

    pub embed_file: Option<PathBuf>,
    pub embed_size: usize,

    /// Kernel width. Multi-filter models read a comma separated list.
    #[serde(deserialize_with = "string_or_number")]
    pub filter_size: Option<String>,
    pub num_filter_maps: Option<usize>,
    pub conv_layer: usize,
    pub use_res: bool,
    pub dropout: Option<f64>,

    pub rnn_dim: Option<usize>,
    pub cell_type: Option<String>,
    pub rnn_layers: Option<usize>,
    pub bidirectional: bool,

    pub pool: String,
    pub lmbda: Option<f64>,
    pub code_emb: Option<PathBuf>,
    pub bert_dir: Option<PathBuf>,

    pub transformer_layers: usize,
    pub transformer_heads: usize,
    pub transformer_ff_dim: usize,
    pub max_length: usize,
    pub tfidf_dim: Option<usize>,

    pub lr: Option<f64>,
    pub weight_decay: Option<f64>,

    /// Saved weights (safetensors) loaded right after construction.
    pub test_model: Option<PathBuf>,
    /// Accelerator ordinal. Negative values keep the model on the CPU.
    pub gpu: i32,
}

impl Default for ModelArgs {
    fn default() -> Self {
        ModelArgs {
            model: String::from("conv_attn"),
            mode: None,
            y: Some(String::from("full")),
            data_path: None,
            vocab: None,
            version: Some(String::from("mimic3")),
            command: None,
            embed_file: None,
            embed_size: 100,
            filter_size: Some(String::from("4")),
            num_filter_maps: Some(50),
            conv_layer: 1,
            use_res: false,
            dropout: Some(0.5),
            rnn_dim: Some(128),
            cell_type: Some(String::from("gru")),
            rnn_layers: Some(1),
            bidirectional: false,
            pool: String::from("max"),
            lmbda: Some(0.0),
            code_emb: None,
            bert_dir: None,
            transformer_layers: 2,
            transformer_heads: 5,
            transformer_ff_dim: 256,
            max_length: 2500,
            tfidf_dim: None,
            lr: Some(1e-3),
            weight_decay: Some(0.0),
            test_model: None,
            gpu: -1,
        }
    }
}

impl ModelArgs {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse model configuration")
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_json_str(&json).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Kernel width for single-filter architectures.
    pub fn filter_size(&self) -> Result<usize> {
        let raw = self.filter_size.as_deref().unwrap_or("4").trim();
        let size: usize = raw
            .parse()
            .with_context(|| format!("filter_size must be an integer, got {:?}", raw))?;
        if size == 0 {
            anyhow::bail!("filter_size must be positive");
        }
        Ok(size)
    }

    /// Kernel widths for multi-filter architectures, e.g. `"3,5,9"`.
    pub fn filter_sizes(&self) -> Result<Vec<usize>> {
        let raw = self.filter_size.as_deref().unwrap_or("4");
        let sizes = raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<usize>()
                    .with_context(|| format!("Invalid filter size {:?} in {:?}", s, raw))
            })
            .collect::<Result<Vec<_>>>()?;
        if sizes.is_empty() || sizes.contains(&0) {
            anyhow::bail!("filter_size must list at least one positive width, got {:?}", raw);
        }
        Ok(sizes)
    }

    pub fn num_filter_maps(&self) -> usize {
        self.num_filter_maps.unwrap_or(50)
    }

    pub fn dropout(&self) -> f32 {
        self.dropout.unwrap_or(0.5) as f32
    }

    pub fn rnn_dim(&self) -> usize {
        self.rnn_dim.unwrap_or(128)
    }

    pub fn rnn_layers(&self) -> usize {
        self.rnn_layers.unwrap_or(1).max(1)
    }

    pub fn cell_type(&self) -> &str {
        self.cell_type.as_deref().unwrap_or("gru")
    }

    pub fn lmbda(&self) -> f64 {
        self.lmbda.unwrap_or(0.0)
    }

    /// Description regularization is active whenever `lmbda` is positive.
    pub fn uses_descriptions(&self) -> bool {
        self.lmbda() > 0.0
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    }))
}
