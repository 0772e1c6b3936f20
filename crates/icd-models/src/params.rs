use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ModelArgs;

pub const PARAMS_FILE: &str = "params.json";

/// Hyperparameters recorded with a run. A key is present only when the
/// corresponding argument is set.
pub fn make_param_dict(args: &ModelArgs) -> BTreeMap<String, Value> {
    let entries: [(&str, Option<Value>); 15] = [
        ("Y", args.y.clone().map(Value::from)),
        ("filter_size", args.filter_size.clone().map(Value::from)),
        ("dropout", args.dropout.map(Value::from)),
        ("num_filter_maps", args.num_filter_maps.map(Value::from)),
        ("rnn_dim", args.rnn_dim.map(Value::from)),
        ("cell_type", args.cell_type.clone().map(Value::from)),
        ("rnn_layers", args.rnn_layers.map(Value::from)),
        ("lmbda", args.lmbda.map(Value::from)),
        ("command", args.command.clone().map(Value::from)),
        ("weight_decay", args.weight_decay.map(Value::from)),
        ("version", args.version.clone().map(Value::from)),
        ("data_path", args.data_path.clone().map(Value::from)),
        ("vocab", args.vocab.clone().map(Value::from)),
        (
            "embed_file",
            args.embed_file
                .as_ref()
                .map(|p| Value::from(p.to_string_lossy().into_owned())),
        ),
        ("lr", args.lr.map(Value::from)),
    ];

    entries
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
        .collect()
}

/// Writes `params` as pretty JSON to `dir/params.json`, creating `dir`.
pub fn save_params<P: AsRef<Path>>(params: &BTreeMap<String, Value>, dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create run directory: {:?}", dir))?;
    let path = dir.join(PARAMS_FILE);
    let json = serde_json::to_string_pretty(params)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("Saved run parameters to {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unset_args() -> ModelArgs {
        ModelArgs {
            y: None,
            filter_size: None,
            dropout: None,
            num_filter_maps: None,
            rnn_dim: None,
            cell_type: None,
            rnn_layers: None,
            lmbda: None,
            command: None,
            weight_decay: None,
            version: None,
            data_path: None,
            vocab: None,
            embed_file: None,
            lr: None,
            ..Default::default()
        }
    }

    #[test]
    fn only_set_values_are_recorded() {
        let args = ModelArgs {
            y: Some("50".to_string()),
            dropout: Some(0.2),
            embed_file: Some(PathBuf::from("data/processed.embed")),
            ..unset_args()
        };
        let params = make_param_dict(&args);
        assert_eq!(
            params.keys().collect::<Vec<_>>(),
            vec!["Y", "dropout", "embed_file"]
        );
        assert_eq!(params["Y"], Value::from("50"));
        assert_eq!(params["dropout"], Value::from(0.2));
        assert_eq!(params["embed_file"], Value::from("data/processed.embed"));
    }

    #[test]
    fn nothing_set_gives_empty_dict() {
        assert!(make_param_dict(&unset_args()).is_empty());
    }

    #[test]
    fn defaults_fill_every_defaulted_key() {
        let params = make_param_dict(&ModelArgs::default());
        for key in [
            "Y",
            "filter_size",
            "dropout",
            "num_filter_maps",
            "rnn_dim",
            "cell_type",
            "rnn_layers",
            "lmbda",
            "weight_decay",
            "version",
            "lr",
        ] {
            assert!(params.contains_key(key), "missing {}", key);
        }
        for key in ["command", "data_path", "vocab", "embed_file"] {
            assert!(!params.contains_key(key), "unexpected {}", key);
        }
    }

    #[test]
    fn save_params_writes_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let params = make_param_dict(&ModelArgs::default());
        let path = save_params(&params, dir.path().join("run"))?;
        let read: BTreeMap<String, Value> = serde_json::from_str(&fs::read_to_string(path)?)?;
        assert_eq!(read, params);
        Ok(())
    }
}
