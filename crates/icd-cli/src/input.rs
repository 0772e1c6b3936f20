use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use icd_models::config::ModelArgs;
use icd_models::utils::device::parse_device_ordinal;
use icd_models::utils::lookups::Dicts;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Model arguments plus the lookup files needed to build `Dicts`.
///
/// The vocabulary path is the `vocab` model argument so that it is also
/// recorded by `make_param_dict`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RunConfig {
    #[serde(flatten)]
    pub args: ModelArgs,
    /// Label codes, one per line (or first column of a CSV).
    pub codes: Option<PathBuf>,
    /// Description vectors: `code idx idx ...` per line.
    pub descriptions: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_json_file(config_path: &Path) -> Result<Self> {
        let config_json = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        serde_json::from_str(&config_json)
            .with_context(|| format!("Invalid config file: {:?}", config_path))
    }

    /// Reads the JSON config and applies command line overrides. Flags that
    /// a subcommand does not define are skipped.
    pub fn from_arguments(config_path: &PathBuf, matches: &ArgMatches) -> Result<Self> {
        let mut config = Self::from_json_file(config_path)?;

        if let Some(model) = string_arg(matches, "model") {
            config.args.model = model;
        }
        if let Some(gpu) = matches.try_get_one::<i32>("gpu").ok().flatten() {
            config.args.gpu = *gpu;
        }
        if let Some(device) = string_arg(matches, "device") {
            config.args.gpu = parse_device_ordinal(&device)?;
        }
        if let Some(test_model) = path_arg(matches, "test_model") {
            config.args.test_model = Some(test_model);
        }
        if let Some(vocab) = path_arg(matches, "vocab") {
            config.args.vocab = Some(vocab.to_string_lossy().into_owned());
        }
        if let Some(codes) = path_arg(matches, "codes") {
            config.codes = Some(codes);
        }
        if let Some(descriptions) = path_arg(matches, "descriptions") {
            config.descriptions = Some(descriptions);
        }
        if config.args.command.is_none() {
            config.args.command = Some(std::env::args().collect::<Vec<_>>().join(" "));
        }

        Ok(config)
    }

    pub fn load_dicts(&self) -> Result<Dicts> {
        let vocab = self
            .args
            .vocab
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("A vocabulary file is required (config `vocab` or --vocab)"))?;
        let codes = self
            .codes
            .clone()
            .ok_or_else(|| anyhow!("A label code file is required (config `codes` or --codes)"))?;
        Dicts::load(vocab, codes, self.descriptions.clone())
    }
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

fn path_arg(matches: &ArgMatches, id: &str) -> Option<PathBuf> {
    matches.try_get_one::<PathBuf>(id).ok().flatten().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_model_args() -> Result<()> {
        let config: RunConfig = serde_json::from_str(
            r#"{"model": "MultiResCNN", "filter_size": "3,5", "Y": "50", "codes": "codes.txt"}"#,
        )?;
        assert_eq!(config.args.model, "MultiResCNN");
        assert_eq!(config.args.filter_sizes()?, vec![3, 5]);
        assert_eq!(config.args.y.as_deref(), Some("50"));
        assert_eq!(config.codes, Some(PathBuf::from("codes.txt")));
        assert!(config.descriptions.is_none());
        assert_eq!(config.args.embed_size, 100);
        Ok(())
    }

    #[test]
    fn load_dicts_requires_vocab() {
        let config = RunConfig {
            codes: Some(PathBuf::from("codes.txt")),
            ..Default::default()
        };
        let err = config.load_dicts().unwrap_err();
        assert!(err.to_string().contains("vocabulary"));
    }
}
