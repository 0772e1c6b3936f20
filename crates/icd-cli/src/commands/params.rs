use anyhow::Result;
use icd_models::params::{make_param_dict, save_params};
use std::path::Path;

use crate::input::RunConfig;

/// Pretty JSON of the run parameters; also written to `output/params.json`
/// when an output directory is given.
pub fn run_params(config: &RunConfig, output: Option<&Path>) -> Result<String> {
    let params = make_param_dict(&config.args);
    if let Some(dir) = output {
        save_params(&params, dir)?;
    }
    Ok(serde_json::to_string_pretty(&params)?)
}
