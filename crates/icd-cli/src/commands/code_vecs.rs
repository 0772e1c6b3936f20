use anyhow::Result;
use candle_core::Device;
use icd_models::code_vecs::build_code_vecs;

use crate::input::RunConfig;

/// Padded description vectors for the requested label indices, as JSON
/// (`{"labels": [...], "codes": [...], "vectors": [[...], ...]}`).
pub fn run_code_vecs(config: &RunConfig, code_inds: &[usize]) -> Result<String> {
    let dicts = config.load_dicts()?;
    let (inds, vecs) = build_code_vecs(code_inds, &dicts, &Device::Cpu)?;
    let codes: Vec<&str> = code_inds
        .iter()
        .filter_map(|c| dicts.ind2c.get(c).map(String::as_str))
        .collect();
    log::debug!("Built {} description vectors", vecs.len());

    let out = serde_json::json!({
        "labels": inds.to_vec1::<u32>()?,
        "codes": codes,
        "vectors": vecs,
    });
    Ok(serde_json::to_string_pretty(&out)?)
}
