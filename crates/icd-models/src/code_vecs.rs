use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};

use crate::utils::lookups::Dicts;

/// Description word indices for each requested label, for zero-shot
/// labels that never appear in training.
///
/// Labels without a description get the single unknown-word index
/// `ind2w.len() + 1`. All vectors are padded with 0 to the longest one.
/// Returns the label indices as a U32 tensor on `device` with the padded
/// vectors.
pub fn build_code_vecs(
    code_inds: &[usize],
    dicts: &Dicts,
    device: &Device,
) -> Result<(Tensor, Vec<Vec<u32>>)> {
    let unk = dicts.unk_index() as u32;
    let vecs = code_inds
        .iter()
        .map(|c| {
            let code = dicts
                .ind2c
                .get(c)
                .ok_or_else(|| anyhow!("Label index {} not found in ind2c", c))?;
            Ok(dicts.dv.get(code).cloned().unwrap_or_else(|| vec![unk]))
        })
        .collect::<Result<Vec<_>>>()?;

    let inds = code_inds
        .iter()
        .map(|&c| {
            u32::try_from(c).map_err(|_| anyhow!("Label index {} does not fit a u32 tensor index", c))
        })
        .collect::<Result<Vec<u32>>>()?;
    let inds = Tensor::from_vec(inds, code_inds.len(), device)?;
    Ok((inds, pad_desc_vecs(vecs)))
}

/// Right-pads every vector with 0 to the length of the longest.
pub fn pad_desc_vecs(vecs: Vec<Vec<u32>>) -> Vec<Vec<u32>> {
    let max_len = vecs.iter().map(Vec::len).max().unwrap_or(0);
    vecs.into_iter()
        .map(|mut v| {
            v.resize(max_len, 0);
            v
        })
        .collect()
}

/// Padded vectors as a `(n, len)` U32 tensor.
pub fn code_vecs_tensor(vecs: &[Vec<u32>], device: &Device) -> Result<Tensor> {
    let len = vecs.first().map(Vec::len).unwrap_or(0);
    if vecs.iter().any(|v| v.len() != len) {
        anyhow::bail!("Description vectors must be padded to equal length");
    }
    let flat: Vec<u32> = vecs.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (vecs.len(), len), device)?)
}
