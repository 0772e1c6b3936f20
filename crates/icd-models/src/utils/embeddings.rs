use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const NORM_EPS: f32 = 1e-6;

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    for v in vec.iter_mut() {
        *v /= norm + NORM_EPS;
    }
}

/// Parses `token v1 v2 ... vd` lines into `(token, vector)` pairs.
fn parse_vector_lines(content: &str, path: &Path) -> Result<Vec<(String, Vec<f32>)>> {
    let lines: Vec<&str> = content.lines().collect();
    let rows = lines
        .par_iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            let mut fields = line.split_whitespace();
            let token = fields.next().unwrap_or_default().to_string();
            let values = fields
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<f32>, _>>()
                .with_context(|| {
                    format!("Invalid vector value on line {} of {:?}", line_no + 1, path)
                })?;
            Ok((token, values))
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some((_, first)) = rows.first() {
        let dim = first.len();
        if dim == 0 {
            anyhow::bail!("Embedding file {:?} has no vector values", path);
        }
        if let Some((token, row)) = rows.iter().find(|(_, v)| v.len() != dim) {
            anyhow::bail!(
                "Inconsistent embedding width in {:?}: {:?} has {} values, expected {}",
                path,
                token,
                row.len(),
                dim
            );
        }
    }
    Ok(rows)
}

/// Loads a word embedding matrix from a text file.
///
/// Rows keep the file order and are L2-normalized. A random normalized row is
/// appended for the unknown word, so the result has one more row than the file.
pub fn load_embeddings<P: AsRef<Path>>(path: P, device: &Device) -> Result<Tensor> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read embedding file: {:?}", path))?;
    let rows = parse_vector_lines(&content, path)?;
    let dim = match rows.first() {
        Some((_, v)) => v.len(),
        None => anyhow::bail!("Embedding file {:?} is empty", path),
    };

    let mut data: Vec<f32> = Vec::with_capacity((rows.len() + 1) * dim);
    for (_, mut vec) in rows.into_iter() {
        normalize(&mut vec);
        data.extend(vec);
    }

    let mut unk = Tensor::randn(0f32, 1f32, dim, &Device::Cpu)?.to_vec1::<f32>()?;
    normalize(&mut unk);
    data.extend(unk);

    let n_rows = data.len() / dim;
    log::info!(
        "Loaded {} word embeddings of width {} from {:?}",
        n_rows - 1,
        dim,
        path
    );
    Ok(Tensor::from_vec(data, (n_rows, dim), device)?.to_dtype(DType::F32)?)
}

/// Loads `code v1 .. vd` lines into a lookup keyed by label code.
pub fn load_code_embeddings<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Vec<f32>>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read code embedding file: {:?}", path))?;
    Ok(parse_vector_lines(&content, path)?.into_iter().collect())
}

/// Builds a `(labels.len(), dim)` matrix whose rows come from `code_embs`.
/// Labels without an embedding keep a small random row.
pub fn code_embedding_matrix(
    code_embs: &HashMap<String, Vec<f32>>,
    labels: &[&str],
    dim: usize,
    device: &Device,
) -> Result<Tensor> {
    let mut data = Tensor::randn(0f32, 0.03f32, (labels.len(), dim), &Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let mut found = 0usize;
    for (row, code) in labels.iter().enumerate() {
        if let Some(vec) = code_embs.get(*code) {
            if vec.len() != dim {
                anyhow::bail!(
                    "Code embedding for {} has width {}, expected {}",
                    code,
                    vec.len(),
                    dim
                );
            }
            data[row * dim..(row + 1) * dim].copy_from_slice(vec);
            found += 1;
        }
    }
    log::debug!(
        "Initialized {}/{} label rows from code embeddings",
        found,
        labels.len()
    );
    Ok(Tensor::from_vec(data, (labels.len(), dim), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn embeddings_are_normalized_with_unk_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "**PAD** 0 0 0").unwrap();
        writeln!(file, "fever 3 0 4").unwrap();
        writeln!(file, "cough 0 2 0").unwrap();

        let w = load_embeddings(file.path(), &Device::Cpu).unwrap();
        assert_eq!(w.dims(), &[4, 3]);

        let rows = w.to_vec2::<f32>().unwrap();
        assert_eq!(rows[0], vec![0.0, 0.0, 0.0]);
        assert!((rows[1][0] - 0.6).abs() < 1e-4);
        assert!((rows[1][2] - 0.8).abs() < 1e-4);
        let unk_norm: f32 = rows[3].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((unk_norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fever 3 0 4").unwrap();
        writeln!(file, "cough 0 2").unwrap();
        assert!(load_embeddings(file.path(), &Device::Cpu).is_err());
    }

    #[test]
    fn code_matrix_uses_known_rows() {
        let mut embs = HashMap::new();
        embs.insert("401.9".to_string(), vec![1.0, 2.0]);
        let m = code_embedding_matrix(&embs, &["038.9", "401.9"], 2, &Device::Cpu).unwrap();
        let rows = m.to_vec2::<f32>().unwrap();
        assert_eq!(rows[1], vec![1.0, 2.0]);

        let bad = code_embedding_matrix(&embs, &["401.9"], 3, &Device::Cpu);
        assert!(bad.is_err());
    }
}
