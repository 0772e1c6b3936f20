use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{Dropout, Embedding, Module, VarBuilder, VarMap};
use std::path::Path;

use crate::models::model_interface::create_var_map;
use crate::utils::embeddings::load_embeddings;

/// Word embedding table followed by dropout.
///
/// With an embedding file the table is initialized from it (row 0 is the
/// padding row of the file); otherwise it is randomly initialized with
/// `vocab_size` rows of width `embed_size`.
#[derive(Debug, Clone)]
pub struct WordEmbedding {
    embed: Embedding,
    dropout: Dropout,
    embed_size: usize,
}

impl WordEmbedding {
    /// `name` is the full variable prefix of the table inside `varmap`,
    /// `vb` must point at the same prefix.
    pub fn new(
        varmap: &VarMap,
        vb: VarBuilder,
        name: &str,
        embed_file: Option<&Path>,
        vocab_size: usize,
        embed_size: usize,
        dropout: f32,
    ) -> Result<Self> {
        let (rows, width) = match embed_file {
            Some(path) => {
                let weights = load_embeddings(path, vb.device())?;
                let (rows, width) = weights.dims2()?;
                if rows != vocab_size {
                    anyhow::bail!(
                        "Embedding file {:?} gives {} rows (with padding and unknown word), \
                         but the vocabulary needs {}",
                        path,
                        rows,
                        vocab_size
                    );
                }
                create_var_map(varmap, vec![(format!("{}.weight", name), weights)])?;
                (rows, width)
            }
            None => (vocab_size, embed_size),
        };
        let embed = candle_nn::embedding(rows, width, vb)?;
        log::debug!("[WordEmbedding] {} rows x {} dims", rows, width);

        Ok(Self {
            embed,
            dropout: Dropout::new(dropout),
            embed_size: width,
        })
    }

    /// `(batch, seq)` word ids to `(batch, seq, embed_size)`.
    pub fn forward(&self, ids: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let x = self.embed.forward(ids)?;
        self.dropout.forward(&x, train)
    }

    pub fn embed_size(&self) -> usize {
        self.embed_size
    }

    pub fn weight(&self) -> &Tensor {
        self.embed.embeddings()
    }
}

/// Mask with 1.0 at real tokens and 0.0 at padding (id 0), shape `(batch, seq)`.
pub fn padding_mask(ids: &Tensor) -> candle_core::Result<Tensor> {
    ids.ne(0u32)?.to_dtype(candle_core::DType::F32)
}

/// Mean over the sequence axis counting only unmasked positions.
pub fn masked_mean(xs: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = mask.unsqueeze(D::Minus1)?;
    let summed = xs.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1f32, f32::MAX)?;
    summed.broadcast_div(&counts)
}
