use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{Linear, Module, VarBuilder, VarMap};

use crate::building_blocks::conv::{max_over_time, SeqConv};
use crate::building_blocks::embedding::WordEmbedding;
use crate::models::model_interface::create_var_map;

/// Per-label attention pooling followed by a per-label dot product.
///
/// For hidden states `H` of shape `(batch, seq, dim)`:
/// `alpha = softmax_seq(U H^T)`, `m = alpha H`, `y = sum(final.weight * m) + final.bias`.
#[derive(Debug, Clone)]
pub struct LabelAttention {
    u: Linear,
    final_layer: Linear,
    num_labels: usize,
}

impl LabelAttention {
    /// `name` is the full variable prefix that `vb` points at. When
    /// `label_init` is given (shape `(num_labels, in_dim)`) both `U` and
    /// `final` start from it.
    pub fn new(
        varmap: &VarMap,
        vb: VarBuilder,
        name: &str,
        in_dim: usize,
        num_labels: usize,
        label_init: Option<&Tensor>,
    ) -> Result<Self> {
        if let Some(init) = label_init {
            create_var_map(
                varmap,
                vec![
                    (format!("{}.U.weight", name), init.clone()),
                    (format!("{}.final.weight", name), init.copy()?),
                ],
            )?;
        }
        let u = candle_nn::linear_no_bias(in_dim, num_labels, vb.pp("U"))?;
        let final_layer = candle_nn::linear(in_dim, num_labels, vb.pp("final"))?;
        Ok(Self {
            u,
            final_layer,
            num_labels,
        })
    }

    /// Attention weights over the sequence, `(batch, labels, seq)`.
    pub fn attention(&self, hidden: &Tensor) -> candle_core::Result<Tensor> {
        let scores = self.u.forward(hidden)?.transpose(1, 2)?.contiguous()?;
        candle_nn::ops::softmax(&scores, D::Minus1)
    }

    pub fn forward(&self, hidden: &Tensor) -> candle_core::Result<Tensor> {
        let alpha = self.attention(hidden)?;
        let m = alpha.matmul(&hidden.contiguous()?)?;
        let y = m
            .broadcast_mul(self.final_layer.weight())?
            .sum(D::Minus1)?;
        match self.final_layer.bias() {
            Some(bias) => y.broadcast_add(bias),
            None => Ok(y),
        }
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Label representations used by the attention, `(labels, dim)`.
    pub fn final_weight(&self) -> &Tensor {
        self.final_layer.weight()
    }
}

/// Encodes label descriptions into the same space as the label attention
/// output weights: embedding, convolution, tanh, max-pool, linear.
#[derive(Debug, Clone)]
pub struct DescriptionEncoder {
    embed: WordEmbedding,
    conv: SeqConv,
    fc: Linear,
}

impl DescriptionEncoder {
    pub fn new(
        embed: WordEmbedding,
        num_filter_maps: usize,
        kernel: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv = SeqConv::new(embed.embed_size(), num_filter_maps, kernel, vb.pp("label_conv"))?;
        let fc = candle_nn::linear(num_filter_maps, num_filter_maps, vb.pp("label_fc1"))?;
        Ok(Self { embed, conv, fc })
    }

    /// `(labels, desc_len)` word ids to `(labels, num_filter_maps)`.
    pub fn forward(&self, desc: &Tensor) -> candle_core::Result<Tensor> {
        let x = self.embed.forward(desc, false)?;
        let x = self.conv.forward(&x)?.tanh()?;
        let x = max_over_time(&x)?;
        self.fc.forward(&x)
    }

    /// Mean squared distance between the encoded descriptions and the label
    /// weights of the selected labels.
    pub fn regularization(
        &self,
        desc: &Tensor,
        label_inds: &Tensor,
        attention: &LabelAttention,
        lmbda: f64,
    ) -> candle_core::Result<Tensor> {
        let encoded = self.forward(desc)?;
        let weights = attention.final_weight().index_select(label_inds, 0)?;
        let diff = (encoded - weights)?;
        diff.sqr()?.sum(D::Minus1)?.mean_all()? * lmbda
    }
}
