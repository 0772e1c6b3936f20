use candle_core::{Device, IndexOp, Result, Tensor, D};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};

/// Transformer encoder over `(batch, seq, model_dim)` inputs with sinusoidal
/// positions and an optional padding mask.
#[derive(Debug, Clone)]
pub struct TransformerEncoder {
    layers: Vec<TransformerEncoderLayer>,
    pos_encoding: Tensor,
    dropout: Dropout,
    model_dim: usize,
}

impl TransformerEncoder {
    pub fn new(
        vb: &VarBuilder,
        model_dim: usize,
        ff_dim: usize,
        num_heads: usize,
        num_layers: usize,
        max_len: usize,
        dropout_prob: f32,
        device: &Device,
    ) -> Result<Self> {
        if num_heads == 0 || model_dim % num_heads != 0 {
            return Err(candle_core::Error::Msg(format!(
                "model dim {} is not divisible by {} attention heads",
                model_dim, num_heads
            )));
        }
        let layers = (0..num_layers)
            .map(|i| {
                TransformerEncoderLayer::new(
                    &vb.pp(format!("layer_{}", i)),
                    model_dim,
                    ff_dim,
                    num_heads,
                    dropout_prob,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let pos_encoding = create_sinusoidal_encoding(max_len, model_dim, device)?;
        Ok(Self {
            layers,
            pos_encoding,
            dropout: Dropout::new(dropout_prob),
            model_dim,
        })
    }

    /// `padding_mask` is `(batch, seq)` with 1.0 at real tokens.
    pub fn forward_with_mask(
        &self,
        x: &Tensor,
        padding_mask: Option<&Tensor>,
        training: bool,
    ) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        let max_len = self.pos_encoding.dim(0)?;
        if t > max_len {
            return Err(candle_core::Error::Msg(format!(
                "sequence length {} exceeds max_length {}",
                t, max_len
            )));
        }
        let pe = self
            .pos_encoding
            .i((..t, ..))?
            .unsqueeze(0)?
            .broadcast_as((b, t, self.model_dim))?;

        let mut out = x.broadcast_add(&pe)?;
        out = self.dropout.forward(&out, training)?;

        // additive mask, large negative at padding positions
        let attn_mask = match padding_mask {
            Some(mask) => Some(
                ((mask.ones_like()? - mask)? * -1e9)?
                    .reshape((b, 1, 1, t))?,
            ),
            None => None,
        };

        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out, attn_mask.as_ref(), training)?;
            log::trace!("[TransformerEncoder] output shape after layer {}: {:?}", i, out.shape());
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct TransformerEncoderLayer {
    self_attn: MultiHeadAttention,
    ff: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
}

impl TransformerEncoderLayer {
    pub fn new(
        vb: &VarBuilder,
        model_dim: usize,
        ff_dim: usize,
        num_heads: usize,
        dropout_prob: f32,
    ) -> Result<Self> {
        Ok(Self {
            self_attn: MultiHeadAttention::new(vb, model_dim, num_heads)?,
            ff: FeedForward::new(vb, model_dim, ff_dim)?,
            norm1: candle_nn::layer_norm(model_dim, 1e-5, vb.pp("norm1"))?,
            norm2: candle_nn::layer_norm(model_dim, 1e-5, vb.pp("norm2"))?,
            dropout1: Dropout::new(dropout_prob),
            dropout2: Dropout::new(dropout_prob),
        })
    }

    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, training: bool) -> Result<Tensor> {
        let attn = self.self_attn.forward(x, mask)?;
        let x = self
            .norm1
            .forward(&(x + self.dropout1.forward(&attn, training)?)?)?;
        let ff = self.ff.forward(&x)?;
        self.norm2
            .forward(&(&x + self.dropout2.forward(&ff, training)?)?)
    }
}

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    proj_q: Linear,
    proj_k: Linear,
    proj_v: Linear,
    proj_out: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(vb: &VarBuilder, model_dim: usize, num_heads: usize) -> Result<Self> {
        Ok(Self {
            proj_q: candle_nn::linear(model_dim, model_dim, vb.pp("proj_q"))?,
            proj_k: candle_nn::linear(model_dim, model_dim, vb.pp("proj_k"))?,
            proj_v: candle_nn::linear(model_dim, model_dim, vb.pp("proj_v"))?,
            proj_out: candle_nn::linear(model_dim, model_dim, vb.pp("proj_out"))?,
            num_heads,
            head_dim: model_dim / num_heads,
        })
    }

    fn split_heads(&self, x: &Tensor, b: usize, t: usize) -> Result<Tensor> {
        x.reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// `mask` is additive and broadcastable to `(batch, heads, seq, seq)`.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        let q = self.split_heads(&self.proj_q.forward(x)?, b, t)?;
        let k = self.split_heads(&self.proj_k.forward(x)?, b, t)?;
        let v = self.split_heads(&self.proj_v.forward(x)?, b, t)?;

        let k_t = k.transpose(2, 3)?.contiguous()?;
        let mut scores = (q.matmul(&k_t)? / (self.head_dim as f64).sqrt())?;
        if let Some(mask) = mask {
            scores = scores.broadcast_add(mask)?;
        }
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let context = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        self.proj_out.forward(&context)
    }
}

#[derive(Debug, Clone)]
pub struct FeedForward {
    lin1: Linear,
    lin2: Linear,
}

impl FeedForward {
    pub fn new(vb: &VarBuilder, model_dim: usize, ff_dim: usize) -> Result<Self> {
        Ok(Self {
            lin1: candle_nn::linear(model_dim, ff_dim, vb.pp("lin1"))?,
            lin2: candle_nn::linear(ff_dim, model_dim, vb.pp("lin2"))?,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.lin1.forward(x)?.relu()?;
        self.lin2.forward(&x)
    }
}

/// Sinusoidal positional encoding from "Attention is All You Need".
pub fn create_sinusoidal_encoding(seq_len: usize, model_dim: usize, device: &Device) -> Result<Tensor> {
    let mut pe = vec![0f32; seq_len * model_dim];
    for pos in 0..seq_len {
        for i in 0..model_dim {
            let angle = pos as f32 / (10000f32).powf(2. * (i / 2) as f32 / model_dim as f32);
            pe[pos * model_dim + i] = if i % 2 == 0 { angle.sin() } else { angle.cos() };
        }
    }
    Tensor::from_vec(pe, (seq_len, model_dim), device)
}
