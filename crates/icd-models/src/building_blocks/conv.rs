use candle_core::{Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, Module, VarBuilder};

/// 1D convolution over a `(batch, seq, channels)` sequence that keeps the
/// sequence length, whatever the kernel parity.
#[derive(Debug, Clone)]
pub struct SeqConv {
    conv: Conv1d,
}

impl SeqConv {
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, vb: VarBuilder) -> Result<Self> {
        let conv = candle_nn::conv1d(
            in_channels,
            out_channels,
            kernel,
            Conv1dConfig {
                padding: kernel / 2,
                ..Default::default()
            },
            vb,
        )?;
        Ok(Self { conv })
    }
}

impl Module for SeqConv {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let seq_len = xs.dim(1)?;
        let x = xs.transpose(1, 2)?.contiguous()?;
        let x = self.conv.forward(&x)?;
        // even kernels produce one extra position
        let x = x.narrow(2, 0, seq_len)?;
        x.transpose(1, 2)
    }
}

/// `tanh(conv(tanh(conv(x))) + shortcut(x))` followed by dropout.
///
/// The shortcut is a width-1 convolution, so the block may change the
/// channel count.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    left1: SeqConv,
    left2: SeqConv,
    shortcut: SeqConv,
    dropout: Dropout,
}

impl ResidualBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            left1: SeqConv::new(in_channels, out_channels, kernel, vb.pp("left1"))?,
            left2: SeqConv::new(out_channels, out_channels, kernel, vb.pp("left2"))?,
            shortcut: SeqConv::new(in_channels, out_channels, 1, vb.pp("shortcut"))?,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let left = self.left1.forward(xs)?.tanh()?;
        let left = self.left2.forward(&left)?;
        let out = (left + self.shortcut.forward(xs)?)?.tanh()?;
        self.dropout.forward(&out, train)
    }
}

/// Max over the sequence axis of a `(batch, seq, channels)` tensor.
pub fn max_over_time(xs: &Tensor) -> Result<Tensor> {
    xs.max(1)
}
