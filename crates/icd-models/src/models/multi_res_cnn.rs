use anyhow::Result;
use candle_core::{Device, Tensor, D};
use candle_nn::{Module, VarBuilder};

use crate::building_blocks::attention::LabelAttention;
use crate::building_blocks::conv::{ResidualBlock, SeqConv};
use crate::building_blocks::embedding::WordEmbedding;
use crate::config::ModelArgs;
use crate::models::common::{label_attention, word_embedding, EMBED};
use crate::models::model_interface::{IcdModel, ModelState};
use crate::utils::lookups::Dicts;

/// One convolution path: a width-preserving base convolution followed by
/// `conv_layer` residual blocks, the first widening to `num_filter_maps`.
#[derive(Debug, Clone)]
struct ResidualChannel {
    base: SeqConv,
    blocks: Vec<ResidualBlock>,
}

impl ResidualChannel {
    fn new(
        embed_size: usize,
        num_filter_maps: usize,
        kernel: usize,
        num_blocks: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let base = SeqConv::new(embed_size, embed_size, kernel, vb.pp("base_conv"))?;
        let blocks = (0..num_blocks.max(1))
            .map(|i| {
                let in_dim = if i == 0 { embed_size } else { num_filter_maps };
                ResidualBlock::new(
                    in_dim,
                    num_filter_maps,
                    kernel,
                    dropout,
                    vb.pp(format!("res.{}", i)),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { base, blocks })
    }

    fn forward(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut h = self.base.forward(xs)?.tanh()?;
        for block in &self.blocks {
            h = block.forward(&h, train)?;
        }
        Ok(h)
    }
}

/// One residual channel per filter size, concatenated along the features.
#[derive(Debug, Clone)]
struct MultiResidualChannels {
    channels: Vec<ResidualChannel>,
    output_dim: usize,
}

impl MultiResidualChannels {
    fn new(args: &ModelArgs, embed_size: usize, vb: VarBuilder) -> Result<Self> {
        let maps = args.num_filter_maps();
        let channels = args
            .filter_sizes()?
            .into_iter()
            .enumerate()
            .map(|(i, kernel)| {
                ResidualChannel::new(
                    embed_size,
                    maps,
                    kernel,
                    args.conv_layer,
                    args.dropout(),
                    vb.pp(format!("conv.{}", i)),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let output_dim = maps * channels.len();
        Ok(Self {
            channels,
            output_dim,
        })
    }

    fn forward(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let outs = self
            .channels
            .iter()
            .map(|c| c.forward(xs, train))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Tensor::cat(&outs, D::Minus1)
    }
}

/// Single convolution with a label attention output layer.
pub struct Cnn {
    state: ModelState,
    embed: WordEmbedding,
    conv: SeqConv,
    output: LabelAttention,
}

impl Cnn {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let maps = args.num_filter_maps();
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let conv = SeqConv::new(embed.embed_size(), maps, args.filter_size()?, state.var_builder().pp("conv"))?;
        let output = label_attention(&state, args, dicts, maps)?;
        Ok(Self {
            state,
            embed,
            conv,
            output,
        })
    }
}

impl IcdModel for Cnn {
    fn model_arch(&self) -> &'static str {
        "CNN"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, self.state.is_training)?;
        let h = self.conv.forward(&x)?.tanh()?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Parallel convolutions, one per filter size, concatenated.
pub struct MultiCnn {
    state: ModelState,
    embed: WordEmbedding,
    convs: Vec<SeqConv>,
    output: LabelAttention,
}

impl MultiCnn {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let maps = args.num_filter_maps();
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let vb = state.var_builder();
        let convs = args
            .filter_sizes()?
            .into_iter()
            .enumerate()
            .map(|(i, kernel)| SeqConv::new(embed.embed_size(), maps, kernel, vb.pp(format!("conv.{}", i))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let output = label_attention(&state, args, dicts, maps * convs.len())?;
        Ok(Self {
            state,
            embed,
            convs,
            output,
        })
    }
}

impl IcdModel for MultiCnn {
    fn model_arch(&self) -> &'static str {
        "MultiCNN"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, self.state.is_training)?;
        let outs = self
            .convs
            .iter()
            .map(|conv| conv.forward(&x)?.tanh())
            .collect::<candle_core::Result<Vec<_>>>()?;
        self.output.forward(&Tensor::cat(&outs, D::Minus1)?)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Base convolution followed by `conv_layer` residual blocks.
pub struct ResCnn {
    state: ModelState,
    embed: WordEmbedding,
    channel: ResidualChannel,
    output: LabelAttention,
}

impl ResCnn {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let maps = args.num_filter_maps();
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let channel = ResidualChannel::new(
            embed.embed_size(),
            maps,
            args.filter_size()?,
            args.conv_layer,
            args.dropout(),
            state.var_builder().pp("conv"),
        )?;
        let output = label_attention(&state, args, dicts, maps)?;
        Ok(Self {
            state,
            embed,
            channel,
            output,
        })
    }
}

impl IcdModel for ResCnn {
    fn model_arch(&self) -> &'static str {
        "ResCNN"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let training = self.state.is_training;
        let x = self.embed.forward(xs, training)?;
        let h = self.channel.forward(&x, training)?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Multi-filter residual CNN with a label attention output layer.
pub struct MultiResCnn {
    state: ModelState,
    embed: WordEmbedding,
    channels: MultiResidualChannels,
    output: LabelAttention,
}

impl MultiResCnn {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let channels = MultiResidualChannels::new(args, embed.embed_size(), state.var_builder())?;
        let output = label_attention(&state, args, dicts, channels.output_dim)?;
        Ok(Self {
            state,
            embed,
            channels,
            output,
        })
    }
}

impl IcdModel for MultiResCnn {
    fn model_arch(&self) -> &'static str {
        "MultiResCNN"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let training = self.state.is_training;
        let x = self.embed.forward(xs, training)?;
        let h = self.channels.forward(&x, training)?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Shared feature extractor of the single-path multi-task setup: the
/// `MultiResCNN` body without its output layer.
pub struct MultiResCnnFeature {
    state: ModelState,
    embed: WordEmbedding,
    channels: MultiResidualChannels,
}

impl MultiResCnnFeature {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let channels = MultiResidualChannels::new(args, embed.embed_size(), state.var_builder())?;
        Ok(Self {
            state,
            embed,
            channels,
        })
    }

    /// `(batch, seq)` word ids to `(batch, seq, output_dim)` features.
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let training = self.state.is_training;
        let x = self.embed.forward(xs, training)?;
        self.channels.forward(&x, training)
    }

    pub fn output_dim(&self) -> usize {
        self.channels.output_dim
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn set_training_mode(&mut self) {
        self.state.is_training = true;
    }

    pub fn set_evaluation_mode(&mut self) {
        self.state.is_training = false;
    }

    pub fn load_weights(&mut self, path: &std::path::Path) -> Result<()> {
        log::info!("Loading shared feature weights from: {:?}", path);
        self.state.varmap.load(path)?;
        Ok(())
    }
}

/// Per-task label attention head over shared features.
pub struct OutputLayerModel {
    state: ModelState,
    output: LabelAttention,
}

impl OutputLayerModel {
    pub fn new(args: &ModelArgs, dicts: &Dicts, input_dim: usize, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let output = label_attention(&state, args, dicts, input_dim)?;
        Ok(Self { state, output })
    }
}

impl IcdModel for OutputLayerModel {
    fn model_arch(&self) -> &'static str {
        "output_layer"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    /// `xs` are the `(batch, seq, dim)` features of [`MultiResCnnFeature`].
    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        self.output.forward(xs)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}
