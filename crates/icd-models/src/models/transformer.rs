use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module};

use crate::building_blocks::attention::LabelAttention;
use crate::building_blocks::conv::{max_over_time, SeqConv};
use crate::building_blocks::embedding::{masked_mean, padding_mask, WordEmbedding};
use crate::building_blocks::transformer::TransformerEncoder;
use crate::config::ModelArgs;
use crate::models::common::{label_attention, word_embedding, EMBED};
use crate::models::model_interface::{IcdModel, ModelState};
use crate::utils::lookups::Dicts;

fn encoder(state: &ModelState, args: &ModelArgs, model_dim: usize) -> Result<TransformerEncoder> {
    log::debug!(
        "[TransformerEncoder] dim={} heads={} layers={} ff={}",
        model_dim,
        args.transformer_heads,
        args.transformer_layers,
        args.transformer_ff_dim
    );
    Ok(TransformerEncoder::new(
        &state.var_builder().pp("encoder"),
        model_dim,
        args.transformer_ff_dim,
        args.transformer_heads,
        args.transformer_layers,
        args.max_length,
        args.dropout(),
        &state.device,
    )?)
}

/// Embedded and encoded tokens plus the padding mask of `xs`.
fn encode(
    embed: &WordEmbedding,
    encoder: &TransformerEncoder,
    xs: &Tensor,
    training: bool,
) -> candle_core::Result<(Tensor, Tensor)> {
    let mask = padding_mask(xs)?;
    let x = embed.forward(xs, training)?;
    let h = encoder.forward_with_mask(&x, Some(&mask), training)?;
    Ok((h, mask))
}

/// Transformer encoder, masked mean pooling, linear output.
pub struct Transformer1 {
    state: ModelState,
    embed: WordEmbedding,
    encoder: TransformerEncoder,
    output: Linear,
    num_labels: usize,
}

impl Transformer1 {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let num_labels = dicts.num_labels();
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let encoder = encoder(&state, args, embed.embed_size())?;
        let output = candle_nn::linear(embed.embed_size(), num_labels, state.var_builder().pp("final"))?;
        Ok(Self {
            state,
            embed,
            encoder,
            output,
            num_labels,
        })
    }
}

impl IcdModel for Transformer1 {
    fn model_arch(&self) -> &'static str {
        "transformer1"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let (h, mask) = encode(&self.embed, &self.encoder, xs, self.state.is_training)?;
        self.output.forward(&masked_mean(&h, &mask)?)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Transformer encoder, max pooling, linear output.
pub struct Transformer2 {
    state: ModelState,
    embed: WordEmbedding,
    encoder: TransformerEncoder,
    output: Linear,
    num_labels: usize,
}

impl Transformer2 {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let num_labels = dicts.num_labels();
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let encoder = encoder(&state, args, embed.embed_size())?;
        let output = candle_nn::linear(embed.embed_size(), num_labels, state.var_builder().pp("final"))?;
        Ok(Self {
            state,
            embed,
            encoder,
            output,
            num_labels,
        })
    }
}

impl IcdModel for Transformer2 {
    fn model_arch(&self) -> &'static str {
        "transformer2"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let (h, _) = encode(&self.embed, &self.encoder, xs, self.state.is_training)?;
        self.output.forward(&max_over_time(&h)?)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Transformer encoder with a label attention output layer.
pub struct Transformer3 {
    state: ModelState,
    embed: WordEmbedding,
    encoder: TransformerEncoder,
    output: LabelAttention,
}

impl Transformer3 {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let encoder = encoder(&state, args, embed.embed_size())?;
        let output = label_attention(&state, args, dicts, embed.embed_size())?;
        Ok(Self {
            state,
            embed,
            encoder,
            output,
        })
    }
}

impl IcdModel for Transformer3 {
    fn model_arch(&self) -> &'static str {
        "transformer3"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let (h, _) = encode(&self.embed, &self.encoder, xs, self.state.is_training)?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Convolution to `num_filter_maps` channels, transformer encoder over the
/// feature maps, label attention.
pub struct Transformer4 {
    state: ModelState,
    embed: WordEmbedding,
    conv: SeqConv,
    encoder: TransformerEncoder,
    output: LabelAttention,
}

impl Transformer4 {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let maps = args.num_filter_maps();
        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let conv = SeqConv::new(embed.embed_size(), maps, args.filter_size()?, state.var_builder().pp("conv"))?;
        let encoder = encoder(&state, args, maps)?;
        let output = label_attention(&state, args, dicts, maps)?;
        Ok(Self {
            state,
            embed,
            conv,
            encoder,
            output,
        })
    }
}

impl IcdModel for Transformer4 {
    fn model_arch(&self) -> &'static str {
        "transformer4"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let training = self.state.is_training;
        let mask = padding_mask(xs)?;
        let x = self.embed.forward(xs, training)?;
        let h = self.conv.forward(&x)?.tanh()?;
        let h = self.encoder.forward_with_mask(&h, Some(&mask), training)?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}
