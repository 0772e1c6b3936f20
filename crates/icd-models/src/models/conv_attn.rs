use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module};

use crate::building_blocks::attention::{DescriptionEncoder, LabelAttention};
use crate::building_blocks::conv::SeqConv;
use crate::building_blocks::embedding::WordEmbedding;
use crate::config::ModelArgs;
use crate::models::common::{
    description_encoder, encode_descriptions, label_attention, word_embedding, EMBED,
};
use crate::models::model_interface::{IcdModel, ModelState};
use crate::utils::lookups::Dicts;

/// Convolution with per-label attention pooling.
pub struct ConvAttnPool {
    state: ModelState,
    embed: WordEmbedding,
    conv: SeqConv,
    output: LabelAttention,
    desc_encoder: Option<DescriptionEncoder>,
}

impl ConvAttnPool {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let kernel = args.filter_size()?;
        let maps = args.num_filter_maps();

        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let conv = SeqConv::new(embed.embed_size(), maps, kernel, state.var_builder().pp("conv"))?;
        let output = label_attention(&state, args, dicts, maps)?;
        let desc_encoder = description_encoder(&state, args, dicts, maps, kernel)?;

        Ok(Self {
            state,
            embed,
            conv,
            output,
            desc_encoder,
        })
    }

    /// Attention weights `(batch, labels, seq)` for inspecting predictions.
    pub fn attention(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let x = self.embed.forward(xs, false)?;
        let h = self.conv.forward(&x)?.tanh()?;
        self.output.attention(&h)
    }

    pub fn description_regularization(
        &self,
        desc: &Tensor,
        label_inds: &Tensor,
        lmbda: f64,
    ) -> candle_core::Result<Option<Tensor>> {
        self.desc_encoder
            .as_ref()
            .map(|e| e.regularization(desc, label_inds, &self.output, lmbda))
            .transpose()
    }
}

impl IcdModel for ConvAttnPool {
    fn model_arch(&self) -> &'static str {
        "conv_attn"
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

    fn embed_descriptions(&self, desc: &Tensor) -> Result<Option<Tensor>, candle_core::Error> {
        encode_descriptions(self.desc_encoder.as_ref(), desc)
    }
}

/// `conv_attn` with a label-dependent tanh projection ahead of the attention.
pub struct ConvAttnPoolLdep {
    state: ModelState,
    embed: WordEmbedding,
    conv: SeqConv,
    ldep: Linear,
    output: LabelAttention,
    desc_encoder: Option<DescriptionEncoder>,
}

impl ConvAttnPoolLdep {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let kernel = args.filter_size()?;
        let maps = args.num_filter_maps();

        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let conv = SeqConv::new(embed.embed_size(), maps, kernel, state.var_builder().pp("conv"))?;
        let ldep = candle_nn::linear(maps, maps, state.var_builder().pp("ldep"))?;
        let output = label_attention(&state, args, dicts, maps)?;
        let desc_encoder = description_encoder(&state, args, dicts, maps, kernel)?;

        Ok(Self {
            state,
            embed,
            conv,
            ldep,
            output,
            desc_encoder,
        })
    }
}

impl IcdModel for ConvAttnPoolLdep {
    fn model_arch(&self) -> &'static str {
        "conv_attn_ldep"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, self.state.is_training)?;
        let h = self.conv.forward(&x)?.tanh()?;
        let h = self.ldep.forward(&h)?.tanh()?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn embed_descriptions(&self, desc: &Tensor) -> Result<Option<Tensor>, candle_core::Error> {
        encode_descriptions(self.desc_encoder.as_ref(), desc)
    }
}

/// `conv_attn` followed by a label co-occurrence correction:
/// `y + W sigmoid(y)` with `W` of shape `(labels, labels)`.
pub struct ConvAttnPoolLco {
    state: ModelState,
    embed: WordEmbedding,
    conv: SeqConv,
    output: LabelAttention,
    co_occurrence: Linear,
    desc_encoder: Option<DescriptionEncoder>,
}

impl ConvAttnPoolLco {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let kernel = args.filter_size()?;
        let maps = args.num_filter_maps();
        let num_labels = dicts.num_labels();

        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let conv = SeqConv::new(embed.embed_size(), maps, kernel, state.var_builder().pp("conv"))?;
        let output = label_attention(&state, args, dicts, maps)?;
        let co_occurrence =
            candle_nn::linear_no_bias(num_labels, num_labels, state.var_builder().pp("lco"))?;
        let desc_encoder = description_encoder(&state, args, dicts, maps, kernel)?;

        Ok(Self {
            state,
            embed,
            conv,
            output,
            co_occurrence,
            desc_encoder,
        })
    }
}

impl IcdModel for ConvAttnPoolLco {
    fn model_arch(&self) -> &'static str {
        "conv_attn_lco"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, self.state.is_training)?;
        let h = self.conv.forward(&x)?.tanh()?;
        let y = self.output.forward(&h)?;
        let correction = self
            .co_occurrence
            .forward(&candle_nn::ops::sigmoid(&y)?)?;
        y + correction
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn embed_descriptions(&self, desc: &Tensor) -> Result<Option<Tensor>, candle_core::Error> {
        encode_descriptions(self.desc_encoder.as_ref(), desc)
    }
}

/// `conv_layer` stacked convolutions, optionally residual, with label attention.
pub struct MultiConvAttnPool {
    state: ModelState,
    embed: WordEmbedding,
    convs: Vec<SeqConv>,
    use_res: bool,
    output: LabelAttention,
    desc_encoder: Option<DescriptionEncoder>,
}

impl MultiConvAttnPool {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let kernel = args.filter_size()?;
        let maps = args.num_filter_maps();

        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let vb = state.var_builder();
        let convs = (0..args.conv_layer.max(1))
            .map(|i| {
                let in_dim = if i == 0 { embed.embed_size() } else { maps };
                SeqConv::new(in_dim, maps, kernel, vb.pp(format!("conv.{}", i)))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let output = label_attention(&state, args, dicts, maps)?;
        let desc_encoder = description_encoder(&state, args, dicts, maps, kernel)?;

        Ok(Self {
            state,
            embed,
            convs,
            use_res: args.use_res,
            output,
            desc_encoder,
        })
    }

    pub fn num_conv_layers(&self) -> usize {
        self.convs.len()
    }
}

impl IcdModel for MultiConvAttnPool {
    fn model_arch(&self) -> &'static str {
        "multi_conv_attn"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let mut h = self.embed.forward(xs, self.state.is_training)?;
        for (i, conv) in self.convs.iter().enumerate() {
            let out = conv.forward(&h)?.tanh()?;
            h = if self.use_res && i > 0 { (out + &h)? } else { out };
        }
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn embed_descriptions(&self, desc: &Tensor) -> Result<Option<Tensor>, candle_core::Error> {
        encode_descriptions(self.desc_encoder.as_ref(), desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn dicts() -> Dicts {
        Dicts::new(
            (0..20).map(|i| format!("w{:02}", i)),
            vec!["401.9", "038.9", "428.0"],
            HashMap::new(),
        )
    }

    fn args() -> ModelArgs {
        ModelArgs {
            embed_size: 8,
            num_filter_maps: Some(6),
            filter_size: Some("3".to_string()),
            dropout: Some(0.2),
            ..Default::default()
        }
    }

    #[test]
    fn conv_attn_forward_and_attention() -> Result<()> {
        let device = Device::Cpu;
        let mut model = ConvAttnPool::new(&args(), &dicts(), &device)?;
        model.set_evaluation_mode();

        let ids = Tensor::new(&[[1u32, 5, 7, 2, 0], [3, 3, 21, 0, 0]], &device)?;
        assert_eq!(model.forward(&ids)?.dims(), &[2, 3]);
        assert_eq!(model.attention(&ids)?.dims(), &[2, 3, 5]);

        let desc = Tensor::new(&[[1u32, 2]], &device)?;
        assert!(model.embed_descriptions(&desc)?.is_none());
        Ok(())
    }

    #[test]
    fn conv_attn_with_descriptions() -> Result<()> {
        let device = Device::Cpu;
        let args = ModelArgs {
            lmbda: Some(0.1),
            ..args()
        };
        let model = ConvAttnPool::new(&args, &dicts(), &device)?;
        let desc = Tensor::new(&[[1u32, 2, 0], [21, 0, 0]], &device)?;
        let encoded = model.embed_descriptions(&desc)?.expect("description encoder");
        assert_eq!(encoded.dims(), &[2, 6]);

        let inds = Tensor::new(&[2u32, 0], &device)?;
        let reg = model
            .description_regularization(&desc, &inds, 0.1)?
            .expect("regularization");
        assert!(reg.to_scalar::<f32>()? >= 0.0);
        Ok(())
    }

    #[test]
    fn residual_stack_keeps_shapes() -> Result<()> {
        let device = Device::Cpu;
        let args = ModelArgs {
            conv_layer: 3,
            use_res: true,
            ..args()
        };
        let model = MultiConvAttnPool::new(&args, &dicts(), &device)?;
        assert_eq!(model.num_conv_layers(), 3);
        let ids = Tensor::new(&[[1u32, 5, 7, 2]], &device)?;
        assert_eq!(model.forward(&ids)?.dims(), &[1, 3]);
        Ok(())
    }

    #[test]
    fn lco_adds_label_correlation() -> Result<()> {
        let device = Device::Cpu;
        let model = ConvAttnPoolLco::new(&args(), &dicts(), &device)?;
        let ids = Tensor::new(&[[4u32, 9]], &device)?;
        assert_eq!(model.forward(&ids)?.dims(), &[1, 3]);
        assert!(model.get_varmap().data().lock().unwrap().contains_key("lco.weight"));
        Ok(())
    }
}
