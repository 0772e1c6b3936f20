use anyhow::{bail, Result};
use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module};

use crate::building_blocks::embedding::WordEmbedding;
use crate::building_blocks::rnn::RecurrentEncoder;
use crate::config::ModelArgs;
use crate::models::common::{word_embedding, EMBED};
use crate::models::model_interface::{IcdModel, ModelState};
use crate::utils::lookups::Dicts;

/// Embedding, GRU/LSTM stack, last hidden state, linear output.
pub struct VanillaRnn {
    state: ModelState,
    embed: WordEmbedding,
    rnn: RecurrentEncoder,
    output: Linear,
    num_labels: usize,
}

impl VanillaRnn {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let directions = if args.bidirectional { 2 } else { 1 };
        let rnn_dim = args.rnn_dim();
        if rnn_dim % directions != 0 {
            bail!("rnn_dim {} must be even for a bidirectional rnn", rnn_dim);
        }

        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let rnn = RecurrentEncoder::new(
            args.cell_type(),
            embed.embed_size(),
            rnn_dim / directions,
            args.rnn_layers(),
            args.bidirectional,
            state.var_builder().pp("rnn"),
        )?;
        let num_labels = dicts.num_labels();
        let output = candle_nn::linear(rnn.output_size(), num_labels, state.var_builder().pp("final"))?;

        log::debug!(
            "[VanillaRnn] cell={} layers={} bidirectional={} hidden={}",
            args.cell_type(),
            args.rnn_layers(),
            args.bidirectional,
            rnn.output_size()
        );

        Ok(Self {
            state,
            embed,
            rnn,
            output,
            num_labels,
        })
    }
}

impl IcdModel for VanillaRnn {
    fn model_arch(&self) -> &'static str {
        "rnn"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, self.state.is_training)?;
        let (_, last) = self.rnn.forward(&x)?;
        self.output.forward(&last)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}
