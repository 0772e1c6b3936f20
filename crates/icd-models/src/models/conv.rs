use anyhow::{bail, Result};
use candle_core::{Device, Tensor};
use candle_nn::{Dropout, Linear, Module};

use crate::building_blocks::conv::{max_over_time, SeqConv};
use crate::building_blocks::embedding::{masked_mean, padding_mask, WordEmbedding};
use crate::config::ModelArgs;
use crate::models::common::{word_embedding, EMBED};
use crate::models::model_interface::{IcdModel, ModelState};
use crate::utils::lookups::Dicts;

/// Embedding, convolution, tanh, max over time, dropout, linear output.
pub struct VanillaConv {
    state: ModelState,
    embed: WordEmbedding,
    conv: SeqConv,
    dropout: Dropout,
    output: Linear,
    num_labels: usize,
}

impl VanillaConv {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let maps = args.num_filter_maps();
        let num_labels = dicts.num_labels();

        // dropout is applied after pooling here, not on the embeddings
        let embed = word_embedding(&state, args, dicts, EMBED, 0.0)?;
        let conv = SeqConv::new(embed.embed_size(), maps, args.filter_size()?, state.var_builder().pp("conv"))?;
        let output = candle_nn::linear(maps, num_labels, state.var_builder().pp("fc"))?;

        Ok(Self {
            state,
            embed,
            conv,
            dropout: Dropout::new(args.dropout()),
            output,
            num_labels,
        })
    }
}

impl IcdModel for VanillaConv {
    fn model_arch(&self) -> &'static str {
        "cnn_vanilla"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, false)?;
        let h = self.conv.forward(&x)?.tanh()?;
        let h = max_over_time(&h)?;
        let h = self.dropout.forward(&h, self.state.is_training)?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Max,
    Avg,
}

impl std::str::FromStr for Pool {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "max" => Ok(Pool::Max),
            "avg" | "mean" => Ok(Pool::Avg),
            other => bail!("Unsupported pool {:?}, expected \"max\" or \"avg\"", other),
        }
    }
}

/// Bag-of-words logistic regression: pooled embeddings into a linear layer.
pub struct BowPool {
    state: ModelState,
    embed: WordEmbedding,
    pool: Pool,
    output: Linear,
    num_labels: usize,
}

impl BowPool {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let pool: Pool = args.pool.parse()?;
        let num_labels = dicts.num_labels();

        let embed = word_embedding(&state, args, dicts, EMBED, args.dropout())?;
        let output = candle_nn::linear(embed.embed_size(), num_labels, state.var_builder().pp("final"))?;

        Ok(Self {
            state,
            embed,
            pool,
            output,
            num_labels,
        })
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }
}

impl IcdModel for BowPool {
    fn model_arch(&self) -> &'static str {
        "logreg"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.embed.forward(xs, self.state.is_training)?;
        let pooled = match self.pool {
            Pool::Max => max_over_time(&x)?,
            Pool::Avg => masked_mean(&x, &padding_mask(xs)?)?,
        };
        self.output.forward(&pooled)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Linear classifier over precomputed TF-IDF vectors.
pub struct Tfidf {
    state: ModelState,
    dropout: Dropout,
    output: Linear,
    input_dim: usize,
    num_labels: usize,
}

impl Tfidf {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let input_dim = args.tfidf_dim.unwrap_or_else(|| dicts.vocab_size());
        let num_labels = dicts.num_labels();
        let output = candle_nn::linear(input_dim, num_labels, state.var_builder().pp("final"))?;
        Ok(Self {
            state,
            dropout: Dropout::new(args.dropout()),
            output,
            input_dim,
            num_labels,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }
}

impl IcdModel for Tfidf {
    fn model_arch(&self) -> &'static str {
        "TFIDF"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let x = self.dropout.forward(xs, self.state.is_training)?;
        self.output.forward(&x)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}
