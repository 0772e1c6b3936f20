use anyhow::{anyhow, Result};
use candle_core::Tensor;
use std::path::Path;

use crate::building_blocks::attention::{DescriptionEncoder, LabelAttention};
use crate::building_blocks::bert::BertBackbone;
use crate::building_blocks::embedding::WordEmbedding;
use crate::config::ModelArgs;
use crate::models::model_interface::ModelState;
use crate::utils::embeddings::{code_embedding_matrix, load_code_embeddings};
use crate::utils::lookups::Dicts;

pub(crate) const EMBED: &str = "embed";
pub(crate) const DESC_EMBED: &str = "desc_embed";
pub(crate) const OUTPUT: &str = "output";
pub(crate) const BERT: &str = "bert";

/// Word embedding registered under `name`, with the run's dropout.
pub(crate) fn word_embedding(
    state: &ModelState,
    args: &ModelArgs,
    dicts: &Dicts,
    name: &str,
    dropout: f32,
) -> Result<WordEmbedding> {
    WordEmbedding::new(
        &state.varmap,
        state.var_builder().pp(name),
        name,
        args.embed_file.as_deref(),
        dicts.vocab_size(),
        args.embed_size,
        dropout,
    )
}

/// `(labels, dim)` initial label weights when `code_emb` is configured.
pub(crate) fn label_init(
    state: &ModelState,
    args: &ModelArgs,
    dicts: &Dicts,
    dim: usize,
) -> Result<Option<Tensor>> {
    let path = match args.code_emb.as_deref() {
        Some(path) => path,
        None => return Ok(None),
    };
    let code_embs = load_code_embeddings(path)?;
    let labels: Vec<&str> = dicts.ind2c.values().map(String::as_str).collect();
    log::info!("Initializing label attention from code embeddings {:?}", path);
    Ok(Some(code_embedding_matrix(&code_embs, &labels, dim, &state.device)?))
}

/// Label attention output layer registered under `output`.
pub(crate) fn label_attention(
    state: &ModelState,
    args: &ModelArgs,
    dicts: &Dicts,
    in_dim: usize,
) -> Result<LabelAttention> {
    let init = label_init(state, args, dicts, in_dim)?;
    LabelAttention::new(
        &state.varmap,
        state.var_builder().pp(OUTPUT),
        OUTPUT,
        in_dim,
        dicts.num_labels(),
        init.as_ref(),
    )
}

/// Description encoder, built only when `lmbda > 0`.
pub(crate) fn description_encoder(
    state: &ModelState,
    args: &ModelArgs,
    dicts: &Dicts,
    num_filter_maps: usize,
    kernel: usize,
) -> Result<Option<DescriptionEncoder>> {
    if !args.uses_descriptions() {
        return Ok(None);
    }
    let embed = word_embedding(state, args, dicts, DESC_EMBED, 0.0)?;
    Ok(Some(DescriptionEncoder::new(
        embed,
        num_filter_maps,
        kernel,
        state.var_builder(),
    )?))
}

pub(crate) fn bert_backbone(state: &ModelState, args: &ModelArgs, arch: &str) -> Result<BertBackbone> {
    let bert_dir: &Path = args
        .bert_dir
        .as_deref()
        .ok_or_else(|| anyhow!("bert_dir is required for the {} model", arch))?;
    BertBackbone::load(
        bert_dir,
        &state.varmap,
        state.var_builder().pp(BERT),
        BERT,
        &state.device,
    )
}

pub(crate) fn encode_descriptions(
    encoder: Option<&DescriptionEncoder>,
    desc: &Tensor,
) -> candle_core::Result<Option<Tensor>> {
    encoder.map(|e| e.forward(desc)).transpose()
}
