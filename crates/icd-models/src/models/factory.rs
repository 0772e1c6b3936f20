use anyhow::Result;
use candle_core::Device;
use log::info;
use std::fmt;
use std::str::FromStr;

use crate::config::ModelArgs;
use crate::error::FactoryError;
use crate::models::bert::{BertConv, BertPooling, BertSeqCls};
use crate::models::conv::{BowPool, Tfidf, VanillaConv};
use crate::models::conv_attn::{ConvAttnPool, ConvAttnPoolLco, ConvAttnPoolLdep, MultiConvAttnPool};
use crate::models::model_interface::IcdModel;
use crate::models::multi_res_cnn::{
    Cnn, MultiCnn, MultiResCnn, MultiResCnnFeature, OutputLayerModel, ResCnn,
};
use crate::models::rnn::VanillaRnn;
use crate::models::transformer::{Transformer1, Transformer2, Transformer3, Transformer4};
use crate::utils::device::{device_label, resolve_device};
use crate::utils::lookups::Dicts;

/// Multi-task mode with one shared `MultiResCNN` body.
pub const SINGLE_PATH_MTL: &str = "sp-mtl";

// Architectures selectable through `ModelArgs::model`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelArch {
    Rnn,
    CnnVanilla,
    ConvAttn,
    ConvAttnLdep,
    LogReg,
    BertConv,
    BertPooling,
    MultiConvAttn,
    ConvAttnLco,
    Transformer1,
    Transformer2,
    Transformer3,
    Transformer4,
    BertSeqCls,
    Cnn,
    Tfidf,
    MultiCnn,
    ResCnn,
    MultiResCnn,
}

pub const MODEL_ARCHS: &[&str] = &[
    "rnn",
    "cnn_vanilla",
    "conv_attn",
    "conv_attn_ldep",
    "logreg",
    "bert_conv",
    "bert_pooling",
    "multi_conv_attn",
    "conv_attn_lco",
    "transformer1",
    "transformer2",
    "transformer3",
    "transformer4",
    "bert_seq_cls",
    "CNN",
    "TFIDF",
    "MultiCNN",
    "ResCNN",
    "MultiResCNN",
];

impl ModelArch {
    pub const ALL: [ModelArch; 19] = [
        ModelArch::Rnn,
        ModelArch::CnnVanilla,
        ModelArch::ConvAttn,
        ModelArch::ConvAttnLdep,
        ModelArch::LogReg,
        ModelArch::BertConv,
        ModelArch::BertPooling,
        ModelArch::MultiConvAttn,
        ModelArch::ConvAttnLco,
        ModelArch::Transformer1,
        ModelArch::Transformer2,
        ModelArch::Transformer3,
        ModelArch::Transformer4,
        ModelArch::BertSeqCls,
        ModelArch::Cnn,
        ModelArch::Tfidf,
        ModelArch::MultiCnn,
        ModelArch::ResCnn,
        ModelArch::MultiResCnn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelArch::Rnn => "rnn",
            ModelArch::CnnVanilla => "cnn_vanilla",
            ModelArch::ConvAttn => "conv_attn",
            ModelArch::ConvAttnLdep => "conv_attn_ldep",
            ModelArch::LogReg => "logreg",
            ModelArch::BertConv => "bert_conv",
            ModelArch::BertPooling => "bert_pooling",
            ModelArch::MultiConvAttn => "multi_conv_attn",
            ModelArch::ConvAttnLco => "conv_attn_lco",
            ModelArch::Transformer1 => "transformer1",
            ModelArch::Transformer2 => "transformer2",
            ModelArch::Transformer3 => "transformer3",
            ModelArch::Transformer4 => "transformer4",
            ModelArch::BertSeqCls => "bert_seq_cls",
            ModelArch::Cnn => "CNN",
            ModelArch::Tfidf => "TFIDF",
            ModelArch::MultiCnn => "MultiCNN",
            ModelArch::ResCnn => "ResCNN",
            ModelArch::MultiResCnn => "MultiResCNN",
        }
    }

    /// Whether the architecture reads a BERT checkpoint directory.
    pub fn needs_bert(&self) -> bool {
        matches!(
            self,
            ModelArch::BertConv | ModelArch::BertPooling | ModelArch::BertSeqCls
        )
    }

    fn build(&self, args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Box<dyn IcdModel>> {
        let model: Box<dyn IcdModel> = match self {
            ModelArch::Rnn => Box::new(VanillaRnn::new(args, dicts, device)?),
            ModelArch::CnnVanilla => Box::new(VanillaConv::new(args, dicts, device)?),
            ModelArch::ConvAttn => Box::new(ConvAttnPool::new(args, dicts, device)?),
            ModelArch::ConvAttnLdep => Box::new(ConvAttnPoolLdep::new(args, dicts, device)?),
            ModelArch::LogReg => Box::new(BowPool::new(args, dicts, device)?),
            ModelArch::BertConv => Box::new(BertConv::new(args, dicts, device)?),
            ModelArch::BertPooling => Box::new(BertPooling::new(args, dicts, device)?),
            ModelArch::MultiConvAttn => Box::new(MultiConvAttnPool::new(args, dicts, device)?),
            ModelArch::ConvAttnLco => Box::new(ConvAttnPoolLco::new(args, dicts, device)?),
            ModelArch::Transformer1 => Box::new(Transformer1::new(args, dicts, device)?),
            ModelArch::Transformer2 => Box::new(Transformer2::new(args, dicts, device)?),
            ModelArch::Transformer3 => Box::new(Transformer3::new(args, dicts, device)?),
            ModelArch::Transformer4 => Box::new(Transformer4::new(args, dicts, device)?),
            ModelArch::BertSeqCls => Box::new(BertSeqCls::new(args, dicts, device)?),
            ModelArch::Cnn => Box::new(Cnn::new(args, dicts, device)?),
            ModelArch::Tfidf => Box::new(Tfidf::new(args, dicts, device)?),
            ModelArch::MultiCnn => Box::new(MultiCnn::new(args, dicts, device)?),
            ModelArch::ResCnn => Box::new(ResCnn::new(args, dicts, device)?),
            ModelArch::MultiResCnn => Box::new(MultiResCnn::new(args, dicts, device)?),
        };
        Ok(model)
    }
}

impl FromStr for ModelArch {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelArch::ALL
            .iter()
            .find(|arch| arch.as_str() == s)
            .copied()
            .ok_or_else(|| FactoryError::UnknownModel(s.to_string()))
    }
}

impl fmt::Display for ModelArch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the architecture named by `args.model` for `dicts.ind2c.len()`
/// labels, on the device selected by `args.gpu`.
///
/// An unknown name fails with [`FactoryError::UnknownModel`] before any
/// file is read or variable allocated. When `args.test_model` is set the
/// saved weights are loaded into the fresh model.
pub fn pick_model(args: &ModelArgs, dicts: &Dicts) -> Result<Box<dyn IcdModel>> {
    let arch: ModelArch = args.model.parse()?;
    let device = resolve_device(args.gpu)?;

    let mut model = arch.build(args, dicts, &device)?;

    if let Some(path) = &args.test_model {
        model.load_weights(path)?;
    }

    info!(
        "Built {} model: {} labels, {} parameters, device {}",
        arch,
        model.num_labels(),
        model.num_parameters(),
        device_label(&device)
    );
    Ok(model)
}

/// Builds the shared feature extractor and one output layer per task.
///
/// Only `mode = "sp-mtl"` with `model = "MultiResCNN"` is supported; any
/// other pair fails with [`FactoryError::UnknownModeModel`].
pub fn pick_model_multitask<S: AsRef<str>>(
    args: &ModelArgs,
    dicts: &Dicts,
    tasks: &[S],
) -> Result<(MultiResCnnFeature, Vec<OutputLayerModel>)> {
    let supported = args.mode.as_deref() == Some(SINGLE_PATH_MTL)
        && args.model == ModelArch::MultiResCnn.as_str();
    if !supported {
        return Err(FactoryError::UnknownModeModel {
            mode: args.mode.clone(),
            model: args.model.clone(),
        }
        .into());
    }
    let device = resolve_device(args.gpu)?;

    let mut feature = MultiResCnnFeature::new(args, dicts, &device)?;
    if let Some(path) = &args.test_model {
        feature.load_weights(path)?;
    }
    let heads = tasks
        .iter()
        .map(|task| {
            log::debug!("Building output layer for task {}", task.as_ref());
            OutputLayerModel::new(args, dicts, feature.output_dim(), &device)
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Built {} multi-task model ({}): {} tasks, feature dim {}, device {}",
        args.model,
        SINGLE_PATH_MTL,
        heads.len(),
        feature.output_dim(),
        device_label(&device)
    );
    Ok((feature, heads))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for name in MODEL_ARCHS {
            let arch: ModelArch = name.parse().unwrap();
            assert_eq!(arch.as_str(), *name);
            assert_eq!(arch.to_string(), *name);
        }
        assert_eq!(MODEL_ARCHS.len(), ModelArch::ALL.len());
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_eq!(
            "cnn".parse::<ModelArch>(),
            Err(FactoryError::UnknownModel("cnn".to_string()))
        );
        assert!("Rnn".parse::<ModelArch>().is_err());
    }

    #[test]
    fn bert_variants() {
        let bert: Vec<_> = ModelArch::ALL.iter().filter(|a| a.needs_bert()).collect();
        assert_eq!(bert.len(), 3);
    }
}
