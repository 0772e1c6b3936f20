use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Dropout, Linear, Module};

use crate::building_blocks::attention::LabelAttention;
use crate::building_blocks::bert::BertBackbone;
use crate::building_blocks::conv::SeqConv;
use crate::building_blocks::embedding::{masked_mean, padding_mask};
use crate::config::ModelArgs;
use crate::models::common::{bert_backbone, label_attention};
use crate::models::model_interface::{IcdModel, ModelState};
use crate::utils::lookups::Dicts;

/// BERT sequence output, convolution, tanh, label attention.
pub struct BertConv {
    state: ModelState,
    bert: BertBackbone,
    dropout: Dropout,
    conv: SeqConv,
    output: LabelAttention,
}

impl BertConv {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let maps = args.num_filter_maps();
        let bert = bert_backbone(&state, args, "bert_conv")?;
        let conv = SeqConv::new(
            bert.hidden_size(),
            maps,
            args.filter_size()?,
            state.var_builder().pp("conv"),
        )?;
        let output = label_attention(&state, args, dicts, maps)?;
        Ok(Self {
            state,
            bert,
            dropout: Dropout::new(args.dropout()),
            conv,
            output,
        })
    }
}

impl IcdModel for BertConv {
    fn model_arch(&self) -> &'static str {
        "bert_conv"
    }

    fn num_labels(&self) -> usize {
        self.output.num_labels()
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let h = self.bert.forward(xs)?;
        let h = self.dropout.forward(&h, self.state.is_training)?;
        let h = self.conv.forward(&h)?.tanh()?;
        self.output.forward(&h)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Masked mean of the BERT sequence output into a linear layer.
pub struct BertPooling {
    state: ModelState,
    bert: BertBackbone,
    dropout: Dropout,
    classifier: Linear,
    num_labels: usize,
}

impl BertPooling {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let num_labels = dicts.num_labels();
        let bert = bert_backbone(&state, args, "bert_pooling")?;
        let classifier =
            candle_nn::linear(bert.hidden_size(), num_labels, state.var_builder().pp("classifier"))?;
        Ok(Self {
            state,
            bert,
            dropout: Dropout::new(args.dropout()),
            classifier,
            num_labels,
        })
    }
}

impl IcdModel for BertPooling {
    fn model_arch(&self) -> &'static str {
        "bert_pooling"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let h = self.bert.forward(xs)?;
        let pooled = masked_mean(&h, &padding_mask(xs)?)?;
        let pooled = self.dropout.forward(&pooled, self.state.is_training)?;
        self.classifier.forward(&pooled)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}

/// Sequence classification head on the `[CLS]` position.
pub struct BertSeqCls {
    state: ModelState,
    bert: BertBackbone,
    dropout: Dropout,
    classifier: Linear,
    num_labels: usize,
}

impl BertSeqCls {
    pub fn new(args: &ModelArgs, dicts: &Dicts, device: &Device) -> Result<Self> {
        let state = ModelState::new(device);
        let num_labels = dicts.num_labels();
        let bert = bert_backbone(&state, args, "bert_seq_cls")?;
        let classifier =
            candle_nn::linear(bert.hidden_size(), num_labels, state.var_builder().pp("classifier"))?;
        Ok(Self {
            state,
            bert,
            dropout: Dropout::new(args.dropout()),
            classifier,
            num_labels,
        })
    }
}

impl IcdModel for BertSeqCls {
    fn model_arch(&self) -> &'static str {
        "bert_seq_cls"
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let h = self.bert.forward(xs)?;
        let cls = h.narrow(1, 0, 1)?.squeeze(1)?;
        let cls = self.dropout.forward(&cls, self.state.is_training)?;
        self.classifier.forward(&cls)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }
}
