use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use std::path::Path;

use crate::utils::device::device_label;

/// Registers tensors in `var_map` so that a `VarBuilder` built on it hands
/// them back instead of creating freshly initialized variables.
pub fn create_var_map(var_map: &VarMap, tensor_data: Vec<(String, Tensor)>) -> Result<()> {
    let mut ws = var_map
        .data()
        .lock()
        .map_err(|_| anyhow!("VarMap lock poisoned"))?;

    for (name, tensor) in tensor_data {
        ws.insert(name, Var::from_tensor(&tensor)?);
    }

    Ok(())
}

/// Variables, device and train/eval flag owned by every model.
pub struct ModelState {
    pub varmap: VarMap,
    pub device: Device,
    pub is_training: bool,
}

impl ModelState {
    pub fn new(device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            device: device.clone(),
            is_training: true,
        }
    }

    pub fn var_builder(&self) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device)
    }

    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}

/// Common surface of every ICD classifier built by the factory.
pub trait IcdModel: Send + Sync {
    /// Name used to select this architecture.
    fn model_arch(&self) -> &'static str;

    fn num_labels(&self) -> usize;

    /// Word (or BERT token) ids `(batch, seq)` to label logits `(batch, labels)`.
    /// `TFIDF` takes `(batch, features)` F32 vectors instead.
    fn forward(&self, xs: &Tensor) -> Result<Tensor, candle_core::Error>;

    fn state(&self) -> &ModelState;

    fn state_mut(&mut self) -> &mut ModelState;

    /// Encodes label descriptions `(labels, desc_len)` for zero-shot labels.
    /// Only models built with description regularization return a tensor.
    fn embed_descriptions(&self, _desc: &Tensor) -> Result<Option<Tensor>, candle_core::Error> {
        Ok(None)
    }

    /// Set model to evaluation mode for inference
    /// This disables dropout.
    fn set_evaluation_mode(&mut self) {
        self.state_mut().is_training = false;
    }

    fn set_training_mode(&mut self) {
        self.state_mut().is_training = true;
    }

    fn is_training(&self) -> bool {
        self.state().is_training
    }

    fn get_device(&self) -> &Device {
        &self.state().device
    }

    fn get_varmap(&self) -> &VarMap {
        &self.state().varmap
    }

    fn get_mut_varmap(&mut self) -> &mut VarMap {
        &mut self.state_mut().varmap
    }

    fn num_parameters(&self) -> usize {
        self.state().num_parameters()
    }

    /// Load weights from a safetensors file into the existing variables.
    /// Missing tensors or shape mismatches are returned as errors.
    fn load_weights(&mut self, path: &Path) -> Result<()> {
        info!(
            "Loading {} model weights from: {:?}",
            self.model_arch(),
            path
        );
        self.get_mut_varmap().load(path)?;
        Ok(())
    }

    /// Save model weights to a file in safetensors format.
    fn save(&self, path: &Path) -> Result<()> {
        info!("Saving {} model weights to: {:?}", self.model_arch(), path);
        self.get_varmap().save(path)?;
        Ok(())
    }

    fn print_summary(&self) {
        println!("{} Summary:", self.model_arch());
        println!("Labels: {}", self.num_labels());
        println!("Parameters: {}", self.num_parameters());
        println!("Tensors: {}", self.get_varmap().all_vars().len());
        println!("Device: {}", device_label(self.get_device()));
    }
}
