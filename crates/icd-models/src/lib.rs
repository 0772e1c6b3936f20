//! icd-models: neural architectures for ICD code assignment from clinical text.
//!
//! The crate builds one of the supported classifiers (RNN, CNN, attention
//! pooling convolutions, transformer variants and BERT heads) from a
//! [`config::ModelArgs`] and the vocabulary/label lookups in
//! [`utils::lookups::Dicts`], places it on the requested device and optionally
//! loads saved weights. It also carries the run bookkeeping helpers
//! ([`params::make_param_dict`]) and description vectors for zero-shot labels
//! ([`code_vecs::build_code_vecs`]).
//!
//! Models are candle modules; weights live in a `VarMap` and are saved and
//! loaded as safetensors.
pub mod building_blocks;
pub mod code_vecs;
pub mod config;
pub mod error;
pub mod models;
pub mod params;
pub mod utils;

pub use error::FactoryError;
pub use models::factory::{pick_model, pick_model_multitask, ModelArch, MODEL_ARCHS};
pub use models::model_interface::IcdModel;
