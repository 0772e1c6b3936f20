pub mod bert;
pub(crate) mod common;
pub mod conv;
pub mod conv_attn;
pub mod factory;
pub mod model_interface;
pub mod multi_res_cnn;
pub mod rnn;
pub mod transformer;
