pub mod build;
pub mod code_vecs;
pub mod params;
