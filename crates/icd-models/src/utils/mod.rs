pub mod device;
pub mod embeddings;
pub mod lookups;
