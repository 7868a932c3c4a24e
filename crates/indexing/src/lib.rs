//! Embedding and reference-dataset indexing.

pub mod datasets;
pub mod embedder;

pub use datasets::{documents_for, rebuild_index, SeedDoc};
pub use embedder::{shared, EmbeddingFunction, FastembedEmbedder};
