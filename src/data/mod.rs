//! Graph preprocessing and batching.
pub mod algos;
pub mod collator;
pub mod graph;
pub mod preprocess;

pub use collator::{collate, GraphBatch};
pub use graph::Graph;
pub use preprocess::{convert_to_single_emb, preprocess_item, GraphItem, FEATURE_OFFSET};
