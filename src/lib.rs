#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]
//! Graphormer: a transformer encoder for graph-structured data.
//!
//! Graphs are preprocessed into shortest-path and edge-path tensors
//! ([`data::preprocess_item`]), padded into a [`data::GraphBatch`] by
//! [`data::collate`], and encoded by [`GraphormerGraphEncoder`], which
//! biases every attention head with the graph structure.
extern crate ndarray;
extern crate ndarray_rand;
extern crate num;
extern crate rand;

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod model;
pub mod modules;
pub mod nn;
pub mod tensorshape;
pub mod util;

#[cfg(test)]
mod test_util;

pub use config::{EdgeType, GraphormerConfig};
pub use error::{GraphormerError, Result};
pub use model::GraphormerModel;
pub use modules::{
    GraphAttnBias, GraphNodeFeature, GraphormerGraphEncoder, GraphormerGraphEncoderLayer,
    MultiheadAttention,
};

pub type GraphormerFloat = f64;
