//! Primitive layers the Graphormer modules are assembled from.
pub mod activation;
pub mod dropout;
pub mod embedding;
pub mod init;
pub mod layer_norm;
pub mod linear;
pub mod module;

pub use activation::{get_activation_fn, Activation};
pub use dropout::{Dropout, TrainRng};
pub use embedding::Embedding;
pub use layer_norm::LayerNorm;
pub use linear::Linear;
pub use module::{Leaf, LeafMut, Module};
