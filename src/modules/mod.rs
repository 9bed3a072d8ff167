//! The Graphormer building blocks, collected under one namespace.
mod attn_bias;
mod encoder;
mod encoder_layer;
mod layer_drop;
mod multihead_attention;
mod node_feature;

pub use attn_bias::GraphAttnBias;
pub use encoder::{EncoderOptions, EncoderOutput, GraphormerGraphEncoder};
pub use encoder_layer::{EncoderLayerConfig, GraphormerGraphEncoderLayer};
pub use layer_drop::LayerDropModuleList;
pub use multihead_attention::{AttentionMasks, AttnWeights, MultiheadAttention, NeedWeights};
pub use node_feature::GraphNodeFeature;
