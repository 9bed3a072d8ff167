//! Model hyperparameters, loadable from JSON.
use crate::error::{GraphormerError, Result};
use crate::modules::EncoderLayerConfig;
use crate::nn::get_activation_fn;
use crate::GraphormerFloat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// How edge features enter the attention bias.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Edge features along the whole shortest path, one learned map per hop.
    MultiHop,
    /// Only the features of a direct edge.
    Single,
}

impl Default for EdgeType {
    fn default() -> Self {
        Self::MultiHop
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GraphormerConfig {
    pub num_atoms: usize,
    pub num_in_degree: usize,
    pub num_out_degree: usize,
    pub num_edges: usize,
    pub num_spatial: usize,
    pub num_edge_dis: usize,
    pub edge_type: EdgeType,
    /// Hops of edge input kept per pair; 0 keeps all of them.
    pub multi_hop_max_dist: usize,
    /// Pairs at least this far apart are masked out of attention.
    pub spatial_pos_max: i64,
    /// Larger graphs are dropped at collation.
    pub max_nodes: usize,
    pub encoder_layers: usize,
    pub encoder_embed_dim: usize,
    pub encoder_ffn_embed_dim: usize,
    pub encoder_attention_heads: usize,
    pub dropout: GraphormerFloat,
    pub attention_dropout: GraphormerFloat,
    pub act_dropout: GraphormerFloat,
    pub layerdrop: GraphormerFloat,
    pub encoder_normalize_before: bool,
    pub pre_layernorm: bool,
    pub apply_graphormer_init: bool,
    pub activation_fn: String,
    pub embed_scale: Option<GraphormerFloat>,
    pub num_classes: usize,
    pub remove_head: bool,
    pub share_encoder_input_output_embed: bool,
    /// Accepted for checkpoint compatibility, no effect without gradients.
    pub freeze_embeddings: bool,
    pub n_trans_layers_to_freeze: usize,
    pub q_noise: GraphormerFloat,
    pub qn_block_size: usize,
}

impl Default for GraphormerConfig {
    fn default() -> Self {
        Self {
            num_atoms: 512 * 9,
            num_in_degree: 512,
            num_out_degree: 512,
            num_edges: 512 * 3,
            num_spatial: 512,
            num_edge_dis: 128,
            edge_type: EdgeType::MultiHop,
            multi_hop_max_dist: 5,
            spatial_pos_max: 1024,
            max_nodes: 128,
            encoder_layers: 6,
            encoder_embed_dim: 1024,
            encoder_ffn_embed_dim: 4096,
            encoder_attention_heads: 8,
            dropout: 0.1,
            attention_dropout: 0.1,
            act_dropout: 0.,
            layerdrop: 0.,
            encoder_normalize_before: true,
            pre_layernorm: false,
            apply_graphormer_init: false,
            activation_fn: "gelu".to_string(),
            embed_scale: None,
            num_classes: 1,
            remove_head: false,
            share_encoder_input_output_embed: false,
            freeze_embeddings: false,
            n_trans_layers_to_freeze: 0,
            q_noise: 0.,
            qn_block_size: 8,
        }
    }
}

impl GraphormerConfig {
    pub fn base() -> Self {
        Self {
            encoder_layers: 12,
            encoder_embed_dim: 768,
            encoder_ffn_embed_dim: 768,
            encoder_attention_heads: 32,
            apply_graphormer_init: true,
            ..Self::default()
        }
    }

    pub fn slim() -> Self {
        Self {
            encoder_layers: 12,
            encoder_embed_dim: 80,
            encoder_ffn_embed_dim: 80,
            encoder_attention_heads: 8,
            apply_graphormer_init: true,
            ..Self::default()
        }
    }

    pub fn large() -> Self {
        Self {
            encoder_layers: 24,
            encoder_embed_dim: 1024,
            encoder_ffn_embed_dim: 1024,
            encoder_attention_heads: 32,
            apply_graphormer_init: true,
            ..Self::default()
        }
    }

    /// Looks a preset up by name: `default`, `base`, `slim` or `large`.
    ///
    /// # Errors
    /// `InvalidConfig` for any other name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "default" => Ok(Self::default()),
            "base" => Ok(Self::base()),
            "slim" => Ok(Self::slim()),
            "large" => Ok(Self::large()),
            other => Err(GraphormerError::InvalidConfig(format!(
                "unknown preset {}",
                other
            ))),
        }
    }

    /// Reads and validates a JSON config. Missing fields take their defaults.
    ///
    /// # Errors
    /// On IO or parse failure, or if the config does not validate.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `InvalidConfig` describing the first inconsistent field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GraphormerError::InvalidConfig(msg));
        if self.encoder_attention_heads == 0 {
            return invalid("encoder_attention_heads must be at least 1".to_string());
        }
        if self.encoder_embed_dim % self.encoder_attention_heads != 0 {
            return invalid(format!(
                "encoder_embed_dim ({}) must be divisible by encoder_attention_heads ({})",
                self.encoder_embed_dim, self.encoder_attention_heads
            ));
        }
        for (name, p) in [
            ("dropout", self.dropout),
            ("attention_dropout", self.attention_dropout),
            ("act_dropout", self.act_dropout),
        ] {
            if !(0. ..1.).contains(&p) {
                return invalid(format!("{} must be in [0, 1), got {}", name, p));
            }
        }
        if !(0. ..=1.).contains(&self.layerdrop) {
            return invalid(format!("layerdrop must be in [0, 1], got {}", self.layerdrop));
        }
        if self.q_noise != 0. {
            return invalid("quantization noise is not supported".to_string());
        }
        if self.share_encoder_input_output_embed {
            return invalid("sharing input and output embeddings is not supported".to_string());
        }
        if self.edge_type == EdgeType::MultiHop && self.multi_hop_max_dist > self.num_edge_dis {
            return invalid(format!(
                "multi_hop_max_dist ({}) exceeds num_edge_dis ({})",
                self.multi_hop_max_dist, self.num_edge_dis
            ));
        }
        if self.n_trans_layers_to_freeze > self.encoder_layers {
            return invalid(format!(
                "cannot freeze {} of {} layers",
                self.n_trans_layers_to_freeze, self.encoder_layers
            ));
        }
        get_activation_fn(&self.activation_fn)?;
        Ok(())
    }

    pub fn layer_config(&self) -> EncoderLayerConfig {
        EncoderLayerConfig {
            embedding_dim: self.encoder_embed_dim,
            ffn_embedding_dim: self.encoder_ffn_embed_dim,
            num_attention_heads: self.encoder_attention_heads,
            dropout: self.dropout,
            attention_dropout: self.attention_dropout,
            activation_dropout: self.act_dropout,
            activation_fn: self.activation_fn.clone(),
            pre_layernorm: self.pre_layernorm,
        }
    }
}
