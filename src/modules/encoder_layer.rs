use super::multihead_attention::{AttentionMasks, AttnWeights, MultiheadAttention, NeedWeights};
use crate::error::Result;
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::{get_activation_fn, Activation, Dropout, LayerNorm, Linear, TrainRng};
use crate::GraphormerFloat;
use ndarray::{Array2, Array3, Array4};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct EncoderLayerConfig {
    pub embedding_dim: usize,
    pub ffn_embedding_dim: usize,
    pub num_attention_heads: usize,
    pub dropout: GraphormerFloat,
    pub attention_dropout: GraphormerFloat,
    pub activation_dropout: GraphormerFloat,
    pub activation_fn: String,
    pub pre_layernorm: bool,
}

impl Default for EncoderLayerConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 768,
            ffn_embedding_dim: 3072,
            num_attention_heads: 8,
            dropout: 0.1,
            attention_dropout: 0.1,
            activation_dropout: 0.1,
            activation_fn: "relu".to_string(),
            pre_layernorm: false,
        }
    }
}

/// Transformer block: self attention then a feed-forward network, each with a
/// residual connection and a layer norm placed before (pre-LN) or after
/// (post-LN) the sublayer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphormerGraphEncoderLayer {
    embedding_dim: usize,
    num_attention_heads: usize,
    pre_layernorm: bool,
    dropout_module: Dropout,
    activation_dropout_module: Dropout,
    activation_fn: Box<dyn Activation>,
    self_attn: MultiheadAttention,
    self_attn_layer_norm: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    final_layer_norm: LayerNorm,
}

impl GraphormerGraphEncoderLayer {
    /// # Errors
    /// On an unknown activation, a dropout outside `[0, 1)` or heads that do
    /// not divide the embedding width.
    pub fn new<R: Rng + ?Sized>(config: &EncoderLayerConfig, rng: &mut R) -> Result<Self> {
        let dim = config.embedding_dim;
        Ok(Self {
            embedding_dim: dim,
            num_attention_heads: config.num_attention_heads,
            pre_layernorm: config.pre_layernorm,
            dropout_module: Dropout::new(config.dropout)?,
            activation_dropout_module: Dropout::new(config.activation_dropout)?,
            activation_fn: get_activation_fn(&config.activation_fn)?,
            self_attn: MultiheadAttention::new(
                dim,
                config.num_attention_heads,
                None,
                None,
                config.attention_dropout,
                true,
                true,
                rng,
            )?,
            self_attn_layer_norm: LayerNorm::new(dim),
            fc1: Linear::new(dim, config.ffn_embedding_dim, true, rng),
            fc2: Linear::new(config.ffn_embedding_dim, dim, true, rng),
            final_layer_norm: LayerNorm::new(dim),
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn num_attention_heads(&self) -> usize {
        self.num_attention_heads
    }

    pub fn is_pre_layernorm(&self) -> bool {
        self.pre_layernorm
    }

    pub fn self_attn(&self) -> &MultiheadAttention {
        &self.self_attn
    }

    /// Runs the block on `x [B, T, C]`.
    ///
    /// The attention weights are never requested, so the second element is
    /// always `None`.
    ///
    /// # Errors
    /// If `x` or any mask disagrees with the layer shapes.
    pub fn forward(
        &self,
        x: Array3<GraphormerFloat>,
        self_attn_bias: Option<&Array4<GraphormerFloat>>,
        self_attn_mask: Option<&Array2<GraphormerFloat>>,
        self_attn_padding_mask: Option<&Array2<bool>>,
        mut rng: TrainRng<'_>,
    ) -> Result<(Array3<GraphormerFloat>, Option<AttnWeights>)> {
        let residual = x;
        let mut x = residual.clone();
        if self.pre_layernorm {
            self.self_attn_layer_norm.forward_inplace(&mut x)?;
        }
        let masks = AttentionMasks {
            attn_bias: self_attn_bias,
            key_padding_mask: self_attn_padding_mask,
            attn_mask: self_attn_mask,
        };
        let (attn, _) = self
            .self_attn
            .forward(&x, &x, &x, masks, NeedWeights::No, rng.as_deref_mut())?;
        let mut x = self.dropout_module.forward(attn, rng.as_deref_mut()) + &residual;
        if !self.pre_layernorm {
            self.self_attn_layer_norm.forward_inplace(&mut x)?;
        }

        let residual = x.clone();
        if self.pre_layernorm {
            self.final_layer_norm.forward_inplace(&mut x)?;
        }
        let mut hidden = self.fc1.forward(&x)?;
        self.activation_fn.apply_inplace(hidden.view_mut().into_dyn());
        let hidden = self.activation_dropout_module.forward(hidden, rng.as_deref_mut());
        let x = self.fc2.forward(&hidden)?;
        let mut x = self.dropout_module.forward(x, rng.as_deref_mut()) + &residual;
        if !self.pre_layernorm {
            self.final_layer_norm.forward_inplace(&mut x)?;
        }
        Ok((x, None))
    }
}

impl Module for GraphormerGraphEncoderLayer {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.self_attn.visit(f);
        self.self_attn_layer_norm.visit(f);
        self.fc1.visit(f);
        self.fc2.visit(f);
        self.final_layer_norm.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.self_attn.visit_mut(f);
        self.self_attn_layer_norm.visit_mut(f);
        self.fc1.visit_mut(f);
        self.fc2.visit_mut(f);
        self.final_layer_norm.visit_mut(f);
    }
}
