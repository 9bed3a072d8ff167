use super::attn_bias::GraphAttnBias;
use super::encoder_layer::GraphormerGraphEncoderLayer;
use super::layer_drop::LayerDropModuleList;
use super::node_feature::GraphNodeFeature;
use crate::config::GraphormerConfig;
use crate::data::GraphBatch;
use crate::error::{GraphormerError, Result};
use crate::nn::init::init_graphormer_params;
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::{Dropout, LayerNorm, TrainRng};
use crate::tensorshape::TensorShape;
use crate::GraphormerFloat;
use log::debug;
use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Optional inputs of [`GraphormerGraphEncoder::forward`].
#[derive(Clone, Copy, Debug, Default)]
pub struct EncoderOptions<'a> {
    /// `[B, N, C]` added to the node embeddings (not the graph token).
    pub perturb: Option<&'a Array3<GraphormerFloat>>,
    /// Keep only the final state instead of one state per layer.
    pub last_state_only: bool,
    /// `[B, N + 1, C]` used in place of the node embeddings.
    pub token_embeddings: Option<&'a Array3<GraphormerFloat>>,
    /// `[N + 1, N + 1]` added to every attention score.
    pub attn_mask: Option<&'a Array2<GraphormerFloat>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EncoderOutput {
    /// `[B, N + 1, C]` per state: the embeddings, then one per layer run.
    pub inner_states: Vec<Array3<GraphormerFloat>>,
    /// `[B, C]`, the final graph token.
    pub graph_rep: Array2<GraphormerFloat>,
}

/// Graph embedding, structural attention bias and a stack of encoder layers.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphormerGraphEncoder {
    embedding_dim: usize,
    apply_graphormer_init: bool,
    dropout_module: Dropout,
    embed_scale: Option<GraphormerFloat>,
    graph_node_feature: GraphNodeFeature,
    graph_attn_bias: GraphAttnBias,
    emb_layer_norm: Option<LayerNorm>,
    layers: LayerDropModuleList<GraphormerGraphEncoderLayer>,
    final_layer_norm: Option<LayerNorm>,
}

impl GraphormerGraphEncoder {
    /// # Errors
    /// If `config` does not validate.
    pub fn new<R: Rng + ?Sized>(config: &GraphormerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let dim = config.encoder_embed_dim;
        let graph_node_feature = GraphNodeFeature::new(config, rng);
        let graph_attn_bias = GraphAttnBias::new(config, rng);
        let layer_config = config.layer_config();
        let layers = (0..config.encoder_layers)
            .map(|_| GraphormerGraphEncoderLayer::new(&layer_config, rng))
            .collect::<Result<Vec<_>>>()?;

        let mut encoder = Self {
            embedding_dim: dim,
            apply_graphormer_init: config.apply_graphormer_init,
            dropout_module: Dropout::new(config.dropout)?,
            embed_scale: config.embed_scale,
            graph_node_feature,
            graph_attn_bias,
            emb_layer_norm: config.encoder_normalize_before.then(|| LayerNorm::new(dim)),
            layers: LayerDropModuleList::new(config.layerdrop, layers)?,
            final_layer_norm: config.pre_layernorm.then(|| LayerNorm::new(dim)),
        };
        if config.apply_graphormer_init {
            init_graphormer_params(&mut encoder, rng);
        }
        if config.freeze_embeddings || config.n_trans_layers_to_freeze > 0 {
            debug!("parameter freezing has no effect on inference");
        }
        debug!(
            "built graph encoder: {} layers, dim {}, {} heads, {} parameters",
            encoder.layers.len(),
            dim,
            config.encoder_attention_heads,
            encoder.num_parameters()
        );
        Ok(encoder)
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn applies_graphormer_init(&self) -> bool {
        self.apply_graphormer_init
    }

    pub fn graph_node_feature(&self) -> &GraphNodeFeature {
        &self.graph_node_feature
    }

    pub fn graph_attn_bias(&self) -> &GraphAttnBias {
        &self.graph_attn_bias
    }

    pub fn layers(&self) -> &LayerDropModuleList<GraphormerGraphEncoderLayer> {
        &self.layers
    }

    /// Encodes a batch. Pass an RNG to run in training mode (dropout and
    /// LayerDrop), `None` to evaluate.
    ///
    /// # Errors
    /// If the batch is inconsistent, its ids overflow the embedding tables, or
    /// an optional input has the wrong shape.
    pub fn forward(
        &self,
        batch: &GraphBatch,
        options: EncoderOptions<'_>,
        mut rng: TrainRng<'_>,
    ) -> Result<EncoderOutput> {
        batch.validate()?;
        let (n_graph, n_node) = (batch.num_graphs(), batch.max_nodes());
        if batch.x.shape()[2] == 0 {
            return Err(GraphormerError::InvalidGraph(
                "nodes need at least one feature column".to_string(),
            ));
        }
        // A node is padding when its first feature id is the padding id.
        let mut padding_mask = Array2::from_elem((n_graph, n_node + 1), false);
        padding_mask
            .slice_mut(s![.., 1..])
            .assign(&batch.x.slice(s![.., .., 0]).mapv(|id| id == 0));

        let mut x = match options.token_embeddings {
            Some(tokens) => {
                TensorShape::from(vec![n_graph, n_node + 1, self.embedding_dim])
                    .check("token_embeddings", tokens.shape())?;
                tokens.clone()
            }
            None => self.graph_node_feature.forward(batch)?,
        };
        if let Some(perturb) = options.perturb {
            TensorShape::from(vec![n_graph, n_node, self.embedding_dim]).check("perturb", perturb.shape())?;
            let mut nodes = x.slice_mut(s![.., 1.., ..]);
            nodes += perturb;
        }

        let attn_bias = self.graph_attn_bias.forward(batch)?;

        if let Some(scale) = self.embed_scale {
            x *= scale;
        }
        if let Some(norm) = &self.emb_layer_norm {
            norm.forward_inplace(&mut x)?;
        }
        let mut x = self.dropout_module.forward(x, rng.as_deref_mut());

        let mut inner_states = Vec::new();
        if !options.last_state_only {
            inner_states.push(x.clone());
        }
        for layer in self.layers.active(rng.as_deref_mut()) {
            let (next, _) = layer.forward(
                x,
                Some(&attn_bias),
                options.attn_mask,
                Some(&padding_mask),
                rng.as_deref_mut(),
            )?;
            x = next;
            if !options.last_state_only {
                inner_states.push(x.clone());
            }
        }

        if let Some(norm) = &self.final_layer_norm {
            norm.forward_inplace(&mut x)?;
            if let Some(last) = inner_states.last_mut() {
                last.assign(&x);
            }
        }
        let graph_rep = x.slice(s![.., 0, ..]).to_owned();
        if options.last_state_only {
            inner_states = vec![x];
        }
        Ok(EncoderOutput {
            inner_states,
            graph_rep,
        })
    }

    /// Like [`GraphormerGraphEncoder::forward`], with the inner states stacked
    /// into one `[L, B, N + 1, C]` tensor.
    ///
    /// # Errors
    /// As [`GraphormerGraphEncoder::forward`].
    pub fn forward_stacked(
        &self,
        batch: &GraphBatch,
        options: EncoderOptions<'_>,
        rng: TrainRng<'_>,
    ) -> Result<(Array4<GraphormerFloat>, Array2<GraphormerFloat>)> {
        let out = self.forward(batch, options, rng)?;
        let views: Vec<ArrayView3<GraphormerFloat>> = out.inner_states.iter().map(|state| state.view()).collect();
        Ok((ndarray::stack(Axis(0), &views)?, out.graph_rep))
    }
}

impl Module for GraphormerGraphEncoder {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.graph_node_feature.visit(f);
        self.graph_attn_bias.visit(f);
        self.emb_layer_norm.visit(f);
        self.layers.visit(f);
        self.final_layer_norm.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.graph_node_feature.visit_mut(f);
        self.graph_attn_bias.visit_mut(f);
        self.emb_layer_norm.visit_mut(f);
        self.layers.visit_mut(f);
        self.final_layer_norm.visit_mut(f);
    }
}
