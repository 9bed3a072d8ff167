use crate::config::{EdgeType, GraphormerConfig};
use crate::data::GraphBatch;
use crate::error::{GraphormerError, Result};
use crate::nn::init::init_params;
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::Embedding;
use crate::util::{div_leading, mean_axis_or_zeros};
use crate::GraphormerFloat;
use ndarray::{s, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-head additive attention bias derived from the graph structure.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphAttnBias {
    num_heads: usize,
    multi_hop_max_dist: usize,
    edge_type: EdgeType,
    edge_encoder: Embedding,
    /// One `H x H` map per hop, flattened; multi-hop only.
    edge_dis_encoder: Option<Embedding>,
    spatial_pos_encoder: Embedding,
    graph_token_virtual_distance: Embedding,
}

impl GraphAttnBias {
    pub fn new<R: Rng + ?Sized>(config: &GraphormerConfig, rng: &mut R) -> Self {
        let num_heads = config.encoder_attention_heads;
        let edge_encoder = Embedding::new(config.num_edges + 1, num_heads, Some(0), rng);
        let edge_dis_encoder = (config.edge_type == EdgeType::MultiHop)
            .then(|| Embedding::new(config.num_edge_dis * num_heads * num_heads, 1, None, rng));
        let mut bias = Self {
            num_heads,
            multi_hop_max_dist: config.multi_hop_max_dist,
            edge_type: config.edge_type,
            edge_encoder,
            edge_dis_encoder,
            spatial_pos_encoder: Embedding::new(config.num_spatial, num_heads, Some(0), rng),
            graph_token_virtual_distance: Embedding::new(1, num_heads, None, rng),
        };
        init_params(&mut bias, config.encoder_layers, rng);
        bias
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn edge_type(&self) -> EdgeType {
        self.edge_type
    }

    pub fn multi_hop_max_dist(&self) -> usize {
        self.multi_hop_max_dist
    }

    /// `[B, H, N + 1, N + 1]` bias, the batch's `attn_bias` masks included.
    ///
    /// # Errors
    /// If the batch is inconsistent, holds ids beyond the embedding tables,
    /// or carries more hops than there are per-hop edge maps.
    pub fn forward(&self, batch: &GraphBatch) -> Result<Array4<GraphormerFloat>> {
        batch.validate()?;
        let (n_graph, n_node, h) = (batch.num_graphs(), batch.max_nodes(), self.num_heads);
        let input_bias = batch.attn_bias.view().insert_axis(Axis(1));
        let mut bias = Array4::<GraphormerFloat>::zeros((n_graph, h, n_node + 1, n_node + 1));
        bias += &input_bias;

        let spatial = self
            .spatial_pos_encoder
            .forward(&batch.spatial_pos)?
            .permuted_axes([0, 3, 1, 2]);
        let mut nodes = bias.slice_mut(s![.., .., 1.., 1..]);
        nodes += &spatial;

        let virtual_distance = self.graph_token_virtual_distance.weight();
        let t = virtual_distance.row(0).insert_axis(Axis(1));
        let mut to_token = bias.slice_mut(s![.., .., 1.., 0]);
        to_token += &t;
        let mut from_token = bias.slice_mut(s![.., .., 0, ..]);
        from_token += &t;

        let edge = match self.edge_type {
            EdgeType::MultiHop => self.multi_hop_edge_bias(batch)?,
            EdgeType::Single => {
                let encoded = self.edge_encoder.forward(&batch.attn_edge_type)?;
                mean_axis_or_zeros(&encoded, Axis(3)).permuted_axes([0, 3, 1, 2])
            }
        };
        let mut nodes = bias.slice_mut(s![.., .., 1.., 1..]);
        nodes += &edge;

        // Re-apply the input masks on top of the learned terms.
        bias += &input_bias;
        Ok(bias)
    }

    /// Edge features averaged along each shortest path: `[B, H, N, N]`.
    fn multi_hop_edge_bias(&self, batch: &GraphBatch) -> Result<Array4<GraphormerFloat>> {
        let (n_graph, n_node, h) = (batch.num_graphs(), batch.max_nodes(), self.num_heads);
        let edge_dis = self
            .edge_dis_encoder
            .as_ref()
            .ok_or_else(|| GraphormerError::InvalidConfig("multi-hop edges need edge_dis_encoder".to_string()))?;

        // Hop count of every pair; padding and the diagonal count as one hop.
        let mut hops_per_pair = batch
            .spatial_pos
            .mapv(|sp| if sp == 0 { 1 } else if sp > 1 { sp - 1 } else { sp });
        let mut edge_input = batch.edge_input.view();
        if self.multi_hop_max_dist > 0 {
            let limit = self.multi_hop_max_dist as i64;
            hops_per_pair.mapv_inplace(|sp| sp.clamp(0, limit));
            let kept = edge_input.shape()[3].min(self.multi_hop_max_dist);
            edge_input = edge_input.slice_move(s![.., .., .., ..kept, ..]);
        }
        let max_dist = edge_input.shape()[3];
        let num_edge_dis = edge_dis.num_embeddings() / (h * h).max(1);
        if max_dist > num_edge_dis {
            return Err(GraphormerError::IndexOutOfRange {
                what: "edge distance",
                index: max_dist as i64,
                size: num_edge_dis,
            });
        }
        let maps = edge_dis.weight().into_shape((num_edge_dis, h, h))?;

        let encoded = self.edge_encoder.forward(&edge_input.to_owned())?;
        let encoded = mean_axis_or_zeros(&encoded, Axis(4));
        let mut summed = Array4::<GraphormerFloat>::zeros((n_graph, n_node, n_node, h));
        for d in 0..max_dist {
            let hop = encoded.slice(s![.., .., .., d, ..]);
            let mapped = hop
                .to_shape((n_graph * n_node * n_node, h))?
                .dot(&maps.slice(s![d, .., ..]));
            summed += &mapped.into_shape((n_graph, n_node, n_node, h))?;
        }
        div_leading(&mut summed, &hops_per_pair.mapv(|sp| sp as GraphormerFloat));
        Ok(summed.permuted_axes([0, 3, 1, 2]))
    }
}

impl Module for GraphAttnBias {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.edge_encoder.visit(f);
        self.edge_dis_encoder.visit(f);
        self.spatial_pos_encoder.visit(f);
        self.graph_token_virtual_distance.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.edge_encoder.visit_mut(f);
        self.edge_dis_encoder.visit_mut(f);
        self.spatial_pos_encoder.visit_mut(f);
        self.graph_token_virtual_distance.visit_mut(f);
    }
}
