use crate::config::GraphormerConfig;
use crate::data::GraphBatch;
use crate::error::Result;
use crate::nn::init::init_params;
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::Embedding;
use crate::GraphormerFloat;
use ndarray::{s, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Input embedding of every node plus the graph token.
///
/// A node embeds as the sum of its feature embeddings and its in- and
/// out-degree embeddings. Row 0 of every graph holds the learned graph token.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphNodeFeature {
    num_heads: usize,
    num_atoms: usize,
    num_in_degree: usize,
    num_out_degree: usize,
    hidden_dim: usize,
    atom_encoder: Embedding,
    in_degree_encoder: Embedding,
    out_degree_encoder: Embedding,
    graph_token: Embedding,
}

impl GraphNodeFeature {
    pub fn new<R: Rng + ?Sized>(config: &GraphormerConfig, rng: &mut R) -> Self {
        let hidden_dim = config.encoder_embed_dim;
        let mut feature = Self {
            num_heads: config.encoder_attention_heads,
            num_atoms: config.num_atoms,
            num_in_degree: config.num_in_degree,
            num_out_degree: config.num_out_degree,
            hidden_dim,
            atom_encoder: Embedding::new(config.num_atoms + 1, hidden_dim, Some(0), rng),
            in_degree_encoder: Embedding::new(config.num_in_degree, hidden_dim, Some(0), rng),
            out_degree_encoder: Embedding::new(config.num_out_degree, hidden_dim, Some(0), rng),
            graph_token: Embedding::new(1, hidden_dim, None, rng),
        };
        init_params(&mut feature, config.encoder_layers, rng);
        feature
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_atoms(&self) -> usize {
        self.num_atoms
    }

    pub fn num_in_degree(&self) -> usize {
        self.num_in_degree
    }

    pub fn num_out_degree(&self) -> usize {
        self.num_out_degree
    }

    pub fn graph_token(&self) -> &Embedding {
        &self.graph_token
    }

    /// `[B, N + 1, hidden_dim]` embeddings, graph token first.
    ///
    /// # Errors
    /// If the batch is inconsistent or holds ids beyond the embedding tables.
    pub fn forward(&self, batch: &GraphBatch) -> Result<Array3<GraphormerFloat>> {
        batch.validate()?;
        let (n_graph, n_node) = (batch.num_graphs(), batch.max_nodes());
        let mut node_feature = self.atom_encoder.forward(&batch.x)?.sum_axis(Axis(2));
        node_feature += &self.in_degree_encoder.forward(&batch.in_degree)?;
        node_feature += &self.out_degree_encoder.forward(&batch.out_degree)?;

        let mut out = Array3::zeros((n_graph, n_node + 1, self.hidden_dim));
        out.slice_mut(s![.., 0, ..])
            .assign(&self.graph_token.weight().row(0));
        out.slice_mut(s![.., 1.., ..]).assign(&node_feature);
        Ok(out)
    }
}

impl Module for GraphNodeFeature {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.atom_encoder.visit(f);
        self.in_degree_encoder.visit(f);
        self.out_degree_encoder.visit(f);
        self.graph_token.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.atom_encoder.visit_mut(f);
        self.in_degree_encoder.visit_mut(f);
        self.out_degree_encoder.visit_mut(f);
        self.graph_token.visit_mut(f);
    }
}
