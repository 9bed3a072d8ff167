use super::algos::{floyd_warshall, gen_edge_input, UNREACHABLE};
use super::graph::Graph;
use crate::GraphormerFloat;
use log::trace;
use ndarray::{s, Array1, Array2, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

/// Id range reserved for every categorical feature column.
pub const FEATURE_OFFSET: i64 = 512;

/// A single graph with every structural tensor the encoder consumes, before padding.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphItem {
    /// `[n, F]` feature ids, offset per column.
    pub x: Array2<i64>,
    /// `[n + 1, n + 1]`, zero.
    pub attn_bias: Array2<GraphormerFloat>,
    /// `[n, n, E]` offset edge feature ids plus one, zero where there is no edge.
    pub attn_edge_type: Array3<i64>,
    /// `[n, n]` shortest-path hop counts.
    pub spatial_pos: Array2<i64>,
    pub in_degree: Array1<i64>,
    pub out_degree: Array1<i64>,
    /// `[n, n, max_dist, E]` edge ids along each shortest path, `-1` where unused.
    pub edge_input: Array4<i64>,
    pub target: Option<GraphormerFloat>,
}

impl GraphItem {
    pub fn num_nodes(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_hops(&self) -> usize {
        self.edge_input.shape()[2]
    }
}

/// Shifts column `i` of `x` by `1 + i * offset`, so every column owns its id range.
pub fn convert_to_single_emb(x: &Array2<i64>, offset: i64) -> Array2<i64> {
    let mut out = x.clone();
    for (i, mut col) in out.columns_mut().into_iter().enumerate() {
        col += 1 + i as i64 * offset;
    }
    out
}

pub fn preprocess_item(graph: &Graph) -> GraphItem {
    let n = graph.num_nodes();
    let x = convert_to_single_emb(graph.node_features(), FEATURE_OFFSET);
    let edge_attr = convert_to_single_emb(graph.edge_features(), FEATURE_OFFSET);

    let mut adj = Array2::from_elem((n, n), false);
    let mut attn_edge_type = Array3::zeros((n, n, edge_attr.ncols()));
    for (k, (&u, &v)) in graph.sources().iter().zip(graph.targets()).enumerate() {
        adj[[u, v]] = true;
        let mut slot = attn_edge_type.slice_mut(s![u, v, ..]);
        slot.assign(&edge_attr.row(k));
        slot += 1;
    }

    let (spatial_pos, path) = floyd_warshall(adj.view());
    let max_dist = spatial_pos
        .iter()
        .copied()
        .filter(|&d| d < UNREACHABLE)
        .max()
        .unwrap_or(0) as usize;
    let edge_input = gen_edge_input(max_dist, path.view(), attn_edge_type.view());
    let degree = adj.map_axis(Axis(1), |row| row.iter().filter(|&&a| a).count() as i64);
    trace!(
        "preprocessed graph with {} nodes, {} edges, diameter {}",
        n,
        graph.num_edges(),
        max_dist
    );

    GraphItem {
        x,
        attn_bias: Array2::zeros((n + 1, n + 1)),
        attn_edge_type,
        spatial_pos,
        in_degree: degree.clone(),
        out_degree: degree,
        edge_input,
        target: graph.target(),
    }
}
