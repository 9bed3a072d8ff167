use super::preprocess::FEATURE_OFFSET;
use crate::error::{GraphormerError, Result};
use crate::GraphormerFloat;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// A raw graph with categorical node and edge features.
///
/// Edges are directed; an undirected graph lists both directions.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Graph {
    node_features: Array2<i64>,
    edge_index: Array2<usize>,
    edge_features: Array2<i64>,
    target: Option<GraphormerFloat>,
}

impl Graph {
    /// # Errors
    /// `InvalidGraph` when `edge_index` is not `[2, m]` with node ids below
    /// `n`, when `edge_features` has other than `m` rows, or when a feature
    /// is outside `0..FEATURE_OFFSET - 1`.
    pub fn new(
        node_features: Array2<i64>,
        edge_index: Array2<usize>,
        edge_features: Array2<i64>,
        target: Option<GraphormerFloat>,
    ) -> Result<Self> {
        let graph = Self {
            node_features,
            edge_index,
            edge_features,
            target,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Builds a graph from an edge list, one feature row per edge.
    ///
    /// # Errors
    /// As [`Graph::new`].
    pub fn from_edges(
        node_features: Array2<i64>,
        edges: &[(usize, usize)],
        edge_features: Array2<i64>,
        target: Option<GraphormerFloat>,
    ) -> Result<Self> {
        let edge_index = Array2::from_shape_fn((2, edges.len()), |(r, c)| {
            if r == 0 {
                edges[c].0
            } else {
                edges[c].1
            }
        });
        Self::new(node_features, edge_index, edge_features, target)
    }

    /// # Errors
    /// See [`Graph::new`].
    pub fn validate(&self) -> Result<()> {
        let n = self.num_nodes();
        if self.edge_index.nrows() != 2 {
            return Err(GraphormerError::InvalidGraph(format!(
                "edge_index must have 2 rows, found {}",
                self.edge_index.nrows()
            )));
        }
        if let Some(&bad) = self.edge_index.iter().find(|&&v| v >= n) {
            return Err(GraphormerError::InvalidGraph(format!(
                "edge endpoint {} out of range for {} nodes",
                bad, n
            )));
        }
        if self.edge_features.nrows() != self.num_edges() {
            return Err(GraphormerError::InvalidGraph(format!(
                "{} edge feature rows for {} edges",
                self.edge_features.nrows(),
                self.num_edges()
            )));
        }
        // Ids at or above the limit would spill into the next column's range
        // once offset and shifted.
        let limit = FEATURE_OFFSET - 1;
        if let Some(&bad) = self
            .node_features
            .iter()
            .chain(self.edge_features.iter())
            .find(|&&f| !(0..limit).contains(&f))
        {
            return Err(GraphormerError::InvalidGraph(format!(
                "categorical feature {} outside 0..{}",
                bad, limit
            )));
        }
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.node_features.nrows()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.ncols()
    }

    pub fn node_features(&self) -> &Array2<i64> {
        &self.node_features
    }

    pub fn edge_features(&self) -> &Array2<i64> {
        &self.edge_features
    }

    pub fn sources(&self) -> ArrayView1<usize> {
        self.edge_index.row(0)
    }

    pub fn targets(&self) -> ArrayView1<usize> {
        self.edge_index.row(1)
    }

    pub const fn target(&self) -> Option<GraphormerFloat> {
        self.target
    }
}
