use super::preprocess::GraphItem;
use crate::error::{GraphormerError, Result};
use crate::tensorshape::TensorShape;
use crate::GraphormerFloat;
use log::debug;
use ndarray::{s, Array1, Array2, Array3, Array4, Array5, Zip};
use serde::{Deserialize, Serialize};

/// Graphs padded to a common node count. Index 0 is padding in every integer tensor.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GraphBatch {
    /// `[B, N, F]`
    pub x: Array3<i64>,
    /// `[B, N + 1, N + 1]`, `-inf` where attention is masked.
    pub attn_bias: Array3<GraphormerFloat>,
    /// `[B, N, N, E]`
    pub attn_edge_type: Array4<i64>,
    /// `[B, N, N]`
    pub spatial_pos: Array3<i64>,
    /// `[B, N]`
    pub in_degree: Array2<i64>,
    /// `[B, N]`
    pub out_degree: Array2<i64>,
    /// `[B, N, N, D, E]`
    pub edge_input: Array5<i64>,
    pub targets: Option<Array1<GraphormerFloat>>,
    pub num_nodes: Vec<usize>,
}

impl GraphBatch {
    pub fn num_graphs(&self) -> usize {
        self.x.shape()[0]
    }

    /// Padded node count `N`, not counting the graph token.
    pub fn max_nodes(&self) -> usize {
        self.x.shape()[1]
    }

    pub fn num_hops(&self) -> usize {
        self.edge_input.shape()[3]
    }

    /// Checks that every tensor agrees on `B`, `N`, and the feature counts.
    ///
    /// # Errors
    /// `ShapeMismatch` naming the first inconsistent tensor.
    pub fn validate(&self) -> Result<()> {
        let (b, n) = (self.num_graphs(), self.max_nodes());
        let e = self.attn_edge_type.shape()[3];
        TensorShape::new(vec![Some(b), Some(n + 1), Some(n + 1)]).check("attn_bias", self.attn_bias.shape())?;
        TensorShape::new(vec![Some(b), Some(n), Some(n), None]).check("attn_edge_type", self.attn_edge_type.shape())?;
        TensorShape::from(vec![b, n, n]).check("spatial_pos", self.spatial_pos.shape())?;
        TensorShape::from(vec![b, n]).check("in_degree", self.in_degree.shape())?;
        TensorShape::from(vec![b, n]).check("out_degree", self.out_degree.shape())?;
        TensorShape::new(vec![Some(b), Some(n), Some(n), None, Some(e)]).check("edge_input", self.edge_input.shape())?;
        if let Some(targets) = &self.targets {
            TensorShape::from(vec![b]).check("targets", targets.shape())?;
        }
        if self.num_nodes.len() != b {
            return Err(GraphormerError::ShapeMismatch {
                what: "num_nodes",
                expected: vec![Some(b)],
                found: vec![self.num_nodes.len()],
            });
        }
        Ok(())
    }
}

/// Pads preprocessed graphs into one batch.
///
/// Graphs with more than `max_node` nodes are dropped. Node pairs at least
/// `spatial_pos_max` hops apart are masked with `-inf`, and edge inputs are cut
/// to `multi_hop_max_dist` hops (0 keeps every hop). Node features, edge inputs,
/// spatial positions and degrees are shifted by one so that 0 is free for padding.
///
/// # Errors
/// `EmptyBatch` when no graph is left, `InvalidGraph` when the graphs disagree
/// on their feature counts.
pub fn collate(
    items: &[GraphItem],
    max_node: usize,
    multi_hop_max_dist: usize,
    spatial_pos_max: i64,
) -> Result<GraphBatch> {
    let kept: Vec<&GraphItem> = items.iter().filter(|item| item.num_nodes() <= max_node).collect();
    let first = kept.first().ok_or(GraphormerError::EmptyBatch)?;
    let (num_feats, num_edge_feats) = (first.x.ncols(), first.attn_edge_type.shape()[2]);
    if let Some(bad) = kept
        .iter()
        .find(|item| item.x.ncols() != num_feats || item.attn_edge_type.shape()[2] != num_edge_feats)
    {
        return Err(GraphormerError::InvalidGraph(format!(
            "graph with {} node and {} edge features in a batch of {} and {}",
            bad.x.ncols(),
            bad.attn_edge_type.shape()[2],
            num_feats,
            num_edge_feats
        )));
    }

    for item in &kept {
        let mut ids = item
            .x
            .iter()
            .chain(&item.spatial_pos)
            .chain(&item.in_degree)
            .chain(&item.out_degree)
            .chain(&item.edge_input);
        if let Some(&bad) = ids.find(|&&v| v == i64::MAX) {
            return Err(GraphormerError::InvalidGraph(format!("id {} cannot be shifted", bad)));
        }
    }

    let hops_of = |item: &GraphItem| {
        if multi_hop_max_dist == 0 {
            item.num_hops()
        } else {
            item.num_hops().min(multi_hop_max_dist)
        }
    };
    let b = kept.len();
    let n_max = kept.iter().map(|item| item.num_nodes()).max().unwrap_or(0);
    let d_max = kept.iter().map(|item| hops_of(*item)).max().unwrap_or(0);

    let mut x = Array3::zeros((b, n_max, num_feats));
    let mut attn_bias = Array3::from_elem((b, n_max + 1, n_max + 1), GraphormerFloat::NEG_INFINITY);
    let mut attn_edge_type = Array4::zeros((b, n_max, n_max, num_edge_feats));
    let mut spatial_pos = Array3::zeros((b, n_max, n_max));
    let mut in_degree = Array2::zeros((b, n_max));
    let mut out_degree = Array2::zeros((b, n_max));
    let mut edge_input = Array5::zeros((b, n_max, n_max, d_max, num_edge_feats));

    for (i, item) in kept.iter().enumerate() {
        let n = item.num_nodes();
        let hops = hops_of(*item);
        x.slice_mut(s![i, ..n, ..]).assign(&(&item.x + 1));
        attn_edge_type.slice_mut(s![i, ..n, ..n, ..]).assign(&item.attn_edge_type);
        spatial_pos.slice_mut(s![i, ..n, ..n]).assign(&(&item.spatial_pos + 1));
        in_degree.slice_mut(s![i, ..n]).assign(&(&item.in_degree + 1));
        out_degree.slice_mut(s![i, ..n]).assign(&(&item.out_degree + 1));
        edge_input
            .slice_mut(s![i, ..n, ..n, ..hops, ..])
            .assign(&(&item.edge_input.slice(s![.., .., ..hops, ..]) + 1));

        let mut bias = item.attn_bias.clone();
        Zip::from(bias.slice_mut(s![1.., 1..]))
            .and(&item.spatial_pos)
            .for_each(|v, &sp| {
                if sp >= spatial_pos_max {
                    *v = GraphormerFloat::NEG_INFINITY;
                }
            });
        let mut slot = attn_bias.slice_mut(s![i, .., ..]);
        slot.slice_mut(s![..=n, ..=n]).assign(&bias);
        slot.slice_mut(s![n + 1.., ..=n]).fill(0.);
    }

    let targets = kept
        .iter()
        .map(|item| item.target)
        .collect::<Option<Vec<_>>>()
        .map(Array1::from_vec);
    debug!(
        "collated {} of {} graphs into {} nodes and {} hops",
        b,
        items.len(),
        n_max,
        d_max
    );

    Ok(GraphBatch {
        x,
        attn_bias,
        attn_edge_type,
        spatial_pos,
        in_degree,
        out_degree,
        edge_input,
        targets,
        num_nodes: kept.iter().map(|item| item.num_nodes()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{preprocess_item, Graph};
    use crate::test_util::graph;
    use ndarray::{arr1, arr2};
    use proptest::prelude::*;

    fn path(n: usize, target: Option<f64>) -> GraphItem {
        let edges: Vec<(usize, usize)> = (1..n).flat_map(|i| [(i - 1, i), (i, i - 1)]).collect();
        let g = Graph::from_edges(
            Array2::from_shape_fn((n, 1), |(i, _)| i as i64),
            &edges,
            Array2::zeros((edges.len(), 1)),
            target,
        )
        .unwrap();
        preprocess_item(&g)
    }

    #[test]
    fn test_padding_and_shift() {
        let batch = collate(&[path(2, Some(1.)), path(4, Some(2.))], 8, 5, 20).unwrap();
        batch.validate().unwrap();
        assert_eq!(batch.num_graphs(), 2);
        assert_eq!(batch.max_nodes(), 4);
        assert_eq!(batch.num_hops(), 3);
        assert_eq!(batch.num_nodes, vec![2, 4]);
        assert_eq!(batch.targets, Some(arr1(&[1., 2.])));
        assert_eq!(batch.x.slice(s![0, .., 0]), arr1(&[2, 3, 0, 0]));
        assert_eq!(batch.in_degree.row(0), arr1(&[2, 2, 0, 0]));
        assert_eq!(batch.spatial_pos.slice(s![0, 0, ..]), arr1(&[1, 2, 0, 0]));
        // Unused hop slots hold -1 before the shift, 0 after it.
        assert_eq!(batch.edge_input[[0, 0, 1, 1, 0]], 0);
        assert_eq!(batch.edge_input[[1, 0, 3, 2, 0]], 3);
        assert_eq!(batch.attn_edge_type[[0, 0, 1, 0]], 2);
    }

    #[test]
    fn test_attn_bias_padding() {
        let batch = collate(&[path(2, None), path(3, None)], 8, 5, 20).unwrap();
        let ninf = f64::NEG_INFINITY;
        assert_eq!(batch.targets, None);
        assert_eq!(
            batch.attn_bias.slice(s![0, .., ..]),
            arr2(&[[0., 0., 0., ninf], [0., 0., 0., ninf], [0., 0., 0., ninf], [0., 0., 0., ninf]])
        );
        assert!(batch.attn_bias.slice(s![1, .., ..]).iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_far_pairs_masked() {
        let batch = collate(&[path(4, None)], 8, 5, 2).unwrap();
        let bias = batch.attn_bias.slice(s![0, .., ..]);
        assert_eq!(bias[[1, 3]], f64::NEG_INFINITY);
        assert_eq!(bias[[1, 2]], 0.);
        assert!(bias.row(0).iter().all(|&v| v == 0.));
        assert!(bias.column(0).iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_unshiftable_ids_are_rejected() {
        let mut item = path(3, None);
        item.x[[1, 0]] = i64::MAX;
        assert!(matches!(collate(&[item], 8, 5, 20), Err(GraphormerError::InvalidGraph(_))));
        let mut item = path(3, None);
        item.in_degree[0] = i64::MAX;
        assert!(matches!(collate(&[item], 8, 5, 20), Err(GraphormerError::InvalidGraph(_))));
    }

    #[test]
    fn test_filtering_and_truncation() {
        let batch = collate(&[path(6, None), path(3, None)], 4, 1, 20).unwrap();
        assert_eq!(batch.num_nodes, vec![3]);
        assert_eq!(batch.num_hops(), 1);
        assert!(matches!(collate(&[path(6, None)], 4, 1, 20), Err(GraphormerError::EmptyBatch)));
        assert!(matches!(collate(&[], 4, 1, 20), Err(GraphormerError::EmptyBatch)));
    }

    proptest! {
        #[test]
        fn test_padding_is_zero(graphs in proptest::collection::vec(graph(6), 1..4)) {
            let items: Vec<GraphItem> = graphs.iter().map(preprocess_item).collect();
            let batch = collate(&items, 16, 0, 1024).unwrap();
            prop_assert!(batch.validate().is_ok());
            for (i, &n) in batch.num_nodes.iter().enumerate() {
                prop_assert!(batch.x.slice(s![i, ..n, ..]).iter().all(|&v| v >= 1));
                prop_assert!(batch.x.slice(s![i, n.., ..]).iter().all(|&v| v == 0));
                prop_assert!(batch.spatial_pos.slice(s![i, n.., ..]).iter().all(|&v| v == 0));
                prop_assert!(batch.edge_input.slice(s![i, n.., .., .., ..]).iter().all(|&v| v == 0));
                // No attention row is fully masked.
                for row in batch.attn_bias.slice(s![i, .., ..]).rows() {
                    prop_assert!(row.iter().any(|v| v.is_finite()));
                }
            }
        }
    }
}
