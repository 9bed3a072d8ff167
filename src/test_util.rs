#![cfg(test)]
use crate::config::GraphormerConfig;
use crate::data::Graph;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A configuration small enough to run a full forward pass in a unit test.
pub fn tiny_config() -> GraphormerConfig {
    GraphormerConfig {
        num_atoms: 2 * 512 + 16,
        num_in_degree: 16,
        num_out_degree: 16,
        num_edges: 32,
        num_spatial: 512,
        num_edge_dis: 8,
        multi_hop_max_dist: 3,
        spatial_pos_max: 20,
        max_nodes: 16,
        encoder_layers: 2,
        encoder_embed_dim: 8,
        encoder_ffn_embed_dim: 16,
        encoder_attention_heads: 2,
        ..GraphormerConfig::default()
    }
}

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<f64> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array2(rows: usize, cols: usize)(v in Vec::lift1_with(array1(cols), SizeRange::new(rows..=rows))) -> Array2<f64> {
        assert!(rows > 0);
        ndarray::stack(Axis(0), &v.iter().map(|x| x.view()).collect::<Vec<ArrayView1<f64>>>()).unwrap()
    }
}

prop_compose! {
    pub fn array3(batch: usize, rows: usize, cols: usize)(v in Vec::lift1_with(array2(rows, cols), SizeRange::new(batch..=batch))) -> Array3<f64> {
        assert!(batch > 0);
        ndarray::stack(Axis(0), &v.iter().map(|x| x.view()).collect::<Vec<ArrayView2<f64>>>()).unwrap()
    }
}

prop_compose! {
    /// Random undirected graph with one categorical node and edge feature column.
    pub fn graph(max_nodes: usize)(n in 1..=max_nodes)(
        atoms in Vec::lift1_with(0_i64..8, SizeRange::new(n..=n)),
        pairs in proptest::collection::vec((0..n, 0..n, 0_i64..4), 0..=2 * n),
    ) -> Graph {
        let edges: Vec<(usize, usize, i64)> = pairs.into_iter().filter(|(u, v, _)| u != v).collect();
        let mut index = Vec::with_capacity(4 * edges.len());
        let mut feats = Vec::with_capacity(2 * edges.len());
        for &(u, v, f) in &edges {
            index.push((u, v));
            index.push((v, u));
            feats.push(f);
            feats.push(f);
        }
        let m = index.len();
        let edge_index = Array2::from_shape_fn((2, m), |(r, c)| if r == 0 { index[c].0 } else { index[c].1 });
        Graph::new(
            Array2::from_shape_vec((atoms.len(), 1), atoms).unwrap(),
            edge_index,
            Array2::from_shape_vec((m, 1), feats).unwrap(),
            None,
        )
        .unwrap()
    }
}
