#![allow(dead_code)]
use graphormer_rs::data::Graph;
use graphormer_rs::GraphormerConfig;
use ndarray::Array2;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;

pub fn rng(seed: u64) -> Pcg64 {
    Pcg64::seed_from_u64(seed)
}

pub fn small_config() -> GraphormerConfig {
    GraphormerConfig {
        num_atoms: 512 * 2 + 16,
        num_in_degree: 32,
        num_out_degree: 32,
        num_edges: 64,
        num_edge_dis: 16,
        multi_hop_max_dist: 4,
        spatial_pos_max: 32,
        max_nodes: 24,
        encoder_layers: 3,
        encoder_embed_dim: 16,
        encoder_ffn_embed_dim: 32,
        encoder_attention_heads: 4,
        ..GraphormerConfig::default()
    }
}

/// Undirected path `0 - 1 - ... - n-1` with two node feature columns.
pub fn path_graph(n: usize, target: Option<f64>) -> Graph {
    let edges: Vec<_> = (1..n).flat_map(|i| [(i - 1, i), (i, i - 1)]).collect();
    let node_features = Array2::from_shape_fn((n, 2), |(i, c)| ((i + c) % 5) as i64);
    let edge_features = Array2::from_shape_fn((edges.len(), 1), |(e, _)| (e / 2 % 3) as i64);
    Graph::from_edges(node_features, &edges, edge_features, target).unwrap()
}

/// Random undirected graph on `n` nodes with edge probability `p`.
pub fn random_graph<R: Rng>(n: usize, p: f64, rng: &mut R) -> Graph {
    let mut edges = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.gen_bool(p) {
                edges.push((i, j));
                edges.push((j, i));
            }
        }
    }
    let node_features = Array2::from_shape_fn((n, 2), |_| rng.gen_range(0..8));
    let edge_features = Array2::from_shape_fn((edges.len(), 1), |_| rng.gen_range(0..4));
    Graph::from_edges(node_features, &edges, edge_features, Some(rng.gen())).unwrap()
}
