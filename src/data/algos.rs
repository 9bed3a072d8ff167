//! Shortest paths and path-wise edge features.
use itertools::iproduct;
use ndarray::{s, Array2, Array4, ArrayView2, ArrayView3, Zip};

/// Distance (and path marker) assigned to unreachable node pairs.
pub const UNREACHABLE: i64 = 510;

/// All-pairs shortest hop counts over a boolean adjacency matrix.
///
/// Returns `(dist, path)`. `path[i][j]` is the highest-numbered intermediate
/// node of the shortest `i -> j` path found, `-1` when the pair is adjacent
/// or identical, and [`UNREACHABLE`] when there is no path.
pub fn floyd_warshall(adj: ArrayView2<bool>) -> (Array2<i64>, Array2<i64>) {
    let n = adj.nrows();
    let mut dist = Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            0
        } else if adj[[i, j]] {
            1
        } else {
            UNREACHABLE
        }
    });
    let mut path = Array2::from_elem((n, n), -1_i64);
    for k in 0..n {
        for (i, j) in iproduct!(0..n, 0..n) {
            let through_k = dist[[i, k]] + dist[[k, j]];
            if dist[[i, j]] > through_k {
                dist[[i, j]] = through_k;
                path[[i, j]] = k as i64;
            }
        }
    }
    Zip::from(&mut dist).and(&mut path).for_each(|d, p| {
        if *d >= UNREACHABLE {
            *d = UNREACHABLE;
            *p = UNREACHABLE;
        }
    });
    (dist, path)
}

/// Intermediate nodes of the shortest `i -> j` path, in order.
pub fn get_all_edges(path: ArrayView2<i64>, i: usize, j: usize) -> Vec<usize> {
    match usize::try_from(path[[i, j]]) {
        Ok(k) if path[[i, j]] != UNREACHABLE => {
            let mut nodes = get_all_edges(path, i, k);
            nodes.push(k);
            nodes.extend(get_all_edges(path, k, j));
            nodes
        }
        _ => Vec::new(),
    }
}

/// Edge features hop by hop along every shortest path: `[n, n, max_dist, E]`.
///
/// Unused hops, the diagonal and unreachable pairs hold `-1`.
pub fn gen_edge_input(max_dist: usize, path: ArrayView2<i64>, edge_feat: ArrayView3<i64>) -> Array4<i64> {
    let n = path.nrows();
    let num_feats = edge_feat.shape()[2];
    let mut edge_input = Array4::from_elem((n, n, max_dist, num_feats), -1_i64);
    for (i, j) in iproduct!(0..n, 0..n) {
        if i == j || path[[i, j]] == UNREACHABLE {
            continue;
        }
        let mut nodes = vec![i];
        nodes.extend(get_all_edges(path, i, j));
        nodes.push(j);
        for (hop, pair) in nodes.windows(2).enumerate().take(max_dist) {
            edge_input
                .slice_mut(s![i, j, hop, ..])
                .assign(&edge_feat.slice(s![pair[0], pair[1], ..]));
        }
    }
    edge_input
}
