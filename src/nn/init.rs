//! Parameter initialisers, applied over a module tree with [`Module::visit_mut`].
use crate::nn::module::{LeafMut, Module};
use crate::nn::Linear;
use crate::GraphormerFloat;
use ndarray::{Array, ArrayViewMut, Dimension};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::Rng;

/// Fills `x` from `N(0, std²)`. A non-finite `std` leaves `x` untouched.
pub fn normal_<D: Dimension, R: Rng + ?Sized>(
    mut x: ArrayViewMut<GraphormerFloat, D>,
    std: GraphormerFloat,
    rng: &mut R,
) {
    if let Ok(dist) = Normal::new(0., std) {
        x.assign(&Array::random_using(x.raw_dim(), dist, rng));
    }
}

/// Glorot uniform init of a linear weight, scaled by `gain`.
pub fn xavier_uniform_<R: Rng + ?Sized>(linear: &mut Linear, gain: GraphormerFloat, rng: &mut R) {
    let fan_sum = (linear.in_features() + linear.out_features()).max(1) as GraphormerFloat;
    let bound = gain * (6. / fan_sum).sqrt();
    let mut weight = linear.weight_mut();
    let sample = Array::random_using(weight.raw_dim(), Uniform::new_inclusive(-bound, bound), rng);
    weight.assign(&sample);
}

/// Graphormer init: every linear and embedding weight from `N(0, 0.02²)`, zero
/// linear biases, zero embedding padding rows.
pub fn init_graphormer_params<M: Module + ?Sized, R: Rng + ?Sized>(module: &mut M, rng: &mut R) {
    module.visit_mut(&mut |leaf: LeafMut<'_>| match leaf {
        LeafMut::Linear(linear) => {
            normal_(linear.weight_mut(), 0.02, rng);
            if let Some(bias) = linear.bias_mut() {
                bias.fill(0.);
            }
        }
        LeafMut::Embedding(embedding) => {
            normal_(embedding.weight_mut(), 0.02, rng);
            embedding.zero_padding_row();
        }
        LeafMut::LayerNorm(_) => {}
    });
}

/// Init used by the structural embeddings: linear weights from
/// `N(0, (0.02 / sqrt(n_layers))²)` with zero bias, embedding weights from
/// `N(0, 0.02²)`. Padding rows are overwritten too.
pub fn init_params<M: Module + ?Sized, R: Rng + ?Sized>(
    module: &mut M,
    n_layers: usize,
    rng: &mut R,
) {
    let linear_std = 0.02 / (n_layers.max(1) as GraphormerFloat).sqrt();
    module.visit_mut(&mut |leaf: LeafMut<'_>| match leaf {
        LeafMut::Linear(linear) => {
            normal_(linear.weight_mut(), linear_std, rng);
            if let Some(bias) = linear.bias_mut() {
                bias.fill(0.);
            }
        }
        LeafMut::Embedding(embedding) => normal_(embedding.weight_mut(), 0.02, rng),
        LeafMut::LayerNorm(_) => {}
    });
}
