//! Utility functions
use crate::GraphormerFloat;
use ndarray::{Array, Axis, Dimension, Zip};
use num::Float;

/// Softmax over the last axis, in place.
///
/// Lanes where every entry is `-inf` become all zeros rather than NaN.
pub fn softmax_last_axis<D: Dimension>(x: &mut Array<GraphormerFloat, D>) {
    if x.ndim() == 0 {
        return;
    }
    let axis = Axis(x.ndim() - 1);
    for mut lane in x.lanes_mut(axis) {
        let max = lane.fold(GraphormerFloat::neg_infinity(), |acc, &v| acc.max(v));
        if max == GraphormerFloat::neg_infinity() {
            lane.fill(0.);
            continue;
        }
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
}

/// Mean of `x` over `axis`, returning zeros when the axis is empty.
pub fn mean_axis_or_zeros<D: Dimension + ndarray::RemoveAxis>(
    x: &Array<GraphormerFloat, D>,
    axis: Axis,
) -> Array<GraphormerFloat, D::Smaller> {
    x.mean_axis(axis)
        .unwrap_or_else(|| Array::zeros(x.raw_dim().remove_axis(axis)))
}

/// Divides `x` elementwise by `denom`, where `denom` lines up with the leading axes of `x`.
pub fn div_leading<D: Dimension>(
    x: &mut Array<GraphormerFloat, D>,
    denom: &Array<GraphormerFloat, D::Smaller>,
) {
    let last = Axis(x.ndim() - 1);
    Zip::from(x.lanes_mut(last))
        .and(denom)
        .for_each(|mut lane, &d| lane.mapv_inplace(|v| v / d));
}
