use crate::error::{GraphormerError, Result};
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::GraphormerFloat;
use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Dimension};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Affine map `y = x Wᵀ + b` applied over the last axis.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Linear {
    weight: Array2<GraphormerFloat>,
    bias: Option<Array1<GraphormerFloat>>,
}

impl Linear {
    /// Uniform `±1/sqrt(in_features)` init for both weight and bias.
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let bound = 1. / (in_features.max(1) as GraphormerFloat).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weight = Array2::random_using((out_features, in_features), dist, rng);
        let bias = bias.then(|| Array1::random_using(out_features, dist, rng));
        Self { weight, bias }
    }

    /// # Errors
    /// If `bias` does not have one entry per output row.
    pub fn from_parts(
        weight: Array2<GraphormerFloat>,
        bias: Option<Array1<GraphormerFloat>>,
    ) -> Result<Self> {
        if let Some(b) = &bias {
            if b.len() != weight.nrows() {
                return Err(GraphormerError::ShapeMismatch {
                    what: "linear bias",
                    expected: vec![Some(weight.nrows())],
                    found: vec![b.len()],
                });
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn weight(&self) -> ArrayView2<GraphormerFloat> {
        self.weight.view()
    }

    pub fn weight_mut(&mut self) -> ArrayViewMut2<GraphormerFloat> {
        self.weight.view_mut()
    }

    pub fn bias(&self) -> Option<ArrayView1<GraphormerFloat>> {
        self.bias.as_ref().map(Array1::view)
    }

    pub fn bias_mut(&mut self) -> Option<&mut Array1<GraphormerFloat>> {
        self.bias.as_mut()
    }

    /// # Errors
    /// If the last axis of `x` is not `in_features` long.
    pub fn forward<D: Dimension>(
        &self,
        x: &Array<GraphormerFloat, D>,
    ) -> Result<Array<GraphormerFloat, D>> {
        let last = x.ndim().checked_sub(1).ok_or(GraphormerError::ShapeMismatch {
            what: "linear input",
            expected: vec![Some(self.in_features())],
            found: vec![],
        })?;
        if x.shape()[last] != self.in_features() {
            return Err(GraphormerError::ShapeMismatch {
                what: "linear input",
                expected: vec![Some(self.in_features())],
                found: x.shape().to_vec(),
            });
        }
        let rows: usize = x.shape()[..last].iter().product();
        let flat = x.to_shape((rows, self.in_features()))?;
        let mut out = flat.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            out += bias;
        }
        let mut dim = x.raw_dim();
        dim[last] = self.out_features();
        Ok(out.into_shape(dim)?)
    }
}

impl Module for Linear {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        f(Leaf::Linear(self));
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        f(LeafMut::Linear(self));
    }
}

impl fmt::Display for Linear {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Linear {} -> {}{}",
            self.in_features(),
            self.out_features(),
            if self.bias.is_some() { "" } else { " (no bias)" }
        )
    }
}
