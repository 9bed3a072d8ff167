use crate::error::{GraphormerError, Result};
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::GraphormerFloat;
use ndarray::{Array, Array1, Axis, Dimension, Zip};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LayerNorm {
    weight: Array1<GraphormerFloat>,
    bias: Array1<GraphormerFloat>,
    eps: GraphormerFloat,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            bias: Array1::zeros(dim),
            eps: 1e-5,
        }
    }

    pub fn dim(&self) -> usize {
        self.weight.len()
    }

    pub fn weight(&self) -> &Array1<GraphormerFloat> {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Array1<GraphormerFloat> {
        &mut self.weight
    }

    pub fn bias(&self) -> &Array1<GraphormerFloat> {
        &self.bias
    }

    pub fn bias_mut(&mut self) -> &mut Array1<GraphormerFloat> {
        &mut self.bias
    }

    /// Normalises each lane of the last axis to zero mean and unit (biased) variance.
    ///
    /// # Errors
    /// If the last axis is not `dim` long.
    pub fn forward<D: Dimension>(
        &self,
        x: &Array<GraphormerFloat, D>,
    ) -> Result<Array<GraphormerFloat, D>> {
        let mut out = x.clone();
        self.forward_inplace(&mut out)?;
        Ok(out)
    }

    /// # Errors
    /// If the last axis is not `dim` long.
    pub fn forward_inplace<D: Dimension>(&self, x: &mut Array<GraphormerFloat, D>) -> Result<()> {
        if x.ndim() == 0 || x.shape()[x.ndim() - 1] != self.dim() {
            return Err(GraphormerError::ShapeMismatch {
                what: "layer norm input",
                expected: vec![Some(self.dim())],
                found: x.shape().to_vec(),
            });
        }
        let n = self.dim() as GraphormerFloat;
        let axis = Axis(x.ndim() - 1);
        for mut lane in x.lanes_mut(axis) {
            let mean = lane.sum() / n;
            let var = lane.fold(0., |acc, &v| acc + (v - mean) * (v - mean)) / n;
            let inv_std = 1. / (var + self.eps).sqrt();
            Zip::from(&mut lane)
                .and(&self.weight)
                .and(&self.bias)
                .for_each(|v, &g, &b| *v = (*v - mean) * inv_std * g + b);
        }
        Ok(())
    }
}

impl Module for LayerNorm {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        f(Leaf::LayerNorm(self));
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        f(LeafMut::LayerNorm(self));
    }
}
