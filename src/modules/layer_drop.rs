use crate::error::{GraphormerError, Result};
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::TrainRng;
use crate::GraphormerFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A list of layers where each layer is skipped with probability `p` during
/// training. Evaluation always runs every layer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LayerDropModuleList<M> {
    p: GraphormerFloat,
    layers: Vec<M>,
}

impl<M> LayerDropModuleList<M> {
    /// # Errors
    /// If `p` is outside `[0, 1]`.
    pub fn new(p: GraphormerFloat, layers: Vec<M>) -> Result<Self> {
        if !(0. ..=1.).contains(&p) {
            return Err(GraphormerError::InvalidConfig(format!(
                "layerdrop probability {} is outside [0, 1]",
                p
            )));
        }
        Ok(Self { p, layers })
    }

    pub fn p(&self) -> GraphormerFloat {
        self.p
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The layers to run in this pass, in order.
    pub fn active(&self, rng: TrainRng<'_>) -> Vec<&M> {
        match rng {
            Some(rng) if self.p > 0. => self
                .layers
                .iter()
                .filter(|_| rng.gen::<GraphormerFloat>() > self.p)
                .collect(),
            _ => self.layers.iter().collect(),
        }
    }
}

impl<M: Module> Module for LayerDropModuleList<M> {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.layers.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.layers.visit_mut(f);
    }
}
