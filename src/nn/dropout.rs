use crate::error::{GraphormerError, Result};
use crate::GraphormerFloat;
use ndarray::{Array, Dimension};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Randomness for a training-mode forward pass; `None` evaluates deterministically.
pub type TrainRng<'a> = Option<&'a mut (dyn RngCore + 'static)>;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dropout {
    prob: GraphormerFloat,
}

impl Dropout {
    /// # Errors
    /// If `prob` is outside `[0, 1)`.
    pub fn new(prob: GraphormerFloat) -> Result<Self> {
        if !(0. ..1.).contains(&prob) {
            return Err(GraphormerError::InvalidConfig(format!(
                "dropout probability {} is outside [0, 1)",
                prob
            )));
        }
        Ok(Self { prob })
    }

    pub const fn prob(&self) -> GraphormerFloat {
        self.prob
    }

    /// Zeroes entries with probability `prob` and rescales survivors by `1 / (1 - prob)`.
    pub fn forward<D: Dimension>(
        &self,
        mut x: Array<GraphormerFloat, D>,
        rng: TrainRng<'_>,
    ) -> Array<GraphormerFloat, D> {
        match rng {
            Some(rng) if self.prob > 0. => {
                let keep = 1. - self.prob;
                x.mapv_inplace(|v| {
                    if rng.gen::<GraphormerFloat>() < self.prob {
                        0.
                    } else {
                        v / keep
                    }
                });
                x
            }
            _ => x,
        }
    }
}
