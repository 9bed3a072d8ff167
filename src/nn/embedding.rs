use crate::error::{GraphormerError, Result};
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::GraphormerFloat;
use ndarray::{Array, Array2, ArrayView2, ArrayViewMut2, Dimension, IxDyn};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lookup table from integer ids to dense rows.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Embedding {
    weight: Array2<GraphormerFloat>,
    padding_idx: Option<usize>,
}

impl Embedding {
    /// `N(0, 1)` init with the padding row zeroed.
    pub fn new<R: Rng + ?Sized>(
        num_embeddings: usize,
        embedding_dim: usize,
        padding_idx: Option<usize>,
        rng: &mut R,
    ) -> Self {
        let weight = Array2::random_using((num_embeddings, embedding_dim), StandardNormal, rng);
        let mut emb = Self {
            weight,
            padding_idx: padding_idx.filter(|&p| p < num_embeddings),
        };
        emb.zero_padding_row();
        emb
    }

    /// # Errors
    /// If `padding_idx` is not a row of `weight`.
    pub fn from_weight(weight: Array2<GraphormerFloat>, padding_idx: Option<usize>) -> Result<Self> {
        if let Some(p) = padding_idx {
            if p >= weight.nrows() {
                return Err(GraphormerError::IndexOutOfRange {
                    what: "padding",
                    index: p as i64,
                    size: weight.nrows(),
                });
            }
        }
        Ok(Self {
            weight,
            padding_idx,
        })
    }

    pub fn num_embeddings(&self) -> usize {
        self.weight.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub const fn padding_idx(&self) -> Option<usize> {
        self.padding_idx
    }

    pub fn weight(&self) -> ArrayView2<GraphormerFloat> {
        self.weight.view()
    }

    pub fn weight_mut(&mut self) -> ArrayViewMut2<GraphormerFloat> {
        self.weight.view_mut()
    }

    pub fn zero_padding_row(&mut self) {
        if let Some(p) = self.padding_idx {
            self.weight.row_mut(p).fill(0.);
        }
    }

    /// Looks every id up, appending an `embedding_dim` axis to the shape of `ids`.
    ///
    /// # Errors
    /// `IndexOutOfRange` for a negative id or one past the table.
    pub fn forward<D: Dimension>(
        &self,
        ids: &Array<i64, D>,
    ) -> Result<Array<GraphormerFloat, D::Larger>> {
        let size = self.num_embeddings();
        let mut data = Vec::with_capacity(ids.len() * self.embedding_dim());
        for &id in ids.iter() {
            let row = usize::try_from(id)
                .ok()
                .filter(|&r| r < size)
                .ok_or(GraphormerError::IndexOutOfRange {
                    what: "embedding",
                    index: id,
                    size,
                })?;
            data.extend(self.weight.row(row).iter());
        }
        let mut shape = ids.shape().to_vec();
        shape.push(self.embedding_dim());
        let out = Array::from_shape_vec(IxDyn(&shape), data)?;
        Ok(out.into_dimensionality::<D::Larger>()?)
    }
}

impl Module for Embedding {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        f(Leaf::Embedding(self));
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        f(LeafMut::Embedding(self));
    }
}

impl fmt::Display for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Embedding {} x {}",
            self.num_embeddings(),
            self.embedding_dim()
        )
    }
}
