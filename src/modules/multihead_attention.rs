use crate::error::{GraphormerError, Result};
use crate::nn::init::xavier_uniform_;
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::{Dropout, Linear, TrainRng};
use crate::tensorshape::TensorShape;
use crate::util::{mean_axis_or_zeros, softmax_last_axis};
use crate::GraphormerFloat;
use itertools::iproduct;
use ndarray::{s, Array2, Array3, Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

/// Optional additive terms and masks applied to the attention scores.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttentionMasks<'a> {
    /// `[B, H, T, S]`, added to the scores of every head.
    pub attn_bias: Option<&'a Array4<GraphormerFloat>>,
    /// `[B, S]`, `true` keys are excluded from attention.
    pub key_padding_mask: Option<&'a Array2<bool>>,
    /// `[T, S]`, added to the scores of every graph and head.
    pub attn_mask: Option<&'a Array2<GraphormerFloat>>,
}

/// Which attention probabilities `forward` hands back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeedWeights {
    No,
    /// Mean over heads, `[B, T, S]`.
    Averaged,
    /// `[B, H, T, S]`
    PerHead,
}

/// Attention probabilities, taken before dropout.
#[derive(Clone, Debug, PartialEq)]
pub enum AttnWeights {
    Averaged(Array3<GraphormerFloat>),
    PerHead(Array4<GraphormerFloat>),
}

/// Multi-headed scaled dot-product attention over batch-first inputs.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MultiheadAttention {
    embed_dim: usize,
    kdim: usize,
    vdim: usize,
    num_heads: usize,
    head_dim: usize,
    scaling: GraphormerFloat,
    self_attention: bool,
    dropout: Dropout,
    k_proj: Linear,
    v_proj: Linear,
    q_proj: Linear,
    out_proj: Linear,
}

impl MultiheadAttention {
    /// `kdim` and `vdim` default to `embed_dim`.
    ///
    /// # Errors
    /// `InvalidConfig` if `num_heads` does not divide `embed_dim`, if a self
    /// attention layer has key or value widths other than `embed_dim`, or if
    /// `dropout` is outside `[0, 1)`.
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: Rng + ?Sized>(
        embed_dim: usize,
        num_heads: usize,
        kdim: Option<usize>,
        vdim: Option<usize>,
        dropout: GraphormerFloat,
        bias: bool,
        self_attention: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let kdim = kdim.unwrap_or(embed_dim);
        let vdim = vdim.unwrap_or(embed_dim);
        if num_heads == 0 || embed_dim % num_heads != 0 {
            return Err(GraphormerError::InvalidConfig(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                embed_dim, num_heads
            )));
        }
        if self_attention && (kdim != embed_dim || vdim != embed_dim) {
            return Err(GraphormerError::InvalidConfig(
                "self-attention requires query, key and value to be of the same size".to_string(),
            ));
        }
        let head_dim = embed_dim / num_heads;
        let mut attn = Self {
            embed_dim,
            kdim,
            vdim,
            num_heads,
            head_dim,
            scaling: (head_dim as GraphormerFloat).powf(-0.5),
            self_attention,
            dropout: Dropout::new(dropout)?,
            k_proj: Linear::new(kdim, embed_dim, bias, rng),
            v_proj: Linear::new(vdim, embed_dim, bias, rng),
            q_proj: Linear::new(embed_dim, embed_dim, bias, rng),
            out_proj: Linear::new(embed_dim, embed_dim, bias, rng),
        };
        attn.reset_parameters(rng);
        Ok(attn)
    }

    pub fn reset_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        // The scaled gain applies only when q, k and v share a width.
        let gain = if self.qkv_same_dim() { FRAC_1_SQRT_2 } else { 1. };
        xavier_uniform_(&mut self.k_proj, gain, rng);
        xavier_uniform_(&mut self.v_proj, gain, rng);
        xavier_uniform_(&mut self.q_proj, gain, rng);
        xavier_uniform_(&mut self.out_proj, 1., rng);
        if let Some(bias) = self.out_proj.bias_mut() {
            bias.fill(0.);
        }
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn scaling(&self) -> GraphormerFloat {
        self.scaling
    }

    pub fn is_self_attention(&self) -> bool {
        self.self_attention
    }

    pub fn qkv_same_dim(&self) -> bool {
        self.kdim == self.embed_dim && self.vdim == self.embed_dim
    }

    pub fn q_proj(&self) -> &Linear {
        &self.q_proj
    }

    pub fn k_proj(&self) -> &Linear {
        &self.k_proj
    }

    pub fn v_proj(&self) -> &Linear {
        &self.v_proj
    }

    pub fn out_proj(&self) -> &Linear {
        &self.out_proj
    }

    /// Attends `query [B, T, C]` over `key [B, S, kdim]` and `value [B, S, vdim]`.
    ///
    /// Returns the attended values `[B, T, C]` and, when requested, the
    /// attention probabilities. Rows whose keys are all masked attend to nothing
    /// and produce the output projection bias.
    ///
    /// # Errors
    /// `ShapeMismatch` when the inputs or masks disagree with each other or
    /// with the layer widths.
    pub fn forward(
        &self,
        query: &Array3<GraphormerFloat>,
        key: &Array3<GraphormerFloat>,
        value: &Array3<GraphormerFloat>,
        masks: AttentionMasks<'_>,
        need_weights: NeedWeights,
        rng: TrainRng<'_>,
    ) -> Result<(Array3<GraphormerFloat>, Option<AttnWeights>)> {
        let mut probs = self.attention_scores(query, key, masks)?;
        softmax_last_axis(&mut probs);
        let weights = match need_weights {
            NeedWeights::No => None,
            NeedWeights::Averaged => Some(AttnWeights::Averaged(mean_axis_or_zeros(&probs, Axis(1)))),
            NeedWeights::PerHead => Some(AttnWeights::PerHead(probs.clone())),
        };
        let probs = self.dropout.forward(probs, rng);

        let (bsz, tgt_len, src_len) = (query.shape()[0], query.shape()[1], key.shape()[1]);
        TensorShape::from(vec![bsz, src_len, self.vdim]).check("value", value.shape())?;
        let v = self.split_heads(self.v_proj.forward(value)?)?;
        let mut attn = Array4::zeros((bsz, tgt_len, self.num_heads, self.head_dim));
        for (b, h) in iproduct!(0..bsz, 0..self.num_heads) {
            let head = probs.slice(s![b, h, .., ..]).dot(&v.slice(s![b, h, .., ..]));
            attn.slice_mut(s![b, .., h, ..]).assign(&head);
        }
        let attn = attn.into_shape((bsz, tgt_len, self.embed_dim))?;
        Ok((self.out_proj.forward(&attn)?, weights))
    }

    /// Scaled, biased and masked attention scores `[B, H, T, S]`, before softmax.
    ///
    /// # Errors
    /// As [`MultiheadAttention::forward`].
    pub fn attention_scores(
        &self,
        query: &Array3<GraphormerFloat>,
        key: &Array3<GraphormerFloat>,
        masks: AttentionMasks<'_>,
    ) -> Result<Array4<GraphormerFloat>> {
        let (bsz, tgt_len) = (query.shape()[0], query.shape()[1]);
        TensorShape::new(vec![None, None, Some(self.embed_dim)]).check("query", query.shape())?;
        TensorShape::new(vec![Some(bsz), None, Some(self.kdim)]).check("key", key.shape())?;
        let src_len = key.shape()[1];

        let q = self.split_heads(self.q_proj.forward(query)? * self.scaling)?;
        let k = self.split_heads(self.k_proj.forward(key)?)?;
        let mut scores = Array4::zeros((bsz, self.num_heads, tgt_len, src_len));
        for (b, h) in iproduct!(0..bsz, 0..self.num_heads) {
            let qh = q.slice(s![b, h, .., ..]);
            let kh = k.slice(s![b, h, .., ..]);
            scores.slice_mut(s![b, h, .., ..]).assign(&qh.dot(&kh.t()));
        }

        if let Some(bias) = masks.attn_bias {
            TensorShape::from(vec![bsz, self.num_heads, tgt_len, src_len]).check("attn_bias", bias.shape())?;
            scores += bias;
        }
        if let Some(mask) = masks.attn_mask {
            TensorShape::from(vec![tgt_len, src_len]).check("attn_mask", mask.shape())?;
            scores += mask;
        }
        if let Some(padding) = masks.key_padding_mask {
            TensorShape::from(vec![bsz, src_len]).check("key_padding_mask", padding.shape())?;
            for ((b, src), &masked) in padding.indexed_iter() {
                if masked {
                    scores
                        .slice_mut(s![b, .., .., src])
                        .fill(GraphormerFloat::NEG_INFINITY);
                }
            }
        }
        Ok(scores)
    }

    /// `[B, L, C]` to `[B, H, L, head_dim]`.
    fn split_heads(&self, x: Array3<GraphormerFloat>) -> Result<Array4<GraphormerFloat>> {
        let (bsz, len, _) = x.dim();
        Ok(x
            .into_shape((bsz, len, self.num_heads, self.head_dim))?
            .permuted_axes([0, 2, 1, 3]))
    }
}

impl Module for MultiheadAttention {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.k_proj.visit(f);
        self.v_proj.visit(f);
        self.q_proj.visit(f);
        self.out_proj.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.k_proj.visit_mut(f);
        self.v_proj.visit_mut(f);
        self.q_proj.visit_mut(f);
        self.out_proj.visit_mut(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn attn(seed: u64) -> MultiheadAttention {
        MultiheadAttention::new(8, 2, None, None, 0., true, true, &mut seeded_rng(seed)).unwrap()
    }

    fn per_head(weights: Option<AttnWeights>) -> Array4<f64> {
        match weights {
            Some(AttnWeights::PerHead(w)) => w,
            other => panic!("expected per-head weights, got {:?}", other),
        }
    }

    #[test]
    fn test_construction_checks() {
        let mut rng = seeded_rng(0);
        assert!(MultiheadAttention::new(10, 3, None, None, 0., true, true, &mut rng).is_err());
        assert!(MultiheadAttention::new(8, 2, Some(4), None, 0., true, true, &mut rng).is_err());
        let cross = MultiheadAttention::new(8, 2, Some(4), Some(6), 0., true, false, &mut rng).unwrap();
        assert!(!cross.qkv_same_dim());
        let mha = attn(1);
        assert_eq!(mha.head_dim(), 4);
        assert_abs_diff_eq!(mha.scaling(), 0.5, epsilon = 1e-12);
        assert!(mha.out_proj().bias().unwrap().iter().all(|&b| b == 0.));
        assert_eq!(mha.num_parameters(), 4 * (8 * 8 + 8));
    }

    #[test]
    fn test_padding_mask_zeroes_weights() {
        let mha = attn(2);
        let x = Array3::from_shape_fn((2, 3, 8), |(b, t, c)| (b + t * c) as f64 * 0.1);
        let mut padding = Array2::from_elem((2, 3), false);
        padding[[0, 2]] = true;
        let masks = AttentionMasks {
            key_padding_mask: Some(&padding),
            ..AttentionMasks::default()
        };
        let (out, weights) = mha.forward(&x, &x, &x, masks, NeedWeights::PerHead, None).unwrap();
        assert_eq!(out.shape(), &[2, 3, 8]);
        let w = per_head(weights);
        assert!(w.slice(s![0, .., .., 2]).iter().all(|&v| v == 0.));
        assert!(w.slice(s![1, .., .., 2]).iter().all(|&v| v > 0.));
    }

    #[test]
    fn test_neg_inf_bias_equals_padding_mask() {
        let mha = attn(3);
        let x = Array3::from_shape_fn((1, 4, 8), |(_, t, c)| ((t * 7 + c) % 5) as f64 - 2.);
        let mut padding = Array2::from_elem((1, 4), false);
        padding[[0, 1]] = true;
        let mut bias = Array4::zeros((1, 2, 4, 4));
        bias.slice_mut(s![.., .., .., 1]).fill(f64::NEG_INFINITY);

        let (by_mask, _) = mha
            .forward(
                &x,
                &x,
                &x,
                AttentionMasks {
                    key_padding_mask: Some(&padding),
                    ..AttentionMasks::default()
                },
                NeedWeights::No,
                None,
            )
            .unwrap();
        let (by_bias, weights) = mha
            .forward(
                &x,
                &x,
                &x,
                AttentionMasks {
                    attn_bias: Some(&bias),
                    ..AttentionMasks::default()
                },
                NeedWeights::No,
                None,
            )
            .unwrap();
        assert!(weights.is_none());
        assert_abs_diff_eq!(by_mask, by_bias, epsilon = 1e-12);
    }

    #[test]
    fn test_fully_masked_row_is_finite() {
        let mha = attn(4);
        let x = Array3::ones((1, 2, 8));
        let mut mask = Array2::zeros((2, 2));
        mask.row_mut(1).fill(f64::NEG_INFINITY);
        let masks = AttentionMasks {
            attn_mask: Some(&mask),
            ..AttentionMasks::default()
        };
        let (out, weights) = mha.forward(&x, &x, &x, masks, NeedWeights::PerHead, None).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert!(per_head(weights).slice(s![0, .., 1, ..]).iter().all(|&v| v == 0.));
    }

    #[test]
    fn test_shape_errors() {
        let mha = attn(5);
        let x = Array3::zeros((2, 3, 8));
        let bad_bias = Array4::zeros((2, 3, 3, 3));
        let masks = AttentionMasks {
            attn_bias: Some(&bad_bias),
            ..AttentionMasks::default()
        };
        assert!(matches!(
            mha.forward(&x, &x, &x, masks, NeedWeights::No, None),
            Err(GraphormerError::ShapeMismatch { what: "attn_bias", .. })
        ));
        let short_key = Array3::zeros((1, 3, 8));
        assert!(mha
            .forward(&x, &short_key, &short_key, AttentionMasks::default(), NeedWeights::No, None)
            .is_err());
    }

    #[test]
    fn test_training_dropout_changes_output() {
        let mha = MultiheadAttention::new(8, 2, None, None, 0.5, true, true, &mut seeded_rng(6)).unwrap();
        let x = Array3::from_shape_fn((1, 5, 8), |(_, t, c)| (t as f64 - c as f64) * 0.3);
        let (eval_a, _) = mha.forward(&x, &x, &x, AttentionMasks::default(), NeedWeights::No, None).unwrap();
        let (eval_b, _) = mha.forward(&x, &x, &x, AttentionMasks::default(), NeedWeights::No, None).unwrap();
        assert_eq!(eval_a, eval_b);
        let mut rng = seeded_rng(7);
        let (train, _) = mha
            .forward(&x, &x, &x, AttentionMasks::default(), NeedWeights::No, Some(&mut rng))
            .unwrap();
        assert_ne!(train, eval_a);
    }

    proptest! {
        #[test]
        fn test_probabilities_sum_to_one(x in array3(2, 4, 8), seed in any::<u64>()) {
            let mha = attn(seed);
            let (_, weights) = mha.forward(&x, &x, &x, AttentionMasks::default(), NeedWeights::PerHead, None).unwrap();
            let w = per_head(weights);
            for row in w.lanes(Axis(3)) {
                prop_assert!((row.sum() - 1.).abs() < 1e-9);
            }
            let (_, averaged) = mha.forward(&x, &x, &x, AttentionMasks::default(), NeedWeights::Averaged, None).unwrap();
            match averaged {
                Some(AttnWeights::Averaged(avg)) => {
                    assert_abs_diff_eq!(avg, w.mean_axis(Axis(1)).unwrap(), epsilon = 1e-12);
                }
                other => prop_assert!(false, "expected averaged weights, got {:?}", other),
            }
        }
    }
}
