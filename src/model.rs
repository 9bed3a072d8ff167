//! Graph-level prediction on top of the encoder.
use crate::config::GraphormerConfig;
use crate::data::GraphBatch;
use crate::error::{GraphormerError, Result};
use crate::modules::{EncoderOptions, GraphormerGraphEncoder};
use crate::nn::module::{Leaf, LeafMut, Module};
use crate::nn::{get_activation_fn, Activation, LayerNorm, Linear, TrainRng};
use crate::GraphormerFloat;
use log::{debug, info};
use ndarray::{s, Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Encoder plus a per-token classification head.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphormerModel {
    config: GraphormerConfig,
    graph_encoder: GraphormerGraphEncoder,
    lm_head_transform_weight: Linear,
    activation_fn: Box<dyn Activation>,
    layer_norm: LayerNorm,
    /// `None` when the head is removed.
    embed_out: Option<Linear>,
    lm_output_learned_bias: Option<GraphormerFloat>,
}

impl GraphormerModel {
    /// # Errors
    /// If `config` does not validate.
    pub fn new<R: Rng + ?Sized>(config: GraphormerConfig, rng: &mut R) -> Result<Self> {
        let graph_encoder = GraphormerGraphEncoder::new(&config, rng)?;
        let dim = config.encoder_embed_dim;
        let load_softmax = !config.remove_head;
        Ok(Self {
            graph_encoder,
            lm_head_transform_weight: Linear::new(dim, dim, true, rng),
            activation_fn: get_activation_fn(&config.activation_fn)?,
            layer_norm: LayerNorm::new(dim),
            embed_out: load_softmax.then(|| Linear::new(dim, config.num_classes, false, rng)),
            lm_output_learned_bias: load_softmax.then(|| 0.),
            config,
        })
    }

    pub fn config(&self) -> &GraphormerConfig {
        &self.config
    }

    pub fn encoder(&self) -> &GraphormerGraphEncoder {
        &self.graph_encoder
    }

    pub fn max_nodes(&self) -> usize {
        self.config.max_nodes
    }

    /// Width of the last axis `forward` produces.
    pub fn output_dim(&self) -> usize {
        self.embed_out
            .as_ref()
            .map_or(self.config.encoder_embed_dim, Linear::out_features)
    }

    /// Redraws the output projection and zeroes the learned output bias.
    pub fn reset_output_layer_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if let Some(embed_out) = &mut self.embed_out {
            *embed_out = Linear::new(embed_out.in_features(), embed_out.out_features(), false, rng);
        }
        self.lm_output_learned_bias = self.embed_out.as_ref().map(|_| 0.);
    }

    /// Per-token outputs `[B, N + 1, num_classes]`, or `[B, N + 1, C]` without a head.
    ///
    /// # Errors
    /// As [`GraphormerGraphEncoder::forward`].
    pub fn forward(
        &self,
        batch: &GraphBatch,
        perturb: Option<&Array3<GraphormerFloat>>,
        mut rng: TrainRng<'_>,
    ) -> Result<Array3<GraphormerFloat>> {
        let options = EncoderOptions {
            perturb,
            last_state_only: true,
            ..EncoderOptions::default()
        };
        let mut encoded = self.graph_encoder.forward(batch, options, rng.as_deref_mut())?;
        let x = encoded.inner_states.pop().ok_or(GraphormerError::EmptyBatch)?;

        let mut x = self.lm_head_transform_weight.forward(&x)?;
        self.activation_fn.apply_inplace(x.view_mut().into_dyn());
        self.layer_norm.forward_inplace(&mut x)?;
        let mut x = match &self.embed_out {
            Some(embed_out) => embed_out.forward(&x)?,
            None => x,
        };
        if let Some(bias) = self.lm_output_learned_bias {
            x += bias;
        }
        Ok(x)
    }

    /// Graph-level predictions `[B, num_classes]`, read off the graph token.
    ///
    /// # Errors
    /// As [`GraphormerModel::forward`].
    pub fn predict_graph(&self, batch: &GraphBatch) -> Result<Array2<GraphormerFloat>> {
        let out = self.forward(batch, None, None)?;
        Ok(out.slice(s![.., 0, ..]).to_owned())
    }

    /// Writes configuration and weights as JSON.
    ///
    /// # Errors
    /// On IO or serialisation failure.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        info!("saved model to {}", path.as_ref().display());
        Ok(())
    }

    /// # Errors
    /// On IO or parse failure, or if the stored config does not validate.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let model: Self = serde_json::from_reader(reader)?;
        model.config.validate()?;
        debug!(
            "loaded model from {} ({} parameters)",
            path.as_ref().display(),
            model.num_parameters()
        );
        Ok(model)
    }
}

impl Module for GraphormerModel {
    fn visit(&self, f: &mut dyn FnMut(Leaf<'_>)) {
        self.graph_encoder.visit(f);
        self.lm_head_transform_weight.visit(f);
        self.layer_norm.visit(f);
        self.embed_out.visit(f);
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(LeafMut<'_>)) {
        self.graph_encoder.visit_mut(f);
        self.lm_head_transform_weight.visit_mut(f);
        self.layer_norm.visit_mut(f);
        self.embed_out.visit_mut(f);
    }

    /// Leaf parameters plus the scalar output bias.
    fn num_parameters(&self) -> usize {
        let mut total = 0;
        self.visit(&mut |leaf: Leaf<'_>| total += leaf.num_parameters());
        total + usize::from(self.lm_output_learned_bias.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{collate, preprocess_item, Graph};
    use crate::test_util::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use proptest::prelude::*;

    fn batch_of(graphs: &[Graph]) -> GraphBatch {
        let items: Vec<_> = graphs.iter().map(preprocess_item).collect();
        collate(&items, 16, 3, 20).unwrap()
    }

    fn toy_batch() -> GraphBatch {
        let g = Graph::from_edges(arr2(&[[1], [2]]), &[(0, 1), (1, 0)], arr2(&[[1], [1]]), Some(0.5)).unwrap();
        batch_of(&[g.clone(), g])
    }

    #[test]
    fn test_head_shapes() {
        let config = GraphormerConfig {
            num_classes: 3,
            ..tiny_config()
        };
        let model = GraphormerModel::new(config, &mut seeded_rng(0)).unwrap();
        let batch = toy_batch();
        assert_eq!(model.forward(&batch, None, None).unwrap().shape(), &[2, 3, 3]);
        let preds = model.predict_graph(&batch).unwrap();
        assert_eq!(preds.shape(), &[2, 3]);
        // Identical graphs, identical predictions.
        assert_abs_diff_eq!(preds.row(0), preds.row(1), epsilon = 1e-12);
    }

    #[test]
    fn test_remove_head() {
        let config = GraphormerConfig {
            remove_head: true,
            ..tiny_config()
        };
        let model = GraphormerModel::new(config, &mut seeded_rng(1)).unwrap();
        assert_eq!(model.output_dim(), 8);
        let out = model.forward(&toy_batch(), None, None).unwrap();
        assert_eq!(out.shape(), &[2, 3, 8]);
    }

    #[test]
    fn test_reset_output_layer() {
        let mut model = GraphormerModel::new(tiny_config(), &mut seeded_rng(2)).unwrap();
        let before = model.predict_graph(&toy_batch()).unwrap();
        model.reset_output_layer_parameters(&mut seeded_rng(3));
        let after = model.predict_graph(&toy_batch()).unwrap();
        assert_ne!(before, after);
        assert_eq!(model.lm_output_learned_bias, Some(0.));
    }

    fn flat_parameters(model: &GraphormerModel) -> Vec<f64> {
        let mut flat = Vec::new();
        model.visit(&mut |leaf: Leaf<'_>| match leaf {
            Leaf::Linear(l) => {
                flat.extend(l.weight().iter());
                flat.extend(l.bias().into_iter().flatten());
            }
            Leaf::Embedding(e) => flat.extend(e.weight().iter()),
            Leaf::LayerNorm(n) => {
                flat.extend(n.weight().iter());
                flat.extend(n.bias().iter());
            }
        });
        flat.extend(model.lm_output_learned_bias);
        flat
    }

    #[test]
    fn test_parameter_count_includes_output_bias() {
        let model = GraphormerModel::new(tiny_config(), &mut seeded_rng(5)).unwrap();
        let mut leaves = 0;
        model.visit(&mut |leaf: Leaf<'_>| leaves += leaf.num_parameters());
        assert_eq!(model.num_parameters(), leaves + 1);
        assert_eq!(model.num_parameters(), flat_parameters(&model).len());

        let headless = GraphormerModel::new(
            GraphormerConfig {
                remove_head: true,
                ..tiny_config()
            },
            &mut seeded_rng(5),
        )
        .unwrap();
        assert_eq!(headless.num_parameters(), flat_parameters(&headless).len());
    }

    #[test]
    fn test_json_checkpoint_is_bit_exact() {
        let model = GraphormerModel::new(tiny_config(), &mut seeded_rng(6)).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let loaded: GraphormerModel = serde_json::from_str(&json).unwrap();
        let (before, after) = (flat_parameters(&model), flat_parameters(&loaded));
        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(&after).all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    #[test]
    fn test_json_checkpoint_round_trip() {
        let model = GraphormerModel::new(tiny_config(), &mut seeded_rng(4)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save_json(&path).unwrap();
        let loaded = GraphormerModel::load_json(&path).unwrap();
        assert_eq!(loaded.config(), model.config());
        assert_eq!(loaded.num_parameters(), model.num_parameters());
        let batch = toy_batch();
        assert_eq!(loaded.predict_graph(&batch).unwrap(), model.predict_graph(&batch).unwrap());
        assert!(GraphormerModel::load_json(dir.path().join("missing.json")).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn test_predictions_are_finite(graphs in proptest::collection::vec(graph(6), 1..4), seed in any::<u64>()) {
            let model = GraphormerModel::new(tiny_config(), &mut seeded_rng(seed)).unwrap();
            let preds = model.predict_graph(&batch_of(&graphs)).unwrap();
            prop_assert_eq!(preds.shape(), &[graphs.len(), 1]);
            prop_assert!(preds.iter().all(|v| v.is_finite()));
        }
    }
}
