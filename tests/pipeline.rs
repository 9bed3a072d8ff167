use graphormer_rs::data::{collate, preprocess_item, FEATURE_OFFSET};
use graphormer_rs::nn::Module;
use graphormer_rs::{GraphormerError, GraphormerModel};

mod common;

#[test]
fn test_collate_drops_oversized_graphs() {
    let small = preprocess_item(&common::path_graph(3, Some(1.)));
    let big = preprocess_item(&common::path_graph(30, Some(2.)));
    let batch = collate(&[small.clone(), big.clone()], 24, 4, 32).unwrap();
    assert_eq!(batch.num_graphs(), 1);
    assert_eq!(batch.num_nodes, vec![3]);
    assert_eq!(batch.targets.unwrap().to_vec(), vec![1.]);
    assert!(matches!(collate(&[big], 24, 4, 32), Err(GraphormerError::EmptyBatch)));
}

#[test]
fn test_preprocess_offsets_feature_columns() {
    let item = preprocess_item(&common::path_graph(4, None));
    assert_eq!(item.x.shape(), &[4, 2]);
    // Column c lands in its own id range after the offset.
    assert!(item.x.column(0).iter().all(|&id| (1..FEATURE_OFFSET).contains(&id)));
    assert!(item
        .x
        .column(1)
        .iter()
        .all(|&id| (FEATURE_OFFSET + 1..2 * FEATURE_OFFSET).contains(&id)));
    assert_eq!(item.spatial_pos[[0, 3]], 3);
    assert_eq!(item.num_hops(), 3);
}

#[test]
fn test_model_checkpoint_round_trip() {
    let config = common::small_config();
    let mut rng = common::rng(11);
    let model = GraphormerModel::new(config, &mut rng).unwrap();
    let graphs: Vec<_> = (0..4).map(|_| common::random_graph(7, 0.4, &mut rng)).collect();
    let items: Vec<_> = graphs.iter().map(preprocess_item).collect();
    let batch = collate(&items, 24, 4, 32).unwrap();
    let preds = model.predict_graph(&batch).unwrap();
    assert_eq!(preds.shape(), &[4, 1]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graphormer.json");
    model.save_json(&path).unwrap();
    let loaded = GraphormerModel::load_json(&path).unwrap();
    assert_eq!(loaded.num_parameters(), model.num_parameters());
    assert_eq!(loaded.predict_graph(&batch).unwrap(), preds);
}
