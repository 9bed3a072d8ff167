use clap::Parser;
use graphormer_rs::data::{collate, preprocess_item, Graph};
use graphormer_rs::logging::init_logging;
use graphormer_rs::modules::EncoderOptions;
use graphormer_rs::nn::Module;
use graphormer_rs::{GraphormerConfig, GraphormerModel, Result};
use log::{info, LevelFilter};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

/// Encodes a few toy molecule-like graphs and prints their graph representations.
#[derive(Debug, Parser)]
#[command(name = "graphormer-demo", version)]
struct Args {
    /// JSON model configuration; overrides --preset.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named configuration: default, base, slim or large.
    #[arg(long, default_value = "slim")]
    preset: String,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// log4rs YAML or JSON file; overrides --log-level.
    #[arg(long)]
    log_config: Option<PathBuf>,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    /// Writes the initialised model as a JSON checkpoint.
    #[arg(long)]
    save: Option<PathBuf>,
}

fn ring(n: usize, atom: i64) -> Result<Graph> {
    let edges: Vec<_> = (0..n)
        .flat_map(|i| [(i, (i + 1) % n), ((i + 1) % n, i)])
        .collect();
    let node_features = Array2::from_shape_fn((n, 2), |(i, c)| if c == 0 { atom } else { (i % 3) as i64 });
    let edge_features = Array2::from_elem((edges.len(), 1), 1);
    Graph::from_edges(node_features, &edges, edge_features, None)
}

fn star(leaves: usize) -> Result<Graph> {
    let edges: Vec<_> = (1..=leaves).flat_map(|i| [(0, i), (i, 0)]).collect();
    let node_features = Array2::from_shape_fn((leaves + 1, 2), |(i, c)| (i.min(1) + c) as i64);
    let edge_features = Array2::from_elem((edges.len(), 1), 2);
    Graph::from_edges(node_features, &edges, edge_features, None)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_config.as_deref(), args.log_level)?;

    let config = match &args.config {
        Some(path) => GraphormerConfig::from_json_file(path)?,
        None => GraphormerConfig::preset(&args.preset)?,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let model = GraphormerModel::new(config, &mut rng)?;
    info!(
        "built model with {} layers and {} parameters",
        model.encoder().num_layers(),
        model.num_parameters()
    );

    let graphs = vec![ring(6, 6)?, star(4)?, ring(3, 8)?];
    let items: Vec<_> = graphs.iter().map(preprocess_item).collect();
    let cfg = model.config();
    let batch = collate(&items, cfg.max_nodes, cfg.multi_hop_max_dist, cfg.spatial_pos_max)?;

    let encoded = model.encoder().forward(&batch, EncoderOptions::default(), None)?;
    for (i, rep) in encoded.graph_rep.outer_iter().enumerate() {
        let head: Vec<_> = rep.iter().take(4).map(|v| format!("{:.4}", v)).collect();
        println!("graph {}: [{}, ...]", i, head.join(", "));
    }
    println!("predictions: {:?}", model.predict_graph(&batch)?);

    if let Some(path) = &args.save {
        model.save_json(path)?;
    }
    Ok(())
}
