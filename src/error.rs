use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphormerError>;

#[derive(Debug, Error)]
pub enum GraphormerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<Option<usize>>,
        found: Vec<usize>,
    },
    #[error("{what} index {index} is out of range for size {size}")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        size: usize,
    },
    #[error("unknown activation function: {0}")]
    UnknownActivation(String),
    #[error("no graph left to collate")]
    EmptyBatch,
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
