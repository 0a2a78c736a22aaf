use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading data, fitting, or persisting a pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid token pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{path}: missing column `{column}`")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("row {row}: cannot parse label `{value}`")]
    InvalidLabel { row: usize, value: String },

    #[error("cannot fit on an empty corpus")]
    EmptyCorpus,

    #[error("vocabulary is empty after stop-word removal")]
    EmptyVocabulary,

    #[error("{samples} samples but {labels} labels")]
    LengthMismatch { samples: usize, labels: usize },

    #[error("training labels contain a single class ({0})")]
    SingleClass(bool),

    #[error("cannot combine feature blocks with {left} and {right} rows")]
    ShapeMismatch { left: usize, right: usize },

    #[error("expected {expected} features, got {actual}")]
    FeatureWidth { expected: usize, actual: usize },

    #[error("invalid topic model: {0}")]
    InvalidTopicModel(String),

    #[error("pipeline needs a topic model but none was supplied")]
    MissingTopicModel,

    #[error("artifact schema {found} does not match supported schema {expected}")]
    SchemaMismatch { expected: String, found: String },

    #[error("artifact was fitted with a different configuration")]
    ConfigMismatch,

    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),
}
