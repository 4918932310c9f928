//! Error types for the detector and the descriptor library

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the YOLO detector
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The model could not be loaded at all. There is no fallback for this.
    #[error("failed to load detector model {path:?}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },

    #[error("model file not found: {0:?}")]
    ModelMissing(PathBuf),

    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),

    #[error("unexpected model output shape {0:?}")]
    OutputShape(Vec<i64>),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Errors raised while building, loading or saving descriptor libraries
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error("unknown catalog id: {0}")]
    UnknownId(String),

    #[error("no features found in image")]
    NoFeatures,
}

impl LibraryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LibraryError::Io {
            path: path.into(),
            source,
        }
    }
}
