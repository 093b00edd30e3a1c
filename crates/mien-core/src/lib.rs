//! mien-core — Face registry primitives.
//!
//! Embedding types and the cosine matcher, reading-order sorting for
//! multi-face images, and the ONNX pipeline (SCRFD detection + ArcFace
//! embeddings) behind the [`FacePipeline`] trait.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod ordering;
pub mod pipeline;
pub mod types;

pub use matcher::{match_embedding, MatchError, MatchOutcome};
pub use ordering::sort_reading_order;
pub use pipeline::{FaceEmbedding, FacePipeline, OnnxPipeline, PipelineError};
pub use types::{BoundingBox, Embedding, FaceRecord, ModelRegistry};

use std::path::PathBuf;

/// Default directory for ONNX model files: `$XDG_DATA_HOME/mien/models`
/// (or `~/.local/share/mien/models`).
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("mien/models")
}
