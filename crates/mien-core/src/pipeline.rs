//! Detection/embedding pipeline behind a trait.
//!
//! The daemon talks to [`FacePipeline`] only, so tests can substitute a fake
//! and the ONNX sessions stay a process-wide handle owned by whoever loaded
//! them instead of ambient global state.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::{BoundingBox, Embedding};

/// Longest image side accepted before downscaling.
pub const DEFAULT_MAX_IMAGE_DIM: u32 = 800;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// A detected face paired with its embedding.
#[derive(Debug, Clone)]
pub struct FaceEmbedding {
    pub face: BoundingBox,
    pub embedding: Embedding,
}

impl AsRef<BoundingBox> for FaceEmbedding {
    fn as_ref(&self) -> &BoundingBox {
        &self.face
    }
}

/// Face detection and embedding extraction over raw image bytes.
///
/// `detect` returns every face found, sorted by descending confidence.
/// `embed` additionally extracts one embedding per face, tagged with
/// [`model_tag`](Self::model_tag). The vectors are trusted blindly
/// downstream; semantic validation is not this layer's job.
pub trait FacePipeline: Send {
    /// Tag of the embedding model this pipeline produces.
    fn model_tag(&self) -> &str;

    fn detect(&mut self, image: &[u8]) -> Result<Vec<BoundingBox>, PipelineError>;

    fn embed(&mut self, image: &[u8]) -> Result<Vec<FaceEmbedding>, PipelineError>;
}

/// ONNX pipeline: SCRFD detection + ArcFace embeddings.
pub struct OnnxPipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    max_image_dim: u32,
}

impl OnnxPipeline {
    /// Load both ONNX models. Fails fast if either file is missing.
    pub fn load(
        detector_path: &Path,
        embedder_path: &Path,
        max_image_dim: u32,
    ) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path)?;
        Ok(Self {
            detector,
            embedder,
            max_image_dim,
        })
    }

    /// Decode uploaded bytes and cap the longest side at `max_image_dim`,
    /// preserving aspect ratio.
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, PipelineError> {
        let img = image::load_from_memory(bytes)?;
        let (w, h) = (img.width(), img.height());
        let longest = w.max(h);

        let img = if longest > self.max_image_dim {
            let scale = self.max_image_dim as f32 / longest as f32;
            let nw = ((w as f32 * scale).round() as u32).max(1);
            let nh = ((h as f32 * scale).round() as u32).max(1);
            tracing::debug!(from = ?(w, h), to = ?(nw, nh), "downscaling oversized image");
            img.resize_exact(nw, nh, FilterType::Lanczos3)
        } else {
            img
        };

        Ok(img.to_rgb8())
    }
}

impl FacePipeline for OnnxPipeline {
    fn model_tag(&self) -> &str {
        self.embedder.model_tag()
    }

    fn detect(&mut self, image: &[u8]) -> Result<Vec<BoundingBox>, PipelineError> {
        let rgb = self.decode(image)?;
        Ok(self.detector.detect(&rgb)?)
    }

    fn embed(&mut self, image: &[u8]) -> Result<Vec<FaceEmbedding>, PipelineError> {
        let rgb = self.decode(image)?;
        let faces = self.detector.detect(&rgb)?;

        let mut out = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = self.embedder.extract(&rgb, &face)?;
            out.push(FaceEmbedding { face, embedding });
        }
        Ok(out)
    }
}
