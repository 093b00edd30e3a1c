//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Produces L2-normalized 512-dimensional embeddings from aligned face
//! crops, tagged `w600k_r50`.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::alignment;
use crate::types::{BoundingBox, Embedding};

const EMB_INPUT_SIZE: usize = 112;
const EMB_MEAN: f32 = 127.5;
// ArcFace normalization is symmetric, unlike the detector's.
const EMB_STD: f32 = 127.5;
const EMB_DIM: usize = 512;
const EMB_MODEL_TAG: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detection must include landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding extractor.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace embedding model");
        Ok(Self { session })
    }

    /// Tag identifying the embedding model; comparisons are only valid
    /// between vectors carrying the same tag.
    pub fn model_tag(&self) -> &'static str {
        EMB_MODEL_TAG
    }

    /// Extract an embedding for one detected face.
    ///
    /// The detection must carry landmarks; the face is warped to the
    /// canonical 112×112 position before inference and the output vector is
    /// L2-normalized.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let landmarks = face.landmarks.as_ref().ok_or(EmbedderError::NoLandmarks)?;

        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMB_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMB_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding::new(values, EMB_MODEL_TAG))
    }
}

/// Turn a 112×112 aligned RGB crop into a NCHW float tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, EMB_INPUT_SIZE, EMB_INPUT_SIZE));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - EMB_MEAN) / EMB_STD;
        }
    }
    tensor
}
