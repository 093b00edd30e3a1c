use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl AsRef<BoundingBox> for BoundingBox {
    fn as_ref(&self) -> &BoundingBox {
        self
    }
}

/// Face embedding vector, tagged with the model that produced it.
///
/// Vectors from different model tags are not comparable; the tag also fixes
/// the vector's dimensionality (see [`ModelRegistry`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model tag, e.g. "w600k_r50".
    pub model: String,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            values,
            model: model.into(),
        }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero vectors
    /// compare as 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A stored identity with its embedding and contact metadata.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub embedding: Embedding,
    /// RFC 3339 timestamps maintained by the store.
    pub created_at: String,
    pub updated_at: String,
}

/// Registry of embedding model tags and their vector dimensionality.
///
/// Comparisons are only valid between vectors carrying the same tag, and
/// every vector's length must equal the dimensionality registered here.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dims: HashMap<String, usize>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut dims = HashMap::new();
        // ArcFace w600k_r50 — produced by the bundled ONNX pipeline.
        dims.insert("w600k_r50".to_string(), 512);
        // VGG-Face — records imported from the legacy system.
        dims.insert("VGG-Face".to_string(), 2622);
        Self { dims }
    }
}

impl ModelRegistry {
    /// Registered dimensionality for a model tag, if known.
    pub fn dimension(&self, model: &str) -> Option<usize> {
        self.dims.get(model).copied()
    }

    /// Register an additional model tag.
    pub fn register(&mut self, model: impl Into<String>, dimension: usize) {
        self.dims.insert(model.into(), dimension);
    }
}
