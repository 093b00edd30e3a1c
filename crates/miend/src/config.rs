use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity threshold for a positive recognition.
    pub similarity_threshold: f32,
    /// Longest image side accepted before downscaling.
    pub max_image_dim: u32,
    /// Reject registrations whose name already exists.
    pub unique_names: bool,
    /// Reject registrations indistinguishable from an existing record under
    /// a different name (similarity at or above this value). Unset = off.
    pub duplicate_guard: Option<f32>,
}

impl Config {
    /// Load configuration from `MIEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("MIEN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| mien_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("mien");

        let db_path = std::env::var("MIEN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        Self {
            model_dir,
            db_path,
            similarity_threshold: env_f32("MIEN_SIMILARITY_THRESHOLD", 0.6),
            max_image_dim: env_u32("MIEN_MAX_IMAGE_DIM", 800),
            unique_names: std::env::var("MIEN_UNIQUE_NAMES")
                .map(|v| v == "1")
                .unwrap_or(false),
            duplicate_guard: std::env::var("MIEN_DUPLICATE_GUARD")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
