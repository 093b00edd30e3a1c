use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use mien_core::{ModelRegistry, OnnxPipeline};
use mien_store::{FaceStore, RegistrationPolicy};

mod config;
mod dbus_interface;
mod engine;
mod service;

use config::Config;
use dbus_interface::MienService;
use service::FaceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = Config::from_env();

    let policy = RegistrationPolicy {
        unique_names: config.unique_names,
        duplicate_guard: config.duplicate_guard,
    };
    let store = Arc::new(
        FaceStore::open(&config.db_path, ModelRegistry::default(), policy)
            .with_context(|| format!("opening face store at {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "face store ready");

    let pipeline = OnnxPipeline::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
        config.max_image_dim,
    )
    .with_context(|| format!("loading ONNX models from {}", config.model_dir.display()))?;
    tracing::info!(dir = %config.model_dir.display(), "ONNX models loaded");

    let engine = engine::spawn_engine(Box::new(pipeline));
    let service = FaceService::new(store, engine, config.similarity_threshold);

    let _conn = zbus::connection::Builder::session()?
        .name("org.mien.Mien1")?
        .serve_at("/org/mien/Mien1", MienService::new(service))?
        .build()
        .await
        .context("registering org.mien.Mien1 on the session bus")?;

    tracing::info!(
        threshold = config.similarity_threshold,
        "miend ready on org.mien.Mien1"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("miend shutting down");

    Ok(())
}
