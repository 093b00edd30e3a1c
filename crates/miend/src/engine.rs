use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use mien_core::{BoundingBox, FaceEmbedding, FacePipeline, PipelineError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the inference thread.
enum EngineRequest {
    Detect {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, EngineError>>,
    },
    Embed {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<FaceEmbedding>, EngineError>>,
    },
}

/// Clone-safe handle to the inference thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    model_tag: String,
}

impl EngineHandle {
    /// Tag of the embedding model the pipeline produces.
    pub fn model_tag(&self) -> &str {
        &self.model_tag
    }

    /// Detect faces in an uploaded image.
    pub async fn detect(&self, image: Vec<u8>) -> Result<Vec<BoundingBox>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect faces and extract one embedding per face.
    pub async fn embed(&self, image: Vec<u8>) -> Result<Vec<FaceEmbedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the inference engine on a dedicated OS thread.
///
/// The thread owns the pipeline (and with it the ONNX sessions) for its
/// whole life; handlers talk to it through the returned handle. The handle
/// is the only way in — the pipeline never becomes ambient global state.
pub fn spawn_engine(mut pipeline: Box<dyn FacePipeline>) -> EngineHandle {
    let model_tag = pipeline.model_tag().to_string();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = pipeline.detect(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Embed { image, reply } => {
                        let result = pipeline.embed(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx, model_tag }
}
