//! Registry operations: save, recognize, delete, list, audit.
//!
//! Composes the inference engine, the matcher, and the store. Store calls
//! run on the blocking pool; matching itself is a cheap in-memory scan.

use std::sync::Arc;

use thiserror::Error;

use mien_core::matcher::{match_embedding, MatchError, MatchOutcome};
use mien_core::{sort_reading_order, BoundingBox, FaceEmbedding, FaceRecord};
use mien_store::{
    ContactUpdate, FaceStore, NewFace, RecognitionLogEntry, RecognitionStatus, StoreError,
};

use crate::engine::{EngineError, EngineHandle};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{names} name(s) supplied but {faces} face(s) detected")]
    NameCountMismatch { names: usize, faces: usize },
    #[error("store task failed: {0}")]
    StoreTask(String),
}

/// Result of one recognition attempt.
#[derive(Debug)]
pub struct Recognition {
    pub status: RecognitionStatus,
    /// The face the attempt was made on; `None` when no face was detected.
    pub face: Option<BoundingBox>,
    /// Match outcome; `None` when no face was detected.
    pub outcome: Option<MatchOutcome>,
}

pub struct FaceService {
    store: Arc<FaceStore>,
    engine: EngineHandle,
    threshold: f32,
}

impl FaceService {
    pub fn new(store: Arc<FaceStore>, engine: EngineHandle, threshold: f32) -> Self {
        Self {
            store,
            engine,
            threshold,
        }
    }

    pub fn model_tag(&self) -> &str {
        self.engine.model_tag()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Register one face: the highest-confidence detection in the image.
    pub async fn save_face(
        &self,
        name: String,
        email: Option<String>,
        phone: Option<String>,
        image: Vec<u8>,
    ) -> Result<FaceRecord, ServiceError> {
        let faces = self.engine.embed(image).await?;
        // The pipeline returns faces sorted by descending confidence.
        let best = faces.into_iter().next().ok_or(ServiceError::NoFaceDetected)?;

        let record = self
            .with_store(move |store| {
                store.insert(NewFace {
                    name,
                    email,
                    phone,
                    embedding: best.embedding,
                })
            })
            .await?;

        tracing::info!(id = record.id, name = %record.name, "face saved");
        Ok(record)
    }

    /// Register every face in a group photo.
    ///
    /// Faces are put into reading order (ascending x, ties by ascending y)
    /// and `names[i]` pairs with the i-th face in that order. A count
    /// mismatch aborts before anything is inserted.
    pub async fn save_group(
        &self,
        names: Vec<String>,
        image: Vec<u8>,
    ) -> Result<Vec<FaceRecord>, ServiceError> {
        let mut faces = self.engine.embed(image).await?;
        if faces.is_empty() {
            return Err(ServiceError::NoFaceDetected);
        }
        if names.len() != faces.len() {
            return Err(ServiceError::NameCountMismatch {
                names: names.len(),
                faces: faces.len(),
            });
        }

        sort_reading_order(&mut faces);

        let records = self
            .with_store(move |store| {
                let mut records = Vec::with_capacity(names.len());
                for (name, face) in names.into_iter().zip(faces) {
                    records.push(store.insert(NewFace {
                        name,
                        email: None,
                        phone: None,
                        embedding: face.embedding,
                    })?);
                }
                Ok(records)
            })
            .await?;

        tracing::info!(count = records.len(), "group saved");
        Ok(records)
    }

    /// Recognize the highest-confidence face in the image.
    ///
    /// Every attempt is logged: `no_face`, `unknown` (with the best score
    /// for diagnostics), or `success`.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<Recognition, ServiceError> {
        let faces = self.engine.embed(image).await?;
        let Some(best) = faces.into_iter().next() else {
            self.with_store(|store| store.log_recognition(RecognitionStatus::NoFace, None, None))
                .await?;
            tracing::info!("recognize: no face detected");
            return Ok(Recognition {
                status: RecognitionStatus::NoFace,
                face: None,
                outcome: None,
            });
        };

        let recognition = self.match_and_log(best).await?;
        Ok(recognition)
    }

    /// Recognize every face in a group photo, in reading order.
    ///
    /// Returns one entry per detected face; an image with no faces yields
    /// an empty list and a single `no_face` log entry.
    pub async fn recognize_group(&self, image: Vec<u8>) -> Result<Vec<Recognition>, ServiceError> {
        let mut faces = self.engine.embed(image).await?;
        if faces.is_empty() {
            self.with_store(|store| store.log_recognition(RecognitionStatus::NoFace, None, None))
                .await?;
            return Ok(Vec::new());
        }

        sort_reading_order(&mut faces);

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            results.push(self.match_and_log(face).await?);
        }
        Ok(results)
    }

    /// Preview detections without touching the store, in reading order.
    pub async fn detect(&self, image: Vec<u8>) -> Result<Vec<BoundingBox>, ServiceError> {
        let mut faces = self.engine.detect(image).await?;
        sort_reading_order(&mut faces);
        Ok(faces)
    }

    pub async fn list(&self) -> Result<Vec<FaceRecord>, ServiceError> {
        self.with_store(|store| store.list_all()).await
    }

    pub async fn count(&self) -> Result<usize, ServiceError> {
        self.with_store(|store| store.count()).await
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<usize, ServiceError> {
        self.with_store(move |store| store.delete_by_id(id).map(|()| 1))
            .await
    }

    pub async fn delete_by_name(&self, name: String) -> Result<usize, ServiceError> {
        self.with_store(move |store| store.delete_by_name(&name)).await
    }

    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<RecognitionLogEntry>, ServiceError> {
        self.with_store(move |store| store.recent_logs(limit)).await
    }

    /// Edit a record's contact metadata; the embedding stays immutable.
    pub async fn update_contact(
        &self,
        id: i64,
        update: ContactUpdate,
    ) -> Result<FaceRecord, ServiceError> {
        self.with_store(move |store| store.update_contact(id, update))
            .await
    }

    /// Match one extracted face against the stored records and log the
    /// attempt.
    async fn match_and_log(&self, face: FaceEmbedding) -> Result<Recognition, ServiceError> {
        let model = face.embedding.model.clone();
        let candidates = self
            .with_store(move |store| store.list_by_model(&model))
            .await?;

        let outcome = match_embedding(
            self.store.registry(),
            &candidates,
            &face.embedding.values,
            &face.embedding.model,
            self.threshold,
        )?;

        let status = if outcome.recognized {
            RecognitionStatus::Success
        } else {
            RecognitionStatus::Unknown
        };
        let name = outcome.record.as_ref().map(|r| r.name.clone());
        let score = outcome.best_score;
        self.with_store(move |store| store.log_recognition(status, name.as_deref(), Some(score)))
            .await?;

        tracing::info!(
            status = status.as_str(),
            score,
            name = outcome.record.as_ref().map(|r| r.name.as_str()),
            "recognition attempt"
        );

        Ok(Recognition {
            status,
            face: Some(face.face),
            outcome: Some(outcome),
        })
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&FaceStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ServiceError::StoreTask(e.to_string()))?
            .map_err(ServiceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use mien_core::{Embedding, FacePipeline, ModelRegistry, PipelineError};
    use mien_store::RegistrationPolicy;

    const TAG: &str = "toy";
    const DIM: usize = 4;

    /// Canned pipeline: returns the same faces for every image.
    struct FakePipeline {
        faces: Vec<FaceEmbedding>,
    }

    impl FakePipeline {
        fn new(faces: Vec<(f32, f32, [f32; DIM])>) -> Self {
            let faces = faces
                .into_iter()
                .map(|(x, y, values)| FaceEmbedding {
                    face: BoundingBox {
                        x,
                        y,
                        width: 60.0,
                        height: 60.0,
                        confidence: 0.9,
                        landmarks: None,
                    },
                    embedding: Embedding::new(values.to_vec(), TAG),
                })
                .collect();
            Self { faces }
        }

        fn empty() -> Self {
            Self { faces: Vec::new() }
        }
    }

    impl FacePipeline for FakePipeline {
        fn model_tag(&self) -> &str {
            TAG
        }

        fn detect(&mut self, _image: &[u8]) -> Result<Vec<BoundingBox>, PipelineError> {
            Ok(self.faces.iter().map(|f| f.face.clone()).collect())
        }

        fn embed(&mut self, _image: &[u8]) -> Result<Vec<FaceEmbedding>, PipelineError> {
            Ok(self.faces.clone())
        }
    }

    fn test_service(pipeline: FakePipeline) -> (tempfile::TempDir, FaceService) {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let mut registry = ModelRegistry::default();
        registry.register(TAG, DIM);
        let store = Arc::new(
            FaceStore::open(
                &dir.path().join("faces.db"),
                registry,
                RegistrationPolicy::default(),
            )
            .expect("open store"),
        );
        let engine = spawn_engine(Box::new(pipeline));
        (dir, FaceService::new(store, engine, 0.6))
    }

    #[tokio::test]
    async fn save_then_recognize_roundtrip() {
        let (_dir, service) = test_service(FakePipeline::new(vec![(
            10.0,
            10.0,
            [1.0, 0.0, 0.0, 0.0],
        )]));

        let record = service
            .save_face("ada".into(), None, None, vec![0])
            .await
            .expect("save");
        assert_eq!(record.name, "ada");

        let recognition = service.recognize(vec![0]).await.expect("recognize");
        assert_eq!(recognition.status, RecognitionStatus::Success);
        let outcome = recognition.outcome.expect("outcome");
        assert!(outcome.recognized);
        assert_eq!(outcome.record.as_ref().unwrap().name, "ada");
        assert!((outcome.best_score - 1.0).abs() < 1e-6);

        let logs = service.recent_logs(10).await.expect("logs");
        assert_eq!(logs[0].status, "success");
        assert_eq!(logs[0].recognized_name.as_deref(), Some("ada"));
    }

    #[tokio::test]
    async fn recognize_empty_store_is_unknown() {
        let (_dir, service) = test_service(FakePipeline::new(vec![(
            10.0,
            10.0,
            [1.0, 0.0, 0.0, 0.0],
        )]));

        let recognition = service.recognize(vec![0]).await.expect("recognize");
        assert_eq!(recognition.status, RecognitionStatus::Unknown);
        let outcome = recognition.outcome.expect("outcome");
        assert!(!outcome.recognized);
        assert_eq!(outcome.best_score, 0.0);
    }

    #[tokio::test]
    async fn deleted_record_is_never_matched() {
        let (_dir, service) = test_service(FakePipeline::new(vec![(
            10.0,
            10.0,
            [1.0, 0.0, 0.0, 0.0],
        )]));

        let record = service
            .save_face("ada".into(), None, None, vec![0])
            .await
            .expect("save");
        service.delete_by_id(record.id).await.expect("delete");

        let recognition = service.recognize(vec![0]).await.expect("recognize");
        assert_eq!(recognition.status, RecognitionStatus::Unknown);
        assert!(recognition.outcome.unwrap().record.is_none());
    }

    #[tokio::test]
    async fn save_with_no_face_fails_and_recognize_logs_no_face() {
        let (_dir, service) = test_service(FakePipeline::empty());

        let err = service
            .save_face("ada".into(), None, None, vec![0])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));

        let recognition = service.recognize(vec![0]).await.expect("recognize");
        assert_eq!(recognition.status, RecognitionStatus::NoFace);
        assert!(recognition.face.is_none());

        let logs = service.recent_logs(10).await.expect("logs");
        assert_eq!(logs[0].status, "no_face");
        assert!(logs[0].recognized_name.is_none());
    }

    #[tokio::test]
    async fn group_save_pairs_names_with_reading_order() {
        // Detections arrive as [x=10, x=200, x=50]; names A,B,C must land on
        // the x-sorted faces: A at x=10, B at x=50, C at x=200.
        let (_dir, service) = test_service(FakePipeline::new(vec![
            (10.0, 0.0, [1.0, 0.0, 0.0, 0.0]),
            (200.0, 0.0, [0.0, 1.0, 0.0, 0.0]),
            (50.0, 0.0, [0.0, 0.0, 1.0, 0.0]),
        ]));

        let records = service
            .save_group(vec!["A".into(), "B".into(), "C".into()], vec![0])
            .await
            .expect("save group");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "A");
        assert_eq!(records[0].embedding.values, vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(records[1].name, "B");
        assert_eq!(records[1].embedding.values, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(records[2].name, "C");
        assert_eq!(records[2].embedding.values, vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn group_save_name_count_mismatch_inserts_nothing() {
        let (_dir, service) = test_service(FakePipeline::new(vec![
            (10.0, 0.0, [1.0, 0.0, 0.0, 0.0]),
            (50.0, 0.0, [0.0, 1.0, 0.0, 0.0]),
        ]));

        let err = service
            .save_group(vec!["A".into()], vec![0])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::NameCountMismatch { names: 1, faces: 2 }
        ));
        assert_eq!(service.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn group_recognize_returns_reading_order() {
        let (_dir, service) = test_service(FakePipeline::new(vec![
            (200.0, 0.0, [0.0, 1.0, 0.0, 0.0]),
            (10.0, 0.0, [1.0, 0.0, 0.0, 0.0]),
        ]));

        service
            .save_group(vec!["left".into(), "right".into()], vec![0])
            .await
            .expect("save group");

        let results = service.recognize_group(vec![0]).await.expect("recognize");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].face.as_ref().unwrap().x, 10.0);
        assert_eq!(
            results[0]
                .outcome
                .as_ref()
                .unwrap()
                .record
                .as_ref()
                .unwrap()
                .name,
            "left"
        );
        assert_eq!(results[1].face.as_ref().unwrap().x, 200.0);
        assert_eq!(
            results[1]
                .outcome
                .as_ref()
                .unwrap()
                .record
                .as_ref()
                .unwrap()
                .name,
            "right"
        );
    }

    #[tokio::test]
    async fn detect_preview_is_reading_ordered() {
        let (_dir, service) = test_service(FakePipeline::new(vec![
            (300.0, 0.0, [0.0; DIM]),
            (20.0, 0.0, [0.0; DIM]),
            (150.0, 0.0, [0.0; DIM]),
        ]));

        let faces = service.detect(vec![0]).await.expect("detect");
        let xs: Vec<f32> = faces.iter().map(|f| f.x).collect();
        assert_eq!(xs, vec![20.0, 150.0, 300.0]);
        assert_eq!(service.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_name_reports_count() {
        let (_dir, service) = test_service(FakePipeline::new(vec![(
            10.0,
            10.0,
            [1.0, 0.0, 0.0, 0.0],
        )]));

        service
            .save_face("ada".into(), None, None, vec![0])
            .await
            .unwrap();
        service
            .save_face("ada".into(), None, None, vec![0])
            .await
            .unwrap();

        assert_eq!(service.delete_by_name("ada".into()).await.unwrap(), 2);
        let err = service.delete_by_name("ada".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::NotFound(_))));
    }
}
