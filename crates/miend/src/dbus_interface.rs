//! D-Bus interface for the mien face registry daemon.
//!
//! Bus name: org.mien.Mien1
//! Object path: /org/mien/Mien1
//!
//! Methods return JSON strings; optional string arguments use "" for
//! "not provided" since D-Bus has no optional types.

use serde_json::json;
use zbus::interface;

use mien_core::FaceRecord;
use mien_store::{ContactUpdate, StoreError};

use crate::service::{FaceService, Recognition, ServiceError};

pub struct MienService {
    service: FaceService,
}

impl MienService {
    pub fn new(service: FaceService) -> Self {
        Self { service }
    }
}

#[interface(name = "org.mien.Mien1")]
impl MienService {
    /// Register the most confident face in the image under `name`.
    async fn save_face(
        &self,
        name: String,
        email: String,
        phone: String,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(%name, bytes = image.len(), "save_face requested");
        let record = self
            .service
            .save_face(name, opt(email), opt(phone), image)
            .await
            .map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "message": format!("Face saved successfully for {}", record.name),
            "face_id": record.id,
            "name": record.name,
        })
        .to_string())
    }

    /// Register every face in a group photo. `names` is comma-separated and
    /// pairs with the faces left to right.
    async fn save_group(&self, names: String, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let names: Vec<String> = names
            .split(',')
            .map(|n| n.trim().to_string())
            .collect();
        tracing::info!(count = names.len(), bytes = image.len(), "save_group requested");

        let records = self
            .service
            .save_group(names, image)
            .await
            .map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "message": format!("Saved {} face(s)", records.len()),
            "saved": records
                .iter()
                .map(|r| json!({"face_id": r.id, "name": r.name}))
                .collect::<Vec<_>>(),
        })
        .to_string())
    }

    /// Recognize the most confident face in the image.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let recognition = self.service.recognize(image).await.map_err(to_fdo)?;
        Ok(recognition_json(&recognition).to_string())
    }

    /// Recognize every face in a group photo, left to right.
    async fn recognize_group(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize_group requested");
        let results = self.service.recognize_group(image).await.map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "total_faces": results.len(),
            "faces": results.iter().map(recognition_json).collect::<Vec<_>>(),
        })
        .to_string())
    }

    /// Preview detections without saving anything.
    async fn detect(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "detect requested");
        let faces = self.service.detect(image).await.map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "total_faces": faces.len(),
            "faces": faces,
        })
        .to_string())
    }

    /// List all saved faces.
    async fn list_faces(&self) -> zbus::fdo::Result<String> {
        let records = self.service.list().await.map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "total_faces": records.len(),
            "faces": records.iter().map(face_json).collect::<Vec<_>>(),
        })
        .to_string())
    }

    /// Delete by id (`id` > 0) or by name (all records with that name).
    async fn delete_face(&self, id: i64, name: String) -> zbus::fdo::Result<String> {
        let deleted = if id > 0 {
            self.service.delete_by_id(id).await.map_err(to_fdo)?
        } else if !name.is_empty() {
            self.service.delete_by_name(name).await.map_err(to_fdo)?
        } else {
            return Err(zbus::fdo::Error::InvalidArgs(
                "either id or name must be provided".into(),
            ));
        };

        Ok(json!({
            "success": true,
            "message": format!("Successfully deleted {deleted} face record(s)"),
            "deleted_count": deleted,
        })
        .to_string())
    }

    /// Edit contact metadata of a record. Empty strings leave fields
    /// untouched; the embedding cannot be changed.
    async fn update_contact(
        &self,
        id: i64,
        name: String,
        email: String,
        phone: String,
    ) -> zbus::fdo::Result<String> {
        let record = self
            .service
            .update_contact(
                id,
                ContactUpdate {
                    name: opt(name),
                    email: opt(email),
                    phone: opt(phone),
                },
            )
            .await
            .map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "face": face_json(&record),
        })
        .to_string())
    }

    /// Most recent recognition attempts, newest first.
    async fn recent_logs(&self, limit: u32) -> zbus::fdo::Result<String> {
        let logs = self
            .service
            .recent_logs(limit as usize)
            .await
            .map_err(to_fdo)?;

        Ok(json!({
            "success": true,
            "total": logs.len(),
            "logs": logs,
        })
        .to_string())
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let faces = self.service.count().await.map_err(to_fdo)?;

        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "embedding_model": self.service.model_tag(),
            "similarity_threshold": self.service.threshold(),
            "total_faces": faces,
        })
        .to_string())
    }
}

/// Empty D-Bus string → absent optional.
fn opt(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn face_json(record: &FaceRecord) -> serde_json::Value {
    json!({
        "id": record.id,
        "name": record.name,
        "email": record.email,
        "phone": record.phone,
        "embedding_model": record.embedding.model,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

fn recognition_json(recognition: &Recognition) -> serde_json::Value {
    let Some(outcome) = &recognition.outcome else {
        return json!({
            "success": true,
            "message": "No face detected in the image",
            "recognized": false,
        });
    };

    match &outcome.record {
        Some(record) if outcome.recognized => json!({
            "success": true,
            "message": format!("Face recognized as {}", record.name),
            "recognized": true,
            "name": record.name,
            "confidence": outcome.best_score,
            "face_id": record.id,
            "email": record.email,
            "phone": record.phone,
            "face": recognition.face,
        }),
        _ => json!({
            "success": true,
            "message": "Face not recognized. Unknown person.",
            "recognized": false,
            "confidence": outcome.best_score,
            "face": recognition.face,
        }),
    }
}

/// Map service failures onto D-Bus error categories: caller mistakes become
/// InvalidArgs, everything else Failed.
fn to_fdo(err: ServiceError) -> zbus::fdo::Error {
    match &err {
        ServiceError::NoFaceDetected
        | ServiceError::NameCountMismatch { .. }
        | ServiceError::Match(_)
        | ServiceError::Store(
            StoreError::EmptyName
            | StoreError::UnknownModel(_)
            | StoreError::DimensionMismatch { .. }
            | StoreError::DuplicateName(_)
            | StoreError::DuplicateFace { .. },
        ) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}
