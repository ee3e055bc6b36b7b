//! Enrollment coordinator.
//!
//! Turns a burst of uploaded frames into a persisted identity plus its
//! embedding set. The patient record is upserted first so the identity is
//! visible immediately; if no embedding ends up persisted, or the engine or
//! a store fails midway, a compensating delete removes the record and any
//! embeddings tagged with the identity. After every return, either both
//! stores know the identity or neither does.

use std::sync::Arc;

use kiosk_core::{decode_frames, SkippedFrame};
use kiosk_store::{PatientDb, PatientFields, StoreError};
use thiserror::Error;

use crate::engine::{Engine, EngineError};

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no decodable frames in upload")]
    NoUsableFrames,
    #[error("no face embedding could be extracted from any frame")]
    NoEmbeddings,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a successful enrollment.
#[derive(Debug)]
pub struct EnrollOutcome {
    /// Embeddings persisted by this call (pre-existing ones not counted).
    pub persisted: usize,
    /// Frames dropped, with reasons, in upload order.
    pub skipped: Vec<SkippedFrame>,
    /// True when fewer than the advisory target were persisted.
    pub below_target: bool,
    pub message: String,
}

pub struct EnrollmentCoordinator {
    patients: PatientDb,
    engine: Arc<Engine>,
    min_embeddings: usize,
}

impl EnrollmentCoordinator {
    pub fn new(patients: PatientDb, engine: Arc<Engine>, min_embeddings: usize) -> Self {
        Self {
            patients,
            engine,
            min_embeddings,
        }
    }

    /// Enroll (or re-enroll) an identity from an ordered frame burst.
    ///
    /// Re-enrollment overwrites the metadata fields and *adds* embeddings;
    /// existing embeddings for the identity are left untouched on success.
    pub async fn enroll(
        &self,
        nik: i64,
        fields: PatientFields,
        frames: &[Vec<u8>],
    ) -> Result<EnrollOutcome, EnrollError> {
        // Identity becomes visible before biometric validation completes.
        self.patients.upsert(nik, fields).await?;

        let report = decode_frames(frames.iter().map(Vec::as_slice));
        if report.is_empty() {
            self.rollback(nik, "no decodable frames").await;
            return Err(EnrollError::NoUsableFrames);
        }

        let mut skipped = report.skipped;
        let mut extracted = Vec::new();
        for frame in &report.frames {
            match self.engine.extract(&frame.image) {
                Ok(Some(embedding)) => extracted.push(embedding),
                Ok(None) => skipped.push(SkippedFrame {
                    index: frame.index,
                    reason: "no usable face".to_string(),
                }),
                Err(err) => {
                    self.rollback(nik, "extractor failure").await;
                    return Err(err.into());
                }
            }
        }

        if extracted.is_empty() {
            self.rollback(nik, "zero embeddings extracted").await;
            return Err(EnrollError::NoEmbeddings);
        }

        let mut persisted = 0usize;
        for embedding in extracted {
            match self.engine.persist_embedding(nik, embedding).await {
                Ok(_) => persisted += 1,
                Err(err) => {
                    self.rollback(nik, "embedding persist failure").await;
                    return Err(err.into());
                }
            }
        }

        let below_target = persisted < self.min_embeddings;
        let message = if below_target {
            format!(
                "enrolled with {persisted} embedding(s), below the target of {}",
                self.min_embeddings
            )
        } else {
            format!("enrolled with {persisted} embedding(s)")
        };
        tracing::info!(nik, persisted, skipped = skipped.len(), "enrollment ok");

        Ok(EnrollOutcome {
            persisted,
            skipped,
            below_target,
            message,
        })
    }

    /// Compensating delete: remove the just-upserted record and any
    /// embeddings tagged with the identity, so neither store keeps a
    /// half-enrolled identity. Compensation failures are logged; they are
    /// picked up again by the startup sweep.
    async fn rollback(&self, nik: i64, cause: &str) {
        tracing::warn!(nik, cause, "enrollment rolled back");
        if let Err(err) = self.patients.delete(nik).await {
            tracing::error!(nik, error = %err, "rollback: patient delete failed");
        }
        match self.engine.delete_embeddings(nik).await {
            Ok(0) => {}
            Ok(removed) => tracing::warn!(nik, removed, "rollback: embeddings removed"),
            Err(err) => tracing::error!(nik, error = %err, "rollback: embedding delete failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{frame_bytes, stub_engine};

    fn fields(name: &str) -> PatientFields {
        PatientFields {
            name: name.to_string(),
            dob: "1990-01-01".to_string(),
            address: "Jl. Test".to_string(),
        }
    }

    async fn coordinator() -> (EnrollmentCoordinator, PatientDb, Arc<Engine>) {
        let patients = PatientDb::open_in_memory().await.unwrap();
        let engine = stub_engine().await;
        (
            EnrollmentCoordinator::new(patients.clone(), engine.clone(), 5),
            patients,
            engine,
        )
    }

    #[tokio::test]
    async fn test_enroll_persists_record_and_embeddings() {
        let (coord, patients, engine) = coordinator().await;

        // 6 frames, one of them faceless: 5 embeddings persist.
        let frames = vec![
            frame_bytes(200, 10, 10),
            frame_bytes(199, 11, 10),
            frame_bytes(198, 12, 10),
            frame_bytes(0, 0, 0),
            frame_bytes(197, 13, 10),
            frame_bytes(196, 14, 10),
        ];
        let outcome = coord
            .enroll(1234567890123456, fields("Test User"), &frames)
            .await
            .unwrap();

        assert_eq!(outcome.persisted, 5);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(!outcome.below_target);
        assert_eq!(engine.count_embeddings().await.unwrap(), 5);
        let p = patients.get(1234567890123456).await.unwrap().unwrap();
        assert_eq!(p.name, "Test User");
    }

    #[tokio::test]
    async fn test_below_target_still_succeeds() {
        let (coord, _, engine) = coordinator().await;
        let outcome = coord
            .enroll(1, fields("A"), &[frame_bytes(200, 10, 10)])
            .await
            .unwrap();
        assert_eq!(outcome.persisted, 1);
        assert!(outcome.below_target);
        assert_eq!(engine.count_embeddings().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_embeddings_rolls_back_patient_record() {
        let (coord, patients, engine) = coordinator().await;

        let err = coord
            .enroll(1, fields("A"), &[frame_bytes(0, 0, 0), frame_bytes(0, 0, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::NoEmbeddings));
        assert_eq!(patients.count().await.unwrap(), 0);
        assert_eq!(engine.count_embeddings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_upload_rolls_back() {
        let (coord, patients, _) = coordinator().await;

        let err = coord
            .enroll(1, fields("A"), &[b"not an image".to_vec()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::NoUsableFrames));
        assert_eq!(patients.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reenroll_updates_fields_and_adds_embeddings() {
        let (coord, patients, engine) = coordinator().await;

        coord
            .enroll(1, fields("Before"), &[frame_bytes(200, 10, 10)])
            .await
            .unwrap();
        coord
            .enroll(1, fields("After"), &[frame_bytes(10, 200, 10)])
            .await
            .unwrap();

        assert_eq!(patients.get(1).await.unwrap().unwrap().name, "After");
        // Old embeddings are kept; new ones are added.
        assert_eq!(engine.count_embeddings().await.unwrap(), 2);
        assert_eq!(patients.count().await.unwrap(), 1);
    }
}
