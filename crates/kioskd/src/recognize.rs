//! Recognition coordinator.
//!
//! Delegates the frame burst to the engine's multi-frame match and
//! validates the candidate against the patient record store. A match whose
//! patient record has been deleted (orphaned embeddings) is reported as its
//! own outcome, distinct from "no face recognized at all".

use std::sync::Arc;

use kiosk_core::{decode_frames, SkippedFrame};
use kiosk_store::{age_display, PatientDb, PatientRecord, StoreError};
use thiserror::Error;

use crate::engine::{Engine, EngineError};

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum RecognizeOutcome {
    /// Nothing in the upload could be decoded.
    NoUsableFrames { skipped: Vec<SkippedFrame> },
    /// Frames were usable but no gallery identity cleared the threshold.
    NoMatch,
    /// The gallery matched an identity with no patient record (stale
    /// embeddings after a failed delete/rename propagation).
    UnknownPatient { identity: i64, similarity: f32 },
    Recognized {
        patient: PatientRecord,
        age: String,
        similarity: f32,
        /// Integer percentage, derived from similarity when the engine
        /// does not supply one.
        confidence: u8,
    },
}

pub struct RecognitionCoordinator {
    patients: PatientDb,
    engine: Arc<Engine>,
}

impl RecognitionCoordinator {
    pub fn new(patients: PatientDb, engine: Arc<Engine>) -> Self {
        Self { patients, engine }
    }

    pub async fn recognize(
        &self,
        frames: &[Vec<u8>],
        fast_mode: bool,
    ) -> Result<RecognizeOutcome, RecognizeError> {
        let report = decode_frames(frames.iter().map(Vec::as_slice));
        if report.is_empty() {
            return Ok(RecognizeOutcome::NoUsableFrames {
                skipped: report.skipped,
            });
        }

        let images: Vec<_> = report.frames.into_iter().map(|f| f.image).collect();
        let Some(candidate) = self.engine.match_multi_frame(&images, fast_mode).await? else {
            return Ok(RecognizeOutcome::NoMatch);
        };

        match self.patients.get(candidate.identity).await? {
            Some(patient) => {
                let confidence = candidate
                    .confidence
                    .unwrap_or_else(|| (candidate.similarity * 100.0).round() as u8);
                let age = age_display(&patient.dob);
                tracing::info!(
                    nik = patient.nik,
                    similarity = candidate.similarity,
                    fast_mode,
                    "patient recognized"
                );
                Ok(RecognizeOutcome::Recognized {
                    patient,
                    age,
                    similarity: candidate.similarity,
                    confidence,
                })
            }
            None => {
                tracing::warn!(
                    identity = candidate.identity,
                    "gallery matched an identity with no patient record"
                );
                Ok(RecognizeOutcome::UnknownPatient {
                    identity: candidate.identity,
                    similarity: candidate.similarity,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{frame, frame_bytes, stub_engine};
    use kiosk_store::PatientFields;

    fn fields(name: &str) -> PatientFields {
        PatientFields {
            name: name.to_string(),
            dob: "1990-01-01".to_string(),
            address: "Jl. Test".to_string(),
        }
    }

    async fn setup() -> (RecognitionCoordinator, PatientDb, Arc<Engine>) {
        let patients = PatientDb::open_in_memory().await.unwrap();
        let engine = stub_engine().await;
        (
            RecognitionCoordinator::new(patients.clone(), engine.clone()),
            patients,
            engine,
        )
    }

    #[tokio::test]
    async fn test_recognized_with_derived_confidence() {
        let (coord, patients, engine) = setup().await;
        patients
            .upsert(1234567890123456, fields("Test User"))
            .await
            .unwrap();
        let emb = engine.extract(&frame(200, 10, 10)).unwrap().unwrap();
        engine.persist_embedding(1234567890123456, emb).await.unwrap();

        let outcome = coord
            .recognize(&[frame_bytes(200, 10, 10)], false)
            .await
            .unwrap();
        match outcome {
            RecognizeOutcome::Recognized {
                patient,
                confidence,
                similarity,
                age,
            } => {
                assert_eq!(patient.nik, 1234567890123456);
                assert_eq!(confidence, (similarity * 100.0).round() as u8);
                assert_eq!(confidence, 100);
                assert!(age.ends_with("Tahun"));
            }
            other => panic!("expected Recognized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_match_on_unenrolled_face() {
        let (coord, patients, engine) = setup().await;
        patients.upsert(1, fields("A")).await.unwrap();
        let emb = engine.extract(&frame(200, 10, 10)).unwrap().unwrap();
        engine.persist_embedding(1, emb).await.unwrap();

        let outcome = coord
            .recognize(&[frame_bytes(10, 200, 10)], false)
            .await
            .unwrap();
        assert!(matches!(outcome, RecognizeOutcome::NoMatch));
    }

    #[tokio::test]
    async fn test_stale_identity_is_distinct_outcome() {
        let (coord, _, engine) = setup().await;
        // Embeddings exist, but no patient record does.
        let emb = engine.extract(&frame(200, 10, 10)).unwrap().unwrap();
        engine.persist_embedding(7, emb).await.unwrap();

        let outcome = coord
            .recognize(&[frame_bytes(200, 10, 10)], false)
            .await
            .unwrap();
        match outcome {
            RecognizeOutcome::UnknownPatient { identity, .. } => assert_eq!(identity, 7),
            other => panic!("expected UnknownPatient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_upload_reports_skips() {
        let (coord, _, _) = setup().await;
        let outcome = coord
            .recognize(&[b"garbage".to_vec()], false)
            .await
            .unwrap();
        match outcome {
            RecognizeOutcome::NoUsableFrames { skipped } => assert_eq!(skipped.len(), 1),
            other => panic!("expected NoUsableFrames, got {other:?}"),
        }
    }
}
