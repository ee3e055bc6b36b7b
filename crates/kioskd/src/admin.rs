//! Cross-store consistency operations.
//!
//! Delete and rename touch both the patient record store and the embedding
//! store; when the second step fails the metadata change is kept and the
//! inconsistency is reported as a distinct partial status and logged, never
//! silently swallowed and never auto-repaired. The startup sweep enforces
//! the zero-embedding rollback for enrollments aborted mid-flight.

use std::collections::HashSet;
use std::sync::Arc;

use kiosk_store::{PatientDb, RenameOutcome};

use crate::engine::{Engine, EngineError};

#[derive(Debug)]
pub enum DeleteOutcome {
    NotFound,
    Deleted {
        /// `None` when the embedding delete failed and the count is unknown.
        embeddings_removed: Option<usize>,
        /// True when the record was removed but the embedding delete failed;
        /// the orphans will surface as the unknown-patient recognition
        /// outcome until re-enrollment or manual cleanup.
        partial: bool,
    },
}

#[derive(Debug)]
pub enum UpdateOutcome {
    NotFound,
    /// The new identifier already belongs to a different record.
    Conflict,
    Updated {
        embeddings_updated: usize,
        renamed: bool,
        /// True when the record rename succeeded but the embedding re-tag
        /// failed; the metadata change is not rolled back.
        partial: bool,
    },
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed_patients: Vec<i64>,
    pub orphaned_identities: Vec<i64>,
}

pub struct AdminOps {
    patients: PatientDb,
    engine: Arc<Engine>,
}

impl AdminOps {
    pub fn new(patients: PatientDb, engine: Arc<Engine>) -> Self {
        Self { patients, engine }
    }

    /// Delete the patient record, then every embedding tagged with the
    /// identifier. Reports the embedding count removed.
    pub async fn delete_patient(&self, nik: i64) -> Result<DeleteOutcome, EngineError> {
        if !self.patients.delete(nik).await? {
            return Ok(DeleteOutcome::NotFound);
        }
        match self.engine.delete_embeddings(nik).await {
            Ok(embeddings_removed) => {
                tracing::info!(nik, embeddings_removed, "patient deleted");
                Ok(DeleteOutcome::Deleted {
                    embeddings_removed: Some(embeddings_removed),
                    partial: false,
                })
            }
            Err(err) => {
                tracing::warn!(nik, error = %err, "record deleted but embeddings remain orphaned");
                Ok(DeleteOutcome::Deleted {
                    embeddings_removed: None,
                    partial: true,
                })
            }
        }
    }

    /// Update identity fields, optionally changing the identifier itself.
    /// An identifier change re-tags every embedding; a conflict with an
    /// existing record rejects the whole operation with no mutation.
    pub async fn update_patient(
        &self,
        old_nik: i64,
        new_nik: i64,
        name: Option<String>,
        dob: String,
        address: String,
    ) -> Result<UpdateOutcome, EngineError> {
        if old_nik == new_nik {
            if !self.patients.update_fields(old_nik, name, dob, address).await? {
                return Ok(UpdateOutcome::NotFound);
            }
            return Ok(UpdateOutcome::Updated {
                embeddings_updated: 0,
                renamed: false,
                partial: false,
            });
        }

        match self
            .patients
            .rename(old_nik, new_nik, name, dob, address)
            .await?
        {
            RenameOutcome::Conflict => Ok(UpdateOutcome::Conflict),
            RenameOutcome::Missing => Ok(UpdateOutcome::NotFound),
            RenameOutcome::Renamed => match self.engine.rename_identity(old_nik, new_nik).await {
                Ok(embeddings_updated) => {
                    tracing::info!(old_nik, new_nik, embeddings_updated, "identifier renamed");
                    Ok(UpdateOutcome::Updated {
                        embeddings_updated,
                        renamed: true,
                        partial: false,
                    })
                }
                Err(err) => {
                    tracing::warn!(
                        old_nik,
                        new_nik,
                        error = %err,
                        "record renamed but embedding re-tag failed"
                    );
                    Ok(UpdateOutcome::Updated {
                        embeddings_updated: 0,
                        renamed: true,
                        partial: true,
                    })
                }
            },
        }
    }

    /// Force an embedding gallery refresh. Idempotent, no side effects on
    /// stored data.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        self.engine.reload().await
    }

    /// Consistency sweep, run at startup.
    ///
    /// Deletes patient records with zero embeddings (enrollments aborted
    /// after the upsert but before any embedding persisted). Identities
    /// with embeddings but no record are logged only; they stay in place
    /// as the explicit warning state.
    pub async fn sweep_incomplete(&self) -> Result<SweepReport, EngineError> {
        let registered = self.patients.niks().await?;
        let with_embeddings: HashSet<i64> = self.engine.identities().await?.into_iter().collect();

        let mut report = SweepReport::default();
        for nik in &registered {
            if !with_embeddings.contains(nik) && self.patients.delete(*nik).await? {
                tracing::warn!(nik, "sweep: removed patient record with zero embeddings");
                report.removed_patients.push(*nik);
            }
        }

        let registered: HashSet<i64> = registered.into_iter().collect();
        for identity in with_embeddings {
            if !registered.contains(&identity) {
                tracing::warn!(identity, "sweep: orphaned embeddings (left in place)");
                report.orphaned_identities.push(identity);
            }
        }
        Ok(report)
    }
}
