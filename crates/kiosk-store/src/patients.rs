//! Patient records and per-department queue counters.
//!
//! Backed by one SQLite database. All calls go through a single serialized
//! connection, so every read-modify-write here (queue allocation, rename
//! with conflict check) runs as a transaction free of interleaving from
//! concurrent requests.

use std::path::Path;

use chrono::{Datelike, Local, NaiveDate};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tokio_rusqlite::Connection;

use crate::error::StoreError;

/// A registered patient, keyed by the national identifier (NIK).
#[derive(Debug, Clone, Serialize)]
pub struct PatientRecord {
    pub nik: i64,
    pub name: String,
    pub dob: String,
    pub address: String,
    pub created_at: String,
}

/// Mutable identity fields, as submitted by the registration form.
#[derive(Debug, Clone)]
pub struct PatientFields {
    pub name: String,
    pub dob: String,
    pub address: String,
}

/// One queue counter row: the last number issued for a department.
#[derive(Debug, Clone, Serialize)]
pub struct QueueCounter {
    pub department: String,
    pub last_number: i64,
}

/// Outcome of an identifier rename.
#[derive(Debug, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// The target identifier already belongs to another record.
    Conflict,
    /// The old identifier does not exist.
    Missing,
}

#[derive(Clone)]
pub struct PatientDb {
    conn: Connection,
}

impl PatientDb {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let db = Self { conn };
        db.init().await?;
        tracing::debug!(path = %path.display(), "patient database ready");
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS patients (
                         nik        INTEGER PRIMARY KEY,
                         name       TEXT NOT NULL,
                         dob        TEXT NOT NULL,
                         address    TEXT NOT NULL,
                         created_at TEXT NOT NULL
                     );
                     CREATE TABLE IF NOT EXISTS queues (
                         department  TEXT PRIMARY KEY,
                         last_number INTEGER NOT NULL
                     );",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Create counters for the fixed department set. Existing counters keep
    /// their values; departments are never created outside this call.
    pub async fn seed_departments(&self, departments: Vec<String>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for dept in &departments {
                    tx.execute(
                        "INSERT OR IGNORE INTO queues(department, last_number) VALUES(?1, 0)",
                        params![dept],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert the patient, or update the identity fields on an existing NIK.
    pub async fn upsert(&self, nik: i64, fields: PatientFields) -> Result<(), StoreError> {
        let created_at = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO patients(nik, name, dob, address, created_at)
                     VALUES(?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(nik) DO UPDATE SET
                         name = excluded.name,
                         dob = excluded.dob,
                         address = excluded.address",
                    params![nik, fields.name, fields.dob, fields.address, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get(&self, nik: i64) -> Result<Option<PatientRecord>, StoreError> {
        let row = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT nik, name, dob, address, created_at
                         FROM patients WHERE nik = ?1",
                        params![nik],
                        row_to_patient,
                    )
                    .optional()?)
            })
            .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<PatientRecord>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT nik, name, dob, address, created_at
                     FROM patients ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map([], row_to_patient)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let n = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM patients", [], |r| r.get(0))?)
            })
            .await?;
        Ok(n)
    }

    /// Delete the record. Returns false when the NIK was not registered.
    pub async fn delete(&self, nik: i64) -> Result<bool, StoreError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM patients WHERE nik = ?1", params![nik])?)
            })
            .await?;
        Ok(n > 0)
    }

    /// Update identity fields in place. `name` is optional; the other fields
    /// always overwrite. Returns false when the NIK was not registered.
    pub async fn update_fields(
        &self,
        nik: i64,
        name: Option<String>,
        dob: String,
        address: String,
    ) -> Result<bool, StoreError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE patients
                     SET name = COALESCE(?1, name), dob = ?2, address = ?3
                     WHERE nik = ?4",
                    params![name, dob, address, nik],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    /// Change a record's identifier, rejecting collisions with other records.
    /// The existence check and the update run in one transaction.
    pub async fn rename(
        &self,
        old_nik: i64,
        new_nik: i64,
        name: Option<String>,
        dob: String,
        address: String,
    ) -> Result<RenameOutcome, StoreError> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let taken: Option<i64> = tx
                    .query_row(
                        "SELECT nik FROM patients WHERE nik = ?1",
                        params![new_nik],
                        |r| r.get(0),
                    )
                    .optional()?;
                if taken.is_some() {
                    return Ok(RenameOutcome::Conflict);
                }
                let n = tx.execute(
                    "UPDATE patients
                     SET nik = ?1, name = COALESCE(?2, name), dob = ?3, address = ?4
                     WHERE nik = ?5",
                    params![new_nik, name, dob, address, old_nik],
                )?;
                if n == 0 {
                    return Ok(RenameOutcome::Missing);
                }
                tx.commit()?;
                Ok(RenameOutcome::Renamed)
            })
            .await?;
        Ok(outcome)
    }

    /// All registered identifiers (for the startup consistency sweep).
    pub async fn niks(&self) -> Result<Vec<i64>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT nik FROM patients")?;
                let rows = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Issue the next queue number for a department.
    ///
    /// Read-modify-write in a single transaction on the serialized
    /// connection: two concurrent calls can never return the same number.
    /// Returns `None` for an unknown department (no implicit creation).
    pub async fn allocate_next(&self, department: String) -> Result<Option<i64>, StoreError> {
        let next = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current: Option<i64> = tx
                    .query_row(
                        "SELECT last_number FROM queues WHERE department = ?1",
                        params![&department],
                        |r| r.get(0),
                    )
                    .optional()?;
                let Some(current) = current else {
                    return Ok(None);
                };
                let next = current + 1;
                tx.execute(
                    "UPDATE queues SET last_number = ?1 WHERE department = ?2",
                    params![next, &department],
                )?;
                tx.commit()?;
                Ok(Some(next))
            })
            .await?;
        Ok(next)
    }

    /// Overwrite a counter (admin correction; lower than current is allowed).
    /// Returns false for an unknown department.
    pub async fn set_queue(&self, department: String, number: i64) -> Result<bool, StoreError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE queues SET last_number = ?1 WHERE department = ?2",
                    params![number, department],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueCounter>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT department, last_number FROM queues ORDER BY department")?;
                let rows = stmt
                    .query_map([], |r| {
                        Ok(QueueCounter {
                            department: r.get(0)?,
                            last_number: r.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

fn row_to_patient(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatientRecord> {
    Ok(PatientRecord {
        nik: row.get(0)?,
        name: row.get(1)?,
        dob: row.get(2)?,
        address: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Parse a date-of-birth string in any of the formats the registration form
/// has historically produced.
pub fn parse_dob_flexible(dob: &str) -> Option<NaiveDate> {
    let dob = dob.trim();
    if dob.is_empty() {
        return None;
    }
    const FORMATS: [&str; 6] = [
        "%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d", "%d/%m/%Y", "%Y.%m.%d", "%d.%m.%Y",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(dob, fmt).ok())
}

/// Human-readable age for display, "N/A" when the dob cannot be parsed.
pub fn age_display(dob: &str) -> String {
    match parse_dob_flexible(dob) {
        Some(date) => {
            let today = Local::now().date_naive();
            let mut age = today.year() - date.year();
            if (today.month(), today.day()) < (date.month(), date.day()) {
                age -= 1;
            }
            format!("{age} Tahun")
        }
        None => "N/A".to_string(),
    }
}
