//! Embedding gallery storage.
//!
//! Lives in its own database file, apart from the patient records. The two
//! stores can therefore fail independently, which is exactly the seam the
//! enrollment rollback and the rename/delete partial-success paths guard.

use std::path::Path;

use kiosk_core::{Embedding, GalleryEntry};
use rusqlite::params;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Clone)]
pub struct EmbeddingDb {
    conn: Connection,
}

impl EmbeddingDb {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let db = Self { conn };
        db.init().await?;
        tracing::debug!(path = %path.display(), "embedding database ready");
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
                    "CREATE TABLE IF NOT EXISTS embeddings (
                         id            TEXT PRIMARY KEY,
                         identity      INTEGER NOT NULL,
                         vector        BLOB NOT NULL,
                         model_version TEXT,
                         created_at    TEXT NOT NULL
                     );
                     CREATE INDEX IF NOT EXISTS idx_embeddings_identity
                         ON embeddings(identity);",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Persist one embedding for an identity. Duplicates are tolerated;
    /// every accepted frame gets its own row.
    pub async fn insert(&self, identity: i64, embedding: Embedding) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let row_id = id.clone();
        let created_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO embeddings(id, identity, vector, model_version, created_at)
                     VALUES(?1, ?2, ?3, ?4, ?5)",
                    params![
                        row_id,
                        identity,
                        vec_to_blob(&embedding.values),
                        embedding.model_version,
                        created_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    /// Load the full gallery for in-memory matching.
    pub async fn load_all(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT identity, vector, model_version FROM embeddings")?;
                let rows = stmt
                    .query_map([], |r| {
                        let identity: i64 = r.get(0)?;
                        let blob: Vec<u8> = r.get(1)?;
                        let model_version: Option<String> = r.get(2)?;
                        Ok(GalleryEntry {
                            identity,
                            embedding: Embedding {
                                values: blob_to_vec(&blob),
                                model_version,
                            },
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Remove every embedding tagged with the identity. Returns the count.
    pub async fn delete_for_identity(&self, identity: i64) -> Result<usize, StoreError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM embeddings WHERE identity = ?1",
                    params![identity],
                )?)
            })
            .await?;
        Ok(n)
    }

    /// Re-tag every embedding from one identity to another. Returns the count.
    pub async fn rename_identity(&self, old: i64, new: i64) -> Result<usize, StoreError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE embeddings SET identity = ?1 WHERE identity = ?2",
                    params![new, old],
                )?)
            })
            .await?;
        Ok(n)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let n = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))?)
            })
            .await?;
        Ok(n)
    }

    /// Distinct identities that currently have at least one embedding.
    pub async fn identities(&self) -> Result<Vec<i64>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT DISTINCT identity FROM embeddings")?;
                let rows = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

fn vec_to_blob(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * 4);
    for v in values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: Some("grid-8x8".into()),
        }
    }

    #[test]
    fn test_blob_codec_roundtrip() {
        let values = vec![0.25f32, -1.5, 3.75, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&values)), values);
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let db = EmbeddingDb::open_in_memory().await.unwrap();
        db.insert(1, emb(vec![1.0, 0.0])).await.unwrap();
        db.insert(1, emb(vec![0.0, 1.0])).await.unwrap();
        db.insert(2, emb(vec![0.5, 0.5])).await.unwrap();

        assert_eq!(db.count().await.unwrap(), 3);
        let gallery = db.load_all().await.unwrap();
        assert_eq!(gallery.len(), 3);
        assert_eq!(
            gallery.iter().filter(|e| e.identity == 1).count(),
            2,
            "both embeddings for identity 1 survive"
        );
        assert_eq!(
            gallery[0].embedding.model_version.as_deref(),
            Some("grid-8x8")
        );
    }

    #[tokio::test]
    async fn test_delete_for_identity_reports_count() {
        let db = EmbeddingDb::open_in_memory().await.unwrap();
        db.insert(1, emb(vec![1.0])).await.unwrap();
        db.insert(1, emb(vec![2.0])).await.unwrap();
        db.insert(2, emb(vec![3.0])).await.unwrap();

        assert_eq!(db.delete_for_identity(1).await.unwrap(), 2);
        assert_eq!(db.delete_for_identity(1).await.unwrap(), 0);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rename_identity_moves_every_tag() {
        let db = EmbeddingDb::open_in_memory().await.unwrap();
        db.insert(1, emb(vec![1.0])).await.unwrap();
        db.insert(1, emb(vec![2.0])).await.unwrap();

        assert_eq!(db.rename_identity(1, 9).await.unwrap(), 2);
        let identities = db.identities().await.unwrap();
        assert_eq!(identities, vec![9]);
    }
}
