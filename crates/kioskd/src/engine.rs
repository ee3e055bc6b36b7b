//! Biometric engine adapter.
//!
//! Composes the feature extractor, the embedding gallery store and the
//! cosine matcher behind one operation surface. Keeps an in-memory gallery
//! snapshot so recognition never touches the database per frame; the
//! snapshot is refreshed after every mutation and by the idempotent
//! `reload` operation.

use std::sync::{Arc, RwLock};

use image::DynamicImage;
use kiosk_core::{
    CosineMatcher, Embedding, ExtractorError, FeatureExtractor, GalleryEntry, Matcher,
};
use kiosk_store::{EmbeddingDb, StoreError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("embedding store error: {0}")]
    Store(#[from] StoreError),
}

/// Best-supported identity candidate from a multi-frame match.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub identity: i64,
    /// Similarity in [0, 1] (negative cosine never clears the threshold).
    pub similarity: f32,
    /// Integer percentage, when the engine computes one itself.
    pub confidence: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub available: bool,
    pub total_embeddings: i64,
    pub gallery_size: usize,
    pub model_version: String,
}

pub struct Engine {
    extractor: Arc<dyn FeatureExtractor>,
    store: EmbeddingDb,
    threshold: f32,
    fast_mode_frames: usize,
    gallery: RwLock<Arc<Vec<GalleryEntry>>>,
}

impl Engine {
    pub async fn new(
        extractor: Arc<dyn FeatureExtractor>,
        store: EmbeddingDb,
        threshold: f32,
        fast_mode_frames: usize,
    ) -> Result<Self, EngineError> {
        let gallery = store.load_all().await?;
        Ok(Self {
            extractor,
            store,
            threshold,
            fast_mode_frames,
            gallery: RwLock::new(Arc::new(gallery)),
        })
    }

    /// Rebuild the in-memory gallery from the store. Idempotent; safe to
    /// call at any time, including concurrently with recognition (readers
    /// keep their snapshot).
    pub async fn reload(&self) -> Result<usize, EngineError> {
        let gallery = self.store.load_all().await?;
        let size = gallery.len();
        self.replace_gallery(Arc::new(gallery));
        tracing::info!(size, "embedding gallery reloaded");
        Ok(size)
    }

    pub fn gallery_size(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Arc<Vec<GalleryEntry>> {
        match self.gallery.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_gallery(&self, next: Arc<Vec<GalleryEntry>>) {
        match self.gallery.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Apply a mutation to the gallery with the write lock held for the
    /// whole read-modify-write, so concurrent mutations cannot base
    /// themselves on the same snapshot and drop each other's entries.
    fn mutate_gallery<F>(&self, mutate: F)
    where
        F: FnOnce(&Vec<GalleryEntry>) -> Vec<GalleryEntry>,
    {
        let mut guard = match self.gallery.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = mutate(&**guard);
        *guard = Arc::new(next);
    }

    /// Extract a feature vector from one frame. `Ok(None)` = no usable face.
    pub fn extract(&self, image: &DynamicImage) -> Result<Option<Embedding>, EngineError> {
        Ok(self.extractor.extract(image)?)
    }

    /// Cheap face-presence check for the frontend auto-trigger.
    pub fn detect_any_face_fast(&self, image: &DynamicImage) -> Result<bool, EngineError> {
        Ok(self.extractor.detect_any_face(image)?)
    }

    /// Match a frame burst against the gallery, returning the best-supported
    /// candidate above the threshold, or `None`.
    ///
    /// Fast mode caps the number of frames considered and stops at the first
    /// frame that clears the threshold; full mode scans every frame and
    /// keeps the best. Frames without a usable face are skipped.
    pub async fn match_multi_frame(
        &self,
        frames: &[DynamicImage],
        fast_mode: bool,
    ) -> Result<Option<MatchCandidate>, EngineError> {
        let gallery = self.snapshot();
        if gallery.is_empty() {
            return Ok(None);
        }

        let limit = if fast_mode {
            frames.len().min(self.fast_mode_frames)
        } else {
            frames.len()
        };

        let mut best: Option<kiosk_core::MatchResult> = None;
        for frame in &frames[..limit] {
            let Some(embedding) = self.extractor.extract(frame)? else {
                continue;
            };
            let result = CosineMatcher.compare(&embedding, &gallery, self.threshold);
            let is_better = match &best {
                None => true,
                Some(prev) => result.similarity > prev.similarity,
            };
            if is_better {
                best = Some(result);
            }
            if fast_mode && best.as_ref().is_some_and(|b| b.matched) {
                break;
            }
        }

        match best {
            Some(kiosk_core::MatchResult {
                matched: true,
                similarity,
                identity: Some(identity),
            }) => Ok(Some(MatchCandidate {
                identity,
                similarity: similarity.clamp(0.0, 1.0),
                confidence: None,
            })),
            _ => Ok(None),
        }
    }

    /// Persist one embedding and fold it into the gallery snapshot.
    pub async fn persist_embedding(
        &self,
        identity: i64,
        embedding: Embedding,
    ) -> Result<String, EngineError> {
        let id = self.store.insert(identity, embedding.clone()).await?;
        self.mutate_gallery(|gallery| {
            let mut next = gallery.clone();
            next.push(GalleryEntry {
                identity,
                embedding,
            });
            next
        });
        Ok(id)
    }

    /// Remove all embeddings for an identity. Returns the count removed.
    pub async fn delete_embeddings(&self, identity: i64) -> Result<usize, EngineError> {
        let n = self.store.delete_for_identity(identity).await?;
        self.mutate_gallery(|gallery| {
            gallery
                .iter()
                .filter(|e| e.identity != identity)
                .cloned()
                .collect()
        });
        Ok(n)
    }

    /// Re-tag all embeddings from one identity to another. Returns the count.
    pub async fn rename_identity(&self, old: i64, new: i64) -> Result<usize, EngineError> {
        let n = self.store.rename_identity(old, new).await?;
        self.mutate_gallery(|gallery| {
            gallery
                .iter()
                .map(|e| {
                    let mut entry = e.clone();
                    if entry.identity == old {
                        entry.identity = new;
                    }
                    entry
                })
                .collect()
        });
        Ok(n)
    }

    pub async fn count_embeddings(&self) -> Result<i64, EngineError> {
        Ok(self.store.count().await?)
    }

    /// Distinct identities currently present in the embedding store.
    pub async fn identities(&self) -> Result<Vec<i64>, EngineError> {
        Ok(self.store.identities().await?)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(EngineStatus {
            available: true,
            total_embeddings: self.store.count().await?,
            gallery_size: self.gallery_size(),
            model_version: self.extractor.model_version().to_string(),
        })
    }
}
