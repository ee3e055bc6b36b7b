//! Feature extraction boundary.
//!
//! The daemon treats extraction as an opaque capability: an image goes in,
//! an L2-normalized embedding (or nothing, for an unusable frame) comes out.
//! Production deployments plug a neural recognizer in behind
//! [`FeatureExtractor`]; [`GridExtractor`] is the deterministic fallback the
//! daemon ships with.

use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

use crate::types::Embedding;

// --- Named constants ---
const GRID_SIZE: u32 = 8;
const GRID_DIM: usize = (GRID_SIZE * GRID_SIZE) as usize;
/// Minimum luminance variance for a frame to count as carrying a face.
/// Below this the frame is flat (lens covered, blank capture) and skipped.
const MIN_LUMA_VARIANCE: f32 = 20.0;
const GRID_MODEL_VERSION: &str = "grid-8x8";

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Opaque per-frame biometric capability.
///
/// `extract` returns `Ok(None)` for frames with no detectable face; that is
/// a skip, not an error. Errors mean the extractor itself is broken.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &DynamicImage) -> Result<Option<Embedding>, ExtractorError>;

    /// Cheap presence check, distinct from full extraction.
    fn detect_any_face(&self, image: &DynamicImage) -> Result<bool, ExtractorError>;

    fn model_version(&self) -> &str;
}

/// Deterministic luminance-grid extractor.
///
/// Downsamples the frame to an 8x8 grayscale grid, mean-centers it and
/// L2-normalizes the result. Not a face recognizer — it is the stand-in
/// wired up when no neural model is configured, and the workhorse of the
/// test suite (identical frames always match at similarity 1.0).
pub struct GridExtractor;

impl GridExtractor {
    fn grid_values(image: &DynamicImage) -> Vec<f32> {
        let luma = image.to_luma8();
        let small = image::imageops::resize(&luma, GRID_SIZE, GRID_SIZE, FilterType::Triangle);
        small.pixels().map(|p| p.0[0] as f32).collect()
    }

    fn variance(values: &[f32]) -> f32 {
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
    }
}

impl FeatureExtractor for GridExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<Option<Embedding>, ExtractorError> {
        let values = Self::grid_values(image);
        debug_assert_eq!(values.len(), GRID_DIM);

        if Self::variance(&values) < MIN_LUMA_VARIANCE {
            return Ok(None);
        }

        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let centered: Vec<f32> = values.iter().map(|v| v - mean).collect();

        // L2-normalize so cosine similarity stays scale-invariant.
        let norm: f32 = centered.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            centered.iter().map(|x| x / norm).collect()
        } else {
            centered
        };

        Ok(Some(Embedding {
            values,
            model_version: Some(GRID_MODEL_VERSION.to_string()),
        }))
    }

    fn detect_any_face(&self, image: &DynamicImage) -> Result<bool, ExtractorError> {
        let values = Self::grid_values(image);
        Ok(Self::variance(&values) >= MIN_LUMA_VARIANCE)
    }

    fn model_version(&self) -> &str {
        GRID_MODEL_VERSION
    }
}
