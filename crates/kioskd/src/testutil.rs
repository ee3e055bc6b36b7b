//! Shared test fixtures: a color-keyed stub extractor and frame builders.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use kiosk_core::{Embedding, ExtractorError, FeatureExtractor};
use kiosk_store::EmbeddingDb;

use crate::engine::Engine;

/// Maps a frame's top-left pixel straight to a 3-dim embedding. Black
/// frames count as "no face". Gives tests full control over similarity.
pub struct StubExtractor;

impl FeatureExtractor for StubExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<Option<Embedding>, ExtractorError> {
        let p = image.to_rgb8().get_pixel(0, 0).0;
        if p == [0, 0, 0] {
            return Ok(None);
        }
        Ok(Some(Embedding {
            values: vec![p[0] as f32, p[1] as f32, p[2] as f32],
            model_version: Some("stub".to_string()),
        }))
    }

    fn detect_any_face(&self, image: &DynamicImage) -> Result<bool, ExtractorError> {
        Ok(image.to_rgb8().get_pixel(0, 0).0 != [0, 0, 0])
    }

    fn model_version(&self) -> &str {
        "stub"
    }
}

pub fn frame(r: u8, g: u8, b: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([r, g, b])))
}

/// A frame encoded as PNG bytes, for the coordinators' upload-shaped input.
pub fn frame_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    frame(r, g, b)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// In-memory engine with the stub extractor, threshold 0.9 and a fast-mode
/// cap of one frame.
pub async fn stub_engine() -> Arc<Engine> {
    let store = EmbeddingDb::open_in_memory().await.unwrap();
    Arc::new(
        Engine::new(Arc::new(StubExtractor), store, 0.9, 1)
            .await
            .unwrap(),
    )
}
