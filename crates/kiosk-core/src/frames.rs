//! Uploaded-frame decoding.
//!
//! Clients deliver camera bursts as encoded images (JPEG/PNG). Frames that
//! fail to decode are skipped, never fatal, but every skip is recorded with
//! its reason so callers can inspect what happened instead of losing the
//! information.

use image::DynamicImage;

/// One frame that was dropped, with the index it had in the upload order.
#[derive(Debug, Clone)]
pub struct SkippedFrame {
    pub index: usize,
    pub reason: String,
}

/// A successfully decoded frame, still carrying its upload index.
#[derive(Debug)]
pub struct DecodedFrame {
    pub index: usize,
    pub image: DynamicImage,
}

/// Outcome of decoding an ordered frame burst.
#[derive(Debug, Default)]
pub struct DecodeReport {
    /// Decoded frames, upload order preserved.
    pub frames: Vec<DecodedFrame>,
    pub skipped: Vec<SkippedFrame>,
}

impl DecodeReport {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Decode an ordered sequence of encoded frames, skipping failures.
pub fn decode_frames<'a, I>(raw: I) -> DecodeReport
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut report = DecodeReport::default();
    for (index, bytes) in raw.into_iter().enumerate() {
        match image::load_from_memory(bytes) {
            Ok(image) => report.frames.push(DecodedFrame { index, image }),
            Err(err) => {
                tracing::debug!(index, error = %err, "skipping undecodable frame");
                report.skipped.push(SkippedFrame {
                    index,
                    reason: format!("decode failed: {err}"),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_valid_frame() {
        let bytes = png_bytes();
        let report = decode_frames([bytes.as_slice()]);
        assert_eq!(report.frames.len(), 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_garbage_is_skipped_with_reason() {
        let bytes = png_bytes();
        let garbage = b"not an image".to_vec();
        let report = decode_frames([garbage.as_slice(), bytes.as_slice()]);
        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.frames[0].index, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 0);
        assert!(report.skipped[0].reason.contains("decode failed"));
    }

    #[test]
    fn test_all_garbage_yields_empty_report() {
        let report = decode_frames([b"x".as_slice(), b"y".as_slice()]);
        assert!(report.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }
}
