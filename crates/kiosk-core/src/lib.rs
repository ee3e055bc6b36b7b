pub mod extractor;
pub mod frames;
pub mod types;

pub use extractor::{ExtractorError, FeatureExtractor, GridExtractor};
pub use frames::{decode_frames, DecodeReport, DecodedFrame, SkippedFrame};
pub use types::{CosineMatcher, Embedding, GalleryEntry, MatchResult, Matcher};
