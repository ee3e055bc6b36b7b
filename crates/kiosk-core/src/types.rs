use serde::{Deserialize, Serialize};

/// Face embedding vector derived from one accepted frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Extractor version that produced this embedding.
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Uses constant-time computation: always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// One gallery entry: a stored embedding tagged with the patient identity
/// (national identifier) it belongs to.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: i64,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best match [-1, 1].
    pub similarity: f32,
    /// Identity of the matched entry (if any).
    pub identity: Option<i64>,
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher with constant-time gallery traversal.
///
/// Always iterates ALL gallery entries to prevent timing side-channels
/// that could leak gallery size or match position.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        // Constant-time: always iterate every entry, no early exit.
        for (i, entry) in gallery.iter().enumerate() {
            let sim = probe.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                identity: Some(gallery[idx].identity),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY {
                    0.0
                } else {
                    best_sim
                },
                identity: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_matcher_constant_time() {
        // Verify all gallery entries are compared (best match is last entry)
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            GalleryEntry {
                identity: 1,
                embedding: emb(vec![0.0, 1.0, 0.0]),
            },
            GalleryEntry {
                identity: 2,
                embedding: emb(vec![0.0, 0.0, 1.0]),
            },
            GalleryEntry {
                identity: 3,
                embedding: emb(vec![1.0, 0.0, 0.0]),
            },
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.identity, Some(3));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_below_threshold() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let gallery = vec![GalleryEntry {
            identity: 1,
            embedding: emb(vec![0.0, 1.0, 0.0]),
        }];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.identity.is_none());
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_empty_gallery() {
        let probe = emb(vec![1.0, 0.0]);
        let result = CosineMatcher.compare(&probe, &[], 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_cosine_matcher_multiple_embeddings_same_identity() {
        // Pose diversity: several embeddings per identity, best one wins.
        let probe = emb(vec![0.9, 0.1, 0.0]);
        let gallery = vec![
            GalleryEntry {
                identity: 7,
                embedding: emb(vec![0.0, 1.0, 0.0]),
            },
            GalleryEntry {
                identity: 7,
                embedding: emb(vec![1.0, 0.0, 0.0]),
            },
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.identity, Some(7));
    }
}
