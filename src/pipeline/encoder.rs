use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;

/// Fixed-length face vector from the encoder.
pub type Embedding = Vec<f32>;

/// Two embeddings closer than this are the same person. Equality is not a
/// match; the comparison is strictly below.
pub const MATCH_THRESHOLD: f32 = 0.6;

/// Cached reference encodings are bounded; past this many sessions the
/// oldest-inserted entry is evicted.
pub const ENCODING_CACHE_CAPACITY: usize = 100;

/// The face detection/encoding capability. Implementations must not error
/// outward: no faces, undecodable input, or an internal failure all yield
/// an empty sequence.
pub trait FaceEncoder: Send + Sync {
    /// Ordered embeddings, one per detected face.
    fn encode(&self, image: &DynamicImage) -> Vec<Embedding>;
}

pub fn embedding_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Any candidate face within the threshold of any reference face makes the
/// image a match. Scanning stops at the first satisfying pair. An empty
/// candidate sequence is never a match.
pub fn is_match(reference: &[Embedding], candidate: &[Embedding]) -> bool {
    candidate
        .iter()
        .any(|c| reference.iter().any(|r| embedding_distance(r, c) < MATCH_THRESHOLD))
}

struct CacheInner {
    map: HashMap<String, Arc<Vec<Embedding>>>,
    order: VecDeque<String>,
}

/// Process-wide reference-encoding cache, keyed by session id. Read-only
/// during a pass; mutated only when a reference image is stored or a
/// session is cleaned up.
pub struct EncodingCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl EncodingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner { map: HashMap::new(), order: VecDeque::new() }),
            capacity,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Vec<Embedding>>> {
        self.inner.lock().map.get(session_id).cloned()
    }

    pub fn insert(&self, session_id: &str, encodings: Vec<Embedding>) -> Arc<Vec<Embedding>> {
        let arc = Arc::new(encodings);
        let mut inner = self.inner.lock();
        if !inner.map.contains_key(session_id) {
            while inner.map.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(session_id.to_string());
        }
        inner.map.insert(session_id.to_string(), arc.clone());
        arc
    }

    /// Must be called whenever a session's reference image is replaced, or
    /// stale encodings would be served for the new image.
    pub fn invalidate(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if inner.map.remove(session_id).is_some() {
            inner.order.retain(|k| k != session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EncodingCache {
    fn default() -> Self {
        Self::new(ENCODING_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(embedding_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(embedding_distance(&[1.0], &[1.0]), 0.0);
        assert_eq!(embedding_distance(&[1.0], &[1.0, 2.0]), f32::MAX);
    }

    #[test]
    fn threshold_boundary_is_strict() {
        let reference = vec![vec![0.0f32]];
        assert!(is_match(&reference, &[vec![0.599]]));
        assert!(!is_match(&reference, &[vec![0.600]]));
        assert!(!is_match(&reference, &[vec![0.601]]));
    }

    #[test]
    fn empty_candidate_never_matches() {
        let reference = vec![vec![0.0f32]];
        assert!(!is_match(&reference, &[]));
    }

    #[test]
    fn any_pair_within_threshold_matches() {
        // Second candidate face against second reference face is enough.
        let reference = vec![vec![10.0f32], vec![20.0f32]];
        let candidate = vec![vec![0.0f32], vec![20.3f32]];
        assert!(is_match(&reference, &candidate));
        assert!(!is_match(&reference, &[vec![0.0f32], vec![30.0f32]]));
    }

    #[test]
    fn cache_evicts_oldest_inserted() {
        let cache = EncodingCache::new(2);
        cache.insert("a", vec![vec![1.0]]);
        cache.insert("b", vec![vec![2.0]]);
        cache.insert("c", vec![vec![3.0]]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn cache_reinsert_keeps_single_entry() {
        let cache = EncodingCache::new(2);
        cache.insert("a", vec![vec![1.0]]);
        cache.insert("a", vec![vec![9.0]]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap()[0][0], 9.0);
    }

    #[test]
    fn cache_invalidate_removes_entry() {
        let cache = EncodingCache::new(2);
        cache.insert("a", vec![vec![1.0]]);
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
        // Unknown keys are a no-op.
        cache.invalidate("missing");
    }
}
