//! In-memory gallery of enrolled embeddings and the nearest-neighbor matcher.
//!
//! The gallery is an immutable snapshot: it is built in one pass from the
//! store and replaced wholesale on rebuild, never mutated in place. Readers
//! therefore always see either the previous complete gallery or the new one.

use crate::types::Embedding;

/// One enrolled identity's embedding, keyed by identity id.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_id: i64,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryMatch {
    pub identity_id: i64,
    pub distance: f32,
}

/// Immutable gallery snapshot of all matchable identities.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the enrolled identity nearest to `probe`.
    ///
    /// Linear scan over every entry; accepts the minimum distance only if it
    /// is within `tolerance`. On an exact distance tie the first entry in
    /// gallery order wins: strict `<` never displaces an earlier minimum.
    pub fn best_match(&self, probe: &Embedding, tolerance: f32) -> Option<GalleryMatch> {
        let mut best: Option<GalleryMatch> = None;

        for entry in &self.entries {
            let distance = probe.distance(&entry.embedding);
            let better = match &best {
                None => true,
                Some(prev) => distance < prev.distance,
            };
            if better {
                best = Some(GalleryMatch {
                    identity_id: entry.identity_id,
                    distance,
                });
            }
        }

        match best {
            Some(m) if m.distance <= tolerance => {
                tracing::debug!(
                    identity_id = m.identity_id,
                    distance = m.distance,
                    "gallery match accepted"
                );
                Some(m)
            }
            Some(m) => {
                tracing::debug!(
                    distance = m.distance,
                    tolerance,
                    "best candidate above tolerance; not recognized"
                );
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            identity_id: id,
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_best_match_picks_nearest() {
        let gallery = Gallery::new(vec![
            entry(1, vec![1.0, 0.0]),
            entry(2, vec![0.0, 1.0]),
            entry(3, vec![0.1, 0.9]),
        ]);
        let probe = Embedding::new(vec![0.0, 1.0]);

        let m = gallery.best_match(&probe, 0.45).unwrap();
        assert_eq!(m.identity_id, 2);
        assert!(m.distance.abs() < 1e-6);
    }

    #[test]
    fn test_best_match_respects_tolerance() {
        let gallery = Gallery::new(vec![entry(1, vec![1.0, 0.0])]);
        let probe = Embedding::new(vec![0.0, 1.0]);
        assert!(gallery.best_match(&probe, 0.45).is_none());
    }

    #[test]
    fn test_best_match_boundary_is_inclusive() {
        let gallery = Gallery::new(vec![entry(1, vec![0.45, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        // distance == tolerance is accepted
        let m = gallery.best_match(&probe, 0.45).unwrap();
        assert_eq!(m.identity_id, 1);
    }

    #[test]
    fn test_tie_break_first_entry_wins() {
        // Two entries at the exact same distance from the probe.
        let gallery = Gallery::new(vec![
            entry(7, vec![0.1, 0.0]),
            entry(8, vec![-0.1, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);

        let m = gallery.best_match(&probe, 0.45).unwrap();
        assert_eq!(m.identity_id, 7);
    }

    #[test]
    fn test_mismatched_dimensions_never_match() {
        let gallery = Gallery::new(vec![
            entry(42, vec![1.0, 0.0, 0.0]),
            entry(43, vec![0.0, 1.0, 0.0]),
        ]);

        // An empty probe must not sit at distance zero from everyone.
        let empty = Embedding::new(vec![]);
        assert!(gallery.best_match(&empty, 0.45).is_none());

        // A prefix-identical but shorter probe is not the same person.
        let truncated = Embedding::new(vec![1.0, 0.0]);
        assert!(gallery.best_match(&truncated, 0.45).is_none());
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let gallery = Gallery::default();
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(gallery.best_match(&probe, 0.45).is_none());
    }
}
