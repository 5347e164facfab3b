//! Unsaved-change guard.
//!
//! Tracks the last content known to be in the version store and answers
//! "does the edit surface hold anything that would be lost?" with a hash
//! compare.

use crate::content::{canonicalize, CanonicalTree, Content, ContentHash};
use crate::store::DocumentVersion;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct LastSavedSnapshot {
    pub content: CanonicalTree,
    pub hash: ContentHash,
    pub version: DocumentVersion,
}

#[derive(Debug, Default)]
pub struct UnsavedChangeGuard {
    snapshot: Option<LastSavedSnapshot>,
}

impl UnsavedChangeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `current` differs from the last saved or loaded content.
    ///
    /// `false` before anything has been recorded. Content that cannot be
    /// canonicalized counts as unsaved, since overwriting it is not known to
    /// be safe.
    pub fn has_unsaved_changes(&self, current: &Content) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        match canonicalize(current) {
            Ok(tree) => tree.hash() != snapshot.hash,
            Err(e) => {
                warn!("Edit surface content does not canonicalize: {}", e);
                true
            }
        }
    }

    /// Record content the store has acknowledged (saved or loaded).
    pub fn record_saved(&mut self, content: CanonicalTree, version: DocumentVersion) {
        let hash = content.hash();
        self.snapshot = Some(LastSavedSnapshot {
            content,
            hash,
            version,
        });
    }

    pub fn snapshot(&self) -> Option<&LastSavedSnapshot> {
        self.snapshot.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_snapshot_means_nothing_unsaved() {
        let guard = UnsavedChangeGuard::new();
        assert!(!guard.has_unsaved_changes(&Content::markup("<p>anything</p>")));
    }

    #[test]
    fn test_compares_canonical_content() {
        let mut guard = UnsavedChangeGuard::new();
        guard.record_saved(CanonicalTree::from_markup("<p><b>base</b></p>").unwrap(), 1);

        assert!(!guard.has_unsaved_changes(&Content::markup("<p><strong>base</strong></p>")));
        assert!(guard.has_unsaved_changes(&Content::markup("<p>draft</p>")));
        assert_eq!(guard.snapshot().unwrap().version, 1);
    }

    #[test]
    fn test_unparseable_content_is_unsaved() {
        let mut guard = UnsavedChangeGuard::new();
        guard.record_saved(CanonicalTree::empty(), 0);
        assert!(guard.has_unsaved_changes(&Content::markup("<p>broken")));
    }

    #[test]
    fn test_record_saved_moves_baseline() {
        let mut guard = UnsavedChangeGuard::new();
        guard.record_saved(CanonicalTree::from_markup("base").unwrap(), 1);
        let draft = Content::markup("draft");
        assert!(guard.has_unsaved_changes(&draft));

        guard.record_saved(CanonicalTree::from_markup("draft").unwrap(), 2);
        assert!(!guard.has_unsaved_changes(&draft));
    }
}
