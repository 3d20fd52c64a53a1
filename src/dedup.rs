use std::collections::HashSet;

/// In-memory membership index over record identities. Seeded at startup
/// from the store and the checkpoint so a resumed run never re-fetches an
/// identity committed by an earlier run.
#[derive(Debug, Default)]
pub struct DedupIndex {
    known: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            known: identities.into_iter().collect(),
        }
    }

    pub fn extend<I>(&mut self, identities: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.known.extend(identities);
    }

    pub fn seen(&self, identity: &str) -> bool {
        self.known.contains(identity)
    }

    /// Idempotent. Returns true if the identity was new.
    pub fn mark(&mut self, identity: String) -> bool {
        self.known.insert(identity)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_is_idempotent() {
        let mut idx = DedupIndex::new();
        assert!(!idx.seen("123456789"));
        assert!(idx.mark("123456789".into()));
        assert!(!idx.mark("123456789".into()));
        assert!(idx.seen("123456789"));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn seeded_identities_are_seen() {
        let idx = DedupIndex::seed(["a".to_string(), "b".to_string()]);
        assert!(idx.seen("a"));
        assert!(idx.seen("b"));
        assert!(!idx.seen("c"));
    }
}
