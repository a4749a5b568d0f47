//!
//! src/dedup.rs
//!
//! Bookkeeping of which artist ids are already accounted for in a run:
//! the ids persisted before the run started merged with the ids recorded
//! while it runs.
//!

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ArtistLedger {
    snapshot: HashSet<String>,
    recorded: HashSet<String>
}

impl ArtistLedger {
    pub fn new(snapshot: impl IntoIterator<Item = String>) -> Self {
        Self {
            snapshot: snapshot.into_iter().collect(),
            recorded: HashSet::new()
        }
    }

    /// True if the id is persisted or was already handled this run
    pub fn is_accounted(&self, artist_id: &str) -> bool {
        self.snapshot.contains(artist_id) || self.recorded.contains(artist_id)
    }

    /// Returns false if the id was already accounted for.
    pub fn record(&mut self, artist_id: &str) -> bool {
        if self.is_accounted(artist_id) {
            return false;
        }
        self.recorded.insert(artist_id.to_string())
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn recorded_len(&self) -> usize {
        self.recorded.len()
    }
}
