//! Topology state and parent candidate selection.

use std::fmt;

use rand::Rng;

use crate::identity::PeerId;
use crate::protocol::DirectoryRecord;

/// Where a node currently sits in the overlay tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyState {
    /// Waiting for the directory to assign an id.
    Joining,
    /// Working through a candidate list looking for a parent.
    SeekingParent,
    /// Connected to a parent with a smaller id.
    HasParent { parent: PeerId },
    /// No parent; this node is the top of its tree.
    Root,
    /// Leaving the session; terminal.
    Exiting,
}

impl fmt::Display for TopologyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joining => write!(f, "joining"),
            Self::SeekingParent => write!(f, "seeking parent"),
            Self::HasParent { parent } => write!(f, "child of {parent}"),
            Self::Root => write!(f, "root"),
            Self::Exiting => write!(f, "exiting"),
        }
    }
}

/// The shrinking working list used while seeking a parent.
///
/// Every failed attempt removes all entries for the same address and port,
/// so stale or repeated directory entries cannot cause endless retries
/// against one dead target.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    candidates: Vec<DirectoryRecord>,
}

impl CandidatePool {
    pub fn new(candidates: Vec<DirectoryRecord>) -> Self {
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Choose a candidate uniformly at random.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&DirectoryRecord> {
        if self.candidates.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.candidates.len());
        self.candidates.get(index)
    }

    /// Drop every candidate that points at the same target as `failed`.
    /// Returns how many entries were removed.
    pub fn discard_target(&mut self, failed: &DirectoryRecord) -> usize {
        let before = self.candidates.len();
        self.candidates
            .retain(|c| !(c.address == failed.address && c.port == failed.port));
        before - self.candidates.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn record(id: u64, address: &str, port: u16) -> DirectoryRecord {
        DirectoryRecord {
            id: PeerId(id),
            name: format!("peer-{id}"),
            address: address.to_string(),
            port,
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TopologyState::Root.to_string(), "root");
        assert_eq!(TopologyState::SeekingParent.to_string(), "seeking parent");
        assert_eq!(TopologyState::HasParent { parent: PeerId(4) }.to_string(), "child of 4");
    }

    #[test]
    fn test_pick_from_empty_pool() {
        let pool = CandidatePool::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pool.pick(&mut rng).is_none());
    }

    #[test]
    fn test_pick_covers_every_candidate() {
        let pool = CandidatePool::new(vec![
            record(0, "127.0.0.1", 5000),
            record(1, "127.0.0.1", 5001),
            record(2, "127.0.0.1", 5002),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(pool.pick(&mut rng).unwrap().id);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_discard_collapses_duplicates() {
        let mut pool = CandidatePool::new(vec![
            record(0, "127.0.0.1", 5000),
            record(1, "127.0.0.1", 5001),
            record(2, "127.0.0.1", 5000),
            record(3, "10.0.0.1", 5000),
        ]);
        let removed = pool.discard_target(&record(0, "127.0.0.1", 5000));
        assert_eq!(removed, 2);
        assert_eq!(pool.len(), 2);

        let removed = pool.discard_target(&record(9, "127.0.0.1", 5000));
        assert_eq!(removed, 0);
    }
}
