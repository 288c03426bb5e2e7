//! Identifiers: directory-assigned peer ids and process-local link ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A peer's identity as assigned by the directory.
///
/// Ids are handed out in strictly increasing order starting at 0 and are
/// never reused. A peer only ever connects to a peer with a smaller id, which
/// is what keeps the overlay free of cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Return the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(PeerId)
    }
}

/// A process-local handle identifying one live link.
///
/// Used to skip the arrival link when flooding and to find a child again
/// when its connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(uuid::Uuid);

impl LinkId {
    /// Generate a fresh link id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is enough to tell links apart in logs.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_ordering() {
        assert!(PeerId(0) < PeerId(1));
        assert!(PeerId(9) < PeerId(10));
        assert_eq!(PeerId(42).as_u64(), 42);
    }

    #[test]
    fn test_peer_id_parse() {
        assert_eq!("7".parse::<PeerId>().unwrap(), PeerId(7));
        assert_eq!(" 12 \n".parse::<PeerId>().unwrap(), PeerId(12));
        assert!("-1".parse::<PeerId>().is_err());
        assert!("abc".parse::<PeerId>().is_err());
        assert_eq!(format!("{}", PeerId(3)), "3");
    }

    #[test]
    fn test_link_id_generation() {
        let a = LinkId::generate();
        let b = LinkId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 8);
    }
}
