//! Directory registry: the ordered list of registered peers.

use crate::identity::PeerId;
use crate::protocol::DirectoryRecord;

/// Every peer currently registered with the directory, ordered by id.
///
/// Records are appended on join, so insertion order is id order. Removal
/// keeps the remaining records in order; ids of removed records are never
/// handed out again.
#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<DirectoryRecord>,
    next_id: u64,
}

impl Registry {
    /// Create an empty registry whose first id is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id without registering anything yet.
    ///
    /// The id is consumed even if no record is ever inserted under it.
    pub fn reserve_id(&mut self) -> PeerId {
        let id = PeerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a record. Its id must be larger than every id already present.
    pub fn insert(&mut self, record: DirectoryRecord) {
        debug_assert!(
            self.records.last().is_none_or(|last| last.id < record.id),
            "registry ids must be strictly increasing"
        );
        self.records.push(record);
    }

    /// Remove the record with the given id, if present.
    pub fn remove(&mut self, id: PeerId) -> Option<DirectoryRecord> {
        let index = self.records.binary_search_by_key(&id, |r| r.id).ok()?;
        Some(self.records.remove(index))
    }

    /// All records whose id is strictly smaller than `id`, in id order.
    ///
    /// Ids in the result need not be contiguous: departed peers leave gaps.
    pub fn candidates_below(&self, id: PeerId) -> Vec<DirectoryRecord> {
        self.records
            .iter()
            .take_while(|r| r.id < id)
            .cloned()
            .collect()
    }

    /// Look up a record by id.
    pub fn get(&self, id: PeerId) -> Option<&DirectoryRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|index| &self.records[index])
    }

    /// The id the next join will receive.
    pub fn next_id(&self) -> PeerId {
        PeerId(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
