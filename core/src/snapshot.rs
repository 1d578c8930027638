//! Full-state snapshots and the inflate cache

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::host::TtdVar;

/// Snapshot of runtime state taken at a snapshot entry
///
/// The bytes are opaque and come from the host's snapshot subsystem. They are
/// checksummed when taken so a damaged snapshot is caught before it is
/// inflated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Event time of the snapshot entry that owns this snapshot
    pub event_time: i64,
    /// Serialized runtime state
    pub data: Vec<u8>,
    /// xxHash3 checksum of `data`
    pub checksum: u64,
    /// Partial snapshot taken of a top-level call during replay
    pub ready_to_run: bool,
}

impl Snapshot {
    /// Create a snapshot from serialized data
    pub fn new(event_time: i64, data: Vec<u8>, ready_to_run: bool) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self {
            event_time,
            data,
            checksum,
            ready_to_run,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the serialized state in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the data still hashes to the recorded checksum
    pub fn verify(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Compute the xxHash3 checksum used to detect damaged snapshots
    pub fn compute_checksum(data: &[u8]) -> u64 {
        xxhash_rust::xxh3::xxh3_64(data)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("event_time", &self.event_time)
            .field("len", &self.data.len())
            .field("checksum", &format_args!("{:#018x}", self.checksum))
            .field("ready_to_run", &self.ready_to_run)
            .finish()
    }
}

/// Object map produced by inflating a snapshot.
///
/// Maps the snapshot's object ids to the live values the host created for
/// them. The engine keeps one map around; re-inflating the same or an
/// adjacent snapshot hands it back to the host marked as reused so objects
/// that did not change can be kept instead of recreated.
#[derive(Debug, Clone, Default)]
pub struct InflateMap {
    snapshot_time: i64,
    objects: HashMap<u64, TtdVar>,
    reused: bool,
    reuse_count: u32,
}

impl InflateMap {
    /// Empty map for a fresh inflate of the snapshot at `snapshot_time`
    pub fn new(snapshot_time: i64) -> Self {
        Self {
            snapshot_time,
            ..Self::default()
        }
    }

    /// Event time of the snapshot this map was last inflated from
    pub fn snapshot_time(&self) -> i64 {
        self.snapshot_time
    }

    /// Whether the map holds objects from a previous inflate
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Number of times this map has been reused since it was created
    pub fn reuse_count(&self) -> u32 {
        self.reuse_count
    }

    pub fn insert(&mut self, snapshot_id: u64, value: TtdVar) -> Option<TtdVar> {
        self.objects.insert(snapshot_id, value)
    }

    pub fn get(&self, snapshot_id: u64) -> Option<TtdVar> {
        self.objects.get(&snapshot_id).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Mark the map as carried over into an inflate of `snapshot_time`
    pub fn prepare_for_reuse(&mut self, snapshot_time: i64) {
        self.snapshot_time = snapshot_time;
        self.reused = true;
        self.reuse_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_checksum() {
        let snap = Snapshot::new(10, vec![1, 2, 3, 4], false);
        assert!(snap.verify());
        assert_eq!(snap.len(), 4);
        assert_ne!(snap.checksum, 0);

        let mut damaged = snap.clone();
        damaged.data[0] = 9;
        assert!(!damaged.verify());
    }

    #[test]
    fn test_snapshot_debug_omits_data() {
        let snap = Snapshot::new(3, vec![0; 1024], true);
        let text = format!("{:?}", snap);
        assert!(text.contains("len: 1024"));
        assert!(text.contains("ready_to_run: true"));
    }

    #[test]
    fn test_inflate_map_reuse() {
        let mut map = InflateMap::new(5);
        assert!(!map.is_reused());
        map.insert(1, TtdVar(100));
        map.insert(2, TtdVar(200));

        map.prepare_for_reuse(9);
        assert!(map.is_reused());
        assert_eq!(map.snapshot_time(), 9);
        assert_eq!(map.reuse_count(), 1);
        assert_eq!(map.get(2), Some(TtdVar(200)));
        assert_eq!(map.len(), 2);
    }
}
