//! Growable block list of log entries
//!
//! Entries are appended at the tail and removed only from the head. Storage is
//! a queue of fixed-capacity blocks; a block's slot vector is allocated once at
//! full capacity and never grows, so entries never move while they are live and
//! handles stay valid until the entry is deleted.

use std::collections::VecDeque;

use super::entry::EventLogEntry;

/// Default number of entries per block
pub const DEFAULT_BLOCK_CAPACITY: usize = 4096;

/// Stable reference to a live entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle {
    /// Sequence number of the owning block
    block: u64,
    /// Slot within the block
    index: u32,
}

struct EventBlock {
    seq: u64,
    /// First live slot
    start_pos: usize,
    /// One past the last written slot
    curr_pos: usize,
    capacity: usize,
    slots: Vec<Option<EventLogEntry>>,
}

impl EventBlock {
    fn new(seq: u64, capacity: usize) -> Self {
        Self {
            seq,
            start_pos: 0,
            curr_pos: 0,
            capacity,
            slots: Vec::with_capacity(capacity),
        }
    }

    fn is_full(&self) -> bool {
        self.curr_pos == self.capacity
    }

    fn live(&self) -> impl DoubleEndedIterator<Item = &EventLogEntry> {
        self.slots[self.start_pos..self.curr_pos]
            .iter()
            .filter_map(Option::as_ref)
    }
}

/// Append-only entry store with head deletion
pub struct EventList {
    block_capacity: usize,
    blocks: VecDeque<EventBlock>,
    next_seq: u64,
}

impl EventList {
    /// Create an empty list with the given block capacity
    pub fn new(block_capacity: usize) -> Self {
        assert!(block_capacity > 0, "block capacity must be non-zero");
        Self {
            block_capacity,
            blocks: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    /// Number of allocated blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append `entry` at the tail and return its handle
    pub fn get_next_available_entry(&mut self, entry: EventLogEntry) -> EventHandle {
        debug_assert!(
            self.iter()
                .next_back()
                .is_none_or(|last| last.event_time < entry.event_time),
            "event times must increase"
        );
        if self.blocks.back().is_none_or(EventBlock::is_full) {
            let block = EventBlock::new(self.next_seq, self.block_capacity);
            self.next_seq += 1;
            self.blocks.push_back(block);
        }

        let block = self
            .blocks
            .back_mut()
            .expect("tail block allocated above");
        block.slots.push(Some(entry));
        block.curr_pos += 1;

        EventHandle {
            block: block.seq,
            index: (block.curr_pos - 1) as u32,
        }
    }

    fn block_position(&self, seq: u64) -> Option<usize> {
        let front = self.blocks.front()?.seq;
        let pos = seq.checked_sub(front)? as usize;
        (pos < self.blocks.len()).then_some(pos)
    }

    fn slot_live(block: &EventBlock, index: u32) -> bool {
        let index = index as usize;
        block.start_pos <= index && index < block.curr_pos
    }

    /// Entry for `handle`, or `None` if it has been deleted
    pub fn get(&self, handle: EventHandle) -> Option<&EventLogEntry> {
        let block = &self.blocks[self.block_position(handle.block)?];
        if !Self::slot_live(block, handle.index) {
            return None;
        }
        block.slots[handle.index as usize].as_ref()
    }

    /// Mutable entry for `handle`, or `None` if it has been deleted
    pub fn get_mut(&mut self, handle: EventHandle) -> Option<&mut EventLogEntry> {
        let pos = self.block_position(handle.block)?;
        let block = &mut self.blocks[pos];
        if !Self::slot_live(block, handle.index) {
            return None;
        }
        block.slots[handle.index as usize].as_mut()
    }

    /// Handle of the oldest live entry
    pub fn first_handle(&self) -> Option<EventHandle> {
        let block = self.blocks.front()?;
        (block.start_pos < block.curr_pos).then(|| EventHandle {
            block: block.seq,
            index: block.start_pos as u32,
        })
    }

    /// Handle of the newest entry
    pub fn last_handle(&self) -> Option<EventHandle> {
        let block = self.blocks.back()?;
        (block.start_pos < block.curr_pos).then(|| EventHandle {
            block: block.seq,
            index: (block.curr_pos - 1) as u32,
        })
    }

    /// Remove the oldest live entry and hand it back for unloading.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not the head entry.
    pub fn delete_first_entry(&mut self, handle: EventHandle) -> EventLogEntry {
        assert_eq!(
            Some(handle),
            self.first_handle(),
            "only the first entry can be deleted"
        );

        let block = self.blocks.front_mut().expect("head block exists");
        let entry = block.slots[block.start_pos]
            .take()
            .expect("live slot holds an entry");
        block.start_pos += 1;

        if block.start_pos == block.curr_pos {
            let seq = block.seq;
            self.blocks.pop_front();
            log::debug!("Unlinked exhausted event block {}", seq);
        }
        entry
    }

    pub fn is_empty(&self) -> bool {
        self.first_handle().is_none()
    }

    /// Number of live entries (walks every block)
    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.curr_pos - b.start_pos).sum()
    }

    /// Drop every entry and block
    pub fn unload_event_list(&mut self) {
        let dropped = self.count();
        self.blocks.clear();
        if dropped > 0 {
            log::debug!("Unloaded {} events", dropped);
        }
    }

    /// Iterate live entries oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EventLogEntry> {
        self.blocks.iter().flat_map(EventBlock::live)
    }

    /// Cursor on the oldest entry (invalid if the list is empty)
    pub fn iter_at_first(&self) -> EventCursor {
        EventCursor {
            handle: self.first_handle(),
        }
    }

    /// Cursor on the newest entry (invalid if the list is empty)
    pub fn iter_at_last(&self) -> EventCursor {
        EventCursor {
            handle: self.last_handle(),
        }
    }

    /// Cursor on the entry with exactly `event_time`, if present
    pub fn find_event_time(&self, event_time: i64) -> Option<EventCursor> {
        // Blocks and slots are both sorted by event time.
        let block_pos = self
            .blocks
            .partition_point(|b| b.live().next_back().is_some_and(|e| e.event_time < event_time));
        let block = self.blocks.get(block_pos)?;
        let live = &block.slots[block.start_pos..block.curr_pos];
        let offset = live.partition_point(|slot| {
            slot.as_ref().is_some_and(|e| e.event_time < event_time)
        });
        let entry = live.get(offset)?.as_ref()?;
        (entry.event_time == event_time).then(|| EventCursor {
            handle: Some(EventHandle {
                block: block.seq,
                index: (block.start_pos + offset) as u32,
            }),
        })
    }

    fn next_handle(&self, handle: EventHandle) -> Option<EventHandle> {
        let pos = self.block_position(handle.block)?;
        let block = &self.blocks[pos];
        let next = handle.index as usize + 1;
        if next < block.curr_pos {
            return Some(EventHandle {
                block: block.seq,
                index: next as u32,
            });
        }
        let block = self.blocks.get(pos + 1)?;
        (block.start_pos < block.curr_pos).then(|| EventHandle {
            block: block.seq,
            index: block.start_pos as u32,
        })
    }

    fn previous_handle(&self, handle: EventHandle) -> Option<EventHandle> {
        let pos = self.block_position(handle.block)?;
        let block = &self.blocks[pos];
        let index = handle.index as usize;
        if index > block.start_pos {
            return Some(EventHandle {
                block: block.seq,
                index: (index - 1) as u32,
            });
        }
        let block = self.blocks.get(pos.checked_sub(1)?)?;
        (block.start_pos < block.curr_pos).then(|| EventHandle {
            block: block.seq,
            index: (block.curr_pos - 1) as u32,
        })
    }
}

impl std::ops::Index<EventHandle> for EventList {
    type Output = EventLogEntry;

    fn index(&self, handle: EventHandle) -> &EventLogEntry {
        self.get(handle).expect("event handle refers to a deleted entry")
    }
}

impl std::ops::IndexMut<EventHandle> for EventList {
    fn index_mut(&mut self, handle: EventHandle) -> &mut EventLogEntry {
        self.get_mut(handle)
            .expect("event handle refers to a deleted entry")
    }
}

impl Default for EventList {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CAPACITY)
    }
}

impl std::fmt::Debug for EventList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventList")
            .field("block_capacity", &self.block_capacity)
            .field("blocks", &self.blocks.len())
            .field("count", &self.count())
            .finish()
    }
}

/// Bidirectional position in an [`EventList`].
///
/// A cursor is a plain position; every move or read takes the list it was
/// created from. Moving or reading an invalid cursor panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventCursor {
    handle: Option<EventHandle>,
}

impl EventCursor {
    /// Cursor that points at nothing
    pub const INVALID: Self = Self { handle: None };

    pub fn at(handle: EventHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<EventHandle> {
        self.handle
    }

    pub fn current<'a>(&self, list: &'a EventList) -> &'a EventLogEntry {
        let handle = self.handle.expect("read through an invalid event cursor");
        &list[handle]
    }

    pub fn move_next(&mut self, list: &EventList) {
        let handle = self.handle.expect("moved past the end of the event list");
        self.handle = list.next_handle(handle);
    }

    pub fn move_previous(&mut self, list: &EventList) {
        let handle = self.handle.expect("moved past the start of the event list");
        self.handle = list.previous_handle(handle);
    }
}
