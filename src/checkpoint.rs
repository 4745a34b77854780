//! A named read position inside a vbucket's checkpoint sequence, registered
//! when an `ActiveStream` is created and deregistered on stream close.

use std::rc::Rc;

use crate::engine::{CheckpointItem, CheckpointSource, CursorHandle};

pub struct CheckpointCursor {
    vbucket: u16,
    name: String,
    handle: CursorHandle,
    source: Rc<dyn CheckpointSource>,
    /// Number of items drained through this cursor so far.
    drained: u64,
    closed: bool,
}

impl CheckpointCursor {
    pub fn register(source: Rc<dyn CheckpointSource>, vbucket: u16, name: &str, start_seqno: u64) -> CheckpointCursor {
        let handle = source.register_cursor(vbucket, name, start_seqno);
        CheckpointCursor {
            vbucket,
            name: name.to_owned(),
            handle,
            source,
            drained: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vbucket(&self) -> u16 {
        self.vbucket
    }

    pub fn drained(&self) -> u64 {
        self.drained
    }

    /// Pulls up to `max_items` ordered items from the underlying checkpoint
    /// sequence.
    pub fn next_batch(&mut self, max_items: usize) -> Vec<CheckpointItem> {
        if self.closed {
            return Vec::new();
        }
        let items = self.source.next_items(self.vbucket, self.handle, max_items);
        self.drained += items.len() as u64;
        items
    }

    pub fn oldest_in_memory_seqno(&self) -> u64 {
        self.source.oldest_in_memory_seqno(self.vbucket)
    }
}

impl Drop for CheckpointCursor {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.unregister_cursor(self.vbucket, self.handle);
        }
    }
}
