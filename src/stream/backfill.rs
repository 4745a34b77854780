//! Reading historical mutations from persistent storage when memory no
//! longer holds them.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::engine::BackfillSource;
use crate::wire::{Mutation, SnapshotMarker, SnapshotMarkerFlags};

/// One item produced by a backfill scan: either the single disk-phase
/// snapshot marker that opens the range, or a mutation from the range
/// itself.
pub enum BackfillItem {
    Marker(SnapshotMarker),
    Item(Mutation),
}

/// Schedules and drives a single disk scan feeding one `ActiveStream`.
pub struct BackfillTask {
    vbucket: u16,
    start_seqno: u64,
    end_seqno: u64,
    marker_emitted: bool,
    items: VecDeque<Mutation>,
    loaded: bool,
    source: Rc<dyn BackfillSource>,
}

impl BackfillTask {
    pub fn new(source: Rc<dyn BackfillSource>, vbucket: u16, start_seqno: u64, end_seqno: u64) -> BackfillTask {
        BackfillTask {
            vbucket,
            start_seqno,
            end_seqno,
            marker_emitted: false,
            items: VecDeque::new(),
            loaded: false,
            source,
        }
    }

    fn ensure_loaded(&mut self) {
        if !self.loaded {
            let scanned = self.source.scan(self.vbucket, self.start_seqno, self.end_seqno);
            self.items = scanned.into_iter().collect();
            self.loaded = true;
        }
    }

    /// Pulls up to `max_items` items from the scan, honoring the producer's
    /// buffer-accept signal by simply returning fewer than requested; the
    /// caller (the owning `ActiveStream`) is responsible for pausing
    /// between batches.
    pub fn next_batch(&mut self, max_items: usize) -> Vec<BackfillItem> {
        self.ensure_loaded();

        let mut out = Vec::with_capacity(max_items + 1);
        if !self.marker_emitted {
            out.push(BackfillItem::Marker(SnapshotMarker {
                start_seqno: self.start_seqno,
                end_seqno: self.end_seqno,
                flags: SnapshotMarkerFlags(SnapshotMarkerFlags::DISK),
            }));
            self.marker_emitted = true;
        }

        for _ in 0..max_items {
            match self.items.pop_front() {
                Some(item) => out.push(BackfillItem::Item(item)),
                None => break,
            }
        }
        out
    }

    /// True once the scan has yielded its marker and drained every item —
    /// the owning stream should switch to an in-memory `CheckpointCursor`
    /// at `end_seqno + 1`.
    pub fn is_complete(&self) -> bool {
        self.loaded && self.marker_emitted && self.items.is_empty()
    }

    pub fn end_seqno(&self) -> u64 {
        self.end_seqno
    }
}
