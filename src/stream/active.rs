//! The producer-side half of a single vbucket's replication stream.

use std::rc::Rc;

use crate::checkpoint::CheckpointCursor;
use crate::engine::{BackfillSource, CheckpointItem, CheckpointSource};
use crate::error::{DcpError, DcpResult};
use crate::flow_control::FlowControlPolicy;
use crate::stream::backfill::{BackfillItem, BackfillTask};
use crate::wire::{DcpMessage, MessageCodec, Mutation, OpenFlags, SnapshotMarker, SnapshotMarkerFlags, StreamEndStatus, XattrPolicy};

/// Maps a stream's negotiated open-flags to the xattr pruning rule
/// `prune` applies to every item it emits.
fn xattr_policy(open_flags: OpenFlags) -> XattrPolicy {
    if open_flags.include_xattrs() && open_flags.no_value() {
        XattrPolicy::XattrOnly
    } else if open_flags.include_xattrs() {
        XattrPolicy::Full
    } else {
        XattrPolicy::BodyOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStreamState {
    Pending,
    Backfilling,
    InMemory,
    TakeoverSend,
    TakeoverWait,
    Dead,
}

enum Source {
    None,
    Backfill(BackfillTask),
    Cursor(CheckpointCursor),
}

/// A single vbucket's outbound replication stream on a producer connection.
pub struct ActiveStream {
    vbucket: u16,
    opaque: u32,
    vbucket_uuid: u64,
    end_seqno: u64,
    takeover: bool,
    open_flags: OpenFlags,
    consumer_supports_snappy: bool,
    force_value_compression: bool,
    state: ActiveStreamState,
    source: Source,
    pending: Vec<DcpMessage>,
    last_emitted_seqno: Option<u64>,
    dead_sent: bool,
    end_status: StreamEndStatus,
}

impl ActiveStream {
    pub fn new(vbucket: u16, opaque: u32, vbucket_uuid: u64, end_seqno: u64, takeover: bool, open_flags: OpenFlags) -> ActiveStream {
        ActiveStream {
            vbucket,
            opaque,
            vbucket_uuid,
            end_seqno,
            takeover,
            open_flags,
            consumer_supports_snappy: false,
            force_value_compression: false,
            state: ActiveStreamState::Pending,
            source: Source::None,
            pending: Vec::new(),
            last_emitted_seqno: None,
            dead_sent: false,
            end_status: StreamEndStatus::Ok,
        }
    }

    /// Updates whether the consumer has negotiated Snappy support, applied
    /// to every item this stream emits from here on.
    pub fn set_consumer_supports_snappy(&mut self, supported: bool) {
        self.consumer_supports_snappy = supported;
    }

    /// Updates the connection's `force_value_compression` control option,
    /// applied to every item this stream emits from here on.
    pub fn set_force_value_compression(&mut self, enabled: bool) {
        self.force_value_compression = enabled;
    }

    pub fn state(&self) -> ActiveStreamState {
        self.state
    }

    /// True once the stream has sent its final `StreamEnd` and has nothing
    /// further to produce.
    pub fn is_finished(&self) -> bool {
        self.state == ActiveStreamState::Dead && self.dead_sent
    }

    pub fn vbucket(&self) -> u16 {
        self.vbucket
    }

    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    /// Decides where this stream actually starts reading from, given what
    /// the checkpoint manager still holds in memory: a start seqno at or
    /// above the oldest seqno memory retains attaches a cursor directly,
    /// otherwise the gap between the requested start and what's in memory
    /// is served from disk first.
    pub fn begin(&mut self, checkpoints: &Rc<dyn CheckpointSource>, backfill: &Rc<dyn BackfillSource>, start_seqno: u64) {
        let oldest_in_memory = checkpoints.oldest_in_memory_seqno(self.vbucket);

        if start_seqno >= oldest_in_memory {
            let cursor = CheckpointCursor::register(checkpoints.clone(), self.vbucket, &format!("dcp-{}", self.opaque), start_seqno);
            self.source = Source::Cursor(cursor);
            self.state = ActiveStreamState::InMemory;
        } else {
            let backfill_end = oldest_in_memory.saturating_sub(1);
            self.source = Source::Backfill(BackfillTask::new(backfill.clone(), self.vbucket, start_seqno, backfill_end));
            self.state = ActiveStreamState::Backfilling;
        }
    }

    /// Pulls up to `max_items` wire messages, advancing backfill-to-memory
    /// transitions and takeover completion as needed. Returns
    /// `DcpError::WouldBlock` when there is currently nothing to send.
    pub fn pump(
        &mut self,
        checkpoints: &Rc<dyn CheckpointSource>,
        flow: &mut dyn FlowControlPolicy,
        max_items: usize,
    ) -> DcpResult<Vec<DcpMessage>> {
        if self.state == ActiveStreamState::Dead {
            if self.dead_sent {
                return Err(DcpError::WouldBlock);
            }
            self.dead_sent = true;
            return Ok(vec![DcpMessage::StreamEnd {
                opaque: self.opaque,
                vbucket: self.vbucket,
                status: self.end_status,
            }]);
        }

        let mut out = Vec::new();
        match &mut self.source {
            Source::None => return Err(DcpError::WouldBlock),
            Source::Backfill(task) => {
                for item in task.next_batch(max_items) {
                    match item {
                        BackfillItem::Marker(marker) => out.push(DcpMessage::SnapshotMarker {
                            opaque: self.opaque,
                            vbucket: self.vbucket,
                            marker,
                        }),
                        BackfillItem::Item(m) => out.push(self.encode_mutation(m)),
                    }
                }
                if task.is_complete() {
                    let next = task.end_seqno() + 1;
                    let cursor = CheckpointCursor::register(checkpoints.clone(), self.vbucket, &format!("dcp-{}", self.opaque), next);
                    self.source = Source::Cursor(cursor);
                    self.state = ActiveStreamState::InMemory;
                }
            }
            Source::Cursor(cursor) => {
                let budget = if flow.should_buffer() { 0 } else { max_items };
                let items = cursor.next_batch(budget);
                if items.is_empty() && out.is_empty() {
                    return Err(DcpError::WouldBlock);
                }
                self.emit_checkpoint_items(items, &mut out);
            }
        }

        if out.is_empty() {
            return Err(DcpError::WouldBlock);
        }

        for msg in &out {
            flow.on_item_sent(msg.wire_size());
        }

        if self.takeover && self.state == ActiveStreamState::InMemory && self.caught_up() {
            self.state = ActiveStreamState::TakeoverSend;
        }

        Ok(out)
    }

    fn caught_up(&self) -> bool {
        match self.last_emitted_seqno {
            Some(seqno) => seqno >= self.end_seqno,
            None => self.end_seqno == 0,
        }
    }

    fn emit_checkpoint_items(&mut self, items: Vec<CheckpointItem>, out: &mut Vec<DcpMessage>) {
        let mut snapshot_start = None;
        let mut snapshot_end = None;
        for item in &items {
            if let Some(seqno) = item.by_seqno() {
                snapshot_start.get_or_insert(seqno);
                snapshot_end = Some(seqno);
            }
        }
        if let (Some(start), Some(end)) = (snapshot_start, snapshot_end) {
            out.push(DcpMessage::SnapshotMarker {
                opaque: self.opaque,
                vbucket: self.vbucket,
                marker: SnapshotMarker {
                    start_seqno: start,
                    end_seqno: end,
                    flags: SnapshotMarkerFlags(SnapshotMarkerFlags::MEMORY),
                },
            });
        }

        for item in items {
            match item {
                CheckpointItem::Mutation(m) => {
                    self.last_emitted_seqno = Some(m.by_seqno);
                    out.push(self.encode_mutation(m));
                }
                CheckpointItem::Deletion(m) => {
                    self.last_emitted_seqno = Some(m.by_seqno);
                    out.push(DcpMessage::Deletion {
                        opaque: self.opaque,
                        vbucket: self.vbucket,
                        item: self.prune(m),
                    });
                }
                CheckpointItem::Expiration(m) => {
                    self.last_emitted_seqno = Some(m.by_seqno);
                    out.push(DcpMessage::Expiration {
                        opaque: self.opaque,
                        vbucket: self.vbucket,
                        item: self.prune(m),
                    });
                }
                CheckpointItem::CheckpointStart(_) | CheckpointItem::CheckpointEnd(_) => {}
            }
        }
    }

    fn prune(&self, m: Mutation) -> Mutation {
        let codec = MessageCodec {
            consumer_supports_snappy: self.consumer_supports_snappy,
        };
        codec.prepare_outbound(&m, xattr_policy(self.open_flags), self.force_value_compression)
    }

    fn encode_mutation(&mut self, m: Mutation) -> DcpMessage {
        self.last_emitted_seqno = Some(m.by_seqno);
        DcpMessage::Mutation {
            opaque: self.opaque,
            vbucket: self.vbucket,
            item: self.prune(m),
        }
    }

    pub fn handle_buffer_ack(&mut self, flow: &mut dyn FlowControlPolicy, bytes: u32) {
        flow.on_ack(bytes);
    }

    /// Completes a takeover handoff after the consumer acks the final
    /// `SetVBucketState` pending message; the stream has nothing further to
    /// send once this returns.
    pub fn complete_takeover(&mut self) {
        if self.state == ActiveStreamState::TakeoverSend {
            self.state = ActiveStreamState::TakeoverWait;
        } else if self.state == ActiveStreamState::TakeoverWait {
            self.state = ActiveStreamState::Dead;
        }
    }

    /// Tears the stream down; `send_end` controls whether a `StreamEnd`
    /// frame is still owed to the consumer, and `status` is the reason
    /// reported on the wire (StreamEnd flags: `Closed`,
    /// `StateChanged`, `Disconnected`, `Slow`).
    pub fn close(&mut self, send_end: bool, status: StreamEndStatus) {
        self.state = ActiveStreamState::Dead;
        self.dead_sent = !send_end;
        self.end_status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CursorHandle;
    use crate::flow_control::NoFlowControl;

    struct FakeCheckpoints {
        oldest: u64,
    }
    impl CheckpointSource for FakeCheckpoints {
        fn oldest_in_memory_seqno(&self, _vbucket: u16) -> u64 {
            self.oldest
        }
        fn register_cursor(&self, _vbucket: u16, _name: &str, _start_seqno: u64) -> CursorHandle {
            CursorHandle(1)
        }
        fn unregister_cursor(&self, _vbucket: u16, _cursor: CursorHandle) {}
        fn next_items(&self, _vbucket: u16, _cursor: CursorHandle, _max_items: usize) -> Vec<CheckpointItem> {
            Vec::new()
        }
        fn open_checkpoint_id(&self, _vbucket: u16) -> u64 {
            1
        }
        fn set_open_checkpoint_id(&self, _vbucket: u16, _id: u64) {}
        fn create_checkpoint(&self, _vbucket: u16) -> u64 {
            2
        }
    }

    struct FakeBackfill;
    impl BackfillSource for FakeBackfill {
        fn scan(&self, _vbucket: u16, _start: u64, _end: u64) -> Vec<Mutation> {
            Vec::new()
        }
    }

    #[test]
    fn start_at_or_above_oldest_in_memory_attaches_cursor_directly() {
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints { oldest: 10 });
        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let mut stream = ActiveStream::new(0, 1, 99, 100, false, OpenFlags(OpenFlags::PRODUCER | OpenFlags::INCLUDE_XATTRS));
        stream.begin(&checkpoints, &backfill, 20);
        assert_eq!(stream.state(), ActiveStreamState::InMemory);
    }

    #[test]
    fn start_below_oldest_in_memory_backfills_first() {
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints { oldest: 50 });
        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let mut stream = ActiveStream::new(0, 1, 99, 100, false, OpenFlags(OpenFlags::PRODUCER | OpenFlags::INCLUDE_XATTRS));
        stream.begin(&checkpoints, &backfill, 5);
        assert_eq!(stream.state(), ActiveStreamState::Backfilling);
    }

    #[test]
    fn dead_stream_sends_stream_end_exactly_once() {
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints { oldest: 0 });
        let mut stream = ActiveStream::new(0, 1, 99, 100, false, OpenFlags(OpenFlags::PRODUCER | OpenFlags::INCLUDE_XATTRS));
        stream.close(true, StreamEndStatus::Ok);
        let mut flow = NoFlowControl;
        let msgs = stream.pump(&checkpoints, &mut flow, 10).unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], DcpMessage::StreamEnd { .. }));
        assert!(stream.pump(&checkpoints, &mut flow, 10).unwrap_err().is_would_block());
    }

    struct StockedCheckpoints {
        items: std::cell::RefCell<Vec<CheckpointItem>>,
    }
    impl CheckpointSource for StockedCheckpoints {
        fn oldest_in_memory_seqno(&self, _vbucket: u16) -> u64 {
            0
        }
        fn register_cursor(&self, _vbucket: u16, _name: &str, _start_seqno: u64) -> CursorHandle {
            CursorHandle(1)
        }
        fn unregister_cursor(&self, _vbucket: u16, _cursor: CursorHandle) {}
        fn next_items(&self, _vbucket: u16, _cursor: CursorHandle, max_items: usize) -> Vec<CheckpointItem> {
            let mut items = self.items.borrow_mut();
            let n = max_items.min(items.len());
            items.drain(0..n).collect()
        }
        fn open_checkpoint_id(&self, _vbucket: u16) -> u64 {
            1
        }
        fn set_open_checkpoint_id(&self, _vbucket: u16, _id: u64) {}
        fn create_checkpoint(&self, _vbucket: u16) -> u64 {
            2
        }
    }

    fn sample_mutation(seqno: u64) -> Mutation {
        Mutation {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            cas: 1,
            by_seqno: seqno,
            rev_seqno: 1,
            datatype: 0,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: Vec::new(),
            durability: None,
        }
    }

    /// A saturated flow-control policy must stop `pump` from draining the
    /// cursor at all, even though the cursor itself has items ready: the
    /// budget it requests must fall to zero rather than being ignored.
    #[test]
    fn saturated_flow_control_policy_blocks_cursor_production() {
        use crate::flow_control::StaticFlowControl;

        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(StockedCheckpoints {
            items: std::cell::RefCell::new(vec![CheckpointItem::Mutation(sample_mutation(1))]),
        });
        let mut stream = ActiveStream::new(0, 1, 99, 100, false, OpenFlags(OpenFlags::PRODUCER | OpenFlags::INCLUDE_XATTRS));
        stream.begin(&checkpoints, &backfill, 0);
        assert_eq!(stream.state(), ActiveStreamState::InMemory);

        let mut flow = StaticFlowControl::new(10);
        flow.on_item_sent(10);
        assert!(flow.should_buffer());

        let err = stream.pump(&checkpoints, &mut flow, 10).unwrap_err();
        assert!(err.is_would_block());
    }

    /// A stream negotiated for xattr-only delivery (`INCLUDE_XATTRS |
    /// NO_VALUE`) prunes every item down to just its xattr section through
    /// the real outbound codec path, even when the item is marked compressed
    /// for a consumer that never negotiated Snappy support.
    #[test]
    fn xattr_only_stream_prunes_compressed_item_through_pump() {
        use byteorder::{BigEndian, WriteBytesExt};

        let mut value = Vec::new();
        value.write_u32::<BigEndian>(4).unwrap();
        value.extend_from_slice(b"xatt");
        value.extend_from_slice(b"the rest of the document body");
        let item = CheckpointItem::Mutation(Mutation {
            key: b"k".to_vec(),
            value,
            cas: 1,
            by_seqno: 1,
            rev_seqno: 1,
            datatype: Mutation::DATATYPE_XATTR | Mutation::DATATYPE_SNAPPY,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: Vec::new(),
            durability: None,
        });

        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(StockedCheckpoints {
            items: std::cell::RefCell::new(vec![item]),
        });
        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let mut stream = ActiveStream::new(
            0,
            1,
            99,
            100,
            false,
            OpenFlags(OpenFlags::PRODUCER | OpenFlags::INCLUDE_XATTRS | OpenFlags::NO_VALUE),
        );
        stream.set_consumer_supports_snappy(false);
        stream.begin(&checkpoints, &backfill, 0);

        let mut flow = NoFlowControl;
        let msgs = stream.pump(&checkpoints, &mut flow, 10).unwrap();
        let mutation = msgs.iter().find_map(|m| match m {
            DcpMessage::Mutation { item, .. } => Some(item),
            _ => None,
        });
        let item = mutation.expect("a mutation was emitted");
        assert_eq!(item.value.len(), 8);
        assert!(!item.is_compressed());
    }
}
