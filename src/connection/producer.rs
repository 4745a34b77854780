//! A producer connection: owns one `ActiveStream` per vbucket it has
//! accepted a `streamRequest` on, plus the noop keepalive and flow-control
//! budget shared by every stream it drives.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::connection::control::ControlOption;
use crate::connection::{ConnectionCore, Cookie, HostCallbacks, Role};
use crate::engine::{BackfillSource, CheckpointSource, StorageEngine};
use crate::error::{DcpError, DcpResult};
use crate::failover::FailoverTable;
use crate::flow_control::FlowControlPolicy;
use crate::noop::{NoopKeepalive, NoopOutcome};
use crate::stream::ActiveStream;
use crate::wire::{DcpMessage, OpenFlags};

/// Outcome of resolving a `streamRequest`.
pub enum StreamRequestOutcome {
    Accepted,
    RollbackRequired { rollback_seqno: u64 },
}

pub struct DcpProducer {
    core: ConnectionCore,
    streams: HashMap<u16, ActiveStream>,
    flow: Box<dyn FlowControlPolicy>,
    noop: NoopKeepalive,
    ready: VecDeque<DcpMessage>,
    /// Whether a `streamRequest` racing an in-progress initial disk snapshot
    /// should queue as `TempFail` (false) or be accepted immediately and
    /// backfill once the snapshot lands (true), mirroring `DcpConfig`'s
    /// `disk_backfill_queue` knob.
    disk_backfill_queue: bool,
}

impl DcpProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cookie: Cookie,
        name: String,
        open_flags: u32,
        connection_manager_interval: Duration,
        flow: Box<dyn FlowControlPolicy>,
        noop_idle_timeout: Duration,
        host: Box<dyn HostCallbacks>,
        disk_backfill_queue: bool,
    ) -> DcpProducer {
        DcpProducer {
            core: ConnectionCore::new(cookie, name, Role::Producer, open_flags, connection_manager_interval, host),
            streams: HashMap::new(),
            flow,
            noop: NoopKeepalive::new(connection_manager_interval, noop_idle_timeout),
            ready: VecDeque::new(),
            disk_backfill_queue,
        }
    }

    pub fn cookie(&self) -> Cookie {
        self.core.cookie
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.core.disconnect_requested
    }

    /// Whether the front-end thread has parked this connection pending a
    /// wakeup.
    pub fn is_paused(&self) -> bool {
        self.core.paused
    }

    /// Wakes the host's I/O-complete notifier for this connection, as
    /// `shutdownAllConnections`/`processPendingNotifications` do.
    pub fn wake(&self) {
        self.core.wake();
    }

    pub fn disconnect(&mut self) {
        self.core.mark_disconnect_requested();
    }

    /// Applies a control option. Unknown keys and invalid combinations
    /// (e.g. a noop interval that doesn't divide the connection-manager
    /// interval) fail with `InvalidArgument`.
    pub fn control(&mut self, key: &str, value: &str) -> DcpResult<()> {
        let option = ControlOption::parse(key, value)?;
        if let ControlOption::EnableNoop(enabled) = option {
            self.noop.set_enabled(enabled);
        }
        if let ControlOption::SetNoopInterval(interval) = option {
            self.noop.set_interval(interval);
        }
        if let ControlOption::ForceValueCompression(enabled) = option {
            for stream in self.streams.values_mut() {
                stream.set_force_value_compression(enabled);
            }
        }
        if let ControlOption::SupportsSnappy(supported) = option {
            for stream in self.streams.values_mut() {
                stream.set_consumer_supports_snappy(supported);
            }
        }
        self.core.control.apply(option, self.core.connection_manager_interval)
    }

    /// Resolves an incoming stream request against the failover table and,
    /// if accepted, opens an active stream for the vbucket.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_request(
        &mut self,
        engine: &Rc<dyn StorageEngine>,
        checkpoints: &Rc<dyn CheckpointSource>,
        backfill: &Rc<dyn BackfillSource>,
        failover: &FailoverTable,
        opaque: u32,
        vbucket: u16,
        start_seqno: u64,
        end_seqno: u64,
        claimed_vbucket_uuid: u64,
        snap_start_seqno: u64,
        snap_end_seqno: u64,
        open_flags: OpenFlags,
        takeover: bool,
    ) -> DcpResult<StreamRequestOutcome> {
        if !self.disk_backfill_queue && engine.is_receiving_initial_disk_snapshot(vbucket) {
            return Err(DcpError::TempFail);
        }

        if let Some(rollback_seqno) = failover.resolve(claimed_vbucket_uuid, start_seqno, snap_start_seqno, snap_end_seqno) {
            return Ok(StreamRequestOutcome::RollbackRequired { rollback_seqno });
        }

        let vbucket_uuid = engine.vbucket_uuid(vbucket);
        let mut stream = ActiveStream::new(vbucket, opaque, vbucket_uuid, end_seqno, takeover, open_flags);
        stream.set_force_value_compression(self.core.control.force_value_compression);
        stream.set_consumer_supports_snappy(self.core.control.consumer_supports_snappy);
        stream.begin(checkpoints, backfill, start_seqno);
        self.streams.insert(vbucket, stream);
        Ok(StreamRequestOutcome::Accepted)
    }

    /// Closes the active stream for a vbucket, emitting a `StreamEnd` if
    /// negotiated.
    pub fn close_stream(&mut self, vbucket: u16) -> DcpResult<()> {
        if self.core.control.send_stream_end_on_client_close_stream {
            if let Some(stream) = self.streams.get_mut(&vbucket) {
                stream.close(true, crate::wire::StreamEndStatus::Closed);
                return Ok(());
            }
            Err(DcpError::Failed(format!("no stream for vbucket {}", vbucket)))
        } else {
            self.streams
                .remove(&vbucket)
                .map(|_| ())
                .ok_or_else(|| DcpError::Failed(format!("no stream for vbucket {}", vbucket)))
        }
    }

    pub fn find_streams(&self, vbucket: u16) -> Option<&ActiveStream> {
        self.streams.get(&vbucket)
    }

    pub fn handle_buffer_ack(&mut self, bytes: u32) {
        self.flow.on_ack(bytes);
    }

    /// Pumps one round of production across every live stream, draining
    /// dead-and-sent streams, and returns the next message to write; empty
    /// production surfaces as `WouldBlock`.
    pub fn step(&mut self, checkpoints: &Rc<dyn CheckpointSource>) -> DcpResult<DcpMessage> {
        if self.core.disconnect_requested {
            return Err(DcpError::Disconnect("producer disconnect-requested".into()));
        }
        if let Some(msg) = self.ready.pop_front() {
            self.core.set_paused(false);
            return Ok(msg);
        }

        let mut finished = Vec::new();
        for (&vbucket, stream) in self.streams.iter_mut() {
            match stream.pump(checkpoints, &mut *self.flow, 32) {
                Ok(msgs) => {
                    self.ready.extend(msgs);
                    if stream.is_finished() {
                        finished.push(vbucket);
                    }
                    if !self.ready.is_empty() {
                        break;
                    }
                }
                Err(DcpError::WouldBlock) => continue,
                Err(e) => return Err(e),
            }
        }
        for vbucket in finished {
            self.streams.remove(&vbucket);
        }

        match self.ready.pop_front() {
            Some(msg) => {
                self.core.set_paused(false);
                Ok(msg)
            }
            None => {
                self.core.set_paused(true);
                Err(DcpError::WouldBlock)
            }
        }
    }

    /// Drives the noop keepalive for one tick.
    pub fn tick_noop(&mut self, now: Instant) -> DcpResult<()> {
        match self.noop.maybe_send(self.core.last_receive_time) {
            NoopOutcome::Idle => Ok(()),
            NoopOutcome::Send => {
                self.ready.push_back(DcpMessage::Noop { opaque: 0 });
                self.noop.record_sent(now);
                Ok(())
            }
            NoopOutcome::Disconnect => {
                self.core.mark_disconnect_requested();
                Err(DcpError::Disconnect("noop idle timeout exceeded".into()))
            }
        }
    }

    pub fn on_receive(&mut self) {
        self.core.touch();
        self.noop.on_receive();
    }

    pub fn on_noop_response(&mut self) {
        self.noop.on_noop_response();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NullHost;
    use crate::engine::{CheckpointItem, CursorHandle};
    use crate::flow_control::NoFlowControl;
    use crate::wire::Mutation;

    struct FakeEngine;
    impl StorageEngine for FakeEngine {
        fn max_size(&self) -> usize {
            1024
        }
        fn estimated_memory_usage(&self) -> usize {
            0
        }
        fn is_receiving_initial_disk_snapshot(&self, _vbucket: u16) -> bool {
            false
        }
        fn set_receiving_initial_disk_snapshot(&self, _vbucket: u16, _flag: bool) {}
        fn takeover_backed_up(&self, _vbucket: u16) -> bool {
            false
        }
        fn vbucket_uuid(&self, _vbucket: u16) -> u64 {
            99
        }
        fn apply_mutation(&self, _vbucket: u16, _item: &Mutation) -> DcpResult<()> {
            Ok(())
        }
        fn apply_deletion(&self, _vbucket: u16, _item: &Mutation) -> DcpResult<()> {
            Ok(())
        }
        fn apply_expiration(&self, _vbucket: u16, _item: &Mutation) -> DcpResult<()> {
            Ok(())
        }
        fn persisted_prepare_seqno(&self, _vbucket: u16) -> u64 {
            0
        }
    }

    struct FakeCheckpoints;
    impl CheckpointSource for FakeCheckpoints {
        fn oldest_in_memory_seqno(&self, _vbucket: u16) -> u64 {
            0
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

    fn new_producer() -> DcpProducer {
        DcpProducer::new(
            Cookie(1),
            "p1".into(),
            0,
            Duration::from_secs(2),
            Box::new(NoFlowControl),
            Duration::from_secs(60),
            Box::new(NullHost),
            false,
        )
    }

    /// A noop interval must divide the connection-manager interval.
    #[test]
    fn noop_interval_must_divide_manager_interval() {
        let mut producer = new_producer();
        let err = producer.control("set_noop_interval", "1").unwrap_err();
        assert!(matches!(err, DcpError::InvalidArgument(_)));
        producer.control("set_noop_interval", "2").unwrap();
    }

    /// Closing a stream with `send_stream_end_on_client_close_stream`
    /// enabled still emits a `StreamEnd`, and `find_streams` keeps
    /// returning it until it's sent.
    #[test]
    fn close_stream_emits_stream_end_when_negotiated() {
        let mut producer = new_producer();
        producer.control("send_stream_end_on_client_close_stream", "true").unwrap();

        let engine: Rc<dyn StorageEngine> = Rc::new(FakeEngine);
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints);
        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let failover = FailoverTable::new(99);

        producer
            .stream_request(
                &engine,
                &checkpoints,
                &backfill,
                &failover,
                0,
                0,
                0,
                u64::max_value(),
                0,
                0,
                0,
                OpenFlags(OpenFlags::PRODUCER | OpenFlags::INCLUDE_XATTRS),
                false,
            )
            .ok();
        producer.close_stream(0).unwrap();

        let msg = producer.step(&checkpoints).unwrap();
        assert!(matches!(msg, DcpMessage::StreamEnd { status: crate::wire::StreamEndStatus::Closed, .. }));
    }

    /// An inconsistent claimed vb-uuid rolls back.
    #[test]
    fn stream_request_rolls_back_on_unknown_uuid() {
        let mut producer = new_producer();
        let engine: Rc<dyn StorageEngine> = Rc::new(FakeEngine);
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints);
        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let failover = FailoverTable::new(99);

        let outcome = producer
            .stream_request(
                &engine,
                &checkpoints,
                &backfill,
                &failover,
                0,
                0,
                50,
                100,
                12345,
                10,
                60,
                OpenFlags(OpenFlags::PRODUCER),
                false,
            )
            .unwrap();
        assert!(matches!(outcome, StreamRequestOutcome::RollbackRequired { rollback_seqno: 0 }));
    }

    /// `streamRequest` against a vbucket mid initial-disk-snapshot queues as
    /// `TempFail` when `disk_backfill_queue` is disabled, but is accepted
    /// immediately when it's enabled.
    #[test]
    fn disk_backfill_queue_gates_stream_request_during_disk_snapshot() {
        struct SnapshottingEngine;
        impl StorageEngine for SnapshottingEngine {
            fn max_size(&self) -> usize {
                1024
            }
            fn estimated_memory_usage(&self) -> usize {
                0
            }
            fn is_receiving_initial_disk_snapshot(&self, _vbucket: u16) -> bool {
                true
            }
            fn set_receiving_initial_disk_snapshot(&self, _vbucket: u16, _flag: bool) {}
            fn takeover_backed_up(&self, _vbucket: u16) -> bool {
                false
            }
            fn vbucket_uuid(&self, _vbucket: u16) -> u64 {
                99
            }
            fn apply_mutation(&self, _vbucket: u16, _item: &Mutation) -> DcpResult<()> {
                Ok(())
            }
            fn apply_deletion(&self, _vbucket: u16, _item: &Mutation) -> DcpResult<()> {
                Ok(())
            }
            fn apply_expiration(&self, _vbucket: u16, _item: &Mutation) -> DcpResult<()> {
                Ok(())
            }
            fn persisted_prepare_seqno(&self, _vbucket: u16) -> u64 {
                0
            }
        }

        let engine: Rc<dyn StorageEngine> = Rc::new(SnapshottingEngine);
        let checkpoints: Rc<dyn CheckpointSource> = Rc::new(FakeCheckpoints);
        let backfill: Rc<dyn BackfillSource> = Rc::new(FakeBackfill);
        let failover = FailoverTable::new(99);

        let mut blocked = new_producer();
        let err = blocked
            .stream_request(
                &engine,
                &checkpoints,
                &backfill,
                &failover,
                0,
                0,
                0,
                u64::max_value(),
                99,
                0,
                0,
                OpenFlags(OpenFlags::PRODUCER),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, DcpError::TempFail));

        let mut queueing = DcpProducer::new(
            Cookie(2),
            "p2".into(),
            0,
            Duration::from_secs(2),
            Box::new(NoFlowControl),
            Duration::from_secs(60),
            Box::new(NullHost),
            true,
        );
        let outcome = queueing
            .stream_request(
                &engine,
                &checkpoints,
                &backfill,
                &failover,
                0,
                0,
                0,
                u64::max_value(),
                99,
                0,
                0,
                OpenFlags(OpenFlags::PRODUCER),
                false,
            )
            .unwrap();
        assert!(matches!(outcome, StreamRequestOutcome::Accepted));
    }
}
