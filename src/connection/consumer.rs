//! A consumer connection: owns one `PassiveStream` per vbucket it has
//! accepted a stream request on, plus the buffered-processor discipline of
//! and the `GetErrorMap` handshake of.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::config::EphemeralFullPolicy;
use crate::connection::{ConnectionCore, Cookie, HostCallbacks, Role};
use crate::connection::control::ControlOption;
use crate::engine::{CheckpointSource, StorageEngine};
use crate::error::{DcpError, DcpResult};
use crate::stream::{PassiveResponse, PassiveStream};
use crate::wire::DcpMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorMapState {
    PendingRequest,
    PendingResponse,
    Skip,
}

/// Outcome of draining one round of the per-vbucket buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing was buffered.
    Nothing,
    /// Memory is still overcommitted; nothing could be applied this round.
    CannotProcess,
    /// At least one item applied, but buffered items for some vbucket
    /// remain.
    MoreToProcess,
    /// Every buffered item has been applied.
    Drained,
}

pub struct DcpConsumer {
    core: ConnectionCore,
    streams: HashMap<u16, PassiveStream>,
    /// Messages held back per vbucket: while any message for vbucket V is
    /// buffered, every subsequent message for V is buffered too, in arrival
    /// order, never applied ahead of what's already waiting.
    buffered: HashMap<u16, VecDeque<DcpMessage>>,
    buffered_items: u64,
    ready: VecDeque<DcpMessage>,
    error_map_state: ErrorMapState,
    producer_is_v5_or_higher: bool,
    ephemeral_full_policy: EphemeralFullPolicy,
    /// Percentage of `StorageEngine::max_size()` at which inbound
    /// replication is throttled (`DcpConfig::replication_throttle_threshold`).
    replication_throttle_threshold: u8,
    next_opaque: u32,
}

impl DcpConsumer {
    pub fn new(
        cookie: Cookie,
        name: String,
        connection_manager_interval: Duration,
        ephemeral_full_policy: EphemeralFullPolicy,
        replication_throttle_threshold: u8,
        host: Box<dyn HostCallbacks>,
    ) -> DcpConsumer {
        DcpConsumer {
            core: ConnectionCore::new(cookie, name, Role::Consumer, 0, connection_manager_interval, host),
            streams: HashMap::new(),
            buffered: HashMap::new(),
            buffered_items: 0,
            ready: VecDeque::new(),
            error_map_state: ErrorMapState::PendingRequest,
            producer_is_v5_or_higher: false,
            ephemeral_full_policy,
            replication_throttle_threshold,
            next_opaque: 1,
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

    pub fn buffered_items(&self) -> u64 {
        self.buffered_items
    }

    pub fn producer_is_v5_or_higher(&self) -> bool {
        self.producer_is_v5_or_higher
    }

    pub fn disconnect(&mut self) {
        self.core.mark_disconnect_requested();
        for stream in self.streams.values_mut() {
            let _ = stream.ingest(&NullEngineProbe, &DcpMessage::StreamEnd {
                opaque: stream.opaque(),
                vbucket: stream.vbucket(),
                status: crate::wire::StreamEndStatus::Disconnected,
            });
        }
    }

    pub fn control(&mut self, key: &str, value: &str) -> DcpResult<()> {
        let option = ControlOption::parse(key, value)?;
        self.core.control.apply(option, self.core.connection_manager_interval)
    }

    /// Creates a passive stream, replacing a prior one for the same vbucket
    /// if it is dead.
    pub fn add_stream(&mut self, vbucket: u16, opaque: u32, ack_window: usize) -> DcpResult<()> {
        if let Some(existing) = self.streams.get(&vbucket) {
            if !existing.is_dead() {
                return Err(DcpError::Failed(format!("stream already active for vbucket {}", vbucket)));
            }
        }
        let mut stream = PassiveStream::new(vbucket, opaque, ack_window, self.core.control.sync_replication_enabled);
        stream.accept();
        self.streams.insert(vbucket, stream);
        self.buffered.remove(&vbucket);
        Ok(())
    }

    fn vbucket_of(msg: &DcpMessage) -> Option<u16> {
        match *msg {
            DcpMessage::SnapshotMarker { vbucket, .. }
            | DcpMessage::Mutation { vbucket, .. }
            | DcpMessage::Deletion { vbucket, .. }
            | DcpMessage::Expiration { vbucket, .. }
            | DcpMessage::SetVBucketState { vbucket, .. }
            | DcpMessage::StreamEnd { vbucket, .. } => Some(vbucket),
            _ => None,
        }
    }

    fn is_item_message(msg: &DcpMessage) -> bool {
        matches!(msg, DcpMessage::Mutation { .. } | DcpMessage::Deletion { .. } | DcpMessage::Expiration { .. })
    }

    /// Whether ingesting a new item for `vbucket` right now would exceed
    /// the replication-throttle budget or run into the vbucket-level
    /// takeover-backed-up refuse-new-ingest flag.
    fn would_cross_throttle_threshold(&self, engine: &dyn StorageEngine, vbucket: u16) -> bool {
        let threshold = engine.max_size() * self.replication_throttle_threshold as usize / 100;
        engine.estimated_memory_usage() > threshold || engine.takeover_backed_up(vbucket)
    }

    /// Ingests one inbound DCP message, applying the buffered-processor
    /// discipline: while anything for a vbucket is buffered, every new
    /// message for it is buffered too.
    pub fn ingest(
        &mut self,
        engine: &dyn StorageEngine,
        checkpoints: &Rc<dyn CheckpointSource>,
        msg: DcpMessage,
    ) -> DcpResult<()> {
        if self.core.disconnect_requested {
            return Err(DcpError::Disconnect("consumer already disconnect-requested".into()));
        }
        self.core.touch();

        let vbucket = match Self::vbucket_of(&msg) {
            Some(v) => v,
            None => return self.apply_now(engine, checkpoints, msg).map(|_| ()),
        };

        if Self::is_item_message(&msg) {
            let already_buffered = self.buffered.get(&vbucket).map(|q| !q.is_empty()).unwrap_or(false);
            if already_buffered {
                self.buffer(vbucket, msg);
                return Err(DcpError::TempFail);
            }

            if self.would_cross_throttle_threshold(engine, vbucket) {
                if self.ephemeral_full_policy == EphemeralFullPolicy::FailNewData {
                    self.core.mark_disconnect_requested();
                    return Err(DcpError::Disconnect("ephemeral fail_new_data threshold exceeded".into()));
                }
                self.buffer(vbucket, msg);
                return Err(DcpError::TempFail);
            }
        }

        self.apply_now(engine, checkpoints, msg).map(|_| ())
    }

    fn buffer(&mut self, vbucket: u16, msg: DcpMessage) {
        self.buffered.entry(vbucket).or_insert_with(VecDeque::new).push_back(msg);
        self.buffered_items += 1;
    }

    /// Applies a message immediately, bypassing the buffer. A disk-phase
    /// snapshot marker resets the vbucket's open-checkpoint id to zero; a
    /// memory-phase marker opens a fresh checkpoint, matching how a replica
    /// checkpoint manager tracks the disk-to-memory handoff of the initial
    /// backfill.
    fn apply_now(
        &mut self,
        engine: &dyn StorageEngine,
        checkpoints: &Rc<dyn CheckpointSource>,
        msg: DcpMessage,
    ) -> DcpResult<Option<PassiveResponse>> {
        let vbucket = match Self::vbucket_of(&msg) {
            Some(v) => v,
            None => return Ok(None),
        };
        if let DcpMessage::SnapshotMarker { marker, .. } = &msg {
            if marker.flags.is_disk() {
                engine.set_receiving_initial_disk_snapshot(vbucket, true);
                checkpoints.set_open_checkpoint_id(vbucket, 0);
            } else {
                engine.set_receiving_initial_disk_snapshot(vbucket, false);
                checkpoints.create_checkpoint(vbucket);
            }
        }
        let stream = self
            .streams
            .get_mut(&vbucket)
            .ok_or_else(|| DcpError::InvalidArgument(format!("no passive stream for vbucket {}", vbucket)))?;
        let response = stream.ingest(engine, &msg)?;
        if let Some(ref r) = response {
            self.ready.push_back(response_to_message(stream.opaque(), vbucket, r));
        }
        Ok(response)
    }

    /// Drains one round of every vbucket's buffer in arrival order, honoring
    /// the invariant that nothing for V applies ahead of V's own backlog.
    pub fn process_buffered_items(
        &mut self,
        engine: &dyn StorageEngine,
        checkpoints: &Rc<dyn CheckpointSource>,
    ) -> ProcessOutcome {
        if self.buffered.values().all(|q| q.is_empty()) {
            return ProcessOutcome::Nothing;
        }

        let vbuckets: Vec<u16> = self.buffered.keys().cloned().collect();
        let mut applied_any = false;

        for vbucket in vbuckets {
            if self.would_cross_throttle_threshold(engine, vbucket) {
                continue;
            }
            while let Some(msg) = self.buffered.get_mut(&vbucket).and_then(|q| q.pop_front()) {
                match self.apply_now(engine, checkpoints, msg) {
                    Ok(_) => {
                        applied_any = true;
                        self.buffered_items -= 1;
                    }
                    Err(_) => break,
                }
                if self.would_cross_throttle_threshold(engine, vbucket) {
                    break;
                }
            }
        }

        self.buffered.retain(|_, q| !q.is_empty());

        if !self.buffered.is_empty() {
            if applied_any {
                ProcessOutcome::MoreToProcess
            } else {
                ProcessOutcome::CannotProcess
            }
        } else {
            ProcessOutcome::Drained
        }
    }

    /// Compares the storage engine's persisted-prepare-seqno watermark
    /// against what each stream has already acked and enqueues any new
    /// on-disk seqno-acks.
    pub fn poll_persistence(&mut self, engine: &dyn StorageEngine) {
        for stream in self.streams.values_mut() {
            let persisted = engine.persisted_prepare_seqno(stream.vbucket());
            if let Some(ack) = stream.on_persisted(persisted) {
                self.ready.push_back(DcpMessage::SeqnoAcknowledgement { opaque: stream.opaque(), ack });
            }
        }
    }

    /// Drives the `GetErrorMap` handshake and drains the ready queue; an
    /// empty queue surfaces as `WouldBlock` and parks the connection.
    pub fn step(&mut self) -> DcpResult<DcpMessage> {
        if self.core.disconnect_requested {
            return Err(DcpError::Disconnect("consumer disconnect-requested".into()));
        }
        if self.error_map_state == ErrorMapState::PendingRequest && self.core.control.noop_enabled {
            self.error_map_state = ErrorMapState::PendingResponse;
            let opaque = self.next_opaque;
            self.next_opaque += 1;
            self.core.set_paused(false);
            return Ok(DcpMessage::GetErrorMap { opaque, version: 2 });
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

    /// Handles the producer's response to our `GetErrorMap` request: success
    /// sets `producerIsVersion5orHigher`, unknown-command clears it.
    pub fn handle_get_error_map_response(&mut self, success: bool) {
        self.producer_is_v5_or_higher = success;
        self.error_map_state = ErrorMapState::Skip;
    }
}

/// A `StorageEngine` used only to drive `StreamEnd` bookkeeping during
/// `disconnect()`, where no real engine call should occur.
struct NullEngineProbe;
impl StorageEngine for NullEngineProbe {
    fn max_size(&self) -> usize {
        0
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
        0
    }
    fn apply_mutation(&self, _vbucket: u16, _item: &crate::wire::Mutation) -> DcpResult<()> {
        Ok(())
    }
    fn apply_deletion(&self, _vbucket: u16, _item: &crate::wire::Mutation) -> DcpResult<()> {
        Ok(())
    }
    fn apply_expiration(&self, _vbucket: u16, _item: &crate::wire::Mutation) -> DcpResult<()> {
        Ok(())
    }
    fn persisted_prepare_seqno(&self, _vbucket: u16) -> u64 {
        0
    }
}

fn response_to_message(opaque: u32, _vbucket: u16, response: &PassiveResponse) -> DcpMessage {
    match *response {
        PassiveResponse::BufferAck(bytes) => DcpMessage::BufferAck { opaque, bytes_acked: bytes },
        PassiveResponse::SeqnoAck(ack) => DcpMessage::SeqnoAcknowledgement { opaque, ack },
    }
}
