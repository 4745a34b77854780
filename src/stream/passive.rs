//! The consumer-side half of a single vbucket's replication stream: applies
//! inbound mutations to the local storage engine and tracks what's owed back
//! to the producer (buffer acks, sync-replication seqno acks).

use crate::engine::StorageEngine;
use crate::error::{DcpError, DcpResult};
use crate::wire::{DcpMessage, Mutation, SeqnoAck, SnapshotMarker, DELETION_BASE_MSG_BYTES, MUTATION_BASE_MSG_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveStreamState {
    Pending,
    AwaitingFirstSnapshot,
    Reading,
    Dead,
}

/// A response the stream owes the producer after ingesting a message: a
/// flow-control ack once enough bytes have been consumed, or a
/// synchronous-replication seqno ack once a prepare has been durably
/// applied.
#[derive(Debug, Clone, PartialEq)]
pub enum PassiveResponse {
    BufferAck(u32),
    SeqnoAck(SeqnoAck),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Mutation,
    Deletion,
    Expiration,
}

pub struct PassiveStream {
    vbucket: u16,
    opaque: u32,
    ack_window: usize,
    sync_replication_enabled: bool,
    state: PassiveStreamState,
    current_snapshot: Option<SnapshotMarker>,
    last_seqno: u64,
    bytes_since_ack: usize,
    /// Exact size of the most recently accepted response, matching the
    /// real engine's `responseMessageSize`.
    last_response_size: usize,
    /// Highest on-disk seqno already acked, so persistence sweeps that
    /// haven't advanced don't re-emit an ack.
    last_on_disk_acked: u64,
}

impl PassiveStream {
    pub fn new(vbucket: u16, opaque: u32, ack_window: usize, sync_replication_enabled: bool) -> PassiveStream {
        PassiveStream {
            vbucket,
            opaque,
            ack_window,
            sync_replication_enabled,
            state: PassiveStreamState::Pending,
            current_snapshot: None,
            last_seqno: 0,
            bytes_since_ack: 0,
            last_response_size: 0,
            last_on_disk_acked: 0,
        }
    }

    pub fn state(&self) -> PassiveStreamState {
        self.state
    }

    pub fn vbucket(&self) -> u16 {
        self.vbucket
    }

    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    pub fn is_dead(&self) -> bool {
        self.state == PassiveStreamState::Dead
    }

    /// Size of the most recently ingested mutation/deletion/expiration
    /// response, in the engine's own accounting.
    pub fn response_message_size(&self) -> usize {
        self.last_response_size
    }

    /// Called once the producer accepts the stream request; the stream is
    /// now waiting on the first snapshot marker before any item is valid.
    pub fn accept(&mut self) {
        self.state = PassiveStreamState::AwaitingFirstSnapshot;
    }

    fn record_item(&mut self, seqno: u64, size: usize) -> DcpResult<Option<PassiveResponse>> {
        let snapshot = self
            .current_snapshot
            .ok_or_else(|| DcpError::InvalidArgument("item received before a snapshot marker".into()))?;

        if !snapshot.contains(seqno) {
            return Err(DcpError::InvalidArgument(format!(
                "seqno {} outside current snapshot [{}, {}]",
                seqno, snapshot.start_seqno, snapshot.end_seqno
            )));
        }
        if seqno <= self.last_seqno && self.last_seqno != 0 {
            return Err(DcpError::InvalidArgument(format!(
                "seqno {} is not monotonic after {}",
                seqno, self.last_seqno
            )));
        }

        self.last_seqno = seqno;
        self.bytes_since_ack += size;

        if self.bytes_since_ack >= self.ack_window {
            let owed = self.bytes_since_ack as u32;
            self.bytes_since_ack = 0;
            Ok(Some(PassiveResponse::BufferAck(owed)))
        } else {
            Ok(None)
        }
    }

    /// Applies one inbound DCP message to `engine`, returning whatever
    /// response (if any) is now owed back to the producer.
    pub fn ingest(&mut self, engine: &dyn StorageEngine, msg: &DcpMessage) -> DcpResult<Option<PassiveResponse>> {
        if self.state == PassiveStreamState::Dead {
            return Err(DcpError::Disconnect("stream already closed".into()));
        }

        match msg {
            DcpMessage::SnapshotMarker { marker, .. } => {
                self.current_snapshot = Some(*marker);
                if self.state == PassiveStreamState::AwaitingFirstSnapshot {
                    self.state = PassiveStreamState::Reading;
                }
                Ok(None)
            }
            DcpMessage::Mutation { item, .. } => {
                engine.apply_mutation(self.vbucket, item)?;
                self.after_apply(ItemKind::Mutation, item)
            }
            DcpMessage::Deletion { item, .. } => {
                engine.apply_deletion(self.vbucket, item)?;
                self.after_apply(ItemKind::Deletion, item)
            }
            DcpMessage::Expiration { item, .. } => {
                engine.apply_expiration(self.vbucket, item)?;
                self.after_apply(ItemKind::Expiration, item)
            }
            DcpMessage::SetVBucketState { .. } => Ok(None),
            DcpMessage::StreamEnd { .. } => {
                self.state = PassiveStreamState::Dead;
                Ok(None)
            }
            other => Err(DcpError::InvalidArgument(format!("unexpected message on passive stream: {}", other))),
        }
    }

    fn after_apply(&mut self, kind: ItemKind, item: &Mutation) -> DcpResult<Option<PassiveResponse>> {
        let (base, with_value) = match kind {
            ItemKind::Mutation => (MUTATION_BASE_MSG_BYTES, true),
            ItemKind::Deletion | ItemKind::Expiration => (DELETION_BASE_MSG_BYTES, false),
        };
        self.last_response_size =
            base + item.key.len() + item.meta.len() + if with_value { item.value.len() } else { 0 };

        let size = item.key.len() + item.value.len() + item.meta.len();
        let response = self.record_item(item.by_seqno, size)?;

        if self.sync_replication_enabled && item.is_prepare() {
            // In-memory ack fires immediately on receipt, carrying
            // onDisk = 0; the on-disk half is acked separately once the
            // engine actually persists it (see `on_persisted`).
            return Ok(Some(PassiveResponse::SeqnoAck(SeqnoAck {
                vbucket: self.vbucket,
                in_memory_seqno: self.last_seqno,
                on_disk_seqno: 0,
            })));
        }
        Ok(response)
    }

    /// Drives the on-disk half of the sync-replication ack path: on
    /// persistence of a flush batch up to seqno P, emits an ack with
    /// `in_memory_seqno = P, on_disk_seqno = P`. Called whenever the owning
    /// consumer observes the storage engine's `persisted_prepare_seqno`
    /// advance for this vbucket; returns `None` if nothing new has been
    /// persisted.
    pub fn on_persisted(&mut self, persisted_prepare_seqno: u64) -> Option<SeqnoAck> {
        if !self.sync_replication_enabled || persisted_prepare_seqno <= self.last_on_disk_acked {
            return None;
        }
        self.last_on_disk_acked = persisted_prepare_seqno;
        Some(SeqnoAck {
            vbucket: self.vbucket,
            in_memory_seqno: persisted_prepare_seqno,
            on_disk_seqno: persisted_prepare_seqno,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::SnapshotMarkerFlags;

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
            1
        }
        fn apply_mutation(&self, _vbucket: u16, _item: &Mutation) -> Result<(), DcpError> {
            Ok(())
        }
        fn apply_deletion(&self, _vbucket: u16, _item: &Mutation) -> Result<(), DcpError> {
            Ok(())
        }
        fn apply_expiration(&self, _vbucket: u16, _item: &Mutation) -> Result<(), DcpError> {
            Ok(())
        }
        fn persisted_prepare_seqno(&self, _vbucket: u16) -> u64 {
            0
        }
    }

    fn mutation(seqno: u64) -> Mutation {
        Mutation {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            cas: 0,
            by_seqno: seqno,
            rev_seqno: seqno,
            datatype: 0,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: vec![],
            durability: None,
        }
    }

    fn marker(start: u64, end: u64) -> DcpMessage {
        DcpMessage::SnapshotMarker {
            opaque: 1,
            vbucket: 0,
            marker: SnapshotMarker { start_seqno: start, end_seqno: end, flags: SnapshotMarkerFlags(SnapshotMarkerFlags::MEMORY) },
        }
    }

    #[test]
    fn rejects_item_before_any_snapshot_marker() {
        let engine = FakeEngine;
        let mut stream = PassiveStream::new(0, 1, 1024, false);
        stream.accept();
        let err = stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item: mutation(5) })
            .unwrap_err();
        assert!(matches!(err, DcpError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_seqno_outside_snapshot_range() {
        let engine = FakeEngine;
        let mut stream = PassiveStream::new(0, 1, 1024, false);
        stream.accept();
        stream.ingest(&engine, &marker(1, 10)).unwrap();
        let err = stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item: mutation(50) })
            .unwrap_err();
        assert!(matches!(err, DcpError::InvalidArgument(_)));
    }

    #[test]
    fn buffer_ack_fires_once_window_is_crossed() {
        let engine = FakeEngine;
        let mut stream = PassiveStream::new(0, 1, 4, false);
        stream.accept();
        stream.ingest(&engine, &marker(1, 10)).unwrap();
        let resp = stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item: mutation(1) })
            .unwrap();
        assert!(matches!(resp, Some(PassiveResponse::BufferAck(_))));
    }

    /// A deletion response has exact size
    /// `deletion_base_msg_bytes + key.size + ext_meta.size`.
    #[test]
    fn deletion_response_size_is_exact() {
        let engine = FakeEngine;
        let mut stream = PassiveStream::new(0, 1, 1 << 20, false);
        stream.accept();
        stream.ingest(&engine, &marker(1, 10)).unwrap();
        let item = Mutation {
            key: b"key".to_vec(),
            value: vec![],
            cas: 0,
            by_seqno: 1,
            rev_seqno: 1,
            datatype: 0,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: vec![Mutation::DATATYPE_JSON],
            durability: None,
        };
        stream
            .ingest(&engine, &DcpMessage::Deletion { opaque: 1, vbucket: 0, item })
            .unwrap();
        assert_eq!(stream.response_message_size(), DELETION_BASE_MSG_BYTES + 3 + 1);
    }

    #[test]
    fn mutation_response_size_is_exact() {
        let engine = FakeEngine;
        let mut stream = PassiveStream::new(0, 1, 1 << 20, false);
        stream.accept();
        stream.ingest(&engine, &marker(1, 10)).unwrap();
        let item = Mutation {
            key: b"key".to_vec(),
            value: b"0123456789".to_vec(),
            cas: 0,
            by_seqno: 1,
            rev_seqno: 1,
            datatype: 0,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: vec![Mutation::DATATYPE_JSON],
            durability: None,
        };
        stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item })
            .unwrap();
        assert_eq!(stream.response_message_size(), MUTATION_BASE_MSG_BYTES + 3 + 10 + 1);
    }

    /// Prepare receipt acks in_memory=prepare_seqno, on_disk=0 immediately;
    /// persistence later acks the on-disk half separately.
    #[test]
    fn prepare_acks_in_memory_immediately_then_on_disk_on_persistence() {
        let engine = FakeEngine;
        let mut stream = PassiveStream::new(0, 1, 1 << 20, true);
        stream.accept();
        stream.ingest(&engine, &marker(1, 3)).unwrap();

        // A plain mutation with no durability requirement: no ack.
        let resp = stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item: mutation(1) })
            .unwrap();
        assert_eq!(resp, None);

        let mut prepare = mutation(2);
        prepare.durability = Some(crate::wire::message::DurabilityRequirement { is_prepare: true });
        let resp = stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item: prepare })
            .unwrap();
        match resp {
            Some(PassiveResponse::SeqnoAck(ack)) => {
                assert_eq!(ack.in_memory_seqno, 2);
                assert_eq!(ack.on_disk_seqno, 0);
            }
            other => panic!("expected seqno ack, got {:?}", other),
        }

        // A following normal mutation in the same snapshot: no extra ack.
        let resp = stream
            .ingest(&engine, &DcpMessage::Mutation { opaque: 1, vbucket: 0, item: mutation(3) })
            .unwrap();
        assert_eq!(resp, None);

        // Persistence catches up to the prepare: on-disk ack fires once.
        assert_eq!(
            stream.on_persisted(2),
            Some(SeqnoAck { vbucket: 0, in_memory_seqno: 2, on_disk_seqno: 2 })
        );
        assert_eq!(stream.on_persisted(2), None);
    }
}
