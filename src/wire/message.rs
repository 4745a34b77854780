use super::flags::{SnapshotMarkerFlags, StreamEndStatus};
use std::fmt;

/// A durability requirement attached to a mutation. Kept deliberately thin:
/// the full durable-write protocol lives in the out-of-scope storage engine,
/// we only need enough to drive the seqno-ack path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurabilityRequirement {
    pub is_prepare: bool,
}

/// A mutation, deletion, or expiration payload.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub cas: u64,
    pub by_seqno: u64,
    pub rev_seqno: u64,
    pub datatype: u8,
    pub flags: u32,
    pub exptime: u32,
    pub lock_time: u32,
    pub meta: Vec<u8>,
    pub durability: Option<DurabilityRequirement>,
}

/// Fixed per-response overhead a `DcpConsumer` charges against a mutation
/// response: the 24-byte memcached response header plus the mutation DCP
/// extras (by-seqno, rev-seqno, flags, exptime, lock-time, nmeta, nru) for
/// the consumer's message-size accounting.
pub const MUTATION_BASE_MSG_BYTES: usize = 55;

/// As `MUTATION_BASE_MSG_BYTES`, for deletion responses: header plus the
/// smaller deletion DCP extras (by-seqno, rev-seqno, nmeta).
pub const DELETION_BASE_MSG_BYTES: usize = 42;

impl Mutation {
    pub const DATATYPE_JSON: u8 = 0x01;
    pub const DATATYPE_SNAPPY: u8 = 0x02;
    pub const DATATYPE_XATTR: u8 = 0x04;

    pub fn is_compressed(&self) -> bool {
        self.datatype & Self::DATATYPE_SNAPPY != 0
    }

    pub fn has_xattrs(&self) -> bool {
        self.datatype & Self::DATATYPE_XATTR != 0
    }

    pub fn is_prepare(&self) -> bool {
        self.durability.map(|d| d.is_prepare).unwrap_or(false)
    }
}

/// A contiguous seqno range delimited by a snapshot marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMarker {
    pub start_seqno: u64,
    pub end_seqno: u64,
    pub flags: SnapshotMarkerFlags,
}

impl SnapshotMarker {
    pub fn contains(&self, seqno: u64) -> bool {
        self.start_seqno <= seqno && seqno <= self.end_seqno
    }
}

/// A synchronous-replication seqno acknowledgement.
///
/// Both fields are logically 64-bit counters carried big-endian on the wire;
/// `MessageCodec::encode` performs the byte-order conversion, this type
/// holds them in host order so stream logic can compare/assert on the
/// `in_memory_seqno`/`on_disk_seqno` values directly, not raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqnoAck {
    pub vbucket: u16,
    pub in_memory_seqno: u64,
    pub on_disk_seqno: u64,
}

/// The set of messages that flow across a DCP connection in either
/// direction.
#[derive(Debug, Clone)]
pub enum DcpMessage {
    Open {
        opaque: u32,
        name: String,
        flags: u32,
    },
    AddStream {
        opaque: u32,
        vbucket: u16,
    },
    CloseStream {
        opaque: u32,
        vbucket: u16,
    },
    /// Legacy vbucket-flush notification. Real DCP deployments
    /// no longer issue it; kept only so the opcode round-trips.
    Flush {
        opaque: u32,
        vbucket: u16,
    },
    StreamReq {
        opaque: u32,
        vbucket: u16,
        flags: u32,
        start_seqno: u64,
        end_seqno: u64,
        vbucket_uuid: u64,
        snap_start_seqno: u64,
        snap_end_seqno: u64,
    },
    StreamEnd {
        opaque: u32,
        vbucket: u16,
        status: StreamEndStatus,
    },
    SnapshotMarker {
        opaque: u32,
        vbucket: u16,
        marker: SnapshotMarker,
    },
    Mutation {
        opaque: u32,
        vbucket: u16,
        item: Mutation,
    },
    Deletion {
        opaque: u32,
        vbucket: u16,
        item: Mutation,
    },
    Expiration {
        opaque: u32,
        vbucket: u16,
        item: Mutation,
    },
    SetVBucketState {
        opaque: u32,
        vbucket: u16,
        state: u8,
    },
    Noop {
        opaque: u32,
    },
    BufferAck {
        opaque: u32,
        bytes_acked: u32,
    },
    Control {
        opaque: u32,
        key: String,
        value: String,
    },
    SystemEvent {
        opaque: u32,
        vbucket: u16,
        event: u32,
        key: Vec<u8>,
    },
    GetErrorMap {
        opaque: u32,
        version: u16,
    },
    SeqnoAcknowledgement {
        opaque: u32,
        ack: SeqnoAck,
    },
}

impl DcpMessage {
    /// The approximate on-wire size of this message, used to account
    /// against flow-control budgets and ready-queue backpressure.
    pub fn wire_size(&self) -> usize {
        const HEADER: usize = 24; // memcached request header, out of scope but sized for accounting
        match *self {
            DcpMessage::Mutation { ref item, .. } | DcpMessage::Deletion { ref item, .. } |
            DcpMessage::Expiration { ref item, .. } => {
                HEADER + item.key.len() + item.value.len() + item.meta.len()
            }
            DcpMessage::SnapshotMarker { .. } => HEADER + 20,
            DcpMessage::StreamEnd { .. } => HEADER + 4,
            DcpMessage::SeqnoAcknowledgement { .. } => HEADER + 16,
            DcpMessage::SystemEvent { ref key, .. } => HEADER + key.len() + 8,
            _ => HEADER,
        }
    }

    pub fn opaque(&self) -> u32 {
        match *self {
            DcpMessage::Open { opaque, .. }
            | DcpMessage::AddStream { opaque, .. }
            | DcpMessage::CloseStream { opaque, .. }
            | DcpMessage::Flush { opaque, .. }
            | DcpMessage::StreamReq { opaque, .. }
            | DcpMessage::StreamEnd { opaque, .. }
            | DcpMessage::SnapshotMarker { opaque, .. }
            | DcpMessage::Mutation { opaque, .. }
            | DcpMessage::Deletion { opaque, .. }
            | DcpMessage::Expiration { opaque, .. }
            | DcpMessage::SetVBucketState { opaque, .. }
            | DcpMessage::Noop { opaque }
            | DcpMessage::BufferAck { opaque, .. }
            | DcpMessage::Control { opaque, .. }
            | DcpMessage::SystemEvent { opaque, .. }
            | DcpMessage::GetErrorMap { opaque, .. }
            | DcpMessage::SeqnoAcknowledgement { opaque, .. } => opaque,
        }
    }
}

impl fmt::Display for DcpMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DcpMessage::Open { ref name, .. } => write!(f, "Open({})", name),
            DcpMessage::StreamReq { vbucket, .. } => write!(f, "StreamReq(vb={})", vbucket),
            DcpMessage::SnapshotMarker { vbucket, marker, .. } => {
                write!(
                    f,
                    "SnapshotMarker(vb={}, [{}, {}])",
                    vbucket, marker.start_seqno, marker.end_seqno
                )
            }
            DcpMessage::Mutation { vbucket, ref item, .. } => {
                write!(f, "Mutation(vb={}, seqno={})", vbucket, item.by_seqno)
            }
            DcpMessage::Deletion { vbucket, ref item, .. } => {
                write!(f, "Deletion(vb={}, seqno={})", vbucket, item.by_seqno)
            }
            DcpMessage::Expiration { vbucket, ref item, .. } => {
                write!(f, "Expiration(vb={}, seqno={})", vbucket, item.by_seqno)
            }
            DcpMessage::StreamEnd { vbucket, status, .. } => {
                write!(f, "StreamEnd(vb={}, status={:?})", vbucket, status)
            }
            DcpMessage::SeqnoAcknowledgement { ref ack, .. } => {
                write!(
                    f,
                    "SeqnoAck(vb={}, mem={}, disk={})",
                    ack.vbucket, ack.in_memory_seqno, ack.on_disk_seqno
                )
            }
            ref other => write!(f, "{:?}", other),
        }
    }
}
