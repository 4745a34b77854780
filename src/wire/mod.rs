//! Wire framing for DCP messages.
//!
//! DCP packets ride atop the binary memcached protocol; this module models
//! the DCP-specific payload only — the outer memcached request/response
//! header is the out-of-scope binary memcached framing layer. `Opcode`/
//! `flags` describe the fields a DCP peer cares about; `MessageCodec` turns
//! bytes into `DcpMessage`s and back, applying compression negotiation and
//! XATTR pruning along the way.

pub mod codec;
pub mod flags;
pub mod message;
pub mod opcode;

pub use self::codec::{MessageCodec, XattrPolicy};
pub use self::flags::{OpenFlags, SnapshotMarkerFlags, StreamEndStatus};
pub use self::message::{DcpMessage, Mutation, SeqnoAck, SnapshotMarker};
pub use self::opcode::Opcode;
