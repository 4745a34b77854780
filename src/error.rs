//! The error vocabulary shared by every DCP connection, stream, and codec.
//!
//! This mirrors the outcomes a real DCP engine reports back to its caller
//! (`ENGINE_ERROR_CODE` in the upstream memcached ABI): most of these are not
//! "crashes", they're normal control-flow signals that the connection's
//! front-end thread inspects to decide whether to reschedule, buffer, or tear
//! the connection down.

use std::error;
use std::fmt;
use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DcpError {
    /// No work is available right now; the caller should park the connection
    /// until it is notified again.
    WouldBlock,
    /// A generic, non-protocol failure.
    Failed(String),
    /// A control key, flag combination, or frame was malformed.
    InvalidArgument(String),
    /// A transient condition (usually memory pressure); the caller should
    /// retry the same input later rather than give up on it.
    TempFail,
    /// The message could not be written because it exceeds the transport's
    /// maximum frame size.
    TooBig,
    /// The connection must be torn down.
    Disconnect(String),
    /// Not an error from the stream's perspective: the caller's claimed
    /// history doesn't match ours and it must restart from `rollback_seqno`.
    RollbackRequired { rollback_seqno: u64 },
    /// The requested behavior isn't implemented by this engine build.
    NotSupported(String),
}

pub type DcpResult<T> = Result<T, DcpError>;

impl fmt::Display for DcpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DcpError::WouldBlock => write!(f, "would block"),
            DcpError::Failed(ref m) => write!(f, "failed: {}", m),
            DcpError::InvalidArgument(ref m) => write!(f, "invalid argument: {}", m),
            DcpError::TempFail => write!(f, "temporary failure"),
            DcpError::TooBig => write!(f, "message too big"),
            DcpError::Disconnect(ref m) => write!(f, "disconnect: {}", m),
            DcpError::RollbackRequired { rollback_seqno } => {
                write!(f, "rollback required to seqno {}", rollback_seqno)
            }
            DcpError::NotSupported(ref m) => write!(f, "not supported: {}", m),
        }
    }
}

impl error::Error for DcpError {
    fn description(&self) -> &str {
        match *self {
            DcpError::WouldBlock => "would block",
            DcpError::Failed(_) => "failed",
            DcpError::InvalidArgument(_) => "invalid argument",
            DcpError::TempFail => "temporary failure",
            DcpError::TooBig => "message too big",
            DcpError::Disconnect(_) => "disconnect",
            DcpError::RollbackRequired { .. } => "rollback required",
            DcpError::NotSupported(_) => "not supported",
        }
    }
}

/// Most of the byte-level codec and socket plumbing still speaks `io::Error`
/// (as `connection::socket::Socket` does); fold it into our vocabulary at
/// the boundary rather than leaking `io::Error` into stream state machines.
impl From<io::Error> for DcpError {
    fn from(e: io::Error) -> DcpError {
        match e.kind() {
            io::ErrorKind::WouldBlock => DcpError::WouldBlock,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => DcpError::Disconnect(e.to_string()),
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                DcpError::InvalidArgument(e.to_string())
            }
            _ => DcpError::Failed(e.to_string()),
        }
    }
}

impl DcpError {
    pub fn is_would_block(&self) -> bool {
        *self == DcpError::WouldBlock
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(*self, DcpError::Disconnect(_))
    }
}
