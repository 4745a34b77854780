//! Trait boundaries for the out-of-scope storage engine collaborators:
//! `KVBucket`, `VBucket`, `CheckpointManager`, the persistence flusher.
//!
//! The DCP subsystem never owns a real storage engine — it is handed one
//! through these capability traits at connection-construction time, rather
//! than reaching for a process-wide mutable pointer to the host API.
//! Production wires a real `KVBucket` adapter behind these traits; tests wire
//! the in-memory `tests::mocks::mock_engine` implementation.

use crate::error::DcpError;
use crate::wire::Mutation;

/// One item yielded by a `CheckpointCursor` traversal.
#[derive(Debug, Clone)]
pub enum CheckpointItem {
    Mutation(Mutation),
    Deletion(Mutation),
    Expiration(Mutation),
    /// A checkpoint boundary control meta-item; carries the checkpoint id.
    CheckpointStart(u64),
    CheckpointEnd(u64),
}

impl CheckpointItem {
    pub fn by_seqno(&self) -> Option<u64> {
        match *self {
            CheckpointItem::Mutation(ref m)
            | CheckpointItem::Deletion(ref m)
            | CheckpointItem::Expiration(ref m) => Some(m.by_seqno),
            CheckpointItem::CheckpointStart(_) | CheckpointItem::CheckpointEnd(_) => None,
        }
    }
}

/// Opaque handle identifying a registered cursor within the checkpoint
/// manager; returned by `register_cursor`, consumed by `unregister_cursor`
/// and `next_items`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(pub u64);

/// The checkpoint-manager boundary consulted by `CheckpointCursor`.
pub trait CheckpointSource {
    /// The lowest by-seqno still held in memory for `vbucket`; below this,
    /// history must come from a backfill.
    fn oldest_in_memory_seqno(&self, vbucket: u16) -> u64;

    /// Registers a new named cursor at `start_seqno` and returns a handle
    /// used to drain it. Mirrors registering into the vbucket's checkpoint
    /// manager.
    fn register_cursor(&self, vbucket: u16, name: &str, start_seqno: u64) -> CursorHandle;

    /// Deregisters a cursor, allowing the storage engine to reclaim
    /// checkpoints no cursor still references.
    fn unregister_cursor(&self, vbucket: u16, cursor: CursorHandle);

    /// Drains up to `max_items` ordered items (and any checkpoint
    /// start/end control items) from `cursor`, advancing its position.
    fn next_items(&self, vbucket: u16, cursor: CursorHandle, max_items: usize) -> Vec<CheckpointItem>;

    /// The vbucket's currently open checkpoint id.
    fn open_checkpoint_id(&self, vbucket: u16) -> u64;

    /// Forces `vbucket`'s open-checkpoint id to a specific value, used by
    /// the disk-phase-marker rule for replica checkpoints.
    fn set_open_checkpoint_id(&self, vbucket: u16, id: u64);

    /// Opens a new checkpoint for `vbucket`, returning its id.
    fn create_checkpoint(&self, vbucket: u16) -> u64;
}

/// The backfill boundary consulted by `BackfillManager`.
pub trait BackfillSource {
    /// Reads persisted items for `vbucket` in the inclusive range
    /// `[start_seqno, end_seqno]`, in seqno order.
    fn scan(&self, vbucket: u16, start_seqno: u64, end_seqno: u64) -> Vec<Mutation>;
}

/// The live-storage boundary consulted by producer `streamRequest`
/// resolution and by `PassiveStream` message ingestion.
pub trait StorageEngine {
    /// The configured byte budget against which replication throttling is
    /// evaluated.
    fn max_size(&self) -> usize;

    /// The engine's current estimated memory usage, in bytes.
    fn estimated_memory_usage(&self) -> usize;

    /// Whether `vbucket` is currently absorbing an initial disk snapshot
    /// from its own upstream replication.
    fn is_receiving_initial_disk_snapshot(&self, vbucket: u16) -> bool;

    fn set_receiving_initial_disk_snapshot(&self, vbucket: u16, flag: bool);

    /// The vbucket-level "refuse new ingest" flag.
    fn takeover_backed_up(&self, vbucket: u16) -> bool;

    fn vbucket_uuid(&self, vbucket: u16) -> u64;

    fn apply_mutation(&self, vbucket: u16, item: &Mutation) -> Result<(), DcpError>;
    fn apply_deletion(&self, vbucket: u16, item: &Mutation) -> Result<(), DcpError>;
    fn apply_expiration(&self, vbucket: u16, item: &Mutation) -> Result<(), DcpError>;

    /// The highest prepare seqno persisted so far for `vbucket`, used to
    /// drive the on-disk seqno-ack.
    fn persisted_prepare_seqno(&self, vbucket: u16) -> u64;
}
