//! Per-vbucket stream state machines, split by direction: `active` drives
//! outbound replication from a producer, `passive` ingests it on a
//! consumer, `backfill` reads history off disk, `snapshot_task` is the
//! polling loop that actually drains active streams onto the wire.

pub mod active;
pub mod backfill;
pub mod passive;
pub mod snapshot_task;

pub use self::active::{ActiveStream, ActiveStreamState};
pub use self::backfill::BackfillTask;
pub use self::passive::{PassiveResponse, PassiveStream, PassiveStreamState};
pub use self::snapshot_task::SnapshotProcessorTask;
