//! An in-memory stand-in for the out-of-scope storage engine
//! collaborators (`StorageEngine`/`CheckpointSource`/`BackfillSource`),
//! shared across the integration tests. The per-module unit tests in
//! `src/connection/producer.rs` use ad-hoc `Fake*` structs that always
//! answer the same way; this one actually tracks per-vbucket cursors and
//! applied items, so a multi-step integration test can assert on it.

use std::cell::RefCell;
use std::collections::HashMap;

use kv_dcp::engine::{BackfillSource, CheckpointItem, CheckpointSource, CursorHandle, StorageEngine};
use kv_dcp::error::DcpResult;
use kv_dcp::wire::Mutation;

#[derive(Default)]
pub struct MockEngine {
    max_size: usize,
    memory_usage: RefCell<usize>,
    vbucket_uuid: u64,
    receiving_initial_disk_snapshot: RefCell<HashMap<u16, bool>>,
    takeover_backed_up: RefCell<HashMap<u16, bool>>,
    applied_mutations: RefCell<Vec<Mutation>>,
    applied_deletions: RefCell<Vec<Mutation>>,
    persisted_prepare_seqno: RefCell<HashMap<u16, u64>>,
}

impl MockEngine {
    pub fn new(max_size: usize, vbucket_uuid: u64) -> MockEngine {
        MockEngine {
            max_size,
            vbucket_uuid,
            ..MockEngine::default()
        }
    }

    pub fn applied_mutation_count(&self) -> usize {
        self.applied_mutations.borrow().len()
    }

    pub fn applied_deletion_count(&self) -> usize {
        self.applied_deletions.borrow().len()
    }

    pub fn set_memory_usage(&self, bytes: usize) {
        *self.memory_usage.borrow_mut() = bytes;
    }
}

impl StorageEngine for MockEngine {
    fn max_size(&self) -> usize {
        self.max_size
    }

    fn estimated_memory_usage(&self) -> usize {
        *self.memory_usage.borrow()
    }

    fn is_receiving_initial_disk_snapshot(&self, vbucket: u16) -> bool {
        *self.receiving_initial_disk_snapshot.borrow().get(&vbucket).unwrap_or(&false)
    }

    fn set_receiving_initial_disk_snapshot(&self, vbucket: u16, flag: bool) {
        self.receiving_initial_disk_snapshot.borrow_mut().insert(vbucket, flag);
    }

    fn takeover_backed_up(&self, vbucket: u16) -> bool {
        *self.takeover_backed_up.borrow().get(&vbucket).unwrap_or(&false)
    }

    fn vbucket_uuid(&self, _vbucket: u16) -> u64 {
        self.vbucket_uuid
    }

    fn apply_mutation(&self, _vbucket: u16, item: &Mutation) -> DcpResult<()> {
        self.applied_mutations.borrow_mut().push(item.clone());
        Ok(())
    }

    fn apply_deletion(&self, _vbucket: u16, item: &Mutation) -> DcpResult<()> {
        self.applied_deletions.borrow_mut().push(item.clone());
        Ok(())
    }

    fn apply_expiration(&self, _vbucket: u16, item: &Mutation) -> DcpResult<()> {
        self.applied_deletions.borrow_mut().push(item.clone());
        Ok(())
    }

    fn persisted_prepare_seqno(&self, vbucket: u16) -> u64 {
        *self.persisted_prepare_seqno.borrow().get(&vbucket).unwrap_or(&0)
    }
}

/// An empty checkpoint source: every cursor starts and stays dry. Good
/// enough for exercising the `streamRequest`/registry wiring without also
/// needing live checkpoint data flowing through `ActiveStream::pump`.
#[derive(Default)]
pub struct EmptyCheckpoints {
    open_checkpoint_id: RefCell<HashMap<u16, u64>>,
}

impl CheckpointSource for EmptyCheckpoints {
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

    fn open_checkpoint_id(&self, vbucket: u16) -> u64 {
        *self.open_checkpoint_id.borrow().get(&vbucket).unwrap_or(&1)
    }

    fn set_open_checkpoint_id(&self, vbucket: u16, id: u64) {
        self.open_checkpoint_id.borrow_mut().insert(vbucket, id);
    }

    fn create_checkpoint(&self, vbucket: u16) -> u64 {
        let mut map = self.open_checkpoint_id.borrow_mut();
        let next = map.get(&vbucket).copied().unwrap_or(1) + 1;
        map.insert(vbucket, next);
        next
    }
}

#[derive(Default)]
pub struct EmptyBackfill;

impl BackfillSource for EmptyBackfill {
    fn scan(&self, _vbucket: u16, _start_seqno: u64, _end_seqno: u64) -> Vec<Mutation> {
        Vec::new()
    }
}
