//! The per-vbucket failover history.
//!
//! A bounded, ordered list of `(vbucket_uuid, seqno)` entries recording every
//! point at which the vbucket's history branched (an active/replica
//! failover, a rollback, or a manual topology change). `streamRequest`
//! consults this table to decide whether a consumer's claimed history is
//! still consistent with ours.

const DEFAULT_CAPACITY: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverEntry {
    pub vbucket_uuid: u64,
    pub seqno: u64,
}

#[derive(Debug, Clone)]
pub struct FailoverTable {
    /// Newest entry first, matching how a new failover is pushed onto the
    /// front of the real table.
    entries: Vec<FailoverEntry>,
    capacity: usize,
}

impl FailoverTable {
    pub fn new(initial_uuid: u64) -> FailoverTable {
        FailoverTable {
            entries: vec![FailoverEntry { vbucket_uuid: initial_uuid, seqno: 0 }],
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(initial_uuid: u64, capacity: usize) -> FailoverTable {
        let mut t = FailoverTable::new(initial_uuid);
        t.capacity = capacity.max(1);
        t
    }

    /// Records a new failover point, e.g. on a vbucket state transition.
    pub fn add_entry(&mut self, vbucket_uuid: u64, seqno: u64) {
        self.entries.insert(0, FailoverEntry { vbucket_uuid, seqno });
        self.entries.truncate(self.capacity);
    }

    pub fn latest(&self) -> FailoverEntry {
        self.entries[0]
    }

    pub fn entries(&self) -> &[FailoverEntry] {
        &self.entries
    }

    /// Resolves a consumer's claimed `(vbucket_uuid, snap_start, snap_end)`
    /// against this table.
    ///
    /// Returns `None` if the claim is consistent with our history (the
    /// stream may proceed as requested). Returns `Some(rollback_seqno)` when
    /// the client must restart from an earlier point.
    pub fn resolve(
        &self,
        claimed_uuid: u64,
        start_seqno: u64,
        snap_start_seqno: u64,
        snap_end_seqno: u64,
    ) -> Option<u64> {
        if start_seqno == 0 {
            // A client starting from scratch has no history to validate.
            return None;
        }

        match self.entries.iter().find(|e| e.vbucket_uuid == claimed_uuid) {
            None => {
                // We have never heard of this uuid: the client's entire
                // history diverged from ours. Roll back to zero.
                Some(0)
            }
            Some(entry) => {
                // The claimed uuid is known, but if the point at which it
                // diverged from the *next* entry lies inside the client's
                // claimed snapshot, the client's snapshot isn't trustworthy
                // and it must roll back to the branch point.
                if start_seqno > entry.seqno && entry.seqno > 0 && snap_start_seqno < entry.seqno
                    && snap_end_seqno >= entry.seqno
                {
                    Some(entry.seqno)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_uuid_rolls_back_to_zero() {
        let table = FailoverTable::new(100);
        assert_eq!(table.resolve(999, 50, 10, 60), Some(0));
    }

    #[test]
    fn known_uuid_without_divergence_in_range_is_accepted() {
        let table = FailoverTable::new(100);
        assert_eq!(table.resolve(100, 50, 10, 60), None);
    }

    #[test]
    fn fresh_client_with_zero_start_is_always_accepted() {
        let table = FailoverTable::new(100);
        assert_eq!(table.resolve(999, 0, 0, 0), None);
    }

    #[test]
    fn capacity_bounds_the_table() {
        let mut table = FailoverTable::with_capacity(1, 3);
        for i in 2..10u64 {
            table.add_entry(i, i * 10);
        }
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.latest().vbucket_uuid, 9);
    }
}
