//! The keyed table of in-flight requests a connection is waiting on
//! responses for (spec §4.4).
//!
//! Keyed by `transport_request_id` rather than FIFO order — unlike, say,
//! xitca-postgres's ring-buffer request queue (`postgres/src/driver/queue.rs`),
//! RNTBD responses can arrive out of order relative to how their requests
//! were sent, so lookup has to be by id, not by position.

use std::collections::HashMap;

use crate::error::{CloseReason, RntbdError};
use crate::record::RequestRecord;

#[derive(Default)]
pub struct PendingTable {
    records: HashMap<u64, RequestRecord>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            records: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Registers a new record under `id`. Colliding with a still-pending
    /// id is a programming error in the id allocator (spec §4.4), not a
    /// recoverable condition, so this panics rather than returning
    /// `Result`.
    pub fn insert(&mut self, id: u64, record: RequestRecord) {
        if let Some(existing) = self.records.insert(id, record) {
            panic!(
                "pending table id collision: transport_request_id {} was already assigned (state {:?})",
                id,
                existing.state()
            );
        }
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut RequestRecord> {
        self.records.get_mut(&id)
    }

    /// Removes and returns the record for `id`, if still pending.
    pub fn remove(&mut self, id: u64) -> Option<RequestRecord> {
        self.records.remove(&id)
    }

    /// Drains every pending record, completing each exceptionally with a
    /// synthetic `Gone` error built from `cause` and `endpoint`. Used on a
    /// fatal connection close (spec §4.4, §8 scenario: "fatal close drains
    /// pending table").
    #[tracing::instrument(skip(self, endpoint), fields(pending = self.records.len()))]
    pub fn fail_all(&mut self, cause: CloseReason, endpoint: &std::sync::Arc<str>) {
        if !self.records.is_empty() {
            tracing::warn!(?cause, "draining pending table on fatal close");
        }
        for (_, mut record) in self.records.drain() {
            record.fail_gone(cause, endpoint.clone());
        }
    }

    /// Fails every pending record with `err` (not counted as a fatal
    /// transport/health close — used when the context handshake itself
    /// fails, so every record waiting behind it sees the real cause).
    #[tracing::instrument(skip(self, err), fields(pending = self.records.len()))]
    pub fn fail_all_with(&mut self, err: RntbdError) {
        if !self.records.is_empty() {
            tracing::warn!("draining pending table on context failure");
        }
        for (_, mut record) in self.records.drain() {
            record.complete_exceptionally(err.clone());
        }
    }

    /// Ids whose caller has already dropped its receiver, i.e. lost
    /// interest in the outcome. The connection task polls this
    /// periodically to cancel and disarm them (spec §4.6, §5 Cancellation).
    pub fn caller_gone_ids(&self) -> Vec<u64> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_caller_gone())
            .map(|(id, _)| *id)
            .collect()
    }

    /// All currently pending ids, for diagnostics and timer bookkeeping.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RequestRecord;
    use crate::request::RequestArgs;
    use std::time::{Duration, Instant};

    fn sample_record(id: u64) -> (RequestRecord, tokio::sync::oneshot::Receiver<crate::error::Result<crate::request::StoreResponse>>) {
        let args = RequestArgs::new(1, 1, "https://localhost/");
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            RequestRecord::new(id, args, Instant::now() + Duration::from_secs(5), tx),
            rx,
        )
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let mut table = PendingTable::new();
        let (record, _rx) = sample_record(1);
        table.insert(1, record);
        assert_eq!(table.len(), 1);
        let removed = table.remove(1);
        assert!(removed.is_some());
        assert!(table.is_empty());
    }

    #[test]
    #[should_panic(expected = "id collision")]
    fn colliding_insert_panics() {
        let mut table = PendingTable::new();
        let (r1, _rx1) = sample_record(9);
        let (r2, _rx2) = sample_record(9);
        table.insert(9, r1);
        table.insert(9, r2);
    }

    #[test]
    fn fail_all_drains_every_record() {
        let mut table = PendingTable::new();
        let (r1, rx1) = sample_record(1);
        let (r2, rx2) = sample_record(2);
        table.insert(1, r1);
        table.insert(2, r2);

        let endpoint: std::sync::Arc<str> = std::sync::Arc::from("rntbd://localhost:1234/");
        table.fail_all(CloseReason::OnClose, &endpoint);

        assert!(table.is_empty());
        let err1 = rx1.blocking_recv().unwrap().unwrap_err();
        assert!(err1.to_string().contains("closed exceptionally"));
        let err2 = rx2.blocking_recv().unwrap().unwrap_err();
        assert!(err2.to_string().contains("closed exceptionally"));
    }

    #[test]
    fn fail_all_with_drains_with_the_given_error() {
        let mut table = PendingTable::new();
        let (r1, rx1) = sample_record(1);
        table.insert(1, r1);

        table.fail_all_with(crate::error::RntbdError::RequestTimeout);

        assert!(table.is_empty());
        let err = rx1.blocking_recv().unwrap().unwrap_err();
        assert!(matches!(err, crate::error::RntbdError::RequestTimeout));
    }

    #[test]
    fn caller_gone_ids_reports_dropped_receivers() {
        let mut table = PendingTable::new();
        let (r1, rx1) = sample_record(1);
        let (r2, _rx2) = sample_record(2);
        table.insert(1, r1);
        table.insert(2, r2);

        drop(rx1);

        assert_eq!(table.caller_gone_ids(), vec![1]);
    }
}
