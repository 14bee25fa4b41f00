//! One outstanding request tracked by [`crate::pending::PendingTable`]:
//! what was sent, when it must be answered by, and the one-shot channel
//! its eventual outcome is delivered through.
//!
//! Completion is one-way and mutually exclusive (spec §4.6): whichever of
//! `complete`, `complete_exceptionally`, `expire`, or `cancel` runs first
//! wins, and every later call is an observable no-op rather than a second
//! send on an already-used oneshot sender.

use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::{CloseReason, Result, RntbdError};
use crate::request::{RequestArgs, StoreResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

pub struct RequestRecord {
    id: u64,
    args: RequestArgs,
    deadline: Instant,
    state: RecordState,
    completion: Option<oneshot::Sender<Result<StoreResponse>>>,
}

impl RequestRecord {
    pub fn new(
        id: u64,
        args: RequestArgs,
        deadline: Instant,
        completion: oneshot::Sender<Result<StoreResponse>>,
    ) -> Self {
        RequestRecord {
            id,
            args,
            deadline,
            state: RecordState::Pending,
            completion: Some(completion),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn args(&self) -> &RequestArgs {
        &self.args
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == RecordState::Pending
    }

    /// Whether the caller has already dropped its receiver, i.e. is no
    /// longer waiting on this record's outcome. Only meaningful while
    /// still pending; a settled record's sender is already gone.
    pub fn is_caller_gone(&self) -> bool {
        match &self.completion {
            Some(tx) => tx.is_closed(),
            None => false,
        }
    }

    /// Settles this record to `state` by sending `result` through the
    /// completion channel, if it hasn't already been settled. Returns
    /// whether this call actually took effect.
    fn settle(&mut self, state: RecordState, result: Result<StoreResponse>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.state = state;
        if let Some(tx) = self.completion.take() {
            // The caller may have dropped its receiver already; a failed
            // send just means nobody is listening for the outcome.
            let _ = tx.send(result);
        }
        true
    }

    pub fn complete(&mut self, response: StoreResponse) -> bool {
        self.settle(RecordState::Completed, Ok(response))
    }

    pub fn complete_exceptionally(&mut self, err: RntbdError) -> bool {
        self.settle(RecordState::Failed, Err(err))
    }

    /// A late response arrived after this record's deadline already
    /// fired; the response is discarded and this call is a no-op (spec
    /// §8, timeout-wins-race scenario).
    pub fn expire(&mut self) -> bool {
        self.settle(RecordState::Expired, Err(RntbdError::RequestTimeout))
    }

    pub fn cancel(&mut self) -> bool {
        self.settle(RecordState::Cancelled, Err(RntbdError::Cancelled))
    }

    /// Completes exceptionally with a synthetic `Gone` error, used when a
    /// connection drains its whole pending table on fatal close (spec
    /// §4.4).
    pub fn fail_gone(&mut self, reason: CloseReason, endpoint: std::sync::Arc<str>) -> bool {
        let err = RntbdError::Gone {
            reason,
            phrase: reason.phrase(),
            endpoint,
        };
        self.settle(RecordState::Failed, Err(err))
    }
}
