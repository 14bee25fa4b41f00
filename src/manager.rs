//! The per-connection state machine: id allocation, context gating,
//! pending-request bookkeeping, and fatal shutdown (spec §4, §8).
//!
//! `RequestManager` never awaits anything itself — every method is a
//! synchronous state transition, matching the teacher's own separation
//! between protocol state (`src/lib.rs`'s connection state) and the I/O
//! loop that drives it (`src/conn.rs`). [`crate::connection::Connection`]
//! owns the socket and timers; this type only decides what to do with
//! the bytes that cross it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::config::ConnectionConfig;
use crate::context::ContextNegotiator;
use crate::error::{CloseReason, Result, RntbdError};
use crate::frame::{RequestFrame, ResponseFrame};
use crate::guid::ActivityId;
use crate::pending::PendingTable;
use crate::record::RequestRecord;
use crate::request::{RequestArgs, StoreResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No write has happened yet; the context request hasn't been sent.
    Fresh,
    /// The context request is in flight; later writes are coalesced.
    ContextRequested,
    /// The context handshake succeeded; requests flow straight through.
    ContextEstablished,
    /// A fatal condition (context failure, transport loss, health-check
    /// failure) is draining the pending table; no further work accepted.
    ClosingExceptionally,
    Closed,
}

pub struct RequestManager {
    config: ConnectionConfig,
    endpoint: Arc<str>,
    state: ConnectionState,
    context: ContextNegotiator,
    pending: PendingTable,
    /// Frames ready for the connection task to write, in order.
    outbound: Vec<RequestFrame>,
    /// Request frames built before context was established; flushed into
    /// `outbound`, in submission order, the moment it is.
    coalescing: Vec<RequestFrame>,
    next_id: u64,
    /// Ids answered by a genuine response frame. A second response for one
    /// of these ids is a real wire-protocol violation (spec §9).
    completed_ids: HashSet<u64>,
    /// Ids settled locally — by timeout or caller cancellation — before any
    /// response arrived. A response that later turns up for one of these is
    /// not a protocol violation; the record already has a winner, so the
    /// late frame is just discarded (spec §5 Cancellation, §8
    /// timeout-wins-race).
    discarded_ids: HashSet<u64>,
}

impl RequestManager {
    pub fn new(config: ConnectionConfig, endpoint: impl Into<Arc<str>>) -> Self {
        RequestManager {
            config,
            endpoint: endpoint.into(),
            state: ConnectionState::Fresh,
            context: ContextNegotiator::new(),
            pending: PendingTable::new(),
            outbound: Vec::new(),
            coalescing: Vec::new(),
            next_id: 1,
            completed_ids: HashSet::new(),
            discarded_ids: HashSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether this manager can accept `demand` more requests without
    /// exceeding [`ConnectionConfig::pending_request_limit`] (spec §4.4).
    /// Before context is established the cap is `min(pending_limit, demand)`
    /// rather than the full `pending_limit` — a back-pressure mechanism that
    /// prevents a flood of pre-context writes (spec §4.4, §5 Backpressure).
    pub fn serviceable(&self, demand: usize) -> bool {
        if matches!(
            self.state,
            ConnectionState::ClosingExceptionally | ConnectionState::Closed
        ) {
            return false;
        }
        let cap = if self.context.is_established() {
            self.config.pending_request_limit
        } else {
            self.config.pending_request_limit.min(demand)
        };
        self.pending.len() + demand <= cap
    }

    /// Registers a request and stages its frame for the connection task
    /// to write. Triggers the context request on the very first call for
    /// this connection (spec §4.3). `reply` is completed exactly once,
    /// whenever this request's outcome (success, failure, timeout,
    /// cancellation, or fatal close) is settled.
    #[tracing::instrument(skip(self, args, reply), fields(endpoint = %self.endpoint))]
    pub fn submit(
        &mut self,
        args: RequestArgs,
        reply: oneshot::Sender<Result<StoreResponse>>,
    ) -> (u64, std::time::Duration) {
        if self.state == ConnectionState::Fresh {
            let frame = self.context.build_request(&self.config, ActivityId::new_random());
            self.outbound.push(frame);
            self.state = ConnectionState::ContextRequested;
            tracing::debug!("first submit on connection, context request queued");
        }

        let id = self.next_id;
        self.next_id += 1;

        let timeout = args.timeout.unwrap_or(self.config.request_timeout);
        let deadline = Instant::now() + timeout;

        let frame = RequestFrame {
            activity_id: ActivityId::new_random(),
            resource_type: args.resource_type,
            operation_type: args.operation_type,
            transport_request_id: id,
            headers: args.headers.clone(),
            payload: args.payload.clone(),
        };

        let record = RequestRecord::new(id, args, deadline, reply);
        self.pending.insert(id, record);

        match self.state {
            ConnectionState::ContextEstablished => self.outbound.push(frame),
            _ => self.coalescing.push(frame),
        }

        tracing::trace!(request_id = id, ?timeout, "request staged");
        (id, timeout)
    }

    /// Expires the pending record for `id` if it is still unanswered,
    /// settling it with a timeout error. Called by the connection task
    /// when a record's deadline fires (spec §4.6, §8's
    /// "timeout-wins-race" scenario). Returns whether the record was
    /// still pending (a later response for the same id is then a no-op
    /// discard rather than a completion).
    pub fn expire(&mut self, id: u64) -> bool {
        match self.pending.get_mut(id) {
            Some(record) if record.is_pending() => {
                record.expire();
                self.pending.remove(id);
                self.discarded_ids.insert(id);
                true
            }
            _ => false,
        }
    }

    /// Cancels the pending record for `id`, if still unanswered.
    pub fn cancel(&mut self, id: u64) -> bool {
        match self.pending.get_mut(id) {
            Some(record) if record.is_pending() => {
                record.cancel();
                self.pending.remove(id);
                self.discarded_ids.insert(id);
                true
            }
            _ => false,
        }
    }

    /// Cancels every pending record whose caller has already dropped its
    /// receiver. Caller-drop is not wire-driven, so the connection task
    /// polls for it periodically (spec §4.6, §5 Cancellation) instead of
    /// this manager reacting to it inline. Returns the cancelled ids so the
    /// caller can disarm their deadline timers.
    pub fn reap_cancelled(&mut self) -> Vec<u64> {
        let gone = self.pending.caller_gone_ids();
        for id in &gone {
            self.cancel(*id);
        }
        gone
    }

    /// Drains every frame ready to be written, in order. The connection
    /// task calls this after every state-changing method.
    pub fn drain_outbound(&mut self) -> Vec<RequestFrame> {
        std::mem::take(&mut self.outbound)
    }

    /// Feeds one inbound frame to the state machine. Completes the
    /// matching pending record (or, for the context frame, advances the
    /// handshake and flushes whatever was coalesced behind it).
    #[tracing::instrument(skip(self, frame), fields(endpoint = %self.endpoint, request_id = frame.transport_request_id))]
    pub fn on_frame(&mut self, frame: ResponseFrame) -> Result<()> {
        if frame.is_context_frame() {
            return self.on_context_frame(frame);
        }

        let id = frame.transport_request_id;
        let Some(mut record) = self.pending.remove(id) else {
            if self.discarded_ids.contains(&id) {
                tracing::warn!(
                    request_id = id,
                    endpoint = %self.endpoint,
                    "discarding late response for a request already settled by timeout or cancellation"
                );
                return Ok(());
            }
            return Err(if self.completed_ids.contains(&id) {
                RntbdError::DuplicateResponse(id)
            } else {
                RntbdError::UnexpectedFrame("response for an unissued transport request id")
            });
        };
        self.completed_ids.insert(id);

        if frame.is_success() {
            record.complete(StoreResponse {
                status_code: frame.status_code,
                headers: frame.headers,
                payload: frame.payload,
            });
        } else {
            let err = build_request_error(&frame);
            record.complete_exceptionally(err.into());
        }
        Ok(())
    }

    fn on_context_frame(&mut self, frame: ResponseFrame) -> Result<()> {
        match self.context.on_frame(frame) {
            Ok(()) => {
                self.state = ConnectionState::ContextEstablished;
                self.outbound.append(&mut self.coalescing);
                Ok(())
            }
            Err(err) => {
                // Every record waiting behind the handshake must see the
                // real context failure, not a synthetic `Gone` (spec §4.3)
                // — `close_exceptionally` is for transport/health faults,
                // which have no root cause worth threading through.
                let fatal = RntbdError::ContextFailed(Box::new(err));
                self.state = ConnectionState::ClosingExceptionally;
                self.pending.fail_all_with(fatal.clone());
                self.coalescing.clear();
                self.outbound.clear();
                self.state = ConnectionState::Closed;
                Err(fatal)
            }
        }
    }

    /// Transitions to a terminal state and fails every pending request
    /// with a synthetic `Gone` error carrying `cause` (spec §4.4, §8's
    /// "fatal close" scenario).
    pub fn close_exceptionally(&mut self, cause: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::ClosingExceptionally;
        self.pending.fail_all(cause, &self.endpoint);
        self.coalescing.clear();
        self.outbound.clear();
        self.state = ConnectionState::Closed;
    }
}

fn build_request_error(frame: &ResponseFrame) -> crate::error::RequestError {
    use crate::headers::ResponseHeader;
    use crate::error::RequestErrorKind;

    let sub_status = frame
        .headers
        .get(ResponseHeader::SubStatus)
        .cloned()
        .and_then(|mut t| t.get_value().ok().cloned())
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);
    let lsn = frame
        .headers
        .get(ResponseHeader::Lsn)
        .cloned()
        .and_then(|mut t| t.get_value().ok().cloned())
        .and_then(|v| v.as_u64())
        .map(|v| v as i64);
    let partition_key_range_id = frame
        .headers
        .get(ResponseHeader::PartitionKeyRangeId)
        .cloned()
        .and_then(|mut t| t.get_value().ok().cloned())
        .and_then(|v| v.as_str().map(str::to_owned));

    let status = frame.status_code as u16;
    let variant = RequestErrorKind::classify(status, sub_status);
    crate::error::RequestError {
        variant,
        status,
        sub_status,
        error_body: frame
            .payload
            .clone()
            .unwrap_or_else(|| crate::error::synthesize_error_body(status, variant)),
        lsn,
        partition_key_range_id,
        headers: frame.headers.clone(),
    }
}
