//! The public types callers deal with: what goes into [`crate::connection::ConnectionHandle::submit`]
//! and what (eventually) comes back out. Everything above this — query
//! planning, partition routing, retries, session tokens — belongs to a
//! caller, not this crate (spec §1).

use std::time::Duration;

use bytes::Bytes;

use crate::headers::{RequestHeader, ResponseHeader};
use crate::token_stream::TokenStream;

/// One outbound request, fully formed by the caller.
#[derive(Clone, Debug)]
pub struct RequestArgs {
    pub resource_type: u16,
    pub operation_type: u16,
    pub headers: TokenStream<RequestHeader>,
    pub payload: Option<Bytes>,
    /// Overrides [`crate::config::ConnectionConfig::request_timeout`] for
    /// this one request, if set.
    pub timeout: Option<Duration>,
    /// Physical endpoint URI this request targets, carried only so a
    /// fatal close can report it on the synthetic Gone error (spec §4.4).
    pub physical_uri: std::sync::Arc<str>,
}

impl RequestArgs {
    pub fn new(resource_type: u16, operation_type: u16, physical_uri: impl Into<std::sync::Arc<str>>) -> Self {
        RequestArgs {
            resource_type,
            operation_type,
            headers: TokenStream::new(),
            payload: None,
            timeout: None,
            physical_uri: physical_uri.into(),
        }
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A successfully completed request: status in `[200, 300)`.
#[derive(Clone, Debug)]
pub struct StoreResponse {
    pub status_code: u32,
    pub headers: TokenStream<ResponseHeader>,
    pub payload: Option<Bytes>,
}
