//! The closed error taxonomy. Codec, protocol, and transport failures are
//! fatal to the whole connection; request errors are local to one
//! in-flight call. See spec §4.5 and §7.
//!
//! The teacher flattens every wire failure into a single `TdsError` enum
//! with a handful of variants (`src/lib.rs`); this taxonomy keeps that
//! shape but widens the "server returned an error status" branch into a
//! typed, field-carrying enum per spec §4.5 instead of a bag of strings.

use std::sync::Arc;

use bytes::Bytes;

use crate::headers::ResponseHeader;
use crate::token_stream::TokenStream;
use crate::token_type::TokenType;

pub type Result<T> = std::result::Result<T, RntbdError>;

/// Why a connection tore down all of its pending work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport reported it was closed (EOF, reset, TLS close).
    OnClose,
    /// The connection was deregistered from its owning pool while idle.
    OnUnregister,
    /// The connection was explicitly deregistered by the caller.
    OnDeregister,
    /// The caller-supplied health check reported the channel unhealthy.
    UnhealthyChannel,
}

impl CloseReason {
    pub fn phrase(self) -> &'static str {
        match self {
            CloseReason::OnClose => "connection closed exceptionally: transport closed",
            CloseReason::OnUnregister => "connection closed exceptionally: unregistered while idle",
            CloseReason::OnDeregister => "connection closed exceptionally: deregistered by caller",
            CloseReason::UnhealthyChannel => "connection closed exceptionally: health check failed",
        }
    }
}

/// Top-level error type returned from every fallible operation in this
/// crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RntbdError {
    #[error("frame truncated: need more bytes")]
    FrameTruncated,

    #[error("malformed {token_type:?} token body ({len} bytes)")]
    MalformedToken { token_type: TokenType, len: usize },

    #[error("required header {name} (id {id:#06x}) missing after stream decode")]
    RequiredHeaderMissing { id: u16, name: &'static str },

    #[error("frame type tag {0:#x} is out of range")]
    TypeTagOutOfRange(u8),

    #[error("frame length overrun: declared {declared}, available {available}")]
    LengthOverrun { declared: u32, available: u32 },

    #[error("unexpected frame for current connection state: {0}")]
    UnexpectedFrame(&'static str),

    #[error("two responses arrived for the same transport request id {0}")]
    DuplicateResponse(u64),

    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    #[error("connection closed exceptionally ({reason:?}): {phrase}")]
    Gone {
        reason: CloseReason,
        phrase: &'static str,
        endpoint: Arc<str>,
    },

    #[error("the per-connection context handshake failed: {0}")]
    ContextFailed(Box<RequestError>),

    #[error("request failed: {0}")]
    Request(Box<RequestError>),

    #[error("request timed out before a response arrived")]
    RequestTimeout,

    #[error("request was cancelled by the caller")]
    Cancelled,
}

impl From<std::io::Error> for RntbdError {
    fn from(err: std::io::Error) -> Self {
        RntbdError::Transport(Arc::new(err))
    }
}

impl From<RequestError> for RntbdError {
    fn from(err: RequestError) -> Self {
        RntbdError::Request(Box::new(err))
    }
}

/// The typed status-code taxonomy of spec §4.5. Constructed by
/// [`crate::manager`] from a completed, non-2xx response frame.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{variant:?} (status {status}, substatus {sub_status:?})")]
pub struct RequestError {
    pub variant: RequestErrorKind,
    pub status: u16,
    pub sub_status: Option<u32>,
    pub error_body: Bytes,
    pub lsn: Option<i64>,
    pub partition_key_range_id: Option<String>,
    pub headers: TokenStream<ResponseHeader>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RequestTimeout,
    Conflict,
    PartitionKeyRangeIsSplitting,
    PartitionIsMigrating,
    InvalidPartition,
    PartitionKeyRangeGone,
    Gone,
    PreconditionFailed,
    RequestEntityTooLarge,
    Locked,
    RequestRateTooLarge,
    RetryWith,
    InternalServerError,
    ServiceUnavailable,
    GenericDocumentClientError,
}

/// Stands in for `error_body` when a response carried no payload, so every
/// `RequestError` still carries a descriptive body (spec §4.5: "parsed from
/// payload if present, else synthesized from status line").
pub(crate) fn synthesize_error_body(status: u16, variant: RequestErrorKind) -> Bytes {
    Bytes::from(format!("{status} {variant:?}"))
}

impl RequestErrorKind {
    /// Implements the status/substatus → variant table of spec §4.5.
    pub fn classify(status: u16, sub_status: Option<u32>) -> RequestErrorKind {
        use RequestErrorKind::*;
        match (status, sub_status) {
            (400, _) => BadRequest,
            (401, _) => Unauthorized,
            (403, _) => Forbidden,
            (404, _) => NotFound,
            (405, _) => MethodNotAllowed,
            (408, _) => RequestTimeout,
            (409, _) => Conflict,
            (410, Some(1007)) => PartitionKeyRangeIsSplitting,
            (410, Some(1008)) => PartitionIsMigrating,
            (410, Some(1000)) => InvalidPartition,
            (410, Some(1002)) => PartitionKeyRangeGone,
            (410, _) => Gone,
            (412, _) => PreconditionFailed,
            (413, _) => RequestEntityTooLarge,
            (423, _) => Locked,
            (429, _) => RequestRateTooLarge,
            (449, _) => RetryWith,
            (500, _) => InternalServerError,
            (503, _) => ServiceUnavailable,
            _ => GenericDocumentClientError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gone_substatuses() {
        assert_eq!(
            RequestErrorKind::classify(410, Some(1007)),
            RequestErrorKind::PartitionKeyRangeIsSplitting
        );
        assert_eq!(
            RequestErrorKind::classify(410, Some(1008)),
            RequestErrorKind::PartitionIsMigrating
        );
        assert_eq!(
            RequestErrorKind::classify(410, Some(1000)),
            RequestErrorKind::InvalidPartition
        );
        assert_eq!(
            RequestErrorKind::classify(410, Some(1002)),
            RequestErrorKind::PartitionKeyRangeGone
        );
        assert_eq!(
            RequestErrorKind::classify(410, Some(9999)),
            RequestErrorKind::Gone
        );
    }

    #[test]
    fn synthesized_error_body_is_not_empty() {
        let body = synthesize_error_body(410, RequestErrorKind::PartitionKeyRangeIsSplitting);
        assert!(!body.is_empty());
        assert!(std::str::from_utf8(&body).unwrap().contains("410"));
    }

    #[test]
    fn classifies_plain_statuses() {
        assert_eq!(RequestErrorKind::classify(429, None), RequestErrorKind::RequestRateTooLarge);
        assert_eq!(RequestErrorKind::classify(599, None), RequestErrorKind::GenericDocumentClientError);
    }
}
