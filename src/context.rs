//! One-shot handshake negotiated on the first write of a new connection
//! (spec §4.3).
//!
//! The very first user write triggers a synthesized `ContextRequest`
//! frame (`transport_request_id == 0`, reserved for this purpose — spec
//! §3 guarantees real requests start numbering at 1). Every write after
//! that is appended to the connection's coalescing queue instead of being
//! flushed, until the negotiator sees a `ContextResponse` or
//! `ContextException` and latches its single-assignment outcome.

use crate::config::ConnectionConfig;
use crate::error::{RequestError, RequestErrorKind};
use crate::frame::{RequestFrame, ResponseFrame, CONTEXT_TRANSPORT_REQUEST_ID};
use crate::guid::ActivityId;
use crate::headers::RequestHeader;
use crate::token_type::TypedValue;

/// Reserved `operation_type` identifying a context-negotiation frame; not
/// a real resource operation.
pub const OPERATION_TYPE_CONTEXT: u16 = 0xFFFF;
/// Reserved `resource_type` paired with [`OPERATION_TYPE_CONTEXT`].
pub const RESOURCE_TYPE_CONNECTION: u16 = 0x0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContextState {
    NotStarted,
    Requested,
    Established,
    Failed,
}

pub struct ContextNegotiator {
    state: ContextState,
    outcome: Option<Result<(), RequestError>>,
}

impl ContextNegotiator {
    pub fn new() -> Self {
        ContextNegotiator {
            state: ContextState::NotStarted,
            outcome: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == ContextState::Established
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ContextState::Established | ContextState::Failed)
    }

    /// Builds the one frame this negotiator ever sends. Callers must only
    /// call this once, when transitioning out of `NotStarted`.
    pub fn build_request(&mut self, config: &ConnectionConfig, activity_id: ActivityId) -> RequestFrame {
        assert_eq!(
            self.state,
            ContextState::NotStarted,
            "context request built more than once for one connection"
        );
        self.state = ContextState::Requested;

        let mut headers = crate::token_stream::TokenStream::<RequestHeader>::new();
        headers.set(
            RequestHeader::ResourceType,
            TypedValue::UShort(RESOURCE_TYPE_CONNECTION),
        );
        headers.set(RequestHeader::ReplicaPath, TypedValue::String(String::new()));
        headers.set(
            RequestHeader::ClientVersion,
            TypedValue::String(config.client_version.to_owned()),
        );
        headers.set(
            RequestHeader::ClientIdentifier,
            TypedValue::String(config.client_identifier.clone()),
        );
        headers.set(RequestHeader::UserAgent, TypedValue::String(config.user_agent.clone()));
        headers.set(
            RequestHeader::ProtocolVersion,
            TypedValue::ULong32(config.protocol_version),
        );

        RequestFrame {
            activity_id,
            resource_type: RESOURCE_TYPE_CONNECTION,
            operation_type: OPERATION_TYPE_CONTEXT,
            transport_request_id: CONTEXT_TRANSPORT_REQUEST_ID,
            headers,
            payload: None,
        }
    }

    /// Feeds the negotiator a response frame addressed to transport
    /// request id 0. Returns the latched outcome the first time a
    /// terminal frame arrives; a second call after that is a programming
    /// error, matching the single-assignment contract of spec §4.3.
    pub fn on_frame(&mut self, frame: ResponseFrame) -> Result<(), RequestError> {
        assert!(!self.is_terminal(), "context future completed twice");
        debug_assert!(frame.is_context_frame());

        if frame.is_success() {
            self.state = ContextState::Established;
            self.outcome = Some(Ok(()));
            tracing::debug!("context negotiation established");
            Ok(())
        } else {
            let sub_status = frame
                .headers
                .get(crate::headers::ResponseHeader::SubStatus)
                .cloned()
                .and_then(|mut t| t.get_value().ok().cloned())
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            let lsn = frame
                .headers
                .get(crate::headers::ResponseHeader::Lsn)
                .cloned()
                .and_then(|mut t| t.get_value().ok().cloned())
                .and_then(|v| v.as_u64())
                .map(|v| v as i64);
            let partition_key_range_id = frame
                .headers
                .get(crate::headers::ResponseHeader::PartitionKeyRangeId)
                .cloned()
                .and_then(|mut t| t.get_value().ok().cloned())
                .and_then(|v| v.as_str().map(str::to_owned));

            let status = frame.status_code as u16;
            let variant = RequestErrorKind::classify(status, sub_status);
            let err = RequestError {
                variant,
                status,
                sub_status,
                error_body: frame
                    .payload
                    .clone()
                    .unwrap_or_else(|| crate::error::synthesize_error_body(status, variant)),
                lsn,
                partition_key_range_id,
                headers: frame.headers,
            };
            self.state = ContextState::Failed;
            self.outcome = Some(Err(err.clone()));
            tracing::warn!(status = err.status, sub_status = ?err.sub_status, "context negotiation failed");
            Err(err)
        }
    }
}

impl Default for ContextNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::ResponseHeader;
    use crate::token_stream::TokenStream;

    fn response(status: u32) -> ResponseFrame {
        ResponseFrame {
            status_code: status,
            activity_id: ActivityId::nil(),
            transport_request_id: CONTEXT_TRANSPORT_REQUEST_ID,
            headers: TokenStream::<ResponseHeader>::new(),
            payload: None,
        }
    }

    #[test]
    fn success_response_establishes_context() {
        let mut negotiator = ContextNegotiator::new();
        let config = ConnectionConfig::default();
        let _ = negotiator.build_request(&config, ActivityId::new_random());
        assert!(negotiator.on_frame(response(200)).is_ok());
        assert!(negotiator.is_established());
    }

    #[test]
    fn error_response_fails_context() {
        let mut negotiator = ContextNegotiator::new();
        let config = ConnectionConfig::default();
        let _ = negotiator.build_request(&config, ActivityId::new_random());
        let err = negotiator.on_frame(response(503)).unwrap_err();
        assert_eq!(err.variant, RequestErrorKind::ServiceUnavailable);
        assert!(!negotiator.is_established());
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn recompletion_panics() {
        let mut negotiator = ContextNegotiator::new();
        let config = ConnectionConfig::default();
        let _ = negotiator.build_request(&config, ActivityId::new_random());
        let _ = negotiator.on_frame(response(200));
        let _ = negotiator.on_frame(response(200));
    }
}
