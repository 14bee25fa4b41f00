//! The outer envelope: a 4-byte little-endian length prefix, a fixed
//! header block, a headers token stream, and an optional payload (spec
//! §4.2, §6).
//!
//! Decoding is back-pressure safe: [`FrameCodec`] never allocates a
//! [`ResponseFrame`] until a complete frame's bytes are already buffered,
//! mirroring the `NeedMore` discipline the teacher's own packet reader
//! applies at a coarser granularity in `src/packets.rs` (`ReadPacket`).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{RntbdError, Result};
use crate::guid::ActivityId;
use crate::headers::{RequestHeader, ResponseHeader};
use crate::token_stream::TokenStream;

/// `transport_request_id` reserved for the one-shot context handshake
/// frames; real requests are assigned ids starting at 1 (spec §3, §4.3).
pub const CONTEXT_TRANSPORT_REQUEST_ID: u64 = 0;

/// Fixed prolog size for a request frame, not counting the 4-byte length
/// prefix: activity id (16) + resource type (2) + operation type (2) +
/// transport request id (8).
const REQUEST_PROLOG_LEN: usize = 16 + 2 + 2 + 8;

/// Fixed prolog size for a response frame, not counting the length
/// prefix: status (4) + activity id (16) + transport request id (8).
const RESPONSE_PROLOG_LEN: usize = 4 + 16 + 8;

#[derive(Clone, Debug)]
pub struct RequestFrame {
    pub activity_id: ActivityId,
    pub resource_type: u16,
    pub operation_type: u16,
    pub transport_request_id: u64,
    pub headers: TokenStream<RequestHeader>,
    pub payload: Option<Bytes>,
}

impl RequestFrame {
    pub fn encode(&mut self, out: &mut BytesMut) -> Result<()> {
        let headers_len = self.headers.wire_length()? as usize;
        let payload_len = self.payload.as_ref().map(Bytes::len).unwrap_or(0);
        let body_len = REQUEST_PROLOG_LEN + headers_len + payload_len;

        out.reserve(4 + body_len);
        out.put_u32_le(body_len as u32);
        out.extend_from_slice(&self.activity_id.to_mixed_endian_bytes());
        out.put_u16_le(self.resource_type);
        out.put_u16_le(self.operation_type);
        out.put_u64_le(self.transport_request_id);
        self.headers.encode(out);
        if let Some(payload) = &self.payload {
            out.extend_from_slice(payload);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ResponseFrame {
    pub status_code: u32,
    pub activity_id: ActivityId,
    pub transport_request_id: u64,
    pub headers: TokenStream<ResponseHeader>,
    pub payload: Option<Bytes>,
}

impl ResponseFrame {
    pub fn is_context_frame(&self) -> bool {
        self.transport_request_id == CONTEXT_TRANSPORT_REQUEST_ID
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Stateless codec pairing [`ResponseFrame`] decoding with [`RequestFrame`]
/// encoding, so a connection can drive the wire with a single
/// `tokio_util::codec::Framed` the same way the rest of the pack's async
/// drivers do (e.g. xitca-postgres's `driver/codec.rs`).
#[derive(Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = ResponseFrame;
    type Error = RntbdError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResponseFrame>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let total_len = 4 + body_len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }
        if body_len < RESPONSE_PROLOG_LEN {
            return Err(RntbdError::LengthOverrun {
                declared: body_len as u32,
                available: RESPONSE_PROLOG_LEN as u32,
            });
        }

        let frame_bytes = src.split_to(total_len).freeze();
        let mut cursor = frame_bytes.slice(4..);

        let status_code = cursor.get_u32_le();
        let mut activity_bytes = [0u8; ActivityId::LEN];
        cursor.copy_to_slice(&mut activity_bytes);
        let activity_id = ActivityId::read_mixed_endian(&activity_bytes);
        let transport_request_id = cursor.get_u64_le();

        let headers_and_payload_len = body_len - RESPONSE_PROLOG_LEN;
        let (headers, payload) = TokenStream::<ResponseHeader>::decode(&mut cursor, headers_and_payload_len)?;

        Ok(Some(ResponseFrame {
            status_code,
            activity_id,
            transport_request_id,
            headers,
            payload,
        }))
    }
}

impl Encoder<RequestFrame> for FrameCodec {
    type Error = RntbdError;

    fn encode(&mut self, mut item: RequestFrame, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_type::TypedValue;

    fn sample_request(id: u64) -> RequestFrame {
        let mut headers = TokenStream::<RequestHeader>::new();
        headers.set(RequestHeader::ResourceType, TypedValue::UShort(1));
        headers.set(RequestHeader::ReplicaPath, TypedValue::String("/replica/1".into()));
        RequestFrame {
            activity_id: ActivityId::new_random(),
            resource_type: 1,
            operation_type: 2,
            transport_request_id: id,
            headers,
            payload: None,
        }
    }

    #[test]
    fn encode_request_length_prefix_excludes_itself() {
        let mut frame = sample_request(7);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(declared, buf.len() - 4);
    }

    #[test]
    fn decoder_reports_need_more_on_partial_frame() {
        let mut frame = sample_request(1);
        let mut full = BytesMut::new();
        frame.encode(&mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        let mut decoder = FrameCodec;
        assert!(decoder.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn round_trips_a_response_with_payload() {
        let mut headers = TokenStream::<ResponseHeader>::new();
        headers.set(ResponseHeader::Lsn, TypedValue::Long64(99));
        headers.set(ResponseHeader::PayloadPresent, TypedValue::Byte(1));

        let payload = Bytes::from_static(b"hello-payload");
        let body_len = RESPONSE_PROLOG_LEN + headers.clone().wire_length().unwrap() as usize + payload.len();

        let mut buf = BytesMut::new();
        buf.put_u32_le(body_len as u32);
        buf.put_u32_le(200);
        let activity_id = ActivityId::new_random();
        buf.extend_from_slice(&activity_id.to_mixed_endian_bytes());
        buf.put_u64_le(5);
        headers.encode(&mut buf);
        buf.extend_from_slice(&payload);

        let mut decoder = FrameCodec;
        let frame = decoder.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(frame.status_code, 200);
        assert_eq!(frame.transport_request_id, 5);
        assert_eq!(frame.payload.as_deref(), Some(&b"hello-payload"[..]));
        assert!(frame.is_success());
    }

    #[test]
    fn context_frame_uses_reserved_id_zero() {
        let frame = sample_request(CONTEXT_TRANSPORT_REQUEST_ID);
        assert_eq!(frame.transport_request_id, 0);
    }
}
