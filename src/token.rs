//! A single typed key/value slot bound to one header.

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::headers::HeaderDef;
use crate::token_type::TypedValue;

#[derive(Clone, Debug)]
enum ValueSlot {
    Absent,
    Raw(Bytes),
    Parsed(TypedValue),
}

/// A mutable slot bound to one header. Holds either an unparsed byte
/// slice (lazy) or a decoded value, and memoizes its own on-wire length.
#[derive(Clone, Debug)]
pub struct Token {
    header: HeaderDef,
    value: ValueSlot,
    cached_length: Option<u32>,
}

impl Token {
    pub fn absent(header: HeaderDef) -> Self {
        Token {
            header,
            value: ValueSlot::Absent,
            cached_length: None,
        }
    }

    pub fn header(&self) -> HeaderDef {
        self.header
    }

    pub fn is_present(&self) -> bool {
        !matches!(self.value, ValueSlot::Absent)
    }

    /// Binds an unparsed byte slice read straight off the wire. Decoding
    /// is deferred to the first call to [`Token::get_value`].
    pub fn set_raw(&mut self, bytes: Bytes) {
        self.value = ValueSlot::Raw(bytes);
        self.cached_length = None;
    }

    /// Binds an already-typed value, as a caller constructing an outbound
    /// request does.
    pub fn set_value(&mut self, value: TypedValue) {
        self.value = ValueSlot::Parsed(value);
        self.cached_length = None;
    }

    pub fn clear(&mut self) {
        self.value = ValueSlot::Absent;
        self.cached_length = None;
    }

    /// Idempotent: the first call decodes `Raw` into `Parsed`; every call
    /// after that returns the memoized value. Absent tokens decode to
    /// this type's default value, per spec §4.1.
    pub fn get_value(&mut self) -> Result<&TypedValue> {
        if let ValueSlot::Raw(bytes) = &self.value {
            let parsed = self.header.ty.decode(bytes.clone())?;
            self.value = ValueSlot::Parsed(parsed);
        } else if matches!(self.value, ValueSlot::Absent) {
            self.value = ValueSlot::Parsed(self.header.ty.default_value());
        }
        match &self.value {
            ValueSlot::Parsed(v) => Ok(v),
            _ => unreachable!("normalized to Parsed above"),
        }
    }

    /// Exact on-wire byte count of this token's body (not including the
    /// 3-byte `id · type` record prefix). Present-only; callers must not
    /// ask an absent token for its length.
    pub fn wire_length(&mut self) -> Result<u32> {
        if let Some(len) = self.cached_length {
            return Ok(len);
        }
        let len = match &self.value {
            ValueSlot::Raw(bytes) => self.header.ty.compute_length(&self.header.ty.decode(bytes.clone())?),
            ValueSlot::Parsed(v) => self.header.ty.compute_length(v),
            ValueSlot::Absent => 0,
        };
        self.cached_length = Some(len);
        Ok(len)
    }

    /// Writes the `id · type · body` record. No-op for an absent token;
    /// callers filter those out before encoding a stream.
    pub fn encode(&self, out: &mut BytesMut) {
        let value = match &self.value {
            ValueSlot::Raw(bytes) => self.header.ty.decode(bytes.clone()).ok(),
            ValueSlot::Parsed(v) => Some(v.clone()),
            ValueSlot::Absent => None,
        };
        if let Some(value) = value {
            use bytes::BufMut;
            out.put_u16_le(self.header.id);
            out.put_u8(self.header.ty.id());
            self.header.ty.encode(&value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::RequestHeader;
    use crate::token_type::TokenType;

    fn def() -> HeaderDef {
        RequestHeader::PageSize.def()
    }

    #[test]
    fn set_then_get_is_idempotent() {
        let mut token = Token::absent(def());
        token.set_value(TypedValue::Long32(42));
        assert_eq!(token.get_value().unwrap(), &TypedValue::Long32(42));
        assert_eq!(token.get_value().unwrap(), &TypedValue::Long32(42));
    }

    #[test]
    fn absent_token_decodes_to_default() {
        let mut token = Token::absent(def());
        assert!(!token.is_present());
        assert_eq!(token.get_value().unwrap(), &TypedValue::Long32(0));
    }

    #[test]
    fn mutating_set_invalidates_cached_length() {
        let mut token = Token::absent(HeaderDef::new(1, "x", TokenType::SmallBytes, false));
        token.set_value(TypedValue::SmallBytes(bytes::Bytes::from_static(b"abc")));
        let len1 = token.wire_length().unwrap();
        token.set_value(TypedValue::SmallBytes(bytes::Bytes::from_static(b"abcdef")));
        let len2 = token.wire_length().unwrap();
        assert_ne!(len1, len2);
    }
}
