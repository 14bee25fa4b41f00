//! An ordered collection of [`Token`]s for one message part (a request's
//! headers or a response's headers), plus encode/decode of the whole
//! part.
//!
//! On-wire layout (spec §4.1): zero or more `{id:u16 · type:u8 · body}`
//! records, with no count prefix — decoding consumes bytes until the
//! containing frame's remaining length is exhausted. Unknown ids still
//! parse (using the type tag actually on the wire) and are retained as an
//! `Undefined` token rather than being dropped, so the stream survives a
//! newer server sending headers an older client doesn't know about.
//!
//! Tokens are keyed in a `BTreeMap<u16, Token>`, which gives ascending
//! numeric header id as the natural iteration order — the stable,
//! self-describing encode order spec §9's open question settles on.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::error::{RntbdError, Result};
use crate::headers::{HeaderCatalog, HeaderDef};
use crate::token::Token;
use crate::token_type::TokenType;

#[derive(Clone, Debug)]
pub struct TokenStream<K: HeaderCatalog> {
    tokens: BTreeMap<u16, Token>,
    _catalog: std::marker::PhantomData<K>,
}

impl<K: HeaderCatalog> TokenStream<K> {
    /// A stream with every known header present but absent (pre-populated
    /// slots), ready for a caller to fill in before encoding a request.
    pub fn new() -> Self {
        let tokens = K::all()
            .iter()
            .map(|h| {
                let def = h.def();
                (def.id, Token::absent(def))
            })
            .collect();
        TokenStream {
            tokens,
            _catalog: std::marker::PhantomData,
        }
    }

    pub fn get(&self, header: K) -> Option<&Token> {
        self.tokens.get(&header.def().id).filter(|t| t.is_present())
    }

    pub fn get_mut(&mut self, header: K) -> &mut Token {
        let def = header.def();
        self.tokens.entry(def.id).or_insert_with(|| Token::absent(def))
    }

    pub fn set(&mut self, header: K, value: crate::token_type::TypedValue) {
        self.get_mut(header).set_value(value);
    }

    /// All present tokens, known and undefined, in ascending id order.
    pub fn present_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values().filter(|t| t.is_present())
    }

    /// Decodes a region bounded by `remaining`, which may cover headers
    /// only or headers followed by a trailing payload: consumes exactly
    /// that many bytes from `buf`. Header records are read sequentially
    /// until either the bound is exhausted (no payload) or the
    /// distinguished `PayloadPresent` token (id
    /// [`crate::headers::PAYLOAD_PRESENT_ID`], value `1`) is seen, at
    /// which point every remaining byte in the bound is returned as the
    /// payload rather than parsed as further header records.
    pub fn decode(buf: &mut Bytes, remaining: usize) -> Result<(Self, Option<Bytes>)> {
        if buf.remaining_len() < remaining {
            return Err(RntbdError::FrameTruncated);
        }
        let mut region = buf.split_to(remaining);
        let mut stream = Self::new();
        let mut payload = None;

        loop {
            if region.is_empty() {
                break;
            }
            if region.len() < 3 {
                return Err(RntbdError::FrameTruncated);
            }
            let id = u16::from_le_bytes([region[0], region[1]]);
            let type_tag = region[2];
            region.advance_bytes(3);

            let ty = TokenType::from_u8(type_tag);
            if ty == TokenType::Invalid {
                return Err(RntbdError::TypeTagOutOfRange(type_tag));
            }
            let body = ty.read_slice(&mut region)?;
            let is_payload_marker = id == crate::headers::PAYLOAD_PRESENT_ID
                && ty == TokenType::Byte
                && body.first() == Some(&1);

            let def = match K::from_id(id) {
                Some(h) => h.def(),
                None => HeaderDef::undefined(id, ty),
            };
            let mut token = Token::absent(def);
            token.set_raw(body);
            stream.tokens.insert(id, token);

            if is_payload_marker {
                payload = Some(region);
                break;
            }
        }

        stream.validate_required()?;
        Ok((stream, payload))
    }

    fn validate_required(&self) -> Result<()> {
        for header in K::all() {
            let def = header.def();
            if def.required {
                let present = self.tokens.get(&def.id).map(|t| t.is_present()).unwrap_or(false);
                if !present {
                    return Err(RntbdError::RequiredHeaderMissing {
                        id: def.id,
                        name: def.name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Encodes every present token, known or undefined, in ascending id
    /// order — except `PayloadPresent`, which (despite being the
    /// numerically lowest id in both catalogs) is always written last, so
    /// a decoder reading the stream back sequentially sees it immediately
    /// before the trailing payload.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut payload_present = None;
        for token in self.present_tokens() {
            if token.header().id == crate::headers::PAYLOAD_PRESENT_ID {
                payload_present = Some(token);
            } else {
                token.encode(out);
            }
        }
        if let Some(token) = payload_present {
            token.encode(out);
        }
    }

    /// Exact on-wire byte count of the whole region (sum of each
    /// present token's 3-byte record prefix plus its body).
    pub fn wire_length(&mut self) -> Result<u32> {
        let mut total = 0u32;
        for token in self.tokens.values_mut().filter(|t| t.is_present()) {
            total += 3 + token.wire_length()?;
        }
        Ok(total)
    }
}

impl<K: HeaderCatalog> Default for TokenStream<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Small helper trait so `decode` can work directly against a `Bytes`
/// cursor without pulling in `bytes::Buf`'s whole surface at every call
/// site.
trait BytesCursorExt {
    fn remaining_len(&self) -> usize;
    fn advance_bytes(&mut self, n: usize);
}

impl BytesCursorExt for Bytes {
    fn remaining_len(&self) -> usize {
        self.len()
    }

    fn advance_bytes(&mut self, n: usize) {
        use bytes::Buf;
        self.advance(n);
    }
}
