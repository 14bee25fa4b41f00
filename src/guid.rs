use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

/// A 16-byte activity id, as carried in every frame prolog.
///
/// The reference client encodes this using the Microsoft "mixed-endian"
/// GUID layout: the first three fields (`Data1: u32`, `Data2: u16`,
/// `Data3: u16`) are little-endian on the wire, while the trailing 8-byte
/// `Data4` field is written byte-for-byte with no swapping. This is the
/// layout `System.Guid.ToByteArray` produces on .NET, which is what the
/// reference server and client exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActivityId(Uuid);

impl ActivityId {
    pub const LEN: usize = 16;

    pub fn new_random() -> Self {
        ActivityId(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        ActivityId(Uuid::nil())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        ActivityId(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses 16 bytes in Microsoft mixed-endian order.
    pub fn read_mixed_endian(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), Self::LEN);
        let d1 = LittleEndian::read_u32(&bytes[0..4]);
        let d2 = LittleEndian::read_u16(&bytes[4..6]);
        let d3 = LittleEndian::read_u16(&bytes[6..8]);
        let mut d4 = [0u8; 8];
        d4.copy_from_slice(&bytes[8..16]);
        ActivityId(Uuid::from_fields(d1, d2, d3, &d4))
    }

    /// Serializes into 16 bytes in Microsoft mixed-endian order.
    pub fn write_mixed_endian(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), Self::LEN);
        let (d1, d2, d3, d4) = self.0.as_fields();
        LittleEndian::write_u32(&mut out[0..4], d1);
        LittleEndian::write_u16(&mut out[4..6], d2);
        LittleEndian::write_u16(&mut out[6..8], d3);
        out[8..16].copy_from_slice(d4);
    }

    pub fn to_mixed_endian_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        self.write_mixed_endian(&mut out);
        out
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_mixed_endian_bytes() {
        let id = ActivityId::new_random();
        let bytes = id.to_mixed_endian_bytes();
        let back = ActivityId::read_mixed_endian(&bytes);
        assert_eq!(id, back);
    }

    #[test]
    fn nil_is_all_zero_bytes() {
        let id = ActivityId::nil();
        assert_eq!(id.to_mixed_endian_bytes(), [0u8; 16]);
    }
}
