//! Wire framing: the fixed message header and the three core frame variants.
//!
//! All integers are little-endian. `Header::size` counts the whole frame,
//! header included. Layout structs use `zerocopy` the way the rest of this
//! crate's ancestry does for its shared-memory ring elements — here applied
//! to the (much smaller, much more useful) job of parsing a frame header
//! without hand-rolled byte indexing.

use byteorder::LittleEndian;
use zerocopy::byteorder::U32;
use zerocopy::{AsBytes, FromBytes, Unaligned};

pub const HEADER_LEN: usize = 5;
pub const CHANNEL_FIELD_LEN: usize = 4;
/// Fixed portion of a DATA frame: header + channel id. Trailing bytes beyond
/// this are the payload. This is the quantity the original C source computed
/// incorrectly (see the crate's top-level docs / DESIGN.md); getting it
/// wrong silently over- or under-reads the payload.
pub const DATA_FIXED_LEN: usize = HEADER_LEN + CHANNEL_FIELD_LEN;
pub const WINDOW_LEN: usize = HEADER_LEN + CHANNEL_FIELD_LEN + 4;
pub const CLOSE_LEN: usize = HEADER_LEN + CHANNEL_FIELD_LEN;

pub const KIND_DATA: u8 = 1;
pub const KIND_WINDOW: u8 = 2;
pub const KIND_CLOSE: u8 = 3;

#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C, packed)]
pub struct RawHeader {
    pub kind: u8,
    pub size: U32<LittleEndian>,
}

/// Host-native view of a decoded header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub kind: u8,
    pub size: u32,
}

impl Header {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let raw = RawHeader {
            kind: self.kind,
            size: U32::new(self.size),
        };
        out.extend_from_slice(raw.as_bytes());
    }

    /// Decodes a header from the first `HEADER_LEN` bytes of `buf`.
    ///
    /// Panics if `buf` is shorter than `HEADER_LEN`; callers must have
    /// already confirmed that much is available (this mirrors the ring
    /// buffer's own bounds-checked peek contract).
    pub fn decode(buf: &[u8]) -> Self {
        let raw = RawHeader::read_from(&buf[..HEADER_LEN]).expect("HEADER_LEN bytes available");
        Header {
            kind: raw.kind,
            size: raw.size.get(),
        }
    }
}

#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C, packed)]
struct ChannelField {
    channel: U32<LittleEndian>,
}

pub fn encode_channel(channel: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(ChannelField { channel: U32::new(channel) }.as_bytes());
}

pub fn decode_channel(buf: &[u8]) -> u32 {
    ChannelField::read_from(&buf[..CHANNEL_FIELD_LEN])
        .expect("CHANNEL_FIELD_LEN bytes available")
        .channel
        .get()
}

#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C, packed)]
struct WindowFields {
    channel: U32<LittleEndian>,
    window_delta: U32<LittleEndian>,
}

/// Builds a complete DATA frame: header + channel + payload.
pub fn encode_data(channel: u32, payload_a: &[u8], payload_b: &[u8], out: &mut Vec<u8>) {
    let size = DATA_FIXED_LEN + payload_a.len() + payload_b.len();
    Header { kind: KIND_DATA, size: size as u32 }.encode(out);
    encode_channel(channel, out);
    out.extend_from_slice(payload_a);
    out.extend_from_slice(payload_b);
}

pub fn encode_window(channel: u32, window_delta: u32, out: &mut Vec<u8>) {
    Header { kind: KIND_WINDOW, size: WINDOW_LEN as u32 }.encode(out);
    out.extend_from_slice(
        WindowFields {
            channel: U32::new(channel),
            window_delta: U32::new(window_delta),
        }
        .as_bytes(),
    );
}

pub fn decode_window_delta(buf: &[u8]) -> u32 {
    WindowFields::read_from(&buf[..CHANNEL_FIELD_LEN + 4])
        .expect("window fields available")
        .window_delta
        .get()
}

pub fn encode_close(channel: u32, out: &mut Vec<u8>) {
    Header { kind: KIND_CLOSE, size: CLOSE_LEN as u32 }.encode(out);
    encode_channel(channel, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut buf = Vec::new();
        Header { kind: KIND_DATA, size: 42 }.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let h = Header::decode(&buf);
        assert_eq!(h.kind, KIND_DATA);
        assert_eq!(h.size, 42);
    }

    #[test]
    fn data_frame_layout() {
        let mut buf = Vec::new();
        encode_data(7, b"hel", b"lo", &mut buf);
        assert_eq!(buf.len(), DATA_FIXED_LEN + 5);
        let h = Header::decode(&buf);
        assert_eq!(h.kind, KIND_DATA);
        assert_eq!(h.size as usize, DATA_FIXED_LEN + 5);
        assert_eq!(decode_channel(&buf[HEADER_LEN..]), 7);
        assert_eq!(&buf[DATA_FIXED_LEN..], b"hello");
    }

    #[test]
    fn window_frame_layout() {
        let mut buf = Vec::new();
        encode_window(3, 5, &mut buf);
        assert_eq!(buf.len(), WINDOW_LEN);
        assert_eq!(decode_channel(&buf[HEADER_LEN..]), 3);
        assert_eq!(decode_window_delta(&buf[HEADER_LEN..]), 5);
    }

    #[test]
    fn close_frame_layout() {
        let mut buf = Vec::new();
        encode_close(2, &mut buf);
        assert_eq!(buf.len(), CLOSE_LEN);
        assert_eq!(decode_channel(&buf[HEADER_LEN..]), 2);
    }
}
