//! Payload codec for game packets
//!
//! Integers are stored compressed: values in `-126..=127` take one byte,
//! values that fit an `i16` are prefixed with `0x80`, everything else with
//! `0x81` followed by four little-endian bytes. Floats are little-endian
//! `f32`, strings carry a compressed length followed by UTF-8 bytes.
//!
//! Reading past the end never panics. The reader returns zeroes and raises a
//! sticky overread flag, which the server turns into an "end of packet"
//! disconnect.

use crate::{Packet, MAX_TRANS};
use bytes::{BufMut, BytesMut};

const INT16_MARKER: u8 = 0x80;
const INT32_MARKER: u8 = 0x81;

/// Growable buffer an outgoing packet is encoded into.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRANS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_int(&mut self, n: i32) {
        if n < 128 && n > -127 {
            self.buf.put_u8(n as u8);
        } else if n < 0x8000 && n >= -0x8000 {
            self.buf.put_u8(INT16_MARKER);
            self.buf.put_i16_le(n as i16);
        } else {
            self.buf.put_u8(INT32_MARKER);
            self.buf.put_i32_le(n);
        }
    }

    pub fn put_float(&mut self, f: f32) {
        self.buf.put_f32_le(f);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_string(&mut self, s: &str) {
        self.put_int(s.len() as i32);
        self.buf.put_slice(s.as_bytes());
    }

    /// Writes raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Grows the buffer by `len` zeroed bytes and hands them out for filling
    /// in place, e.g. straight from a file.
    pub fn reserve_tail(&mut self, len: usize) -> &mut [u8] {
        let start = self.buf.len();
        self.buf.resize(start + len, 0);
        &mut self.buf[start..]
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Freezes the contents into a shareable packet.
    pub fn finish(self, reliable: bool) -> Packet {
        Packet::new(self.buf.freeze(), reliable)
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
    overread: bool,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            overread: false,
        }
    }

    pub fn get_u8(&mut self) -> u8 {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => {
                self.overread = true;
                0
            }
        }
    }

    pub fn get_int(&mut self) -> i32 {
        match self.get_u8() {
            INT16_MARKER => {
                let mut raw = [0u8; 2];
                self.fill(&mut raw);
                i16::from_le_bytes(raw) as i32
            }
            INT32_MARKER => {
                let mut raw = [0u8; 4];
                self.fill(&mut raw);
                i32::from_le_bytes(raw)
            }
            b => b as i8 as i32,
        }
    }

    pub fn get_float(&mut self) -> f32 {
        let mut raw = [0u8; 4];
        self.fill(&mut raw);
        f32::from_le_bytes(raw)
    }

    /// Reads a length-prefixed string; invalid UTF-8 is replaced.
    pub fn get_string(&mut self) -> String {
        let len = self.get_int();
        if len < 0 {
            self.overread = true;
            return String::new();
        }
        String::from_utf8_lossy(self.get_bytes(len as usize)).into_owned()
    }

    /// Borrows the next `len` bytes. A short payload yields an empty slice,
    /// consumes the rest and flags the overread.
    pub fn get_bytes(&mut self, len: usize) -> &'a [u8] {
        if self.remaining() < len {
            self.pos = self.data.len();
            self.overread = true;
            return &[];
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        bytes
    }

    fn fill(&mut self, out: &mut [u8]) {
        let bytes = self.get_bytes(out.len());
        if bytes.len() == out.len() {
            out.copy_from_slice(bytes);
        }
    }

    /// Marks the payload as malformed without reading further.
    pub fn force_overread(&mut self) {
        self.overread = true;
    }

    pub fn overread(&self) -> bool {
        self.overread
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
