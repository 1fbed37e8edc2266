//! Byte-order aware reading and writing of AgentX wire data.
//!
//! Every AgentX PDU declares its own byte order in the header flags
//! (RFC 2741 §6.1, NETWORK_BYTE_ORDER bit), so multi-byte integers are read
//! and written through a [`WireReader`] / [`WireWriter`] that carries the
//! order of the message being processed.

use crate::error::ParseError;

/// Byte order of multi-byte integers inside a single PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Network byte order (big endian). Sets the NETWORK_BYTE_ORDER flag.
    #[default]
    BigEndian,
    LittleEndian,
}

/// Cursor over an encoded buffer with an explicit end bound.
///
/// All reads are bounds-checked and fail with [`ParseError::Truncated`]
/// instead of reading past the end.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        WireReader { buf, pos: 0, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left before the end bound.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        let raw = [b[0], b[1]];
        Ok(match self.order {
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(match self.order {
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(match self.order {
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
        })
    }

    /// Skips `n` reserved bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.take(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        self.take(n)
    }

    /// Reads an Octet String (RFC 2741 §5.3): length, data, padding to a
    /// 4-byte boundary.
    pub fn read_octet_string(&mut self) -> Result<Vec<u8>, ParseError> {
        let len = self.read_u32()? as usize;
        let data = self.take(len)?.to_vec();
        self.skip(padding(len))?;
        Ok(data)
    }

    /// Splits off a sub-reader covering the next `n` bytes.
    pub fn sub_reader(&mut self, n: usize) -> Result<WireReader<'a>, ParseError> {
        let bytes = self.take(n)?;
        Ok(WireReader::new(bytes, self.order))
    }
}

/// Growable output buffer writing integers in a fixed byte order.
#[derive(Debug, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
    order: ByteOrder,
}

impl WireWriter {
    pub fn new(order: ByteOrder) -> Self {
        WireWriter {
            buf: Vec::new(),
            order,
        }
    }

    pub fn with_capacity(order: ByteOrder, capacity: usize) -> Self {
        WireWriter {
            buf: Vec::with_capacity(capacity),
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        match self.order {
            ByteOrder::BigEndian => self.buf.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::LittleEndian => self.buf.extend_from_slice(&v.to_le_bytes()),
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::BigEndian => self.buf.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::LittleEndian => self.buf.extend_from_slice(&v.to_le_bytes()),
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::BigEndian => self.buf.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::LittleEndian => self.buf.extend_from_slice(&v.to_le_bytes()),
        }
    }

    /// Writes `n` zeroed reserved bytes.
    pub fn write_reserved(&mut self, n: usize) {
        self.buf.extend(std::iter::repeat_n(0u8, n));
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes an Octet String: length, data, zero padding to 4 bytes.
    pub fn write_octet_string(&mut self, data: &[u8]) {
        self.write_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        self.write_reserved(padding(data.len()));
    }

    /// Overwrites a previously written u32 at `offset`.
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        let bytes = match self.order {
            ByteOrder::BigEndian => v.to_be_bytes(),
            ByteOrder::LittleEndian => v.to_le_bytes(),
        };
        self.buf[offset..offset + 4].copy_from_slice(&bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Padding needed to bring `len` to a multiple of four.
pub fn padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}
