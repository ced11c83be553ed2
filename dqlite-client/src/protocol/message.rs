//! Frame buffer with word-aligned encode and decode primitives.
//!
//! A [`Message`] is allocated once and reused: encoders append to the body
//! and [`Message::put_header`] seals the frame; decoders read from the body a
//! session just received. [`Message::reset`] must run between uses.

use super::constants::ColumnType;
use super::value::{format_timestamp, parse_timestamp, unix_timestamp, NamedValue, Value};
use crate::error::{Error, Result};

/// Alignment unit for frames, strings and blobs.
pub const WORD_SIZE: usize = 8;

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = WORD_SIZE;

/// Rounds `size` up to the next word boundary.
pub(crate) fn padded(size: usize) -> usize {
    match size % WORD_SIZE {
        0 => size,
        trailing => size + WORD_SIZE - trailing,
    }
}

/// A single request or response.
#[derive(Debug, Clone)]
pub struct Message {
    words: u32,
    mtype: u8,
    flags: u8,
    extra: u16,
    header: [u8; HEADER_SIZE],
    body: Vec<u8>,
    offset: usize,
    initial: usize,
}

impl Message {
    /// Creates a message whose body buffer starts at `initial_size` bytes.
    ///
    /// The buffer grows when content exceeds it and shrinks back on reset.
    pub fn new(initial_size: usize) -> Self {
        assert!(
            initial_size % WORD_SIZE == 0,
            "initial buffer size is not aligned to word boundary"
        );
        Self {
            words: 0,
            mtype: 0,
            flags: 0,
            extra: 0,
            header: [0; HEADER_SIZE],
            body: vec![0; initial_size],
            offset: 0,
            initial: initial_size,
        }
    }

    /// Clears the header and cursor so the message can be encoded or decoded again.
    pub fn reset(&mut self) {
        self.words = 0;
        self.mtype = 0;
        self.flags = 0;
        self.extra = 0;
        self.header = [0; HEADER_SIZE];
        self.offset = 0;
        if self.body.len() > self.initial {
            self.body.truncate(self.initial);
            self.body.shrink_to_fit();
        }
    }

    pub fn mtype(&self) -> u8 {
        self.mtype
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn extra(&self) -> u16 {
        self.extra
    }

    pub fn words(&self) -> u32 {
        self.words
    }

    /// Current read or write position within the body.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Encoded header bytes, valid after [`Message::put_header`] or a receive.
    pub fn header(&self) -> &[u8; HEADER_SIZE] {
        &self.header
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body[..self.offset]
    }

    /// Capacity currently backing the body.
    pub fn capacity(&self) -> usize {
        self.body.len()
    }

    /// Finalizes an encoded message by filling in its header.
    ///
    /// # Panics
    ///
    /// If the body is empty or not word-aligned. Encoders always write whole
    /// words, so either case is a bug in the caller.
    pub fn put_header(&mut self, mtype: impl Into<u8>) {
        assert!(self.offset > 0, "static offset is not positive");
        assert!(self.offset % WORD_SIZE == 0, "static body is not aligned");

        self.mtype = mtype.into();
        self.flags = 0;
        self.extra = 0;
        self.words = (self.offset / WORD_SIZE) as u32;
        self.finalize();
    }

    fn finalize(&mut self) {
        assert!(self.words > 0, "empty message body");
        self.header[0..4].copy_from_slice(&self.words.to_le_bytes());
        self.header[4] = self.mtype;
        self.header[5] = self.flags;
        self.header[6..8].copy_from_slice(&self.extra.to_le_bytes());
    }

    /// Loads a received header and returns the body buffer to fill.
    ///
    /// The returned slice is exactly `words * WORD_SIZE` bytes long.
    pub fn prepare_receive(&mut self, header: [u8; HEADER_SIZE]) -> &mut [u8] {
        self.reset();
        self.header = header;
        self.words = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        self.mtype = header[4];
        self.flags = header[5];
        self.extra = u16::from_le_bytes([header[6], header[7]]);

        let size = self.body_size();
        if size > self.body.len() {
            self.body.resize(size, 0);
        }
        &mut self.body[..size]
    }

    fn body_size(&self) -> usize {
        self.words as usize * WORD_SIZE
    }

    fn buffer_for_put(&mut self, size: usize) -> &mut [u8] {
        let needed = self.offset + size;
        if needed > self.body.len() {
            let mut grown = self.body.len().max(WORD_SIZE);
            while grown < needed {
                grown *= 2;
            }
            self.body.resize(grown, 0);
        }
        let start = self.offset;
        self.offset = needed;
        &mut self.body[start..needed]
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buffer_for_put(1)[0] = v;
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buffer_for_put(2).copy_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buffer_for_put(4).copy_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buffer_for_put(8).copy_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buffer_for_put(8).copy_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buffer_for_put(8).copy_from_slice(&v.to_bits().to_le_bytes());
    }

    /// Appends `v`, a NUL terminator and zero padding to the next word.
    pub fn put_string(&mut self, v: &str) {
        let bytes = v.as_bytes();
        let buf = self.buffer_for_put(padded(bytes.len() + 1));
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()..].fill(0);
    }

    /// Appends an 8-byte length, the raw bytes, and zero padding to the next word.
    pub fn put_blob(&mut self, v: &[u8]) {
        self.put_u64(v.len() as u64);
        let buf = self.buffer_for_put(padded(v.len()));
        buf[..v.len()].copy_from_slice(v);
        buf[v.len()..].fill(0);
    }

    /// Zero-fills up to the next word boundary.
    fn put_padding(&mut self) {
        let trailing = self.offset % WORD_SIZE;
        if trailing != 0 {
            self.buffer_for_put(WORD_SIZE - trailing).fill(0);
        }
    }

    /// Encodes statement parameters: a count byte, one type tag per value
    /// padded to a word, then each value.
    ///
    /// Nothing is written when `values` is empty.
    ///
    /// # Panics
    ///
    /// If ordinals are not `1..=n` in order, or there are more than 255 values.
    pub fn put_named_values(&mut self, values: &[NamedValue]) {
        if values.is_empty() {
            return;
        }
        assert!(values.len() <= u8::MAX as usize, "too many parameters");

        self.put_u8(values.len() as u8);
        for (i, named) in values.iter().enumerate() {
            assert_eq!(named.ordinal, i + 1, "unexpected ordinal");
            self.put_u8(named.value.column_type() as u8);
        }
        self.put_padding();

        for named in values {
            match &named.value {
                Value::Integer(v) => self.put_i64(*v),
                Value::Float(v) => self.put_f64(*v),
                Value::Boolean(v) => self.put_u64(u64::from(*v)),
                Value::Blob(v) => self.put_blob(v),
                Value::Text(v) => self.put_string(v),
                Value::Null => self.put_i64(0),
                Value::Timestamp(v) => self.put_string(&format_timestamp(v)),
            }
        }
    }

    fn short_message(&self) -> Error {
        Error::ShortMessage {
            mtype: self.mtype,
            words: self.words,
            offset: self.offset,
        }
    }

    fn buffer_for_get(&mut self, size: usize) -> Result<&[u8]> {
        let end = match self.offset.checked_add(size) {
            Some(end) if end <= self.body_size() => end,
            _ => return Err(self.short_message()),
        };
        let start = self.offset;
        self.offset = end;
        Ok(&self.body[start..end])
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.buffer_for_get(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.buffer_for_get(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.get_array().map(u16::from_le_bytes)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.get_array().map(u32::from_le_bytes)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.get_array().map(u64::from_le_bytes)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        self.get_array().map(i64::from_le_bytes)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        self.get_array().map(|b| f64::from_bits(u64::from_le_bytes(b)))
    }

    /// Reads a NUL-terminated string and skips its padding.
    pub fn get_string(&mut self) -> Result<String> {
        let end = self.body_size();
        if self.offset >= end {
            return Err(self.short_message());
        }

        let rest = &self.body[self.offset..end];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Malformed("no string found".into()))?;
        let value = std::str::from_utf8(&rest[..nul])
            .map_err(|err| Error::Malformed(format!("string is not utf-8: {err}")))?
            .to_string();

        self.buffer_for_get(padded(nul + 1))?;
        Ok(value)
    }

    /// Reads a length-prefixed blob and skips its padding.
    pub fn get_blob(&mut self) -> Result<Vec<u8>> {
        let size = usize::try_from(self.get_u64()?)
            .map_err(|_| Error::Malformed("blob length overflows usize".into()))?;
        if size > self.body_size().saturating_sub(self.offset) {
            return Err(self.short_message());
        }
        let data = self.buffer_for_get(size)?.to_vec();
        let pad = padded(size) - size;
        self.buffer_for_get(pad)?;
        Ok(data)
    }

    /// Reads raw bytes with no length prefix or padding.
    pub(crate) fn get_bytes(&mut self, size: usize) -> Result<Vec<u8>> {
        if size > self.body_size().saturating_sub(self.offset) {
            return Err(self.short_message());
        }
        Ok(self.buffer_for_get(size)?.to_vec())
    }

    /// Moves the read cursor back to `offset`.
    pub(crate) fn rewind(&mut self, offset: usize) {
        debug_assert!(offset <= self.offset);
        self.offset = offset;
    }

    /// True once every body byte has been read.
    pub fn has_been_consumed(&self) -> bool {
        self.offset == self.body_size()
    }

    /// Last body byte, where result sets carry their end marker.
    pub(crate) fn last_byte(&self) -> Option<u8> {
        self.body_size()
            .checked_sub(1)
            .map(|last| self.body[last])
    }
}

/// Reads the value for a column tag.
pub(crate) fn get_column(message: &mut Message, tag: u8) -> Result<Value> {
    let ty = ColumnType::from_u8(tag)
        .ok_or_else(|| Error::Malformed(format!("unknown data type {tag}")))?;
    let value = match ty {
        ColumnType::Integer => Value::Integer(message.get_i64()?),
        ColumnType::Float => Value::Float(message.get_f64()?),
        ColumnType::Blob => Value::Blob(message.get_blob()?),
        ColumnType::Text => Value::Text(message.get_string()?),
        ColumnType::Null => {
            message.get_u64()?;
            Value::Null
        }
        ColumnType::UnixTime => Value::Timestamp(unix_timestamp(message.get_i64()?)?),
        ColumnType::Iso8601 => {
            let text = message.get_string()?;
            if text.is_empty() {
                Value::Null
            } else {
                Value::Timestamp(parse_timestamp(&text)?)
            }
        }
        ColumnType::Boolean => Value::Boolean(message.get_i64()? != 0),
    };
    Ok(value)
}
