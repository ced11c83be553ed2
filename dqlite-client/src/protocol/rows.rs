//! Result sets and file sets decoded from a response body.
//!
//! A Rows response body holds the column count and names, then one block per
//! row: a header with a 4-bit type tag per column (padded to a word), followed
//! by the column values. Instead of another row header the body may end with
//! a marker word, [`ROWS_PART`] when the server will send the rest of the
//! result set in further responses, or [`ROWS_DONE`] at the end.

use super::constants::{ColumnType, ROWS_DONE, ROWS_PART};
use super::message::{get_column, Message, WORD_SIZE};
use super::value::Value;
use crate::error::{Error, Result};

/// Outcome of advancing a result set by one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowsStep {
    Row(Vec<Value>),
    /// More rows follow in the next response.
    Part,
    /// No more rows.
    Done,
}

enum Marker {
    Types,
    Part,
    Done,
}

/// Cursor over the rows encoded in a response message.
///
/// The message itself is passed to each call, so the same cursor survives a
/// [`Protocol::more`](super::Protocol::more) that refills it.
#[derive(Debug, Clone)]
pub struct Rows {
    columns: Vec<String>,
    types: Vec<u8>,
    finished: Option<RowsStep>,
}

impl Rows {
    /// Reads the column count and names at the start of a Rows body.
    pub fn decode(message: &mut Message) -> Result<Self> {
        let count = message.get_u64()?;
        let mut columns = Vec::new();
        for _ in 0..count {
            columns.push(message.get_string()?);
        }
        Ok(Self {
            types: vec![0; columns.len()],
            columns,
            finished: None,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Size in bytes of a row header: 4 bits per column, rounded up to a word.
    fn header_size(&self) -> usize {
        let bits = self.columns.len() * 4;
        let word_bits = WORD_SIZE * 8;
        bits.div_ceil(word_bits).max(1) * WORD_SIZE
    }

    fn read_header(&mut self, message: &mut Message) -> Result<Marker> {
        for i in 0..self.header_size() {
            let slot = message.get_u8()?;
            match slot {
                ROWS_PART => return Ok(Marker::Part),
                ROWS_DONE => return Ok(Marker::Done),
                _ => {}
            }

            let index = i * 2;
            if let Some(ty) = self.types.get_mut(index) {
                *ty = slot & 0x0f;
            }
            if let Some(ty) = self.types.get_mut(index + 1) {
                *ty = slot >> 4;
            }
        }
        Ok(Marker::Types)
    }

    /// Decodes the next row.
    ///
    /// Once `Part` or `Done` has been returned, every later call returns it again.
    pub fn next(&mut self, message: &mut Message) -> Result<RowsStep> {
        if let Some(step) = &self.finished {
            return Ok(step.clone());
        }

        match self.read_header(message)? {
            Marker::Part => {
                self.finished = Some(RowsStep::Part);
                return Ok(RowsStep::Part);
            }
            Marker::Done => {
                self.finished = Some(RowsStep::Done);
                return Ok(RowsStep::Done);
            }
            Marker::Types => {}
        }

        let mut row = Vec::with_capacity(self.types.len());
        for &tag in &self.types {
            row.push(get_column(message, tag)?);
        }
        Ok(RowsStep::Row(row))
    }

    /// Type names of the upcoming row without consuming it.
    ///
    /// When the cursor sits on a marker, the types of the last row read are
    /// returned.
    pub fn column_types(&mut self, message: &mut Message) -> Result<Vec<&'static str>> {
        if self.finished.is_none() {
            let start = message.offset();
            let marker = self.read_header(message);
            message.rewind(start);
            marker?;
        }

        self.types
            .iter()
            .map(|&tag| {
                ColumnType::from_u8(tag)
                    .map(ColumnType::type_name)
                    .ok_or_else(|| Error::Malformed(format!("unknown data type {tag}")))
            })
            .collect()
    }

    /// How the result set in `message` ends, judged from its last byte.
    ///
    /// Used when a caller stops reading early and must decide whether the
    /// server still has responses queued.
    pub fn trailing_marker(&self, message: &Message) -> Result<RowsStep> {
        if let Some(step) = &self.finished {
            return Ok(step.clone());
        }
        match message.last_byte() {
            Some(ROWS_PART) => Ok(RowsStep::Part),
            Some(ROWS_DONE) => Ok(RowsStep::Done),
            _ => Err(Error::Malformed("unexpected end of message".into())),
        }
    }
}

/// One database file returned by a Dump request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub data: Vec<u8>,
}

/// Reads a file set: a count, then `{name, length, bytes}` per file.
pub fn get_files(message: &mut Message) -> Result<Vec<File>> {
    let mut remaining = message.get_u64()?;
    let mut files = Vec::new();
    while remaining > 0 {
        remaining -= 1;
        let name = message.get_string()?;
        let length = usize::try_from(message.get_u64()?)
            .map_err(|_| Error::Malformed("file length overflows usize".into()))?;
        let data = message.get_bytes(length)?;
        files.push(File { name, data });
    }
    Ok(files)
}
