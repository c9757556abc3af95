//! The JSON lines written for every key press.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};

use crate::error::TypeTraceError;
use crate::keyboard::KeyEvent;
use crate::TypeTraceResult;

/// Receives the key presses the run loop accepts.
pub trait KeyEventSink {
    fn handle_key(&mut self, ev: &KeyEvent) -> TypeTraceResult<()>;
}

impl<S: KeyEventSink + ?Sized> KeyEventSink for &mut S {
    fn handle_key(&mut self, ev: &KeyEvent) -> TypeTraceResult<()> {
        (**self).handle_key(ev)
    }
}

/// One line of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmittedRecord<'a> {
    pub key_name: &'a str,
    pub key_code: u32,
}

impl From<&KeyEvent> for EmittedRecord<'static> {
    fn from(ev: &KeyEvent) -> Self {
        EmittedRecord {
            key_name: ev.key_name(),
            key_code: ev.code,
        }
    }
}

impl EmittedRecord<'_> {
    /// Append the record, newline-terminated, to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> serde_json::Result<()> {
        let mut ser = Serializer::with_formatter(&mut *buf, SpacedFormatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        Ok(())
    }
}

/// Compact JSON with a space after `:` and `,`: `{"a": 1, "b": 2}`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Writes every key press as a JSON line to `W`.
///
/// Each line is written with a single `write_all` and flushed right away, so
/// the consumer never waits on a buffered record.
#[derive(Debug)]
pub struct JsonEmitter<W> {
    out: W,
    buf: Vec<u8>,
}

impl<W: Write> JsonEmitter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            buf: Vec::with_capacity(64),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> KeyEventSink for JsonEmitter<W> {
    fn handle_key(&mut self, ev: &KeyEvent) -> TypeTraceResult<()> {
        self.buf.clear();
        EmittedRecord::from(ev)
            .encode(&mut self.buf)
            .map_err(|e| TypeTraceError::EmissionFailed(e.into()))?;

        self.out
            .write_all(&self.buf)
            .and_then(|()| self.out.flush())
            .map_err(TypeTraceError::EmissionFailed)
    }
}
