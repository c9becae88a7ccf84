//! Incremental Server-Sent-Events parsing.

use std::time::Duration;

use crate::error::{Error, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event's data lines, joined by `\n`.
    pub data: String,
    /// The event type; `"message"` unless the stream set one.
    pub event: String,
    /// The last event id seen on the stream, if any.
    pub id: Option<String>,
    /// A server-requested reconnection delay carried by this event.
    pub retry: Option<Duration>,
}

/// Incremental parser over the `text/event-stream` line protocol.
///
/// Bytes go in via [`push`](EventParser::push); completed events come out
/// of [`next_event`](EventParser::next_event). Line endings may be `\n`,
/// `\r` or `\r\n`, split anywhere across pushes.
#[derive(Debug, Default)]
pub(crate) struct EventParser {
    buf: Vec<u8>,
    /// A `\r` ended the previous scan; a following `\n` is part of it.
    pending_cr: bool,
    data: Vec<String>,
    event: Option<String>,
    retry: Option<Duration>,
    /// The last-event-id buffer; persists across events per the standard.
    current_id: Option<String>,
    /// Something dispatchable appeared since the last blank line.
    dirty: bool,
}

impl EventParser {
    pub(crate) fn new() -> EventParser {
        EventParser::default()
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Parse buffered lines until an event dispatches or input runs dry.
    pub(crate) fn next_event(&mut self) -> Result<Option<SseEvent>> {
        while let Some(line) = self.take_line() {
            if line.is_empty() {
                if let Some(event) = self.dispatch()? {
                    return Ok(Some(event));
                }
                continue;
            }
            self.field(&line)?;
        }
        Ok(None)
    }

    /// Extract the next complete line, handling the three line endings.
    fn take_line(&mut self) -> Option<String> {
        if self.pending_cr {
            // finish a \r\n split across reads
            if let Some(&b'\n') = self.buf.first() {
                self.buf.remove(0);
            }
            self.pending_cr = false;
        }
        let end = self.buf.iter().position(|&b| b == b'\n' || b == b'\r')?;
        let terminator = self.buf[end];
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        if terminator == b'\r' {
            match self.buf.first() {
                Some(&b'\n') => {
                    self.buf.remove(0);
                }
                Some(_) => {}
                // \r at the very end of the buffer: swallow a \n that may
                // arrive with the next read
                None => self.pending_cr = true,
            }
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn field(&mut self, line: &str) -> Result<()> {
        if line.starts_with(':') {
            // comment line
            return Ok(());
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            // a line without a colon is a field with an empty value
            None => (line, ""),
        };
        match name {
            "data" => {
                self.data.push(value.to_owned());
                self.dirty = true;
            }
            "event" => {
                self.event = Some(value.to_owned());
                self.dirty = true;
            }
            "id" => {
                // a NUL poisons the id per the standard; ignore such lines
                if !value.contains('\0') {
                    self.current_id = Some(value.to_owned());
                    self.dirty = true;
                }
            }
            "retry" => {
                let millis: u64 = value
                    .parse()
                    .map_err(|_| Error::sse_parsing(format!("invalid retry value {:?}", value)))?;
                self.retry = Some(Duration::from_millis(millis));
                self.dirty = true;
            }
            _ => {
                // unknown fields are ignored
            }
        }
        Ok(())
    }

    /// A blank line: emit the accumulated event, unless nothing
    /// dispatchable accumulated.
    fn dispatch(&mut self) -> Result<Option<SseEvent>> {
        let dirty = std::mem::take(&mut self.dirty);
        let data = std::mem::take(&mut self.data);
        let event = std::mem::take(&mut self.event);
        let retry = self.retry.take();
        if !dirty {
            return Ok(None);
        }
        Ok(Some(SseEvent {
            data: data.join("\n"),
            event: event.unwrap_or_else(|| "message".to_owned()),
            id: self.current_id.clone(),
            retry,
        }))
    }
}
