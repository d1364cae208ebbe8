//! Server-sent events decoding for streamed model output.
//!
//! Both providers stream `data: <json>` events separated by blank lines.
//! [`SseDecoder`] turns arbitrary network chunks into complete event
//! payloads; [`decode_stream`] drives it over a response body and maps each
//! payload to a text delta with a provider-specific parser.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::ModelError;
use crate::handle::ChunkStream;

/// Incremental SSE parser. Only `data` fields are kept; comments and other
/// fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the payloads of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.line(line.strip_suffix('\r').unwrap_or(&line), &mut events);
        }
        events
    }

    /// Flush a trailing event not followed by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest);
            self.line(line.strip_suffix('\r').unwrap_or(&line), &mut events);
        }
        if let Some(data) = self.data.take() {
            events.push(data);
        }
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if let Some(data) = self.data.take() {
                events.push(data);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
    }
}

/// What one event payload means to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Text(String),
    /// The model finished; the stream ends cleanly.
    Done,
    /// Keep-alive or metadata event with no text.
    Skip,
}

pub type EventParser = fn(&str) -> Result<Delta, ModelError>;

struct Decoding<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    body_finished: bool,
    parse: EventParser,
}

/// Turn a response body into a chunk stream.
///
/// The stream yields non-empty text deltas, ends at [`Delta::Done`], and ends
/// with an error if the body fails or closes before the model signalled
/// completion.
pub fn decode_stream<S, B>(body: S, parse: EventParser) -> ChunkStream
where
    S: Stream<Item = Result<B, ModelError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = Decoding {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        body_finished: false,
        parse,
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(payload) = state.pending.pop_front() {
                match (state.parse)(&payload) {
                    Ok(Delta::Text(text)) if !text.is_empty() => return Some((Ok(text), Some(state))),
                    Ok(Delta::Text(_)) | Ok(Delta::Skip) => continue,
                    Ok(Delta::Done) => return None,
                    Err(e) => return Some((Err(e), None)),
                }
            }
            if state.body_finished {
                let err = ModelError::Unavailable(
                    "stream ended before the model finished its answer".to_string(),
                );
                return Some((Err(err), None));
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    state.body_finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}
