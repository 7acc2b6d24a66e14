//! Line-level decoding of streaming completion responses
//!
//! A streaming response body is a sequence of newline-delimited lines:
//! - `data: {"choices":[{"text":"..."}]}` carries one token chunk
//! - `data: [DONE]` terminates the stream
//! - blank lines and `:` comments are keepalives
//!
//! [`LineBuffer`] turns raw body chunks into lines, [`StreamDecoder`] turns
//! lines into [`StreamEvent`]s.

use crate::error::StreamDecodeError;
use serde_json::Value;
use std::time::Instant;

/// Prefix every data-bearing line starts with
pub const DATA_PREFIX: &str = "data:";

/// Exact line marking the end of a stream
pub const TERMINATION_SENTINEL: &str = "data: [DONE]";

/// A decoded unit of a response stream, stamped with its arrival time
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The first data-bearing line of the stream. Also a data chunk.
    FirstToken { at: Instant, text: String },
    /// Any later data-bearing line
    DataChunk { at: Instant, text: String },
    /// The termination sentinel
    Termination { at: Instant },
    /// Blank line or keepalive comment
    Ignorable,
}

impl StreamEvent {
    /// True for events that carry a token
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            StreamEvent::FirstToken { .. } | StreamEvent::DataChunk { .. }
        )
    }

    pub fn token_text(&self) -> Option<&str> {
        match self {
            StreamEvent::FirstToken { text, .. } | StreamEvent::DataChunk { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }
}

/// Stateful classifier for the lines of one response stream
///
/// Holds no line data between calls; the only state is the line counter,
/// whether a data line was already seen (first-token detection is
/// positional), and whether the sentinel arrived.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    line_no: usize,
    data_lines: usize,
    terminated: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one raw line received at `at`
    ///
    /// Lines offered after the sentinel are reported as `Ignorable`.
    pub fn decode_line(&mut self, at: Instant, line: &str) -> Result<StreamEvent, StreamDecodeError> {
        self.line_no += 1;
        if self.terminated {
            return Ok(StreamEvent::Ignorable);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return Ok(StreamEvent::Ignorable);
        }

        if trimmed == TERMINATION_SENTINEL {
            self.terminated = true;
            return Ok(StreamEvent::Termination { at });
        }

        let payload = trimmed
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| StreamDecodeError::MissingPrefix {
                line_no: self.line_no,
                line: trimmed.to_string(),
            })?
            .trim_start();

        let text = self.extract_text(payload, trimmed)?;

        self.data_lines += 1;
        if self.data_lines == 1 {
            Ok(StreamEvent::FirstToken { at, text })
        } else {
            Ok(StreamEvent::DataChunk { at, text })
        }
    }

    fn extract_text(&self, payload: &str, line: &str) -> Result<String, StreamDecodeError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|source| StreamDecodeError::InvalidJson {
                line_no: self.line_no,
                line: line.to_string(),
                source,
            })?;

        value
            .pointer("/choices/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StreamDecodeError::MissingText {
                line_no: self.line_no,
                line: line.to_string(),
            })
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of data-bearing lines decoded so far
    pub fn data_lines(&self) -> usize {
        self.data_lines
    }
}

/// Iterator adapter over timestamped lines, see [`decode_lines`]
pub struct DecodedEvents<I> {
    lines: I,
    decoder: StreamDecoder,
    done: bool,
}

impl<I, S> Iterator for DecodedEvents<I>
where
    I: Iterator<Item = (Instant, S)>,
    S: AsRef<str>,
{
    type Item = Result<StreamEvent, StreamDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        for (at, line) in self.lines.by_ref() {
            match self.decoder.decode_line(at, line.as_ref()) {
                Ok(StreamEvent::Ignorable) => continue,
                Ok(event) => {
                    if matches!(event, StreamEvent::Termination { .. }) {
                        self.done = true;
                    }
                    return Some(Ok(event));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        self.done = true;
        None
    }
}

/// Lazily decode timestamped lines, skipping ignorable ones
///
/// Stops pulling input right after the termination sentinel or the first
/// decode error.
pub fn decode_lines<I, S>(lines: I) -> DecodedEvents<I::IntoIter>
where
    I: IntoIterator<Item = (Instant, S)>,
    S: AsRef<str>,
{
    DecodedEvents {
        lines: lines.into_iter(),
        decoder: StreamDecoder::new(),
        done: false,
    }
}

/// Longest line a stream may buffer before the call is rejected
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Reassembles complete lines from arbitrarily split body chunks
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character split
/// across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.pending.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        lines
    }

    /// Bytes held back waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush a trailing line that had no final newline
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chunk(text: &str) -> String {
        format!("data: {{\"choices\":[{{\"text\":\"{}\"}}]}}", text)
    }

    #[test]
    fn test_first_data_line_is_first_token() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        let first = decoder.decode_line(t0, &chunk("Hello")).unwrap();
        let second = decoder.decode_line(t0, &chunk(" world")).unwrap();

        assert_eq!(
            first,
            StreamEvent::FirstToken {
                at: t0,
                text: "Hello".to_string()
            }
        );
        assert_eq!(
            second,
            StreamEvent::DataChunk {
                at: t0,
                text: " world".to_string()
            }
        );
        assert_eq!(decoder.data_lines(), 2);
    }

    #[test]
    fn test_blank_and_keepalive_lines_are_ignorable() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        assert_eq!(decoder.decode_line(t0, "").unwrap(), StreamEvent::Ignorable);
        assert_eq!(decoder.decode_line(t0, "   \t").unwrap(), StreamEvent::Ignorable);
        assert_eq!(decoder.decode_line(t0, ": ping").unwrap(), StreamEvent::Ignorable);

        // Ignorable lines must not consume the first-token slot
        let event = decoder.decode_line(t0, &chunk("a")).unwrap();
        assert!(matches!(event, StreamEvent::FirstToken { .. }));
    }

    #[test]
    fn test_empty_first_chunk_still_counts_as_first_token() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        let event = decoder.decode_line(t0, &chunk("")).unwrap();
        assert_eq!(event.token_text(), Some(""));
        assert!(matches!(event, StreamEvent::FirstToken { .. }));
    }

    #[test]
    fn test_sentinel_terminates() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        let event = decoder.decode_line(t0, "data: [DONE]\r").unwrap();
        assert_eq!(event, StreamEvent::Termination { at: t0 });
        assert!(decoder.is_terminated());

        // Anything after the sentinel is not decoded
        let after = decoder.decode_line(t0, "garbage").unwrap();
        assert_eq!(after, StreamEvent::Ignorable);
    }

    #[test]
    fn test_prefix_without_space_is_accepted() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        let event = decoder
            .decode_line(t0, "data:{\"choices\":[{\"text\":\"x\"}]}")
            .unwrap();
        assert_eq!(event.token_text(), Some("x"));
    }

    #[test]
    fn test_invalid_json_reports_line_number() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        decoder.decode_line(t0, "").unwrap();
        decoder.decode_line(t0, &chunk("ok")).unwrap();
        let err = decoder.decode_line(t0, "data: {not json").unwrap_err();

        assert!(matches!(err, StreamDecodeError::InvalidJson { .. }));
        assert_eq!(err.line_no(), 3);
        assert!(err.to_string().contains("{not json"));
    }

    #[test]
    fn test_missing_text_field_is_an_error() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        let err = decoder
            .decode_line(t0, "data: {\"choices\":[{\"delta\":{}}]}")
            .unwrap_err();
        assert!(matches!(err, StreamDecodeError::MissingText { line_no: 1, .. }));

        let err = decoder.decode_line(t0, "data: {\"choices\":[]}").unwrap_err();
        assert!(matches!(err, StreamDecodeError::MissingText { line_no: 2, .. }));

        let err = decoder
            .decode_line(t0, "data: {\"choices\":[{\"text\":7}]}")
            .unwrap_err();
        assert!(matches!(err, StreamDecodeError::MissingText { line_no: 3, .. }));
    }

    #[test]
    fn test_line_without_prefix_is_an_error() {
        let t0 = Instant::now();
        let mut decoder = StreamDecoder::new();

        let err = decoder.decode_line(t0, "event: message").unwrap_err();
        assert!(matches!(err, StreamDecodeError::MissingPrefix { line_no: 1, .. }));
    }

    #[test]
    fn test_decode_lines_stops_after_sentinel() {
        let t0 = Instant::now();
        let mut pulled = 0;
        let lines = vec![
            (t0, chunk("A")),
            (t0, String::new()),
            (t0, TERMINATION_SENTINEL.to_string()),
            (t0, "never decoded".to_string()),
        ];
        let counted = lines.into_iter().inspect(|_| pulled += 1);

        let events: Vec<_> = decode_lines(counted).collect::<Result<_, _>>().unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Termination { .. }));
        assert_eq!(pulled, 3);
    }

    #[test]
    fn test_decode_lines_stops_after_error() {
        let t0 = Instant::now();
        let lines = vec![
            (t0, chunk("A")),
            (t0 + Duration::from_millis(5), "data: nope".to_string()),
            (t0, chunk("B")),
        ];

        let events: Vec<_> = decode_lines(lines).collect();

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
    }

    #[test]
    fn test_line_buffer_reassembles_split_lines() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"data: {\"choi").is_empty());
        let lines = buffer.push(b"ces\":[]}\r\n\ndata: [DO");
        assert_eq!(lines, vec!["data: {\"choices\":[]}".to_string(), String::new()]);

        let lines = buffer.push(b"NE]\n");
        assert_eq!(lines, vec![TERMINATION_SENTINEL.to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_split_utf8_intact() {
        let mut buffer = LineBuffer::new();
        let bytes = "data: é\n".as_bytes();
        // 'é' is two bytes; split between them
        let split = "data: ".len() + 1;

        assert!(buffer.push(&bytes[..split]).is_empty());
        let lines = buffer.push(&bytes[split..]);
        assert_eq!(lines, vec!["data: é".to_string()]);
    }

    #[test]
    fn test_line_buffer_flushes_trailing_line() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"data: [DONE]");
        assert_eq!(buffer.pending_len(), TERMINATION_SENTINEL.len());
        assert_eq!(buffer.finish(), Some(TERMINATION_SENTINEL.to_string()));
        assert_eq!(buffer.finish(), None);
    }
}
