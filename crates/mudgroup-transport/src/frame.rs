//! Length-prefixed framing.
//!
//! Every message on the wire is written as
//!
//! ```text
//! <ASCII decimal length><single space><exactly `length` bytes>
//! ```
//!
//! [`FrameParser`] is an incremental state machine: bytes can arrive split
//! at any point (half a length prefix, a payload spread over three TCP
//! segments, two frames in one read) and the parser stitches them back
//! together. Completed frames are queued and handed out in arrival order.

use std::collections::VecDeque;

use crate::FrameError;

/// Largest payload accepted by default (1 MiB).
///
/// A character update is a few hundred bytes; anything near this limit is
/// either corrupt or hostile.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Wraps a payload in its length prefix.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let prefix = format!("{} ", payload.len());
    let mut out = Vec::with_capacity(prefix.len() + payload.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(payload);
    out
}

// ---------------------------------------------------------------------------
// FrameParser
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ParseState {
    /// Accumulating the decimal length prefix.
    Length(usize),
    /// Collecting `expected` payload bytes.
    Payload { expected: usize, buf: Vec<u8> },
}

/// Incremental decoder for the length-prefixed stream.
///
/// ## States
///
/// ```text
///        digit: value = value * 10 + digit
///       ┌────┐
///       ▼    │       ' ' and value > 0
///    Length ─┴──────────────────────────▶ Payload
///       ▲                                   │
///       └──────── `expected` bytes read ────┘
/// ```
///
/// Any other byte while reading the length resets the value to zero
/// instead of failing, which lets the parser resynchronize on noise. A
/// length larger than `max_frame_len` (or one that overflows `usize`) is
/// a [`FrameError::TooLarge`].
#[derive(Debug)]
pub struct FrameParser {
    state: ParseState,
    max_frame_len: usize,
    ready: VecDeque<Vec<u8>>,
}

impl FrameParser {
    /// Creates a parser that rejects frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: ParseState::Length(0),
            max_frame_len,
            ready: VecDeque::new(),
        }
    }

    /// Feeds raw bytes into the parser.
    ///
    /// Frames completed before an error stay queued; the offending partial
    /// frame is discarded.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<(), FrameError> {
        while !data.is_empty() {
            match &mut self.state {
                ParseState::Length(value) => {
                    let byte = data[0];
                    data = &data[1..];
                    match byte {
                        b'0'..=b'9' => {
                            let next = value
                                .checked_mul(10)
                                .and_then(|v| v.checked_add(usize::from(byte - b'0')));
                            match next {
                                Some(n) if n <= self.max_frame_len => *value = n,
                                _ => {
                                    self.state = ParseState::Length(0);
                                    return Err(FrameError::TooLarge {
                                        max: self.max_frame_len,
                                    });
                                }
                            }
                        }
                        b' ' if *value > 0 => {
                            let expected = *value;
                            self.state = ParseState::Payload {
                                expected,
                                buf: Vec::with_capacity(expected),
                            };
                        }
                        _ => *value = 0,
                    }
                }
                ParseState::Payload { expected, buf } => {
                    let take = (*expected - buf.len()).min(data.len());
                    buf.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if buf.len() == *expected {
                        let frame = std::mem::take(buf);
                        self.ready.push_back(frame);
                        self.state = ParseState::Length(0);
                    }
                }
            }
        }
        Ok(())
    }

    /// Pops the oldest completed frame.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Returns `true` if no partial frame is being assembled.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParseState::Length(0))
    }

    /// Drops queued frames and any partial frame in progress.
    pub fn reset(&mut self) {
        self.state = ParseState::Length(0);
        self.ready.clear();
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}
