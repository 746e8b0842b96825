use bytes::Bytes;
use serde::de::IgnoredAny;
use tracing::debug;

use crate::config::DEFAULT_MAX_UNIT_BYTES;

/// Result of feeding bytes to a [`StreamParser`].
///
/// Every variant says how many input bytes it accounts for, so the sum of
/// `consumed`/`len` over all events is exactly how far the caller may
/// advance its offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseEvent {
    /// A well-formed unit. `consumed` includes separators before it.
    Unit { content: Bytes, consumed: u64 },
    /// Bytes that cannot start or form a unit.
    Malformed { len: u64 },
    /// Separators with no unit after them yet.
    Skipped { len: u64 },
}

impl ParseEvent {
    /// Input bytes this event accounts for.
    pub fn consumed(&self) -> u64 {
        match self {
            ParseEvent::Unit { consumed, .. } => *consumed,
            ParseEvent::Malformed { len } | ParseEvent::Skipped { len } => *len,
        }
    }
}

/// Push parser splitting a byte stream into units.
///
/// Bytes belonging to an incomplete unit at the end of the input stay
/// buffered and are not reported until a later `feed` completes them.
pub trait StreamParser: Send {
    fn feed(&mut self, bytes: &[u8]) -> Vec<ParseEvent>;

    /// Bytes held back as an incomplete unit.
    fn buffered(&self) -> usize;
}

/// Splits concatenated, comma or newline separated JSON objects and arrays.
///
/// A unit starts at `{` or `[` and ends where the bracket depth returns to
/// zero, ignoring brackets inside strings. Each unit is validated with
/// `serde_json`; anything between units that is not whitespace or a comma
/// is reported as malformed up to the next `{` or `[`.
///
/// An unclosed bracket or string would otherwise swallow the rest of the
/// stream, so an incomplete unit longer than `max_unit_bytes` is abandoned:
/// the bytes up to the next line starting with `{` or `[` (or everything
/// buffered, if there is no such line) are reported as malformed.
#[derive(Debug)]
pub struct JsonStreamParser {
    buf: Vec<u8>,
    max_unit_bytes: usize,
}

impl Default for JsonStreamParser {
    fn default() -> Self {
        Self::with_max_unit_bytes(usize::try_from(DEFAULT_MAX_UNIT_BYTES).unwrap_or(usize::MAX))
    }
}

enum Scan {
    /// Complete bracketed span ending before this index.
    Complete(usize),
    Incomplete,
}

impl JsonStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_unit_bytes(max_unit_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_unit_bytes,
        }
    }

    /// Index of the first line start past byte 0 that begins with `{` or `[`.
    fn next_line_opener(bytes: &[u8]) -> Option<usize> {
        bytes
            .windows(2)
            .position(|w| w[0] == b'\n' && Self::is_opener(w[1]))
            .map(|i| i + 1)
    }

    fn is_separator(b: u8) -> bool {
        b.is_ascii_whitespace() || b == b','
    }

    fn is_opener(b: u8) -> bool {
        b == b'{' || b == b'['
    }

    fn scan_unit(bytes: &[u8]) -> Scan {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Scan::Complete(i + 1);
                    }
                }
                _ => {}
            }
        }
        Scan::Incomplete
    }
}

impl StreamParser for JsonStreamParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<ParseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut pos = 0;

        while pos < self.buf.len() {
            let rest = &self.buf[pos..];
            let lead = rest.iter().take_while(|&&b| Self::is_separator(b)).count();
            if lead == rest.len() {
                events.push(ParseEvent::Skipped { len: lead as u64 });
                pos += lead;
                break;
            }

            let body = &rest[lead..];
            if !Self::is_opener(body[0]) {
                let garbage = body.iter().position(|&b| Self::is_opener(b)).unwrap_or(body.len());
                debug!(len = lead + garbage, "skipping malformed bytes");
                events.push(ParseEvent::Malformed {
                    len: (lead + garbage) as u64,
                });
                pos += lead + garbage;
                continue;
            }

            match Self::scan_unit(body) {
                Scan::Incomplete if body.len() > self.max_unit_bytes => {
                    let skip = Self::next_line_opener(body).unwrap_or(body.len());
                    debug!(len = lead + skip, "abandoning oversized incomplete unit");
                    events.push(ParseEvent::Malformed {
                        len: (lead + skip) as u64,
                    });
                    pos += lead + skip;
                }
                Scan::Incomplete => break,
                Scan::Complete(end) => {
                    let unit = &body[..end];
                    let consumed = (lead + end) as u64;
                    if serde_json::from_slice::<IgnoredAny>(unit).is_ok() {
                        events.push(ParseEvent::Unit {
                            content: Bytes::copy_from_slice(unit),
                            consumed,
                        });
                    } else {
                        debug!(len = consumed, "skipping malformed unit");
                        events.push(ParseEvent::Malformed { len: consumed });
                    }
                    pos += lead + end;
                }
            }
        }

        self.buf.drain(..pos);
        events
    }

    fn buffered(&self) -> usize {
        self.buf.len()
    }
}
