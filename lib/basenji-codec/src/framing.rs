//! Splitting of datagram payloads into individual packets.
use std::borrow::Cow;

/// Splits a payload into lines.
///
/// Lines are terminated by `\n` or `\r\n`, and the final line does not need a terminator. Lines that are empty or
/// contain only whitespace are skipped.
#[derive(Clone)]
pub struct LineFramer<'a> {
    remaining: &'a [u8],
}

impl<'a> LineFramer<'a> {
    /// Creates a framer over `payload`.
    pub fn new(payload: &'a [u8]) -> Self {
        Self { remaining: payload }
    }
}

impl<'a> Iterator for LineFramer<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while !self.remaining.is_empty() {
            let line = match memchr::memchr(b'\n', self.remaining) {
                Some(idx) => {
                    let line = &self.remaining[..idx];
                    self.remaining = &self.remaining[idx + 1..];
                    line
                }
                None => std::mem::take(&mut self.remaining),
            };

            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if !line.iter().all(u8::is_ascii_whitespace) {
                return Some(line);
            }
        }

        None
    }
}

/// Replaces invalid UTF-8 sequences in `payload` with U+FFFD.
///
/// Valid payloads are returned as-is without copying.
pub fn decode_utf8_lossy(payload: &[u8]) -> Cow<'_, [u8]> {
    match String::from_utf8_lossy(payload) {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}
