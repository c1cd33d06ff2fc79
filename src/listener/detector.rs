// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ready-marker detection over a byte stream.

/// Upper bound on unterminated bytes kept between reads.
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Finds the ready marker in a stream that arrives in arbitrary chunks.
///
/// Complete lines are matched one by one. After the complete lines, the
/// unterminated tail is matched too, because the fixture may omit the final
/// newline; a matching tail is reported once and discarded. Matching is a
/// case-insensitive substring test.
///
/// # Examples
///
/// ```
/// use camtest_lib::listener::ReadyDetector;
///
/// let mut detector = ReadyDetector::new("I am ready");
/// assert!(detector.feed(b"I am r").is_empty());
/// assert_eq!(detector.feed(b"eady\n"), vec!["I am ready".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct ReadyDetector {
    marker: String,
    buffer: Vec<u8>,
}

impl ReadyDetector {
    /// Creates a detector for `marker`.
    #[must_use]
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_lowercase(),
            buffer: Vec::new(),
        }
    }

    /// Returns the bytes held back waiting for a newline.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Discards any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Appends `data` and returns every message that contains the marker.
    ///
    /// Returned messages are trimmed of surrounding whitespace.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);
        let mut ready = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let message = String::from_utf8_lossy(&line[..pos]).trim().to_string();
            tracing::trace!(message = %message, "Status line");
            if self.matches(&message) {
                ready.push(message);
            }
        }

        if !self.buffer.is_empty() {
            let tail = String::from_utf8_lossy(&self.buffer).trim().to_string();
            if self.matches(&tail) {
                ready.push(tail);
                self.buffer.clear();
            } else if self.buffer.len() > MAX_BUFFERED {
                let excess = self.buffer.len() - MAX_BUFFERED;
                tracing::warn!(dropped = excess, "Status buffer overflow, dropping oldest bytes");
                self.buffer.drain(..excess);
            }
        }

        ready
    }

    fn matches(&self, message: &str) -> bool {
        message.to_lowercase().contains(&self.marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_marker_fires_once() {
        let mut detector = ReadyDetector::new("I am ready");
        assert!(detector.feed(b"I am r").is_empty());
        assert_eq!(detector.feed(b"eady\n"), vec!["I am ready"]);
        assert!(detector.buffered().is_empty());
    }

    #[test]
    fn unterminated_marker_fires_once() {
        let mut detector = ReadyDetector::new("I am ready");
        assert_eq!(detector.feed(b"I am ready"), vec!["I am ready"]);
        // A late terminator must not fire again
        assert!(detector.feed(b"\n").is_empty());
    }

    #[test]
    fn match_is_case_insensitive_substring() {
        let mut detector = ReadyDetector::new("I am ready");
        let found = detector.feed(b"PCB-07: i AM READY now\r\nbooting\n");
        assert_eq!(found, vec!["PCB-07: i AM READY now"]);
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let mut detector = ReadyDetector::new("ready");
        let found = detector.feed(b"ready 1\nnoise\nready 2\npartial");
        assert_eq!(found, vec!["ready 1", "ready 2"]);
        assert_eq!(detector.buffered(), b"partial");
    }

    #[test]
    fn buffer_is_bounded() {
        let mut detector = ReadyDetector::new("I am ready");
        let junk = vec![b'x'; MAX_BUFFERED + 100];
        assert!(detector.feed(&junk).is_empty());
        assert_eq!(detector.buffered().len(), MAX_BUFFERED);

        detector.reset();
        assert!(detector.buffered().is_empty());
    }

    #[test]
    fn invalid_utf8_is_tolerated() {
        let mut detector = ReadyDetector::new("I am ready");
        let found = detector.feed(b"\xff\xfeI am ready\n");
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("I am ready"));
    }
}
