//! Newline framing over an arbitrarily chunked byte stream
//!
//! The peer writes one compact JSON document per line. Transports hand over chunks of any
//! size, so a chunk may carry a fraction of a frame, exactly one frame, or several frames
//! plus the head of the next one. [`FrameParser`] keeps the unterminated tail between calls.
//!
//! Each call to [`FrameParser::feed`] extracts at most `max_frames_per_feed` frames. When the
//! limit is reached the remaining complete frames stay buffered and are returned by the next
//! call, which may pass an empty chunk.

use tracing::trace;

/// Frame delimiter
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default cap on frames extracted by a single `feed`
pub const DEFAULT_MAX_FRAMES_PER_FEED: usize = 20;

/// Incremental newline splitter.
///
/// Frames are returned as raw bytes; a multi-byte UTF-8 sequence split across two chunks is
/// therefore reassembled before anybody tries to decode it.
#[derive(Debug, Clone)]
pub struct FrameParser {
    buffer: Vec<u8>,
    max_frames_per_feed: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAMES_PER_FEED)
    }
}

impl FrameParser {
    /// A limit of zero is treated as one
    pub fn new(max_frames_per_feed: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frames_per_feed: max_frames_per_feed.max(1),
        }
    }

    pub fn max_frames_per_feed(&self) -> usize {
        self.max_frames_per_feed
    }

    /// Append `chunk` and hand every complete frame, in order, to `on_frame`.
    ///
    /// Returns the number of frames delivered.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(Vec<u8>),
    {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.is_empty() {
            return 0;
        }

        let mut start = 0;
        let mut emitted = 0;
        while emitted < self.max_frames_per_feed {
            let Some(offset) = self.buffer[start..]
                .iter()
                .position(|byte| *byte == FRAME_DELIMITER)
            else {
                break;
            };
            let end = start + offset;
            on_frame(self.buffer[start..end].to_vec());
            start = end + 1;
            emitted += 1;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        if emitted == self.max_frames_per_feed && self.has_complete_frame() {
            trace!(
                limit = self.max_frames_per_feed,
                buffered = self.buffer.len(),
                "Frame limit reached, deferring remaining frames"
            );
        }
        emitted
    }

    /// Append `chunk` and collect the frames it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        self.feed_with(chunk, |frame| frames.push(frame));
        frames
    }

    /// Whether a delimiter is already buffered, i.e. a `feed(&[])` would yield a frame
    pub fn has_complete_frame(&self) -> bool {
        self.buffer.contains(&FRAME_DELIMITER)
    }

    /// Bytes held for frames not yet delivered
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(frames: Vec<Vec<u8>>) -> Vec<String> {
        frames
            .into_iter()
            .map(|frame| String::from_utf8(frame).unwrap())
            .collect()
    }

    #[test]
    fn test_partial_frame_completes_on_second_chunk() {
        let mut parser = FrameParser::default();

        assert!(parser.feed(br#"{"id":1,"resu"#).is_empty());
        let frames = text(parser.feed(b"lt\":true}\n"));

        assert_eq!(frames, vec![r#"{"id":1,"result":true}"#]);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut parser = FrameParser::default();
        let frames = text(parser.feed(b"{\"a\":1}\n{\"a\":2}\n"));
        assert_eq!(frames, vec![r#"{"a":1}"#, r#"{"a":2}"#]);
    }

    #[test]
    fn test_trailing_partial_is_kept() {
        let mut parser = FrameParser::default();
        let frames = text(parser.feed(b"{\"a\":1}\n{\"a\""));
        assert_eq!(frames, vec![r#"{"a":1}"#]);
        assert_eq!(parser.buffered_len(), 4);
        assert!(!parser.has_complete_frame());

        let frames = text(parser.feed(b":2}\n"));
        assert_eq!(frames, vec![r#"{"a":2}"#]);
    }

    #[test]
    fn test_empty_feed_on_empty_buffer_is_noop() {
        let mut parser = FrameParser::default();
        let mut called = false;
        assert_eq!(parser.feed_with(b"", |_| called = true), 0);
        assert!(!called);
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let stream = "{\"id\":1,\"result\":\"héllo\"}\n{\"method\":\"m\",\"params\":[]}\n[{\"id\":2}]\n"
            .as_bytes();

        let mut whole = FrameParser::default();
        let expected = whole.feed(stream);
        assert_eq!(expected.len(), 3);

        for size in 1..stream.len() {
            let mut parser = FrameParser::default();
            let mut frames = Vec::new();
            for chunk in stream.chunks(size) {
                frames.extend(parser.feed(chunk));
            }
            assert_eq!(frames, expected, "chunk size {}", size);
        }
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "\"€\"\n".as_bytes();
        let mut parser = FrameParser::default();
        // split inside the three-byte euro sign
        assert!(parser.feed(&bytes[..2]).is_empty());
        let frames = text(parser.feed(&bytes[2..]));
        assert_eq!(frames, vec!["\"€\""]);
    }

    #[test]
    fn test_frame_limit_defers_remaining_frames() {
        let mut parser = FrameParser::new(2);
        let frames = parser.feed(b"1\n2\n3\n4\n5");
        assert_eq!(text(frames), vec!["1", "2"]);
        assert!(parser.has_complete_frame());

        assert_eq!(text(parser.feed(b"")), vec!["3", "4"]);
        assert_eq!(text(parser.feed(b"\n")), vec!["5"]);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_default_limit_is_twenty() {
        let mut parser = FrameParser::default();
        let input = "x\n".repeat(25);
        assert_eq!(parser.feed(input.as_bytes()).len(), 20);
        assert_eq!(parser.feed(b"").len(), 5);
    }

    #[test]
    fn test_blank_lines_are_frames() {
        let mut parser = FrameParser::default();
        assert_eq!(text(parser.feed(b"\n\n")), vec!["", ""]);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let parser = FrameParser::new(0);
        assert_eq!(parser.max_frames_per_feed(), 1);
    }
}
