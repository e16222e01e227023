//! Incremental `text/event-stream` decoder

/// One dispatched event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Buffers byte chunks and yields complete frames.
///
/// Lines end with `\n` (a preceding `\r` is dropped). `data:` lines are joined
/// with newlines, lines starting with `:` are heartbeats, and a blank line
/// dispatches the pending frame. Partial lines wait for the next chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Dispatch whatever is pending when the stream ends without a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).to_string();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            // Trailing partial line is treated as complete
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry and unknown fields are ignored
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            id: self.id.clone(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"inserted\": 1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"inserted\": 1}");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: progress\nda").is_empty());
        assert!(decoder.feed(b"ta: {\"a\":").is_empty());
        let frames = decoder.feed(b" 1}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("progress"));
        assert_eq!(frames[0].data, "{\"a\": 1}");
    }

    #[test]
    fn test_multiple_frames_and_heartbeats() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": ping\n\ndata: one\n\nid: 7\ndata: two\ndata: three\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "one");
        assert_eq!(frames[1].data, "two\nthree");
        assert_eq!(frames[1].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: noop\n\n").is_empty());
        let frames = decoder.feed(b"data: x\n\n");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn test_finish_flushes_pending() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.data, "tail");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: \xff\n\n");
        assert_eq!(frames[0].data, "\u{fffd}");
    }
}
