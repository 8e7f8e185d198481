//! Streamed frame codec shared by the endpoint (encoder) and client (decoder).
//!
//! A frame is a block of `field: value` lines terminated by a blank line.
//! Recognized fields are `event` and `data`; `data` may repeat and is joined
//! with `\n`. Lines starting with `:` are comments. Blocks without an `event`
//! field default to `status`.

/// Frame event marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Status,
    Error,
    Done,
    /// Unknown or blank event name, retained for passthrough as status text.
    Other(String),
}

impl FrameEvent {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "status" => Self::Status,
            "error" => Self::Error,
            "done" => Self::Done,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Status => "status",
            Self::Error => "error",
            Self::Done => "done",
            Self::Other(name) => name,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: FrameEvent,
    pub data: Option<String>,
}

impl Frame {
    #[must_use]
    pub fn new(event: FrameEvent, data: Option<String>) -> Self {
        Self { event, data }
    }

    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self::new(FrameEvent::Status, Some(text.into()))
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FrameEvent::Error, Some(message.into()))
    }

    #[must_use]
    pub fn done() -> Self {
        Self::new(FrameEvent::Done, None)
    }
}

/// Serializes one frame into its wire block, including the trailing blank line.
///
/// `\r\n` and bare `\r` in the data are line breaks on the wire and decode
/// back as `\n`.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    let mut out = String::new();
    out.push_str("event: ");
    out.push_str(frame.event.as_str());
    out.push('\n');

    if let Some(data) = &frame.data {
        let data = data.replace("\r\n", "\n").replace('\r', "\n");
        for line in data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
    }

    out.push('\n');
    out
}

/// Incremental frame parser over an arbitrary byte stream.
///
/// Bytes are buffered until a full line is available, so neither frame nor
/// UTF-8 boundaries need to align with the chunks handed to [`feed`].
///
/// [`feed`]: FrameDecoder::feed
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    /// Feeds bytes into the decoder and drains every completed frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..].iter().position(|byte| *byte == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(trim_carriage_return(&self.buffer[consumed..end]))
                .into_owned();
            consumed = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        self.buffer.drain(..consumed);
        frames
    }

    /// Flushes a final block that was not followed by a blank line.
    ///
    /// Call once the underlying byte stream reports end-of-input.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(trim_carriage_return(&self.buffer)).into_owned();
            self.buffer.clear();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }

        self.dispatch()
    }

    /// Decodes a complete payload in one shot, flushing any trailing block.
    #[must_use]
    pub fn parse_frames(input: &str) -> Vec<Frame> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input.as_bytes());
        frames.extend(decoder.finish());
        frames
    }

    /// Returns true when no partial line or block is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.event.is_none() && self.data.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
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
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);

        if event.is_none() && data.is_empty() {
            return None;
        }

        let event = event
            .map(|name| FrameEvent::parse(&name))
            .unwrap_or(FrameEvent::Status);
        let data = if data.is_empty() {
            None
        } else {
            Some(data.join("\n"))
        };

        Some(Frame { event, data })
    }
}

fn trim_carriage_return(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
