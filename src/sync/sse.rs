//! Incremental Server-Sent Events framing.
//!
//! Bytes arrive in arbitrary chunks; frames are cut at blank lines and
//! reduced to their `event`, `id` and joined `data` fields. Comment lines
//! (`:keep-alive`) and frames without data produce nothing.
//!
//! Lines may end in CRLF, LF or a bare CR. A frame that grows past the
//! decoder's limit without a terminator fails the stream.

use futures::{Stream, StreamExt};

use crate::error::{Result, SyncError};

/// Largest unterminated frame the decoder will hold.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// True for frames an `EventSource` would hand to `onmessage`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("" | "message"))
    }
}

/// Buffering decoder; feed it chunks, collect complete frames.
#[derive(Debug)]
pub struct SseFrameDecoder {
    buf: Vec<u8>,
    /// Last byte seen was a CR, so a leading LF in the next chunk is its pair.
    after_cr: bool,
    max_frame: usize,
}

impl Default for SseFrameDecoder {
    fn default() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            after_cr: false,
            max_frame,
        }
    }

    /// Append a chunk and return every frame it completes.
    ///
    /// Fails once the unterminated remainder exceeds the frame limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' => {
                    self.buf.push(b'\n');
                    self.after_cr = true;
                }
                _ => {
                    self.buf.push(byte);
                    self.after_cr = false;
                }
            }
        }

        let mut frames = Vec::new();
        while let Some(pos) = find_double_newline(&self.buf) {
            let raw = self.buf.drain(..pos + 2).collect::<Vec<_>>();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }

        if self.buf.len() > self.max_frame {
            self.buf.clear();
            return Err(SyncError::Stream(format!(
                "SSE frame exceeds {} bytes without a terminator",
                self.max_frame
            )));
        }
        Ok(frames)
    }

    /// Bytes held back waiting for a frame terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Adapt a byte-chunk stream into a stream of SSE frames.
///
/// The first chunk error or oversized frame is yielded as
/// [`SyncError::Stream`] and ends the stream.
pub fn sse_frames<S, B, E>(chunks: S, max_frame: usize) -> impl Stream<Item = Result<SseFrame>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        let mut decoder = SseFrameDecoder::with_max_frame(max_frame);
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let pushed = match chunk {
                Ok(chunk) => decoder.push(chunk.as_ref()),
                Err(e) => Err(SyncError::Stream(e.to_string())),
            };
            match pushed {
                Ok(frames) => {
                    for frame in frames {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

fn parse_frame(text: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => frame.event = Some(value.to_string()),
            "id" => frame.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
