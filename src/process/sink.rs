//! Accumulating output sink for one child stream.

use super::events::{EventBus, OutputStream, SupervisorEvent};

/// Collects the bytes of one output stream and forwards each chunk.
///
/// The buffer is append-only between [`clear`](Self::clear) calls. Chunks are
/// stored as raw bytes so a multi-byte character split across two reads is
/// reassembled before it is decoded.
#[derive(Debug)]
pub struct OutputSink {
    stream: OutputStream,
    buffer: Vec<u8>,
    bus: EventBus,
}

impl OutputSink {
    #[must_use]
    pub fn new(stream: OutputStream, bus: EventBus) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            bus,
        }
    }

    #[must_use]
    pub fn stream(&self) -> OutputStream {
        self.stream
    }

    /// Publish `chunk` and append it to the buffer. Empty chunks are ignored.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.bus.emit(SupervisorEvent::Output {
            stream: self.stream,
            chunk: chunk.to_vec(),
        });
        self.buffer.extend_from_slice(chunk);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Raw accumulated bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Accumulated output decoded as UTF-8 (lossy) with surrounding whitespace trimmed.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).trim().to_string()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
