//! Per-request notifications emitted synchronously from inside a handler.

use std::path::PathBuf;

/// A streamed chunk that has been written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEvent {
    pub chunk_index: usize,
    pub chunk_path: PathBuf,
    pub is_final: bool,
}

/// Receiver for progress and chunk notifications of the current request.
pub trait EventSink {
    fn progress(&mut self, percent: u8, message: &str);

    fn chunk(&mut self, event: &ChunkEvent);

    /// Chunk notifications can only be routed when the request has an id.
    fn accepts_chunks(&self) -> bool {
        true
    }
}

/// Discards everything; used for internal calls with no caller attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn progress(&mut self, _percent: u8, _message: &str) {}

    fn chunk(&mut self, _event: &ChunkEvent) {}

    fn accepts_chunks(&self) -> bool {
        false
    }
}
