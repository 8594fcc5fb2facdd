use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Where assistant text goes. Streaming handlers call `write_chunk` as
/// fragments arrive and `end_stream` once; everything else uses
/// `write_message`.
pub trait OutputSink: Send + Sync {
    fn write_chunk(&self, chunk: &str);
    fn end_stream(&self);
    fn write_message(&self, text: &str);
}

pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_chunk(&self, chunk: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(chunk.as_bytes());
        let _ = out.flush();
    }

    fn end_stream(&self) {
        println!();
    }

    fn write_message(&self, text: &str) {
        println!("{text}");
    }
}

/// Collects output in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: Mutex<String>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, text: &str) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }
}

impl OutputSink for BufferSink {
    fn write_chunk(&self, chunk: &str) {
        self.push(chunk);
    }

    fn end_stream(&self) {
        self.push("\n");
    }

    fn write_message(&self, text: &str) {
        self.push(text);
        self.push("\n");
    }
}
