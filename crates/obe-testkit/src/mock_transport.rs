// A `Transport` that records every buffer it's handed instead of sending it
// anywhere, standing in for UDP/RTP/ASI output (spec.md §1: "network and
// hardware I/O ... out of scope"). Used by `OutputStage` integration tests
// to assert on exactly what left the pipeline.

use std::sync::{Arc, Mutex};

use obe_core::error::PipelineError;
use obe_core::stages::output::Transport;

#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_buffers(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn total_bytes_sent(&self) -> usize {
        self.sent.lock().unwrap().iter().map(Vec::len).sum()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, packets: &[u8]) -> Result<(), PipelineError> {
        self.sent.lock().unwrap().push(packets.to_vec());
        Ok(())
    }
}
