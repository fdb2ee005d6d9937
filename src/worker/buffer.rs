use std::sync::Arc;

use parking_lot::RwLock;

/// Growing output of one process. Readers only ever see whole appended chunks.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    bytes: Arc<RwLock<Vec<u8>>>,
}

/// The single append side of an [`OutputBuffer`]. Not `Clone`.
#[derive(Debug)]
pub struct OutputWriter {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn channel() -> (OutputWriter, OutputBuffer) {
        let buffer = OutputBuffer::default();
        let writer = OutputWriter {
            bytes: Arc::clone(&buffer.bytes),
        };
        (writer, buffer)
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputWriter {
    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.write().extend_from_slice(chunk);
    }
}
