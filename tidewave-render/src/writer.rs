//! Drain-gated writer
//!
//! Accumulates render output until the render signals completion, then
//! releases everything as one string. The buffered-string strategy pipes
//! into this instead of a live sink so the streaming renderer's protocol
//! scaffolding never leaks into a single-shot result.

use bytes::Bytes;

use tidewave_core::{Error, Result};

#[derive(Debug, Default)]
pub struct DrainGatedWriter {
    buffer: Vec<Bytes>,
    complete: bool,
}

impl DrainGatedWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, chunk: Bytes) {
        self.buffer.push(chunk);
    }

    /// The external "render complete" signal. Draining is legal only after
    /// this fires.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.iter().map(Bytes::len).sum()
    }

    /// Release the buffered output as one concatenated string.
    pub fn drain(self) -> Result<String> {
        if !self.complete {
            return Err(Error::Render(
                "drain invoked before the render completed".to_string(),
            ));
        }

        let mut out = String::with_capacity(self.buffered_len());
        for chunk in &self.buffer {
            out.push_str(&String::from_utf8_lossy(chunk));
        }
        Ok(out)
    }
}
