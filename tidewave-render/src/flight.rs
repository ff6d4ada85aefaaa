//! Flight chunk multiplexing
//!
//! Re-wraps each flight chunk as an evaluable inline script and inserts it
//! into the primary output stream. Chunks produced before the response has
//! started its body are concatenated and flushed as a single script once
//! the first body bytes go out, so encoded-tree scripts never precede the
//! document shell.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tidewave_core::{Error, Result};

use crate::sink::ResponseSink;

/// Escape a payload for embedding inside a JS template literal.
fn escape_template_literal(chunk: &str) -> String {
    chunk
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

fn script_open(nonce: Option<&str>) -> String {
    match nonce {
        Some(nonce) => format!("<script nonce=\"{nonce}\">"),
        None => "<script>".to_string(),
    }
}

/// Initialization marker injected into the document head before any chunk
/// is pushed.
#[must_use]
pub fn flight_init_script(nonce: Option<&str>) -> String {
    format!("{}window.__flight=[]</script>", script_open(nonce))
}

/// Wrap one chunk as an append statement evaluated by the client in
/// production order.
#[must_use]
pub fn wrap_flight_script(chunk: &str, nonce: Option<&str>) -> String {
    format!(
        "{}window.__flight.push(`{}`)</script>",
        script_open(nonce),
        escape_template_literal(chunk)
    )
}

/// Multiplexes one flight chunk sequence into a response sink.
///
/// At most one destination per render: the latch trips on the first pipe
/// and every later attempt fails fast with a protocol-violation error,
/// leaving the first delivery untouched.
pub struct FlightMultiplexer {
    sink: ResponseSink,
    nonce: Option<String>,
    piped: bool,
}

impl FlightMultiplexer {
    #[must_use]
    pub fn new(sink: ResponseSink, nonce: Option<String>) -> Self {
        Self {
            sink,
            nonce,
            piped: false,
        }
    }

    fn latch(&mut self) -> Result<()> {
        if self.piped {
            return Err(Error::MultiplePipeDestinations);
        }
        self.piped = true;
        Ok(())
    }

    /// Pipe chunks into the HTML response as embedded scripts. Buffers
    /// until the response body opens; suspends on sink back-pressure.
    pub fn pipe_embedded(&mut self, chunks: mpsc::UnboundedReceiver<Bytes>) -> Result<JoinHandle<()>> {
        self.latch()?;
        let sink = self.sink.clone();
        let nonce = self.nonce.clone();
        Ok(tokio::spawn(forward_embedded(sink, nonce, chunks)))
    }

    /// Pipe chunks unwrapped, as the whole response body (hydration
    /// requests), ending the sink when the sequence closes.
    pub fn pipe_raw(&mut self, chunks: mpsc::UnboundedReceiver<Bytes>) -> Result<JoinHandle<()>> {
        self.latch()?;
        let sink = self.sink.clone();
        Ok(tokio::spawn(forward_raw(sink, chunks)))
    }
}

async fn forward_embedded(
    sink: ResponseSink,
    nonce: Option<String>,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut status = sink.status_watch();
    let mut buffer = String::new();

    loop {
        let waiting_for_body = !buffer.is_empty() && !sink.body_opened();
        tokio::select! {
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    buffer.push_str(&String::from_utf8_lossy(&chunk));
                    if sink.body_opened() {
                        let payload = std::mem::take(&mut buffer);
                        if write_wrapped(&sink, &payload, nonce.as_deref()).await.is_err() {
                            return;
                        }
                    }
                }
                None => break,
            },
            // The document shell just started flowing (or the response
            // died): flush what was held back as one wrapped snippet.
            changed = status.changed(), if waiting_for_body => {
                if changed.is_err() || sink.ended() {
                    return;
                }
                if sink.body_opened() {
                    let payload = std::mem::take(&mut buffer);
                    if write_wrapped(&sink, &payload, nonce.as_deref()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    // Encoder finished before the body opened: hold the buffer until the
    // shell starts flowing, or give up when the response ends first.
    while !buffer.is_empty() {
        if sink.ended() {
            return;
        }
        if sink.body_opened() {
            let _ = write_wrapped(&sink, &buffer, nonce.as_deref()).await;
            return;
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}

async fn write_wrapped(sink: &ResponseSink, payload: &str, nonce: Option<&str>) -> Result<()> {
    let script = wrap_flight_script(payload, nonce);
    sink.write(Bytes::from(script)).await.map_err(|e| {
        tracing::debug!(error = %e, "flight chunk dropped, sink closed");
        e
    })
}

async fn forward_raw(sink: ResponseSink, mut chunks: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(chunk) = chunks.recv().await {
        if let Err(e) = sink.write(chunk).await {
            tracing::debug!(error = %e, "flight response interrupted, sink closed");
            return;
        }
    }
    sink.end();
}
