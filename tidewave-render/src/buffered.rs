//! Buffered-string render strategy
//!
//! Produces the complete document as one string. Used for crawlers, where
//! time-to-first-byte matters less than a complete `<head>` and a body
//! free of streaming-protocol artifacts.

use tokio::sync::mpsc;

use tidewave_core::config::RenderConfig;
use tidewave_core::renderer::{
    ChannelHtmlRenderer, ChannelRender, ComponentTree, RenderEvent, RendererSuite,
    StreamingHtmlRenderer,
};
use tidewave_core::{Error, Result};

use crate::writer::DrainGatedWriter;

/// Render to a single string with whichever buffered-capable primitive the
/// runtime has. A failure before completion propagates to the caller (the
/// head has not committed, so the caller still owns response disposition).
pub async fn render_buffered(
    suite: &RendererSuite,
    tree: ComponentTree,
    config: &RenderConfig,
) -> Result<String> {
    if let Some(streaming) = &suite.streaming {
        render_via_drain_gate(streaming.as_ref(), tree).await
    } else if let Some(channel) = &suite.channel {
        render_via_polling(channel.as_ref(), tree, config).await
    } else {
        Err(Error::StreamingUnsupported)
    }
}

/// Event-driven variant: wait for completion before piping, so boundary
/// scaffolding for still-pending subtrees never exists in the output, then
/// collect through the drain-gated writer.
async fn render_via_drain_gate(
    renderer: &dyn StreamingHtmlRenderer,
    tree: ComponentTree,
) -> Result<String> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut control = renderer.start(tree, events_tx);

    loop {
        match events_rx.recv().await {
            Some(RenderEvent::AllReady) => break,
            Some(RenderEvent::ShellReady) => {}
            Some(RenderEvent::Failed(message)) => return Err(Error::Render(message)),
            None => return Err(Error::Render("render ended before completion".to_string())),
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    control.pipe(tx);

    let mut writer = DrainGatedWriter::new();
    while let Some(chunk) = rx.recv().await {
        writer.write(chunk);
    }
    writer.mark_complete();
    writer.drain()
}

/// Byte-channel variant: check the completion flag on a fixed delay, then
/// collect the channel. Fetching the chunks earlier would capture
/// scaffolding for boundaries that had not resolved yet.
async fn render_via_polling(
    renderer: &dyn ChannelHtmlRenderer,
    tree: ComponentTree,
    config: &RenderConfig,
) -> Result<String> {
    let ChannelRender {
        mut chunks,
        complete,
    } = renderer.start(tree);

    loop {
        if *complete.borrow() {
            break;
        }
        if complete.has_changed().is_err() {
            return Err(Error::Render("render ended before completion".to_string()));
        }
        tokio::time::sleep(config.buffered_poll_interval()).await;
    }

    let mut out = String::new();
    while let Some(chunk) = chunks.recv().await {
        out.push_str(&String::from_utf8_lossy(&chunk));
    }
    Ok(out)
}
