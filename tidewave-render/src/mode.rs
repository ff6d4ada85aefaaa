//! Render strategy selection
//!
//! One decision, made once per render from the request and the runtime
//! capability descriptor. No call site feature-detects on its own.

use tidewave_core::{RenderRequest, RequestKind, RuntimeCapabilities};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Hydration request: response metadata only, no HTML construction.
    EmptyBody,
    /// Complete document rendered into a single string (crawlers).
    BufferedString,
    /// Two-phase streamed response with the abort deadline armed.
    ProgressiveStream,
    /// Runtime has no streaming primitive: prepass + synchronous render.
    PrepassFallback,
}

#[must_use]
pub fn select_render_mode(request: &RenderRequest, caps: &RuntimeCapabilities) -> RenderMode {
    if request.is_hydration_request() {
        return RenderMode::EmptyBody;
    }
    if !caps.any_stream() {
        return RenderMode::PrepassFallback;
    }
    match request.kind {
        RequestKind::Crawler => RenderMode::BufferedString,
        _ => RenderMode::ProgressiveStream,
    }
}
