//! Streaming render orchestration
//!
//! Drives the progressive strategy: a single dispatch loop over the
//! renderer's progress events and the abort deadline, advancing a
//! monotonic phase machine. The head commits exactly once, before the
//! first body byte, and redirects terminate the response with no body.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tidewave_core::config::RenderConfig;
use tidewave_core::renderer::{RenderControl, RenderEvent};
use tidewave_core::response::{cache_control_header_name, ResponseHead};
use tidewave_core::ResponseMeta;

use crate::markup::{error_markup, DOCTYPE, HTML_CONTENT_TYPE};
use crate::sink::ResponseSink;

/// Phases advance forward only; a transition to an earlier or current
/// phase is ignored, so no phase is ever handled twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderPhase {
    NotStarted,
    Working,
    ShellComplete,
    AllComplete,
    Ended,
}

/// Per-render state. Abort is a latched flag rather than a phase of its
/// own: completion events still advance the machine afterwards, carrying
/// whatever content had resolved before the deadline.
#[derive(Debug)]
pub struct RenderState {
    phase: RenderPhase,
    aborted: bool,
}

impl RenderState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: RenderPhase::NotStarted,
            aborted: false,
        }
    }

    fn advance(&mut self, next: RenderPhase) -> bool {
        if next <= self.phase {
            tracing::debug!(current = ?self.phase, ?next, "ignoring non-monotonic phase transition");
            return false;
        }
        self.phase = next;
        true
    }

    fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    #[must_use]
    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase == RenderPhase::Ended
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates one progressive render into one sink.
pub struct StreamOrchestrator {
    sink: ResponseSink,
    response: ResponseMeta,
    config: RenderConfig,
    dev_mode: bool,
    state: RenderState,
    pending_error: Option<String>,
    body_started: bool,
    body_task: Option<JoinHandle<()>>,
}

impl StreamOrchestrator {
    #[must_use]
    pub fn new(sink: ResponseSink, response: ResponseMeta, config: RenderConfig, dev_mode: bool) -> Self {
        Self {
            sink,
            response,
            config,
            dev_mode,
            state: RenderState::new(),
            pending_error: None,
            body_started: false,
            body_task: None,
        }
    }

    /// Run the dispatch loop to completion. Returns the final render state
    /// once the sink has ended and the renderer is finished.
    pub async fn run(
        mut self,
        mut control: Box<dyn RenderControl>,
        mut events: mpsc::UnboundedReceiver<RenderEvent>,
    ) -> RenderState {
        self.state.advance(RenderPhase::Working);

        let deadline = tokio::time::sleep(self.config.stream_abort_timeout());
        tokio::pin!(deadline);
        let mut abort_armed = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(RenderEvent::ShellReady) => self.on_shell_ready(control.as_mut()).await,
                    Some(RenderEvent::AllReady) => self.on_all_ready(control.as_mut()).await,
                    Some(RenderEvent::Failed(message)) => self.on_render_error(message).await,
                    None => break,
                },
                () = &mut deadline, if abort_armed => {
                    abort_armed = false;
                    self.on_abort_deadline(control.as_mut());
                }
            }

            if self.state.is_terminal() {
                break;
            }
        }

        self.finish().await;
        self.state
    }

    /// Shell entry: commit cache-control and the head, short-circuit
    /// redirects, start the body unless the response opted out of
    /// streaming.
    async fn on_shell_ready(&mut self, control: &mut dyn RenderControl) {
        if !self.state.advance(RenderPhase::ShellComplete) {
            return;
        }

        let head = self.commit_response_head();
        if head.is_redirect() {
            self.sink.end();
            self.state.advance(RenderPhase::Ended);
            return;
        }

        if !self.response.can_stream() {
            return;
        }
        self.start_body(control).await;
    }

    /// All-complete entry: a no-op when the body already streams from the
    /// shell phase; otherwise write the custom body or the full document
    /// now and end.
    async fn on_all_ready(&mut self, control: &mut dyn RenderControl) {
        if !self.state.advance(RenderPhase::AllComplete) {
            return;
        }
        if self.body_started || self.sink.ended() {
            return;
        }

        let head = self.commit_response_head();
        if head.is_redirect() {
            self.sink.end();
            self.state.advance(RenderPhase::Ended);
            return;
        }

        if let Some(custom) = self.response.take_custom_body() {
            let body = custom.resolve().await;
            if let Err(e) = self.sink.write_str(body).await {
                tracing::warn!(error = %e, "custom body write failed");
            }
            self.sink.end();
            self.state.advance(RenderPhase::Ended);
            return;
        }

        self.start_body(control).await;
    }

    async fn on_render_error(&mut self, message: String) {
        tracing::error!(error = %message, "render error");

        // The response is already in flight once the head is out; it
        // cannot be replaced, only annotated (dev) or left as-is.
        if self.dev_mode && self.sink.headers_committed() && !self.sink.ended() {
            let markup = error_markup(&message);
            if let Err(e) = self.sink.write_str(markup).await {
                tracing::debug!(error = %e, "error markup dropped, sink closed");
            }
        }

        self.pending_error = Some(message);
    }

    fn on_abort_deadline(&mut self, control: &mut dyn RenderControl) {
        tracing::warn!(
            timeout_ms = self.config.stream_abort_timeout_ms,
            "render deadline exceeded, aborting outstanding work"
        );
        self.state.mark_aborted();
        control.abort();
    }

    /// Resolve and commit the head. Cache-control goes out under the
    /// dev-dependent header name; a pre-commit render error forces 500;
    /// non-redirect responses get the HTML content type before the head
    /// freezes.
    fn commit_response_head(&mut self) -> ResponseHead {
        let errored = self.pending_error.is_some();

        if self.sink.headers_committed() {
            return self.response.resolve_head(errored);
        }

        let header_name = cache_control_header_name(self.dev_mode);
        if let Err(e) = self
            .response
            .insert_header(header_name, &self.response.cache_control())
        {
            tracing::warn!(error = %e, "invalid cache-control directive dropped");
        }

        let mut head = self.response.resolve_head(errored);
        if !head.is_redirect() {
            let _ = self.response.insert_header("content-type", HTML_CONTENT_TYPE);
            head = self.response.resolve_head(errored);
        }

        if let Err(e) = self.sink.commit_head(head.clone()) {
            tracing::warn!(error = %e, "head commit failed, transport gone");
        }
        head
    }

    /// Begin writing body bytes: doctype preamble, any delayed dev error
    /// markup, then the renderer's chunk flow forwarded until it closes.
    async fn start_body(&mut self, control: &mut dyn RenderControl) {
        if self.body_started {
            return;
        }
        self.body_started = true;

        if let Err(e) = self.sink.write(Bytes::from_static(DOCTYPE.as_bytes())).await {
            tracing::warn!(error = %e, "body preamble write failed");
            self.sink.end();
            self.state.advance(RenderPhase::Ended);
            return;
        }

        if self.dev_mode {
            if let Some(message) = self.pending_error.clone() {
                let _ = self.sink.write_str(error_markup(&message)).await;
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        control.pipe(tx);

        let sink = self.sink.clone();
        self.body_task = Some(tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = sink.write(chunk).await {
                    tracing::warn!(error = %e, "body write failed, ending response");
                    break;
                }
            }
            sink.end();
        }));
    }

    /// The event channel closed (or a terminal phase was reached): settle
    /// the body forwarder, make sure the sink does not dangle, and record
    /// the terminal phase.
    async fn finish(&mut self) {
        if let Some(task) = self.body_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "body forwarder panicked");
            }
        } else if !self.sink.ended() {
            // Renderer went away without ever streaming a body: finalize
            // with whatever status resolved (500 on a recorded error).
            let head = self.commit_response_head();
            tracing::debug!(status = %head.status, "render finished without body, closing response");
            self.sink.end();
        }
        self.state.advance(RenderPhase::Ended);
    }
}
