//! Render entry points
//!
//! The `ServerHandler` is what the hosting layer talks to: `render` for
//! buffered documents and hydration metadata, `stream` for progressive
//! responses with the flight pipeline multiplexed in, `hydrate` for
//! standalone flight responses.

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use tidewave_core::config::RenderConfig;
use tidewave_core::logging::generate_render_id;
use tidewave_core::renderer::{
    ClientManifest, HtmlScaffold, RenderContext, RendererSuite, TreeFactory,
};
use tidewave_core::{Error, RenderRequest, ResponseMeta, Result};

use crate::buffered::render_buffered;
use crate::flight::{flight_init_script, FlightMultiplexer};
use crate::markup::{extract_head, FLIGHT_CONTENT_TYPE};
use crate::mode::{select_render_mode, RenderMode};
use crate::orchestrator::StreamOrchestrator;
use crate::prepass::render_with_prepass;
use crate::sink::ResponseSink;

/// Result of a buffered render: the document plus the response metadata
/// the tree populated while rendering.
pub struct RenderOutput {
    pub body: String,
    pub response: ResponseMeta,
    pub url: Url,
}

impl std::fmt::Debug for RenderOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOutput")
            .field("body", &self.body)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Host hook invoked after a buffered render, free to amend the output
/// before it is returned.
pub type RenderHook = Box<dyn Fn(&mut RenderOutput) + Send + Sync>;

pub struct ServerHandler {
    factory: Arc<dyn TreeFactory>,
    suite: RendererSuite,
    manifest: ClientManifest,
    config: RenderConfig,
    hook: Option<RenderHook>,
}

impl ServerHandler {
    #[must_use]
    pub fn new(factory: Arc<dyn TreeFactory>, suite: RendererSuite) -> Self {
        Self {
            factory,
            suite,
            manifest: ClientManifest::default(),
            config: RenderConfig::default(),
            hook: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_manifest(mut self, manifest: ClientManifest) -> Self {
        self.manifest = manifest;
        self
    }

    #[must_use]
    pub fn with_hook(mut self, hook: RenderHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Turn the request into an HTML string plus response metadata.
    ///
    /// Hydration requests short-circuit to an empty body: their payload is
    /// served by the flight path, not as HTML.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderOutput> {
        let render_id = generate_render_id();
        let mode = select_render_mode(&request, &self.suite.capabilities());
        tracing::info!(
            render_id = %render_id,
            url = %request.url,
            ?mode,
            "buffered render"
        );

        let state = request.route_state()?;
        let url = request.url.clone();
        let ctx = RenderContext::new(request);

        let body = match mode {
            RenderMode::EmptyBody => String::new(),
            RenderMode::PrepassFallback => {
                let tree = self.factory.build(&state, &ctx);
                render_with_prepass(&self.suite, &tree, &ctx.hydration).await?
            }
            RenderMode::BufferedString | RenderMode::ProgressiveStream => {
                let tree = self.factory.build(&state, &ctx);
                render_buffered(&self.suite, tree, &self.config).await?
            }
        };

        let response = ctx.response;
        if let Some(custom) = response.take_custom_body() {
            // An early-exit body replaces the document; the hook does not
            // run for it.
            return Ok(RenderOutput {
                body: custom.resolve().await,
                response,
                url,
            });
        }

        let mut output = RenderOutput { body, response, url };
        if let Some(hook) = &self.hook {
            hook(&mut output);
        }
        Ok(output)
    }

    /// Progressive response: two-phase head/body commit with the abort
    /// deadline armed, flight chunks multiplexed into the same sink as
    /// embedded scripts.
    ///
    /// `template` supplies the document `<head>` region, which is augmented
    /// with the flight initialization marker before the shell is sent.
    pub async fn stream(
        &self,
        request: RenderRequest,
        template: &str,
        sink: ResponseSink,
    ) -> Result<()> {
        let streaming = self
            .suite
            .streaming
            .clone()
            .ok_or(Error::StreamingUnsupported)?;

        let render_id = generate_render_id();
        tracing::info!(render_id = %render_id, url = %request.url, "streaming render");

        let state = request.route_state()?;
        let nonce = request.csp_nonce.clone();

        // Flight pipeline first: chunks produced while the shell renders
        // buffer inside the multiplexer until the head commits.
        let mut multiplexer = FlightMultiplexer::new(sink.clone(), nonce.clone());
        if let Some(flight) = &self.suite.flight {
            let flight_ctx = RenderContext::new(request.clone()).for_flight();
            let tree = self.factory.build(&state, &flight_ctx);
            let (tx, rx) = mpsc::unbounded_channel();
            let mut control = flight.start(tree, &self.manifest);
            control.pipe(tx);
            multiplexer.pipe_embedded(rx)?;
        } else if let Some(flight) = &self.suite.channel_flight {
            let flight_ctx = RenderContext::new(request.clone()).for_flight();
            let tree = self.factory.build(&state, &flight_ctx);
            let run = flight.start(tree, &self.manifest);
            multiplexer.pipe_embedded(run.chunks)?;
        }

        let head = extract_head(template)?;
        let scaffold = HtmlScaffold {
            head: format!("{head}{}", flight_init_script(nonce.as_deref())),
        };

        let dev_mode = request.dev_mode;
        let ctx = RenderContext::new(request).with_scaffold(scaffold);
        let tree = self.factory.build(&state, &ctx);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let control = streaming.start(tree, events_tx);

        let orchestrator =
            StreamOrchestrator::new(sink, ctx.response.clone(), self.config.clone(), dev_mode);
        let final_state = orchestrator.run(control, events_rx).await;

        tracing::debug!(
            render_id = %render_id,
            phase = ?final_state.phase(),
            aborted = final_state.is_aborted(),
            "streaming render settled"
        );
        Ok(())
    }

    /// Standalone flight response for a hydration request: raw chunks, no
    /// HTML wrapping, committed under the flight content type.
    pub async fn hydrate(&self, request: RenderRequest, sink: ResponseSink) -> Result<()> {
        let state = request.route_state()?;
        let nonce = request.csp_nonce.clone();
        let ctx = RenderContext::new(request).for_flight();
        let tree = self.factory.build(&state, &ctx);

        let chunks = if let Some(flight) = &self.suite.flight {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut control = flight.start(tree, &self.manifest);
            control.pipe(tx);
            rx
        } else if let Some(flight) = &self.suite.channel_flight {
            flight.start(tree, &self.manifest).chunks
        } else {
            return Err(Error::StreamingUnsupported);
        };

        ctx.response.insert_header("content-type", FLIGHT_CONTENT_TYPE)?;
        sink.commit_head(ctx.response.resolve_head(false))?;

        let mut multiplexer = FlightMultiplexer::new(sink, nonce);
        multiplexer.pipe_raw(chunks)?;
        Ok(())
    }
}

impl std::fmt::Debug for ServerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandler")
            .field("suite", &self.suite)
            .field("config", &self.config)
            .finish()
    }
}
