//! Renderer capability seam
//!
//! The hosting environment supplies the actual tree renderers; tidewave
//! only orchestrates them. Each primitive the runtime may or may not have
//! is its own trait, bundled into a `RendererSuite` whose `capabilities()`
//! drive strategy selection.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::hydration::HydrationContext;
use crate::request::{RenderRequest, RouteState, RuntimeCapabilities};
use crate::response::ResponseMeta;
use crate::Result;

/// Opaque handle to a built component tree.
///
/// Produced by the host's `TreeFactory`, consumed by whichever renderer
/// runs the pass; the concrete renderer downcasts the payload back to its
/// own tree type.
pub struct ComponentTree {
    payload: Box<dyn Any + Send + Sync>,
}

impl ComponentTree {
    pub fn new(payload: impl Any + Send + Sync) -> Self {
        Self {
            payload: Box::new(payload),
        }
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ComponentTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentTree").finish()
    }
}

/// Extracted template head (plus the flight init marker) handed to the
/// HTML renderer for the document frame.
#[derive(Debug, Clone, Default)]
pub struct HtmlScaffold {
    pub head: String,
}

/// Everything a tree build gets to see.
///
/// One context per built tree; the response and hydration handles are
/// shared with the orchestrator, which is how deep components feed status,
/// headers and early-exit bodies back out of the render pass.
#[derive(Clone, Debug)]
pub struct RenderContext {
    pub request: RenderRequest,
    pub response: ResponseMeta,
    pub hydration: HydrationContext,
    /// Tree built for flight encoding rather than HTML.
    pub flight: bool,
    pub scaffold: Option<HtmlScaffold>,
}

impl RenderContext {
    #[must_use]
    pub fn new(request: RenderRequest) -> Self {
        Self {
            request,
            response: ResponseMeta::new(),
            hydration: HydrationContext::new(),
            flight: false,
            scaffold: None,
        }
    }

    #[must_use]
    pub fn for_flight(mut self) -> Self {
        self.flight = true;
        self
    }

    #[must_use]
    pub fn with_scaffold(mut self, scaffold: HtmlScaffold) -> Self {
        self.scaffold = Some(scaffold);
        self
    }
}

/// Builds the component tree for a route. This is the application seam:
/// tidewave never looks inside the tree it gets back.
pub trait TreeFactory: Send + Sync {
    fn build(&self, state: &RouteState, ctx: &RenderContext) -> ComponentTree;
}

/// Progress events emitted by a streaming HTML render, delivered in tree
/// order over one channel and dispatched from a single point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// The non-suspended shell markup is ready.
    ShellReady,
    /// Every suspended subtree has resolved, or fallen back after an abort.
    AllReady,
    /// The render failed.
    Failed(String),
}

/// Control handle over an in-flight chunked render.
pub trait RenderControl: Send {
    /// Begin flowing chunks into `dest`. Chunks keep arriving until the
    /// sender side closes the channel. Piping before `AllReady` yields
    /// progressive output that still contains streaming scaffolding for
    /// pending boundaries; piping after it yields the clean, complete
    /// document.
    fn pipe(&mut self, dest: mpsc::UnboundedSender<Bytes>);

    /// Forcibly abort outstanding work; pending subtrees fall back to
    /// their placeholder markup and completion events still fire.
    fn abort(&mut self);
}

/// Event-driven chunked render primitive ("pipeable stream").
pub trait StreamingHtmlRenderer: Send + Sync {
    fn start(
        &self,
        tree: ComponentTree,
        events: mpsc::UnboundedSender<RenderEvent>,
    ) -> Box<dyn RenderControl>;
}

/// A running byte-channel render: chunks plus a completion flag the
/// buffered strategy polls.
pub struct ChannelRender {
    pub chunks: mpsc::UnboundedReceiver<Bytes>,
    pub complete: watch::Receiver<bool>,
}

/// Byte-channel render primitive ("readable channel" runtimes).
pub trait ChannelHtmlRenderer: Send + Sync {
    fn start(&self, tree: ComponentTree) -> ChannelRender;
}

/// Single-pass synchronous render. Renders placeholder markup for any
/// boundary whose data has not resolved, which is why the prepass exists.
pub trait BlockingHtmlRenderer: Send + Sync {
    fn render_to_string(&self, tree: &ComponentTree) -> Result<String>;
}

/// Dry render pass that triggers and awaits every data dependency
/// reachable from the tree, recording results into the tree's
/// `HydrationContext`.
#[async_trait]
pub trait PrepassRenderer: Send + Sync {
    async fn run(&self, tree: &ComponentTree) -> Result<()>;
}

/// Manifest describing how flight chunks reference externally loadable
/// sub-bundles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientManifest {
    /// Module id -> chunk URL.
    pub modules: HashMap<String, String>,
}

/// Flight (transportable tree descriptor) encoder, chunk-at-a-time.
pub trait FlightRenderer: Send + Sync {
    fn start(&self, tree: ComponentTree, manifest: &ClientManifest) -> Box<dyn RenderControl>;
}

/// Byte-channel flight encoder for runtimes without the pipeable
/// primitive.
pub trait ChannelFlightRenderer: Send + Sync {
    fn start(&self, tree: ComponentTree, manifest: &ClientManifest) -> ChannelRender;
}

/// The capability bundle the host wires up once at process start.
#[derive(Clone, Default)]
pub struct RendererSuite {
    pub streaming: Option<Arc<dyn StreamingHtmlRenderer>>,
    pub channel: Option<Arc<dyn ChannelHtmlRenderer>>,
    pub blocking: Option<Arc<dyn BlockingHtmlRenderer>>,
    pub prepass: Option<Arc<dyn PrepassRenderer>>,
    pub flight: Option<Arc<dyn FlightRenderer>>,
    pub channel_flight: Option<Arc<dyn ChannelFlightRenderer>>,
}

impl RendererSuite {
    /// Derive the capability descriptor strategy selection runs on.
    #[must_use]
    pub fn capabilities(&self) -> RuntimeCapabilities {
        RuntimeCapabilities {
            pipeable_stream: self.streaming.is_some(),
            readable_channel: self.channel.is_some(),
        }
    }
}

impl std::fmt::Debug for RendererSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererSuite")
            .field("streaming", &self.streaming.is_some())
            .field("channel", &self.channel.is_some())
            .field("blocking", &self.blocking.is_some())
            .field("prepass", &self.prepass.is_some())
            .field("flight", &self.flight.is_some())
            .field("channel_flight", &self.channel_flight.is_some())
            .finish()
    }
}
