//! End-to-end tests for the render entry points, driven by scripted
//! renderers standing in for the environment's tree-rendering primitives.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use tidewave_core::renderer::{
    BlockingHtmlRenderer, ChannelFlightRenderer, ChannelHtmlRenderer, ChannelRender,
    ClientManifest, ComponentTree, FlightRenderer, PrepassRenderer, RenderContext, RenderControl,
    RenderEvent, RendererSuite, StreamingHtmlRenderer, TreeFactory,
};
use tidewave_core::response::CustomBody;
use tidewave_core::{Error, RenderRequest, RequestKind, RouteState};
use tidewave_render::{ResponseSink, ServerHandler};

/// Boundary scaffolding the streaming protocol emits for a pending
/// subtree when the shell flushes early.
const FALLBACK_SCAFFOLD: &str = "<template id=\"B:0\">Loading...</template>";

const TEMPLATE: &str = "<html><head><title>Shop</title></head><body></body></html>";

const HYDRATION_URL: &str =
    "https://shop.example/?state=%7B%22pathname%22%3A%22%2F%22%2C%22search%22%3A%22%22%7D";

// ---------------------------------------------------------------------------
// Scripted renderer suite
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Resolve {
    Immediate,
    After(Duration),
    Never,
}

#[derive(Clone)]
struct Script {
    shell_body: String,
    resolved_body: String,
    resolve: Resolve,
    /// Emit a render failure after the shell, then keep rendering.
    fail_after_shell: Option<String>,
    /// Emit a render failure and die without completing.
    fail_fatal: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            shell_body: "<main>shell</main>".to_string(),
            resolved_body: "<section>resolved</section>".to_string(),
            resolve: Resolve::Immediate,
            fail_after_shell: None,
            fail_fatal: None,
        }
    }
}

#[derive(Clone)]
struct ScriptedTree {
    ctx: RenderContext,
}

type BuildHook = Arc<dyn Fn(&RenderContext) + Send + Sync>;

struct ScriptedFactory {
    on_build: Option<BuildHook>,
}

impl TreeFactory for ScriptedFactory {
    fn build(&self, _state: &RouteState, ctx: &RenderContext) -> ComponentTree {
        if let Some(hook) = &self.on_build {
            hook(ctx);
        }
        ComponentTree::new(ScriptedTree { ctx: ctx.clone() })
    }
}

fn scripted_factory() -> Arc<dyn TreeFactory> {
    Arc::new(ScriptedFactory { on_build: None })
}

fn factory_with(hook: BuildHook) -> Arc<dyn TreeFactory> {
    Arc::new(ScriptedFactory {
        on_build: Some(hook),
    })
}

struct ScriptedControl {
    dest_tx: mpsc::UnboundedSender<mpsc::UnboundedSender<Bytes>>,
    abort_tx: mpsc::UnboundedSender<()>,
}

impl RenderControl for ScriptedControl {
    fn pipe(&mut self, dest: mpsc::UnboundedSender<Bytes>) {
        let _ = self.dest_tx.send(dest);
    }

    fn abort(&mut self) {
        let _ = self.abort_tx.send(());
    }
}

struct ScriptedStreamingRenderer {
    script: Script,
}

impl StreamingHtmlRenderer for ScriptedStreamingRenderer {
    fn start(
        &self,
        tree: ComponentTree,
        events: mpsc::UnboundedSender<RenderEvent>,
    ) -> Box<dyn RenderControl> {
        let scaffold_head = tree
            .downcast_ref::<ScriptedTree>()
            .and_then(|t| t.ctx.scaffold.clone())
            .map(|s| s.head)
            .unwrap_or_default();
        let (dest_tx, dest_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_streaming_script(
            self.script.clone(),
            scaffold_head,
            events,
            dest_rx,
            abort_rx,
        ));
        Box::new(ScriptedControl { dest_tx, abort_tx })
    }
}

async fn run_streaming_script(
    script: Script,
    scaffold_head: String,
    events: mpsc::UnboundedSender<RenderEvent>,
    mut dest_rx: mpsc::UnboundedReceiver<mpsc::UnboundedSender<Bytes>>,
    mut abort_rx: mpsc::UnboundedReceiver<()>,
) {
    let _ = events.send(RenderEvent::ShellReady);

    if let Some(message) = script.fail_fatal.clone() {
        let _ = events.send(RenderEvent::Failed(message));
        return;
    }
    if let Some(message) = script.fail_after_shell.clone() {
        let _ = events.send(RenderEvent::Failed(message));
    }

    let resolve_wait = async {
        match script.resolve {
            Resolve::Immediate => {}
            Resolve::After(delay) => tokio::time::sleep(delay).await,
            Resolve::Never => futures::future::pending::<()>().await,
        }
    };
    tokio::pin!(resolve_wait);

    let mut dest: Option<mpsc::UnboundedSender<Bytes>> = None;
    let mut pipe_open = true;
    let mut abort_open = true;

    let resolved = loop {
        tokio::select! {
            () = &mut resolve_wait => break true,
            maybe = dest_rx.recv(), if pipe_open && dest.is_none() => {
                match maybe {
                    Some(d) => {
                        // Early pipe: the shell flushes with boundary
                        // scaffolding for the still-pending subtree.
                        let shell = format!(
                            "<html><head>{scaffold_head}</head><body>{}{FALLBACK_SCAFFOLD}",
                            script.shell_body
                        );
                        let _ = d.send(Bytes::from(shell));
                        dest = Some(d);
                    }
                    None => pipe_open = false,
                }
            }
            aborted = abort_rx.recv(), if abort_open => {
                if aborted.is_some() {
                    break false;
                }
                abort_open = false;
            }
        }
    };

    let _ = events.send(RenderEvent::AllReady);

    if let Some(d) = dest {
        if resolved {
            let patch = format!(
                "<div hidden id=\"S:0\">{}</div><script>$RC(\"B:0\",\"S:0\")</script>",
                script.resolved_body
            );
            let _ = d.send(Bytes::from(patch));
        }
        let _ = d.send(Bytes::from("</body></html>".to_string()));
    } else if pipe_open {
        // Late pipe after completion: one clean document, no scaffolding.
        if let Some(d) = dest_rx.recv().await {
            let inner = if resolved {
                script.resolved_body.as_str()
            } else {
                "Loading..."
            };
            let doc = format!(
                "<html><head>{scaffold_head}</head><body>{}{inner}</body></html>",
                script.shell_body
            );
            let _ = d.send(Bytes::from(doc));
        }
    }
}

struct ScriptedChannelRenderer {
    script: Script,
}

impl ChannelHtmlRenderer for ScriptedChannelRenderer {
    fn start(&self, _tree: ComponentTree) -> ChannelRender {
        let script = self.script.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (complete_tx, complete_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Resolve::After(delay) = script.resolve {
                tokio::time::sleep(delay).await;
            }
            let doc = format!(
                "<html><body>{}{}</body></html>",
                script.shell_body, script.resolved_body
            );
            let _ = tx.send(Bytes::from(doc));
            let _ = complete_tx.send(true);
        });
        ChannelRender {
            chunks: rx,
            complete: complete_rx,
        }
    }
}

struct ScriptedPrepassRenderer;

#[async_trait]
impl PrepassRenderer for ScriptedPrepassRenderer {
    async fn run(&self, tree: &ComponentTree) -> tidewave_core::Result<()> {
        let tree = tree.downcast_ref::<ScriptedTree>().expect("scripted tree");
        // Stands in for the data fetch the dry pass triggers and awaits.
        tree.ctx
            .hydration
            .record_query("product:1", json!({"title": "Snowboard"}));
        Ok(())
    }
}

struct ScriptedBlockingRenderer;

impl BlockingHtmlRenderer for ScriptedBlockingRenderer {
    fn render_to_string(&self, tree: &ComponentTree) -> tidewave_core::Result<String> {
        let tree = tree.downcast_ref::<ScriptedTree>().expect("scripted tree");
        let product = match tree.ctx.hydration.lookup("product:1") {
            Some(value) => value["title"].as_str().unwrap_or_default().to_string(),
            None => "<!--placeholder-->Loading...".to_string(),
        };
        Ok(format!("<html><body><h1>{product}</h1></body></html>"))
    }
}

struct ScriptedFlightControl {
    chunks: Vec<String>,
    delay: Option<Duration>,
}

impl RenderControl for ScriptedFlightControl {
    fn pipe(&mut self, dest: mpsc::UnboundedSender<Bytes>) {
        let chunks = std::mem::take(&mut self.chunks);
        let delay = self.delay;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for chunk in chunks {
                let _ = dest.send(Bytes::from(chunk));
            }
        });
    }

    fn abort(&mut self) {}
}

struct ScriptedFlightRenderer {
    chunks: Vec<String>,
    delay: Option<Duration>,
}

impl FlightRenderer for ScriptedFlightRenderer {
    fn start(&self, _tree: ComponentTree, _manifest: &ClientManifest) -> Box<dyn RenderControl> {
        Box::new(ScriptedFlightControl {
            chunks: self.chunks.clone(),
            delay: self.delay,
        })
    }
}

struct ScriptedChannelFlightRenderer {
    chunks: Vec<String>,
}

impl ChannelFlightRenderer for ScriptedChannelFlightRenderer {
    fn start(&self, _tree: ComponentTree, _manifest: &ClientManifest) -> ChannelRender {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_complete_tx, complete_rx) = watch::channel(true);
        for chunk in &self.chunks {
            let _ = tx.send(Bytes::from(chunk.clone()));
        }
        ChannelRender {
            chunks: rx,
            complete: complete_rx,
        }
    }
}

async fn collect_body(mut body: mpsc::Receiver<std::io::Result<Bytes>>) -> String {
    let mut out = String::new();
    while let Some(chunk) = body.recv().await {
        out.push_str(&String::from_utf8_lossy(&chunk.expect("body chunk")));
    }
    out
}

fn streaming_suite(script: Script) -> RendererSuite {
    let mut suite = RendererSuite::default();
    suite.streaming = Some(Arc::new(ScriptedStreamingRenderer { script }));
    suite
}

// ---------------------------------------------------------------------------
// Progressive streaming
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_progressive_stream_commits_head_then_streams_body() {
    let script = Script {
        resolve: Resolve::After(Duration::from_millis(200)),
        ..Default::default()
    };
    let factory = factory_with(Arc::new(|ctx: &RenderContext| {
        ctx.response.set_cache_control("max-age=60");
    }));
    let handler = ServerHandler::new(factory, streaming_suite(script));

    let request =
        RenderRequest::parse("https://shop.example/products/1", RequestKind::Interactive)
            .expect("url");
    let (sink, parts) = ResponseSink::channel(64);
    handler.stream(request, TEMPLATE, sink).await.expect("stream");

    let head = parts.head.await.expect("exactly one head");
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(
        head.headers
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("max-age=60")
    );
    assert!(head.headers.get("content-type").is_some());

    let body = collect_body(parts.body).await;
    assert!(body.starts_with("<!DOCTYPE html>"));
    assert!(body.contains("<title>Shop</title>"));
    assert!(body.contains("window.__flight=[]"));
    assert!(body.ends_with("</body></html>"));

    // Shell first, suspended content patched in afterwards.
    let shell_at = body.find("<main>shell</main>").expect("shell present");
    let patch_at = body.find("$RC").expect("patch present");
    assert!(shell_at < patch_at);
}

#[tokio::test]
async fn test_redirect_terminates_without_body() {
    let factory = factory_with(Arc::new(|ctx: &RenderContext| {
        ctx.response.set_status(StatusCode::FOUND);
        ctx.response
            .insert_header("location", "/login")
            .expect("header");
    }));
    let handler = ServerHandler::new(factory, streaming_suite(Script::default()));

    let request =
        RenderRequest::parse("https://shop.example/account", RequestKind::Interactive)
            .expect("url");
    let (sink, parts) = ResponseSink::channel(64);
    handler.stream(request, TEMPLATE, sink).await.expect("stream");

    let head = parts.head.await.expect("head");
    assert_eq!(head.status, StatusCode::FOUND);
    assert_eq!(
        head.headers.get("location").and_then(|v| v.to_str().ok()),
        Some("/login")
    );

    assert_eq!(collect_body(parts.body).await, "");
}

#[tokio::test(start_paused = true)]
async fn test_abort_deadline_finalizes_partial_response() {
    let script = Script {
        resolve: Resolve::Never,
        ..Default::default()
    };
    let handler = ServerHandler::new(scripted_factory(), streaming_suite(script));

    let request =
        RenderRequest::parse("https://shop.example/slow", RequestKind::Interactive).expect("url");
    let (sink, parts) = ResponseSink::channel(64);

    let started = tokio::time::Instant::now();
    handler.stream(request, TEMPLATE, sink).await.expect("stream");
    assert_eq!(started.elapsed(), Duration::from_millis(3_000));

    let head = parts.head.await.expect("head");
    assert_eq!(head.status, StatusCode::OK);

    // The shell and its fallback stand; the response is closed and nothing
    // follows the abort.
    let body = collect_body(parts.body).await;
    assert!(body.contains("<main>shell</main>"));
    assert!(body.contains(FALLBACK_SCAFFOLD));
    assert!(body.ends_with("</body></html>"));
    assert!(!body.contains("$RC"));
}

#[tokio::test(start_paused = true)]
async fn test_stream_multiplexes_flight_chunks_in_order() {
    let script = Script {
        resolve: Resolve::After(Duration::from_millis(200)),
        ..Default::default()
    };
    let mut suite = streaming_suite(script);
    suite.flight = Some(Arc::new(ScriptedFlightRenderer {
        chunks: vec!["S1:a".to_string(), "S2:b".to_string()],
        delay: Some(Duration::from_millis(100)),
    }));
    let handler = ServerHandler::new(scripted_factory(), suite);

    let request = RenderRequest::parse("https://shop.example/", RequestKind::Interactive)
        .expect("url")
        .with_csp_nonce("n1");
    let (sink, parts) = ResponseSink::channel(64);
    handler.stream(request, TEMPLATE, sink).await.expect("stream");

    let body = collect_body(parts.body).await;
    let init_at = body
        .find("<script nonce=\"n1\">window.__flight=[]</script>")
        .expect("init marker");
    let first_at = body
        .find("<script nonce=\"n1\">window.__flight.push(`S1:a`)</script>")
        .expect("first chunk");
    let second_at = body
        .find("<script nonce=\"n1\">window.__flight.push(`S2:b`)</script>")
        .expect("second chunk");
    assert!(init_at < first_at);
    assert!(first_at < second_at);
}

#[tokio::test(start_paused = true)]
async fn test_dev_mode_appends_error_markup_after_commit() {
    let script = Script {
        resolve: Resolve::After(Duration::from_millis(50)),
        fail_after_shell: Some("query exploded: <timeout>".to_string()),
        ..Default::default()
    };
    let handler = ServerHandler::new(scripted_factory(), streaming_suite(script));

    let request = RenderRequest::parse("https://shop.example/", RequestKind::Interactive)
        .expect("url")
        .with_dev_mode(true);
    let (sink, parts) = ResponseSink::channel(64);
    handler.stream(request, TEMPLATE, sink).await.expect("stream");

    // The head was already out; the error cannot change the status.
    let head = parts.head.await.expect("head");
    assert_eq!(head.status, StatusCode::OK);
    assert!(head.headers.get("cache-control-preview").is_some());

    let body = collect_body(parts.body).await;
    assert!(body.contains("Render error"));
    assert!(body.contains("&lt;timeout&gt;"));
}

#[tokio::test(start_paused = true)]
async fn test_custom_body_replaces_document() {
    let script = Script {
        resolve: Resolve::After(Duration::from_millis(50)),
        ..Default::default()
    };
    let factory = factory_with(Arc::new(|ctx: &RenderContext| {
        ctx.response.prevent_streaming();
        ctx.response
            .set_custom_body(CustomBody::Ready("<h1>Maintenance</h1>".to_string()));
    }));
    let handler = ServerHandler::new(factory, streaming_suite(script));

    let request = RenderRequest::parse("https://shop.example/", RequestKind::Interactive)
        .expect("url");
    let (sink, parts) = ResponseSink::channel(64);
    handler.stream(request, TEMPLATE, sink).await.expect("stream");

    let head = parts.head.await.expect("head");
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(collect_body(parts.body).await, "<h1>Maintenance</h1>");
}

#[tokio::test]
async fn test_stream_requires_streaming_renderer() {
    let handler = ServerHandler::new(scripted_factory(), RendererSuite::default());
    let request =
        RenderRequest::parse("https://shop.example/", RequestKind::Interactive).expect("url");
    let (sink, _parts) = ResponseSink::channel(4);
    let err = handler
        .stream(request, TEMPLATE, sink)
        .await
        .expect_err("no streaming primitive");
    assert!(matches!(err, Error::StreamingUnsupported));
}

// ---------------------------------------------------------------------------
// Buffered strategy
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_buffered_render_has_no_streaming_artifacts() {
    let script = Script {
        resolve: Resolve::After(Duration::from_millis(50)),
        ..Default::default()
    };
    let handler = ServerHandler::new(scripted_factory(), streaming_suite(script));

    let request =
        RenderRequest::parse("https://shop.example/products/1", RequestKind::Crawler).expect("url");
    let output = handler.render(request).await.expect("render");

    assert!(output.body.contains("<main>shell</main>"));
    assert!(output.body.contains("<section>resolved</section>"));
    assert!(!output.body.contains("<template"));
    assert!(!output.body.contains("$RC"));
}

#[tokio::test(start_paused = true)]
async fn test_buffered_render_polls_channel_runtime_to_completion() {
    let script = Script {
        resolve: Resolve::After(Duration::from_millis(250)),
        ..Default::default()
    };
    let mut suite = RendererSuite::default();
    suite.channel = Some(Arc::new(ScriptedChannelRenderer { script }));
    let handler = ServerHandler::new(scripted_factory(), suite);

    let request =
        RenderRequest::parse("https://shop.example/products/1", RequestKind::Crawler).expect("url");
    let output = handler.render(request).await.expect("render");

    assert!(output.body.contains("<main>shell</main>"));
    assert!(output.body.contains("<section>resolved</section>"));
    assert!(!output.body.contains("<template"));
}

#[tokio::test]
async fn test_buffered_render_propagates_precommit_failure() {
    let script = Script {
        fail_fatal: Some("tree exploded".to_string()),
        ..Default::default()
    };
    let handler = ServerHandler::new(scripted_factory(), streaming_suite(script));

    let request =
        RenderRequest::parse("https://shop.example/", RequestKind::Crawler).expect("url");
    let err = handler.render(request).await.expect_err("must fail");
    match err {
        Error::Render(message) => assert!(message.contains("tree exploded")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_custom_body_short_circuits_buffered_render() {
    let factory = factory_with(Arc::new(|ctx: &RenderContext| {
        ctx.response
            .set_custom_body(CustomBody::Ready("goodbye".to_string()));
    }));
    let handler = ServerHandler::new(factory, streaming_suite(Script::default()));

    let request =
        RenderRequest::parse("https://shop.example/", RequestKind::Crawler).expect("url");
    let output = handler.render(request).await.expect("render");
    assert_eq!(output.body, "goodbye");
}

// ---------------------------------------------------------------------------
// Hydration requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hydration_request_returns_empty_body() {
    let handler = ServerHandler::new(scripted_factory(), RendererSuite::default());
    let request = RenderRequest::parse(HYDRATION_URL, RequestKind::Hydration).expect("url");

    let output = handler.render(request).await.expect("render");
    assert_eq!(output.body, "");
    assert_eq!(output.response.resolve_head(false).status, StatusCode::OK);
}

#[tokio::test]
async fn test_hydrate_streams_raw_flight_chunks() {
    let mut suite = RendererSuite::default();
    suite.flight = Some(Arc::new(ScriptedFlightRenderer {
        chunks: vec!["S1:{}".to_string(), "S2:{}".to_string()],
        delay: None,
    }));
    let handler = ServerHandler::new(scripted_factory(), suite);

    let request = RenderRequest::parse(HYDRATION_URL, RequestKind::Hydration).expect("url");
    let (sink, parts) = ResponseSink::channel(64);
    handler.hydrate(request, sink).await.expect("hydrate");

    let head = parts.head.await.expect("head");
    assert_eq!(
        head.headers
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/x-component")
    );

    let body = collect_body(parts.body).await;
    assert_eq!(body, "S1:{}S2:{}");
    assert!(!body.contains("window.__flight"));
}

#[tokio::test]
async fn test_hydrate_uses_channel_flight_when_pipeable_is_missing() {
    let mut suite = RendererSuite::default();
    suite.channel_flight = Some(Arc::new(ScriptedChannelFlightRenderer {
        chunks: vec!["S1:row".to_string()],
    }));
    let handler = ServerHandler::new(scripted_factory(), suite);

    let request = RenderRequest::parse(HYDRATION_URL, RequestKind::Hydration).expect("url");
    let (sink, parts) = ResponseSink::channel(64);
    handler.hydrate(request, sink).await.expect("hydrate");

    assert_eq!(collect_body(parts.body).await, "S1:row");
}

#[tokio::test]
async fn test_hydrate_without_flight_capability_fails() {
    let handler = ServerHandler::new(scripted_factory(), RendererSuite::default());
    let request = RenderRequest::parse(HYDRATION_URL, RequestKind::Hydration).expect("url");
    let (sink, _parts) = ResponseSink::channel(4);

    let err = handler.hydrate(request, sink).await.expect_err("must fail");
    assert!(matches!(err, Error::StreamingUnsupported));
}

// ---------------------------------------------------------------------------
// Prepass fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_prepass_fallback_renders_without_placeholders() {
    let captured: Arc<Mutex<Option<RenderContext>>> = Arc::new(Mutex::new(None));
    let factory = {
        let captured = captured.clone();
        factory_with(Arc::new(move |ctx: &RenderContext| {
            *captured.lock().expect("lock") = Some(ctx.clone());
        }))
    };

    let mut suite = RendererSuite::default();
    suite.prepass = Some(Arc::new(ScriptedPrepassRenderer));
    suite.blocking = Some(Arc::new(ScriptedBlockingRenderer));
    let handler = ServerHandler::new(factory, suite);

    let request =
        RenderRequest::parse("https://shop.example/products/1", RequestKind::Interactive)
            .expect("url");
    let output = handler.render(request).await.expect("render");

    assert!(output.body.contains("Snowboard"));
    assert!(!output.body.contains("placeholder"));

    // The query state collected by the dry pass was dehydrated for the
    // client.
    let ctx = captured.lock().expect("lock").clone().expect("ctx captured");
    let state = ctx.hydration.dehydrated_state().expect("snapshot");
    assert_eq!(state["product:1"]["title"], json!("Snowboard"));
}
