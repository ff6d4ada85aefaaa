//! Render request model
//!
//! One immutable `RenderRequest` per render attempt, plus the route state
//! the tree is rendered against and the runtime capability descriptor used
//! by strategy selection.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Opaque host context threaded through to the tree factory (caches,
/// session data, whatever the hosting layer needs during the render pass).
pub type HostContext = Arc<dyn Any + Send + Sync>;

/// How the incoming request should be treated by strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Interactive page load; progressive streaming preferred.
    Interactive,
    /// SEO bot / crawler; needs a complete buffered document.
    Crawler,
    /// Client-side hydration request; no HTML body is produced.
    Hydration,
}

/// Route state the tree is rendered against.
///
/// Derived from the request URL for normal loads, or parsed from the JSON
/// `state` query parameter for hydration requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteState {
    pub pathname: String,
    pub search: String,
}

impl RouteState {
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self {
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
        }
    }

    /// Parse the JSON-encoded `state` query parameter carried by hydration
    /// requests. A missing parameter yields the default (root) state; a
    /// malformed one is an error.
    pub fn from_hydration_query(url: &Url) -> Result<Self> {
        let raw = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned());

        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Self::default()),
        }
    }
}

/// Immutable description of one render attempt.
#[derive(Clone)]
pub struct RenderRequest {
    pub url: Url,
    pub kind: RequestKind,
    pub dev_mode: bool,
    /// Nonce copied onto embedded flight scripts for CSP compliance.
    pub csp_nonce: Option<String>,
    pub context: Option<HostContext>,
}

impl RenderRequest {
    #[must_use]
    pub fn new(url: Url, kind: RequestKind) -> Self {
        Self {
            url,
            kind,
            dev_mode: false,
            csp_nonce: None,
            context: None,
        }
    }

    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    #[must_use]
    pub fn with_csp_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.csp_nonce = Some(nonce.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: HostContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Convenience for tests and simple hosts: parse a URL string.
    pub fn parse(url: &str, kind: RequestKind) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Render(format!("invalid url: {e}")))?;
        Ok(Self::new(url, kind))
    }

    #[must_use]
    pub fn is_hydration_request(&self) -> bool {
        self.kind == RequestKind::Hydration
    }

    /// Resolve the route state for this request.
    pub fn route_state(&self) -> Result<RouteState> {
        if self.is_hydration_request() {
            RouteState::from_hydration_query(&self.url)
        } else {
            Ok(RouteState::from_url(&self.url))
        }
    }
}

impl std::fmt::Debug for RenderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderRequest")
            .field("url", &self.url.as_str())
            .field("kind", &self.kind)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

/// Streaming primitives available in the host runtime.
///
/// Computed once at process start and passed into every render call; no
/// code path feature-detects at render time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCapabilities {
    /// An event-driven chunked render primitive is available.
    pub pipeable_stream: bool,
    /// A byte-channel render primitive is available.
    pub readable_channel: bool,
}

impl RuntimeCapabilities {
    /// Whether any streaming primitive exists at all. When false, only the
    /// synchronous prepass fallback can produce a document.
    #[must_use]
    pub fn any_stream(&self) -> bool {
        self.pipeable_stream || self.readable_channel
    }
}
