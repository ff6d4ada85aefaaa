//! Per-render response metadata
//!
//! The tree mutates this record while it renders (a deep component may set
//! a redirect status or an early-exit body); the orchestrator consumes it
//! exactly once, at head-commit time.

use std::sync::Arc;

use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;

use crate::{Error, Result};

/// Cache-control header name used when committing the shell.
///
/// Dev renders go out under a preview name so they never poison a shared
/// cache that is keyed on the real header.
#[must_use]
pub fn cache_control_header_name(dev_mode: bool) -> &'static str {
    if dev_mode {
        "cache-control-preview"
    } else {
        "cache-control"
    }
}

/// Body override set by the tree, replacing the rendered document.
pub enum CustomBody {
    Ready(String),
    /// Value still being produced when the override was recorded; awaited
    /// before the response ends.
    Pending(BoxFuture<'static, String>),
}

impl CustomBody {
    /// Resolve the override to its final string, awaiting a pending value.
    pub async fn resolve(self) -> String {
        match self {
            Self::Ready(body) => body,
            Self::Pending(fut) => fut.await,
        }
    }
}

/// Status override with an optional custom reason phrase.
#[derive(Debug, Clone)]
pub struct CustomStatus {
    pub code: StatusCode,
    pub text: Option<String>,
}

#[derive(Default)]
struct ResponseMetaInner {
    status: Option<StatusCode>,
    custom_status: Option<CustomStatus>,
    headers: HeaderMap,
    cache_control: Option<String>,
    custom_body: Option<CustomBody>,
    do_not_stream: bool,
}

/// Response metadata produced by rendering.
///
/// Created fresh per render and shared with the tree through the render
/// context; all mutation happens behind a short-lived lock, never held
/// across an await.
#[derive(Clone, Default)]
pub struct ResponseMeta {
    inner: Arc<Mutex<ResponseMetaInner>>,
}

impl ResponseMeta {
    /// Cache directive applied when the tree never set one.
    pub const DEFAULT_CACHE_CONTROL: &'static str = "no-store";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: StatusCode) {
        self.inner.lock().status = Some(status);
    }

    pub fn set_custom_status(&self, code: StatusCode, text: Option<String>) {
        self.inner.lock().custom_status = Some(CustomStatus { code, text });
    }

    /// Record a header to be sent at commit time. Later values replace
    /// earlier ones for the same name.
    pub fn insert_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Render(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Render(format!("invalid header value: {e}")))?;
        self.inner.lock().headers.insert(name, value);
        Ok(())
    }

    pub fn set_cache_control(&self, directive: impl Into<String>) {
        self.inner.lock().cache_control = Some(directive.into());
    }

    #[must_use]
    pub fn cache_control(&self) -> String {
        self.inner
            .lock()
            .cache_control
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_CACHE_CONTROL.to_string())
    }

    /// Replace the rendered document with an explicit body.
    pub fn set_custom_body(&self, body: CustomBody) {
        self.inner.lock().custom_body = Some(body);
    }

    /// Take the body override, if any. Consumed once.
    #[must_use]
    pub fn take_custom_body(&self) -> Option<CustomBody> {
        self.inner.lock().custom_body.take()
    }

    #[must_use]
    pub fn has_custom_body(&self) -> bool {
        self.inner.lock().custom_body.is_some()
    }

    /// Opt this response out of progressive body streaming; the document is
    /// written in one piece at all-complete instead.
    pub fn prevent_streaming(&self) {
        self.inner.lock().do_not_stream = true;
    }

    #[must_use]
    pub fn can_stream(&self) -> bool {
        !self.inner.lock().do_not_stream
    }

    /// Snapshot the head for commit.
    ///
    /// Status resolution: a recorded pre-commit render error forces 500;
    /// otherwise the custom status wins over the populated status, which
    /// wins over 200. A custom status text becomes the reason-phrase
    /// override.
    #[must_use]
    pub fn resolve_head(&self, errored: bool) -> ResponseHead {
        let inner = self.inner.lock();

        let (status, reason) = if errored {
            (StatusCode::INTERNAL_SERVER_ERROR, None)
        } else {
            match &inner.custom_status {
                Some(custom) => (custom.code, custom.text.clone()),
                None => (inner.status.unwrap_or(StatusCode::OK), None),
            }
        };

        ResponseHead {
            status,
            reason,
            headers: inner.headers.clone(),
        }
    }
}

impl std::fmt::Debug for ResponseMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResponseMeta")
            .field("status", &inner.status)
            .field("do_not_stream", &inner.do_not_stream)
            .field("has_custom_body", &inner.custom_body.is_some())
            .finish()
    }
}

/// Immutable head snapshot committed to the sink exactly once per response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Custom reason phrase overriding the default for `status`.
    pub reason: Option<String>,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// 3xx responses terminate immediately after the head; no body bytes
    /// may follow.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }
}
