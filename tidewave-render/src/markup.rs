//! Document scaffolding helpers
//!
//! Template head extraction, the doctype preamble, and the dev-mode
//! diagnostic markup appended to an in-flight response after a
//! post-commit render error.

use once_cell::sync::Lazy;
use regex::Regex;

use tidewave_core::{Error, Result};

pub const DOCTYPE: &str = "<!DOCTYPE html>";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Flight responses served standalone (hydration requests).
pub const FLIGHT_CONTENT_TYPE: &str = "text/x-component";

static HEAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<head>(.*?)</head>").expect("head regex"));

/// Extract the inner `<head>` region from an HTML document template.
pub fn extract_head(template: &str) -> Result<String> {
    HEAD_RE
        .captures(template)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::Template("template has no <head>...</head> region".to_string()))
}

/// Human-readable diagnostic block appended to an in-flight body when a
/// render fails after the head was committed (dev mode only; the response
/// cannot be replaced at that point).
#[must_use]
pub fn error_markup(error: &str) -> String {
    format!(
        "<div style=\"position:fixed;bottom:0;left:0;right:0;background:#fdd;color:#900;\
         padding:1rem;font-family:monospace;z-index:2147483647\">\
         <strong>Render error</strong><pre>{}</pre></div>",
        html_escape(error)
    )
}

#[must_use]
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
