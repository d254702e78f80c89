use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::fs;
use tokio::sync::mpsc;

pub const HTML_UTF8: &str = "text/html;charset=utf-8";
pub const CSS_UTF8: &str = "text/css;charset=utf-8";
pub const JS_UTF8: &str = "text/javascript;charset=utf-8";
pub const TEXT_UTF8: &str = "text/plain;charset=utf-8";

pub enum Body {
    Empty,
    /// Rendered pages and cached files.
    Bytes(Bytes),
    /// Large files streamed from disk.
    File(fs::File),

    /// A byte range of a large file.
    RangedFile {
        file: fs::File,
        remaining: u64,
    },

    /// Output produced while the response is being written, such as script output.
    Stream(mpsc::Receiver<Bytes>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({})", b.len()),
            Body::File(_) => f.write_str("File"),
            Body::RangedFile { remaining, .. } => write!(f, "RangedFile({remaining})"),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A status set by a handler after its head was already written. The wire keeps the
/// old status; the access log reports this one.
#[derive(Debug, Clone, Default)]
pub struct DeferredStatus(Arc<AtomicU16>);

impl DeferredStatus {
    pub fn set(&self, status: StatusCode) {
        self.0.store(status.as_u16(), Ordering::Release);
    }

    pub fn get(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.0.load(Ordering::Acquire)).ok()
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// Present for streamed handler output.
    pub deferred_status: Option<DeferredStatus>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::Empty,
            deferred_status: None,
        }
    }

    /// A complete in-memory response with the given content type.
    pub fn bytes(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut resp = Self::new(status);
        resp.set_header(CONTENT_TYPE, content_type);
        resp.body = Body::Bytes(body.into());
        resp
    }

    pub fn html(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::bytes(status, HTML_UTF8, body)
    }

    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::bytes(status, TEXT_UTF8, body)
    }

    pub fn redirect(status: StatusCode, location: &str) -> Self {
        let mut resp = Self::html(
            status,
            format!("<a href=\"{location}\">{}</a>.\n", status.canonical_reason().unwrap_or("Moved")),
        );
        resp.set_header(LOCATION, location);
        resp
    }

    /// Insert a header, silently skipping values that are not valid header text.
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => tracing::warn!(header = %name, "dropping invalid header value"),
        }
    }

    /// Merge headers that were set before the handler ran, without overriding its own.
    pub fn with_defaults(mut self, defaults: &HeaderMap) -> Self {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| ct.starts_with("text/html"))
            .unwrap_or(false)
    }

    /// Body bytes when the whole body is already in memory.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Set Content-Length from an in-memory body.
    pub fn set_content_length(&mut self) {
        let len = match &self.body {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::RangedFile { remaining, .. } => *remaining,
            _ => return,
        };
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_do_not_override_handler_headers() {
        let mut defaults = HeaderMap::new();
        defaults.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        defaults.insert("server", HeaderValue::from_static("kiln"));

        let resp = Response::html(StatusCode::OK, "hi").with_defaults(&defaults);

        assert_eq!(resp.content_type(), Some(HTML_UTF8));
        assert_eq!(resp.headers.get("server").unwrap(), "kiln");
        assert!(resp.is_html());
    }

    #[test]
    fn deferred_status_starts_unset() {
        let deferred = DeferredStatus::default();
        assert_eq!(deferred.get(), None);
        deferred.clone().set(StatusCode::NOT_FOUND);
        assert_eq!(deferred.get(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn redirect_sets_location() {
        let resp = Response::redirect(StatusCode::MOVED_PERMANENTLY, "/a/");
        assert_eq!(resp.headers.get(LOCATION).unwrap(), "/a/");
        assert_eq!(resp.status, StatusCode::MOVED_PERMANENTLY);
    }
}
