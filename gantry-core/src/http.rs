// HTTP request and response types

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Number of HTTP methods the router keeps a trie for.
pub const METHOD_COUNT: usize = 7;

/// The seven standard HTTP verbs understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; METHOD_COUNT] = [
        HttpMethod::GET,
        HttpMethod::HEAD,
        HttpMethod::POST,
        HttpMethod::PUT,
        HttpMethod::DELETE,
        HttpMethod::PATCH,
        HttpMethod::OPTIONS,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(HttpMethod::GET),
            "HEAD" => Some(HttpMethod::HEAD),
            "POST" => Some(HttpMethod::POST),
            "PUT" => Some(HttpMethod::PUT),
            "DELETE" => Some(HttpMethod::DELETE),
            "PATCH" => Some(HttpMethod::PATCH),
            "OPTIONS" => Some(HttpMethod::OPTIONS),
            _ => None,
        }
    }

    /// Index into the router's per-method trie roots.
    #[inline]
    pub(crate) fn index(&self) -> usize {
        match self {
            HttpMethod::GET => 0,
            HttpMethod::HEAD => 1,
            HttpMethod::POST => 2,
            HttpMethod::PUT => 3,
            HttpMethod::DELETE => 4,
            HttpMethod::PATCH => 5,
            HttpMethod::OPTIONS => 6,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming HTTP request.
///
/// Header names are stored lowercased. The body is zero-copy `Bytes`
/// handed over from the connection layer.
#[derive(Debug, Default)]
pub struct HttpRequest {
    pub method: Option<HttpMethod>,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub remote_addr: Option<SocketAddr>,
    body: Bytes,
    /// Hyper's deferred upgrade handle, present when the client asked to
    /// switch protocols. Consumed by WebSocket terminals.
    upgrade: Option<hyper::upgrade::OnUpgrade>,
}

impl HttpRequest {
    /// Create a request; `target` may carry a query string (`/a/b?x=1`).
    pub fn new(method: HttpMethod, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.to_string(), String::new()),
        };
        Self {
            method: Some(method),
            path,
            query,
            headers: HashMap::new(),
            remote_addr: None,
            body: Bytes::new(),
            upgrade: None,
        }
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Insert a header, lowercasing the name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    #[inline]
    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Body view; O(1) reference count bump.
    #[inline]
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    #[inline]
    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    /// Parsed query parameters, last occurrence winning.
    pub fn query_params(&self) -> HashMap<String, String> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(&self.query)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default()
    }

    /// Get a single query parameter.
    pub fn query_value(&self, name: &str) -> Option<String> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(&self.query)
            .ok()?
            .into_iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn set_upgrade(&mut self, upgrade: hyper::upgrade::OnUpgrade) {
        self.upgrade = Some(upgrade);
    }

    /// Take the deferred protocol-upgrade handle, if any.
    pub fn take_upgrade(&mut self) -> Option<hyper::upgrade::OnUpgrade> {
        self.upgrade.take()
    }

    pub(crate) fn reset(&mut self) {
        self.method = None;
        self.path.clear();
        self.query.clear();
        self.headers.clear();
        self.remote_addr = None;
        self.body = Bytes::new();
        self.upgrade = None;
    }
}

/// An outgoing HTTP response.
///
/// Records the status and the number of body bytes written so the
/// dispatcher and tracing middleware can observe the outcome.
#[derive(Debug, Default)]
pub struct HttpResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
    bytes_written: usize,
    committed: bool,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: 200,
            ..Default::default()
        }
    }

    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
        self.committed = true;
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Replace the body, recording its length.
    pub fn write(&mut self, body: Bytes) {
        self.bytes_written = body.len();
        self.body = body;
        self.committed = true;
    }

    /// Serialize `value` as the JSON body with the standard content type.
    pub fn write_json<T: Serialize>(&mut self, status: u16, value: &T) -> Result<(), crate::Error> {
        let body = serde_json::to_vec(value)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.status = status;
        self.set_header("Content-Type", "application/json; charset=utf-8");
        self.write(Bytes::from(body));
        Ok(())
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Whether a handler or middleware has written to this response.
    #[inline]
    pub fn committed(&self) -> bool {
        self.committed
    }

    pub(crate) fn reset(&mut self) {
        self.status = 200;
        self.headers.clear();
        self.body = Bytes::new();
        self.bytes_written = 0;
        self.committed = false;
    }

    pub(crate) fn take(&mut self) -> HttpResponse {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_roundtrip() {
        for method in HttpMethod::ALL {
            assert_eq!(HttpMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(HttpMethod::parse("BREW"), None);
    }

    #[test]
    fn test_method_indices_unique() {
        let mut seen = [false; METHOD_COUNT];
        for method in HttpMethod::ALL {
            assert!(!seen[method.index()]);
            seen[method.index()] = true;
        }
    }

    #[test]
    fn test_request_splits_query() {
        let req = HttpRequest::new(HttpMethod::GET, "/users/42?verbose=1&page=2");
        assert_eq!(req.path, "/users/42");
        assert_eq!(req.query_value("verbose").as_deref(), Some("1"));
        assert_eq!(req.query_value("page").as_deref(), Some("2"));
        assert_eq!(req.query_value("missing"), None);
    }

    #[test]
    fn test_request_headers_case_insensitive() {
        let mut req = HttpRequest::new(HttpMethod::GET, "/");
        req.set_header("X-Request-ID", "abc");
        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.header("X-REQUEST-ID"), Some("abc"));
    }

    #[test]
    fn test_response_records_bytes_written() {
        let mut res = HttpResponse::new();
        assert!(!res.committed());
        res.write(Bytes::from_static(b"hello"));
        assert_eq!(res.bytes_written(), 5);
        assert!(res.committed());
    }

    #[test]
    fn test_response_json_content_type() {
        let mut res = HttpResponse::new();
        res.write_json(201, &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(res.status(), 201);
        assert_eq!(
            res.header("Content-Type"),
            Some("application/json; charset=utf-8")
        );
    }
}
