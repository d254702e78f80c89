mod form;

pub use form::parse_multipart;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use std::collections::BTreeMap;

/// Everything the dispatch pipeline needs to know about an incoming request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Peer address as reported by the listener, usually `ip:port`.
    pub remote_addr: String,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: String::new(),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri.parse().unwrap_or_else(|_| Uri::from_static("/")))
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = value.parse() {
            self.headers.insert(name, v);
        }
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// Path plus query, the way it appeared on the request line.
    pub fn request_uri(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| self.path().to_string())
    }

    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Host header, falling back to the authority of the URI.
    pub fn host(&self) -> &str {
        let host = self.header("host");
        if !host.is_empty() {
            return host;
        }
        self.uri.authority().map(|a| a.as_str()).unwrap_or("")
    }

    /// Host without the port.
    pub fn domain(&self) -> &str {
        strip_port(self.host())
    }

    /// Remote IP with the port removed; the raw value when it does not parse.
    pub fn client_ip(&self) -> String {
        client_ip(&self.remote_addr)
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    pub fn accepts_gzip(&self) -> bool {
        self.header("accept-encoding").contains("gzip")
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Query parameters, first value wins.
    pub fn url_data(&self) -> BTreeMap<String, String> {
        parse_query(self.query())
    }

    /// Form fields from the query string and from an urlencoded or multipart body.
    pub fn form_data(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let content_type = self.header("content-type");
        if content_type.starts_with("application/x-www-form-urlencoded") {
            for (k, v) in url::form_urlencoded::parse(&self.body) {
                fields.entry(k.into_owned()).or_insert_with(|| v.into_owned());
            }
        } else if content_type.starts_with("multipart/form-data") {
            for part in parse_multipart(content_type, &self.body) {
                if part.filename.is_none() {
                    fields
                        .entry(part.name)
                        .or_insert_with(|| String::from_utf8_lossy(&part.data).into_owned());
                }
            }
        }
        for (k, v) in self.url_data() {
            fields.entry(k).or_insert(v);
        }
        fields
    }
}

pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    out
}

pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:3000
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((h, port)) if !h.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

pub fn client_ip(remote_addr: &str) -> String {
    match remote_addr.parse::<std::net::SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => match remote_addr.parse::<std::net::IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => remote_addr.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_drops_port() {
        let req = RequestInfo::get("/").with_header("host", "example.com:3000");
        assert_eq!(req.domain(), "example.com");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("localhost"), "localhost");
    }

    #[test]
    fn client_ip_strips_port_or_keeps_raw_value() {
        assert_eq!(client_ip("10.0.0.2:5555"), "10.0.0.2");
        assert_eq!(client_ip("[::1]:5555"), "::1");
        assert_eq!(client_ip("unix-socket"), "unix-socket");
    }

    #[test]
    fn reads_cookies() {
        let req = RequestInfo::get("/").with_header("cookie", "a=1; user=bob");
        assert_eq!(req.cookie("user").as_deref(), Some("bob"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn form_data_merges_body_and_query() {
        let mut req = RequestInfo::new(Method::POST, "/submit?b=2&a=ignored".parse().unwrap())
            .with_header("content-type", "application/x-www-form-urlencoded");
        req.body = Bytes::from_static(b"a=1&c=hello+world");

        let form = req.form_data();
        assert_eq!(form["a"], "1");
        assert_eq!(form["b"], "2");
        assert_eq!(form["c"], "hello world");
    }

    #[test]
    fn gzip_detection_is_a_substring_match() {
        let req = RequestInfo::get("/").with_header("accept-encoding", "deflate, gzip;q=0.5");
        assert!(req.accepts_gzip());
        assert!(!RequestInfo::get("/").accepts_gzip());
    }
}
