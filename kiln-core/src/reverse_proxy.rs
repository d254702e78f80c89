use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },
}

/// Requests below `prefix` are forwarded to `upstream`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReverseProxy {
    pub prefix: String,
    #[serde(serialize_with = "serialize_url")]
    pub upstream: Url,
}

fn serialize_url<S: serde::Serializer>(url: &Url, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(url.as_str())
}

/// Where a matched request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Path with the matched prefix removed, plus the original query.
    pub path_and_query: String,
}

impl ProxyTarget {
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the upstream `Host` header.
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            self.address()
        }
    }
}

impl ReverseProxy {
    pub fn new(prefix: &str, upstream: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: &str| ProxyError::InvalidUpstream {
            url: upstream.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(upstream).map_err(|e| invalid(&e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            _ => return Err(invalid("scheme must be http or https")),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            upstream: url,
        })
    }

    /// Rewrite a request path for the upstream. Scheme and host come from the upstream URL.
    pub fn target(&self, path: &str, query: Option<&str>) -> ProxyTarget {
        let rest = path.get(self.prefix.len()..).unwrap_or("");
        let mut path_and_query = if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        };
        if let Some(q) = query {
            path_and_query.push('?');
            path_and_query.push_str(q);
        }
        let tls = self.upstream.scheme() == "https";
        ProxyTarget {
            host: self
                .upstream
                .host_str()
                .unwrap_or_default()
                .trim_matches(|c| c == '[' || c == ']')
                .to_string(),
            port: self
                .upstream
                .port_or_known_default()
                .unwrap_or(if tls { 443 } else { 80 }),
            tls,
            path_and_query,
        }
    }
}

/// Prefix registry with longest-match lookup.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReverseProxyConfig {
    proxies: Vec<ReverseProxy>,
}

impl ReverseProxyConfig {
    pub fn add(&mut self, proxy: ReverseProxy) {
        self.proxies.push(proxy);
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn find(&self, path: &str) -> Option<&ReverseProxy> {
        let matches: Vec<&ReverseProxy> = self
            .proxies
            .iter()
            .filter(|p| path.starts_with(p.prefix.as_str()))
            .collect();
        if matches.len() > 1 {
            let prefixes: Vec<&str> = matches.iter().map(|p| p.prefix.as_str()).collect();
            tracing::warn!(path, ?prefixes, "more than one reverse proxy matches, using the longest");
        }
        matches.into_iter().max_by_key(|p| p.prefix.len())
    }
}
