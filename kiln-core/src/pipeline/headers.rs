use http::header::{CONTENT_SECURITY_POLICY, SERVER, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION};
use http::{HeaderMap, HeaderValue};

const CSP: &str = "connect-src 'self'; object-src 'self'; form-action 'self'";

/// Headers added to every response the pipeline produces, unless the handler set its own.
///
/// Auto-refresh pages run inline script against another port, so the protective
/// headers are left out in that mode.
pub fn server_headers(server_name: &str, auto_refresh: bool, stricter: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(server_name) {
        Ok(v) => {
            headers.insert(SERVER, v);
        }
        Err(_) => tracing::warn!(name = %server_name, "server name is not a valid header value"),
    }
    if auto_refresh {
        return headers;
    }
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    if stricter {
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(CSP));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protective_headers() {
        let h = server_headers("kiln 1.0", false, false);
        assert_eq!(h.get(SERVER).unwrap(), "kiln 1.0");
        assert_eq!(h.get(X_FRAME_OPTIONS).unwrap(), "SAMEORIGIN");
        assert!(h.get(CONTENT_SECURITY_POLICY).is_none());

        let strict = server_headers("kiln", false, true);
        assert_eq!(strict.get(CONTENT_SECURITY_POLICY).unwrap(), CSP);
    }

    #[test]
    fn auto_refresh_only_names_the_server() {
        let h = server_headers("kiln", true, true);
        assert_eq!(h.len(), 1);
    }
}
