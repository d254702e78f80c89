use std::time::Duration;

/// Builds and inserts the live-reload script into HTML pages.
#[derive(Debug, Clone)]
pub struct AutoRefresh {
    /// Event server address, `host:port` or `:port`.
    pub event_addr: String,
    pub event_path: String,
    /// Host of the main server, used in front of an event address that is only a port.
    pub server_host: String,
    pub refresh: Duration,
}

impl AutoRefresh {
    /// Host and port the browser should connect to for events.
    pub fn event_host(&self, request_domain: &str) -> String {
        if !self.event_addr.starts_with(':') {
            return self.event_addr.clone();
        }
        if !self.server_host.is_empty() {
            format!("{}{}", self.server_host, self.event_addr)
        } else {
            format!("{}{}", request_domain, self.event_addr)
        }
    }

    /// The collapsed `<script>` block.
    pub fn script(&self, request_domain: &str) -> String {
        // Start listening after 70% of one refresh cycle.
        let delay_ms = (self.refresh.as_millis() as f64 * 0.7) as u64;
        let js = format!(
            r#"
    <script>
    if (!!window.EventSource) {{
      window.setTimeout(function() {{
        var source = new EventSource(window.location.protocol + '//{host}{path}');
        source.addEventListener('message', function(e) {{
          const path = '/' + e.data;
          if (path.indexOf(window.location.pathname) >= 0) {{
            location.reload()
          }}
        }}, false);
      }}, {delay_ms});
    }}
    </script>"#,
            host = self.event_host(request_domain),
            path = self.event_path,
        );
        collapse_whitespace(&js)
    }

    /// Insert the script before `</body>`, else after `<head>`, else as a new head
    /// after `<html>`. Data without any of those anchors, or that already carries the
    /// script, is returned unchanged.
    pub fn inject(&self, html: &[u8], request_domain: &str) -> Vec<u8> {
        let js = self.script(request_domain);
        if find(html, js.as_bytes()).is_some() {
            return html.to_vec();
        }
        if let Some(i) = find(html, b"</body>") {
            return splice(html, i, 0, js.as_bytes());
        }
        if let Some(i) = find(html, b"<head>") {
            return splice(html, i + "<head>".len(), 0, js.as_bytes());
        }
        if let Some(i) = find(html, b"<html>") {
            let wrapped = format!("<head>{js}</head>");
            return splice(html, i + "<html>".len(), 0, wrapped.as_bytes());
        }
        html.to_vec()
    }
}

fn collapse_whitespace(js: &str) -> String {
    let mut out = js.replace('\n', "").trim().to_string();
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn splice(data: &[u8], at: usize, remove: usize, insert: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + insert.len());
    out.extend_from_slice(&data[..at]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&data[at + remove..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refresher() -> AutoRefresh {
        AutoRefresh {
            event_addr: ":5553".into(),
            event_path: "/fs".into(),
            server_host: String::new(),
            refresh: Duration::from_millis(350),
        }
    }

    #[test]
    fn script_is_collapsed_and_points_at_event_server() {
        let js = refresher().script("localhost");
        assert!(!js.contains('\n'));
        assert!(!js.contains("  "));
        assert!(js.contains("'//localhost:5553/fs'"));
        assert!(js.contains("}, 245);"));
    }

    #[test]
    fn event_host_prefers_configured_hosts() {
        let mut r = refresher();
        assert_eq!(r.event_host("example.org"), "example.org:5553");
        r.server_host = "10.0.0.1".into();
        assert_eq!(r.event_host("example.org"), "10.0.0.1:5553");
        r.event_addr = "events.local:9000".into();
        assert_eq!(r.event_host("example.org"), "events.local:9000");
    }

    #[test]
    fn inserts_before_body_end() {
        let out = refresher().inject(b"<html><body>hi</body></html>", "localhost");
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("<script>").count(), 1);
        assert!(out.contains("hi"));
        assert!(out.find("</script>").unwrap() < out.find("</body>").unwrap());
        assert!(out.ends_with("</body></html>"));
    }

    #[test]
    fn falls_back_to_head_then_html() {
        let r = refresher();
        let head = String::from_utf8(r.inject(b"<head><title>x</title></head>", "h")).unwrap();
        assert!(head.starts_with("<head><script>"));

        let html = String::from_utf8(r.inject(b"<html>text</html>", "h")).unwrap();
        assert!(html.starts_with("<html><head><script>"));
        assert!(html.ends_with("</script></head>text</html>"));
    }

    #[test]
    fn no_anchor_means_no_change() {
        let data = b"<p>fragment</p>";
        assert_eq!(refresher().inject(data, "h"), data.to_vec());
    }

    #[test]
    fn injecting_twice_equals_injecting_once() {
        let r = refresher();
        let once = r.inject(b"<html><body>hi</body></html>", "h");
        let twice = r.inject(&once, "h");
        assert_eq!(once, twice);
    }
}
