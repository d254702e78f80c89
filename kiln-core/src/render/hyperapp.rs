//! Single page HyperApp applications written in JSX.

use super::{RenderError, jsx, to_hyperapp_calls};
use crate::theme;
use rust_embed::RustEmbed;
use std::borrow::Cow;

#[derive(RustEmbed)]
#[folder = "assets/"]
#[include = "*.js"]
struct Assets;

const RUNTIME: &str = "hyperapp.js";

/// Theme used when none is configured.
const DEFAULT_THEME: &str = "dark";

/// The embedded HyperApp runtime.
pub fn runtime() -> Cow<'static, [u8]> {
    Assets::get(RUNTIME)
        .map(|f| f.data)
        .unwrap_or(Cow::Borrowed(&[]))
}

/// Wrap the transformed JSX and the runtime in an HTML page. With `link_style_gcss`
/// the page links `style.gcss`, otherwise the theme is inlined.
pub fn page(source: &str, link_style_gcss: bool, theme_name: &str) -> Result<Vec<u8>, RenderError> {
    let js = to_hyperapp_calls(&jsx::transform(source)?);

    let mut html = b"<!doctype html><html><head>".to_vec();
    if link_style_gcss {
        html.extend_from_slice(
            format!(
                "<link href=\"{}\" rel=\"stylesheet\" type=\"text/css\">",
                theme::DEFAULT_STYLE_FILENAME
            )
            .as_bytes(),
        );
    } else {
        let name = match theme_name {
            "default" | "" => DEFAULT_THEME,
            other => other,
        };
        html.extend_from_slice(theme::style_head(name).as_bytes());
    }
    html.extend_from_slice(b"</head><body><script>");
    html.extend_from_slice(&runtime());
    if !js.contains("import { h,") {
        html.extend_from_slice(b"const { h, app } = hyperapp;");
    }
    html.extend_from_slice(js.as_bytes());
    html.extend_from_slice(b"</script></body>");
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_is_embedded() {
        let js = runtime();
        assert!(String::from_utf8_lossy(&js).contains("var hyperapp"));
    }

    #[test]
    fn wraps_app_in_a_page() {
        let html = page("app({ state: {}, view: s => <h1>Hi</h1> })", false, "default").unwrap();
        let html = String::from_utf8(html).unwrap();
        assert!(html.starts_with("<!doctype html><html><head><style>"));
        assert!(html.contains("const { h, app } = hyperapp;"));
        assert!(html.contains("h(\"h1\", null, \"Hi\")"));
        assert!(!html.contains("React.createElement("));
        assert!(html.ends_with("</script></body>"));
    }

    #[test]
    fn explicit_import_is_respected() {
        let html = page("import { h, app } from \"hyperapp\";\n", true, "gray").unwrap();
        let html = String::from_utf8(html).unwrap();
        assert!(!html.contains("const { h, app } = hyperapp;"));
        assert!(html.contains("style.gcss"));
    }
}
