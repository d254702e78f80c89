//! Markdown pages: keyword header lines, themes, code highlighting and MathJax.

use crate::theme::{self, META_KEYWORDS};
use pulldown_cmark::{Options, Parser, html};
use std::collections::BTreeMap;

const PAGE_KEYWORDS: &[&str] = &["title", "codestyle", "theme", "replace_with_theme", "css"];

const HIGHLIGHT_VERSION: &str = "9.6.0";

const MATHJAX: &str = r#"<script>window.MathJax = { tex: { inlineMath: [['$', '$'], ['\\(', '\\)']] } };</script><script id="MathJax-script" async src="https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js"></script>"#;

/// Keywords are only picked up from the first lines, unless inside an HTML comment.
const KEYWORD_LINES: usize = 10;

pub struct PageOptions<'a> {
    /// Used for the title when the document has none.
    pub filename: &'a str,
    pub theme: &'a str,
    /// Link `style.gcss` instead of inlining the theme.
    pub link_style_gcss: bool,
    /// Reads the file named by the `css` keyword for inlining. Without it the file is linked.
    pub inline_css: Option<&'a dyn Fn(&str) -> Option<String>>,
}

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
}

/// Markdown to an HTML fragment.
pub fn to_html(source: &str) -> String {
    let parser = Parser::new_ext(source, options());
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Remove keyword lines (`title: ...`, `<!-- theme: dark -->`, `% Title`) from the top of a
/// document and return them. A line with a backtick stops the search.
pub fn extract_keywords(source: &str, keywords: &[&str]) -> (String, BTreeMap<String, String>) {
    let mut found = BTreeMap::new();
    let mut kept = Vec::new();
    let mut in_comment_block = false;
    let mut stop = false;

    for (i, line) in source.split('\n').enumerate() {
        let stripped = line.trim();
        if stop || stripped.is_empty() {
            kept.push(line);
            continue;
        }
        if stripped.contains('`') {
            stop = true;
            kept.push(line);
            continue;
        }

        let mut candidate = stripped;
        let mut single_line_comment = false;
        if stripped.starts_with("<!--") && stripped.ends_with("-->") && stripped.len() >= 7 {
            in_comment_block = false;
            candidate = stripped[4..stripped.len() - 3].trim();
            single_line_comment = true;
        } else if stripped.starts_with("<!--") {
            in_comment_block = true;
        } else if stripped.ends_with("-->") {
            in_comment_block = false;
        }

        if let Some(title) = candidate.strip_prefix("% ") {
            if !title.trim().is_empty() {
                found.insert("title".to_string(), title.trim().to_string());
                continue;
            }
        }

        let matched = keywords.iter().find_map(|kw| {
            candidate
                .strip_prefix(kw)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(|value| (*kw, value.trim()))
        });
        match matched {
            Some((kw, value)) if single_line_comment || in_comment_block || i < KEYWORD_LINES => {
                found.insert(kw.to_string(), value.to_string());
            }
            _ => kept.push(line),
        }
    }

    (kept.join("\n"), found)
}

/// `<p>#Title</p>` at the very start is taken as the page headline.
fn lift_headline(body: &str) -> (Option<String>, &str) {
    let Some(rest) = body.strip_prefix("<p>#") else {
        return (None, body);
    };
    let Some(end) = rest.find("</p>") else {
        return (None, body);
    };
    let headline = rest[..end].trim_start_matches('#').trim();
    if headline.is_empty() || headline.contains('<') {
        return (None, body);
    }
    (Some(headline.to_string()), rest[end + "</p>".len()..].trim_start())
}

pub fn contains_formula(source: &str) -> bool {
    source.contains("$$") || source.contains("\\(") || source.contains("\\[")
}

fn highlight_head(style: &str) -> String {
    format!(
        "<link rel=\"stylesheet\" href=\"//cdnjs.cloudflare.com/ajax/libs/highlight.js/{HIGHLIGHT_VERSION}/styles/{style}.min.css\">\
         <script src=\"//cdnjs.cloudflare.com/ajax/libs/highlight.js/{HIGHLIGHT_VERSION}/highlight.min.js\"></script>\
         <script>hljs.initHighlightingOnLoad();</script>"
    )
}

/// Render a complete themed page.
pub fn render_page(source: &[u8], opts: &PageOptions<'_>) -> Vec<u8> {
    let text = String::from_utf8_lossy(source);
    let mut keywords: Vec<&str> = PAGE_KEYWORDS.to_vec();
    keywords.extend_from_slice(META_KEYWORDS);
    let (markdown, kw) = extract_keywords(&text, &keywords);

    let rendered = to_html(&markdown);
    let (headline, body) = lift_headline(&rendered);
    let mut body = body.to_string();

    let title = kw
        .get("title")
        .cloned()
        .or_else(|| headline.clone())
        .unwrap_or_else(|| {
            std::path::Path::new(opts.filename)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    let theme_name = kw.get("theme").map(String::as_str).unwrap_or(opts.theme);
    let theme_name = theme::markdown_theme(theme_name).to_string();

    if let Some(placeholder) = kw.get("replace_with_theme") {
        if !placeholder.is_empty() {
            body = body.replace(placeholder.as_str(), &theme_name);
        }
    }

    let mut head = String::new();
    if opts.link_style_gcss {
        head.push_str(&format!(
            "<link href=\"{}\" rel=\"stylesheet\" type=\"text/css\">",
            theme::DEFAULT_STYLE_FILENAME
        ));
    } else {
        head.push_str(&theme::style_head(&theme_name));
    }

    if let Some(css) = kw.get("css").filter(|c| !c.is_empty()) {
        match opts.inline_css.and_then(|read| read(css)) {
            Some(data) => head.push_str(&format!("<style>{data}</style>")),
            None => head.push_str(&format!(
                "<link href=\"{}\" rel=\"stylesheet\" type=\"text/css\">",
                theme::escape_html(css)
            )),
        }
    }

    for keyword in META_KEYWORDS {
        if let Some(value) = kw.get(*keyword).filter(|v| !v.is_empty()) {
            head.push_str(&format!(
                "<meta name=\"{keyword}\" content=\"{}\" />",
                theme::escape_html(value)
            ));
        }
    }

    if body.contains("<pre") {
        let style = match kw.get("codestyle").map(String::as_str) {
            None | Some("") => Some(theme::code_style(&theme_name)),
            Some("none") => None,
            Some(style) => Some(style),
        };
        if let Some(style) = style {
            head.push_str(&highlight_head(&theme::escape_html(style)));
        }
    }

    if contains_formula(&markdown) {
        head.push_str(MATHJAX);
    }

    let mut page = theme::simple_html_page(&title, headline.as_deref().unwrap_or(""), &head, &body, "");
    page.extend_from_slice(b"</body></html>");
    page
}

/// Relative image paths referenced by a rendered page.
pub fn local_image_paths(html: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut rest = html;
    while let Some(i) = rest.find("<img src=\"") {
        rest = &rest[i + "<img src=\"".len()..];
        let Some(end) = rest.find('"') else { break };
        let path = &rest[..end];
        if !(path.starts_with("http://") || path.starts_with("https://") || path.starts_with("//")) {
            paths.push(path.trim_start_matches('/').to_string());
        }
        rest = &rest[end..];
    }
    paths
}
