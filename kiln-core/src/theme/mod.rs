//! Built-in page themes and the small HTML helpers that wrap generated content.

mod css;

/// The stylesheet that Markdown, Amber and HTML pages link to when it exists next to them.
pub const DEFAULT_STYLE_FILENAME: &str = "style.gcss";

/// highlight.js style for themes without one of their own.
pub const DEFAULT_CODE_STYLE: &str = "github";

/// Keywords allowed as `<meta name=...>` in Markdown pages.
pub const META_KEYWORDS: &[&str] = &[
    "application-name",
    "author",
    "description",
    "generator",
    "keywords",
    "robots",
    "language",
    "googlebot",
    "Slurp",
    "bingbot",
    "geo.position",
    "geo.placename",
    "geo.region",
    "ICBM",
    "viewport",
];

pub fn builtin_css(theme: &str) -> Option<&'static str> {
    match theme {
        "gray" => Some(css::GRAY),
        "dark" => Some(css::DARK),
        "redbox" => Some(css::REDBOX),
        "material" => Some(css::MATERIAL),
        _ => None,
    }
}

pub fn is_builtin(theme: &str) -> bool {
    builtin_css(theme).is_some()
}

/// Theme used for listings and message pages.
pub fn page_theme(theme: &str) -> &str {
    match theme {
        "default" | "light" | "" => "gray",
        other => other,
    }
}

/// Theme used for Markdown pages.
pub fn markdown_theme(theme: &str) -> &str {
    match theme {
        "default" | "" => "material",
        "light" => "gray",
        other => other,
    }
}

/// highlight.js style matching a theme.
pub fn code_style(theme: &str) -> &'static str {
    match theme {
        "gray" => "color-brewer",
        "dark" => "ocean",
        "redbox" => "railscasts",
        "material" => "atom-one-light",
        _ => DEFAULT_CODE_STYLE,
    }
}

/// Minimal HTML escaping for text placed in element content or attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Contents for `<head>`: inline theme CSS, or a link when the theme names a `.css` file.
pub fn style_head(theme: &str) -> String {
    let theme = escape_html(theme);
    let mut head = String::new();
    if theme.ends_with(".css") {
        head.push_str("<style>html { margin: 3em; }</style>");
        head.push_str(&format!("<link rel=\"stylesheet\" href=\"{theme}\">"));
        return head;
    }
    if theme == "material" {
        head.push_str(css::MATERIAL_HEAD);
    }
    head.push_str("<style>");
    head.push_str(builtin_css(&theme).unwrap_or(css::GRAY));
    head.push_str("</style>");
    head
}

/// A themed page with a title and a body. `</body></html>` is left open.
pub fn message_page(title: &str, body: &str, theme: &str) -> Vec<u8> {
    let title = escape_html(title);
    format!(
        "<!doctype html><html><head><title>{title}</title>{}</head><body><h1>{title}</h1>{body}",
        style_head(theme)
    )
    .into_bytes()
}

/// The page shown when a path does not exist.
pub fn no_page(filename: &str, theme: &str) -> Vec<u8> {
    message_page(
        "Not found",
        &format!("File not found: {}", escape_html(filename)),
        theme,
    )
}

pub fn simple_html_page(title: &str, headline: &str, in_head: &str, body: &str, language: &str) -> Vec<u8> {
    let mut page = String::new();
    if language.is_empty() {
        page.push_str("<!doctype html><html>");
    } else {
        page.push_str(&format!("<!doctype html><html lang=\"{}\">", escape_html(language)));
    }
    page.push_str("<head>");
    if !title.is_empty() {
        page.push_str(&format!("<title>{}</title>", escape_html(title)));
    }
    page.push_str(in_head);
    page.push_str("</head><body>");
    if !headline.is_empty() {
        page.push_str(&format!("<h1>{}</h1>", escape_html(headline)));
    }
    page.push_str(body);
    page.into_bytes()
}

/// A directory listing entry. Directories get a trailing slash on both text and link.
pub fn html_link(text: &str, url: &str, is_dir: bool) -> String {
    let slash = if is_dir { "/" } else { "" };
    format!(
        "<a href=\"/{}{slash}\">{}{slash}</a><br>",
        escape_html(url),
        escape_html(text)
    )
}

/// Add `<!doctype html>` when it is missing from the first two lines of a longer document.
pub fn insert_doctype(html: &[u8]) -> Vec<u8> {
    if html.iter().filter(|&&b| b == b'\n').count() <= 2 {
        return html.to_vec();
    }
    let text = String::from_utf8_lossy(html);
    let mut lines = text.splitn(3, '\n');
    let first = lines.next().unwrap_or("").to_ascii_lowercase();
    let second = lines.next().unwrap_or("").to_ascii_lowercase();
    if first.contains("doctype") || second.contains("doctype") {
        return html.to_vec();
    }
    let mut out = b"<!doctype html>\n".to_vec();
    out.extend_from_slice(html);
    out
}

/// Link a stylesheet from an HTML document that does not mention it yet.
pub fn style_html(html: &[u8], url: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(html);
    let url = escape_html(url);
    if text.contains(url.as_str()) || !text.contains("body") {
        return html.to_vec();
    }
    if text.contains("</head>") {
        return text
            .replacen(
                "</head>",
                &format!("  <link rel=\"stylesheet\" href=\"{url}\">\n  </head>"),
                1,
            )
            .into_bytes();
    }
    if text.contains("<body>") {
        return text
            .replacen(
                "<body>",
                &format!("  <head>\n  <link rel=\"stylesheet\" href=\"{url}\">\n  </head>\n  <body>"),
                1,
            )
            .into_bytes();
    }
    html.to_vec()
}

/// The whitespace in front of the first line containing `keyword`.
pub fn one_level_of_indentation(source: &str, keyword: &str) -> String {
    source
        .lines()
        .find_map(|line| line.find(keyword).map(|i| line[..i].to_string()))
        .unwrap_or_default()
}

/// Link a stylesheet from Amber source that has `html` and `body` but not the link.
pub fn style_amber(source: &str, url: &str) -> String {
    let url = escape_html(url);
    if source.contains(url.as_str()) || !source.contains("html") || !source.contains("body") {
        return source.to_string();
    }
    let ws = one_level_of_indentation(source, "body");
    let link = format!("link[href=\"{url}\"][rel=\"stylesheet\"][type=\"text/css\"]");
    if source.contains("head") {
        source.replacen("head\n", &format!("head\n{ws}{ws}{link}\n"), 1)
    } else {
        source.replacen("html\n", &format!("html\n{ws}head\n{ws}{ws}{link}\n"), 1)
    }
}
