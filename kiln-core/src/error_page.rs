//! Source-context error pages for script and template failures.

const PRE_HIGHLIGHT: &str = "<font style='color: red !important'>";
const POST_HIGHLIGHT: &str = "</font>";

/// Page title for a lowercase language name.
pub fn title(lang: &str) -> String {
    match lang {
        "" => "Error".to_string(),
        "css" => "CSS Error".to_string(),
        "gcss" => "GCSS Error".to_string(),
        "html" => "HTML Error".to_string(),
        "jsx" => "JSX Error".to_string(),
        "scss" => "SCSS Error".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => format!("{}{} Error", first.to_uppercase(), chars.as_str()),
                None => "Error".to_string(),
            }
        }
    }
}

/// The zero-based line an error message refers to, when the language heuristics find one.
pub fn error_line(message: &str, lang: &str) -> Option<usize> {
    let number = match lang {
        "lua" => {
            // "file.lua:3: message" or "file.lua:3(...)".
            let mut fields = message.splitn(3, ':');
            fields.next()?;
            let field = fields.next()?;
            fields.next()?;
            field.split('(').next().unwrap_or(field).to_string()
        }
        "amber" | "pongo2" | "gcss" | "jsx" | "form" => {
            let (_, rest) = message.split_once("- Line: ")?;
            let (number, _) = rest.split_once(',')?;
            number.trim().to_string()
        }
        _ => return None,
    };
    let line: usize = number.parse().ok()?;
    line.checked_sub(1)
}

fn highlighted_source(source: &[u8], message: &str, lang: &str) -> String {
    let text = String::from_utf8_lossy(source).replace('<', "&lt;");
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if let Some(n) = error_line(message, lang) {
        if let Some(line) = lines.get_mut(n) {
            *line = format!("{PRE_HIGHLIGHT}{line}{POST_HIGHLIGHT}");
        }
    }
    lines.join("\n")
}

/// Render the error page. The caller decides on auto-refresh injection.
pub fn render(filename: &str, source: &[u8], message: &str, lang: &str, version: &str) -> Vec<u8> {
    let title = title(lang);
    let code = if source.is_empty() {
        String::new()
    } else {
        highlighted_source(source, message, lang)
    };
    let lang_class = match lang {
        "" | "amber" | "gcss" => "nohighlight",
        other => other,
    };
    let message = message.trim().replace('<', "&lt;");

    format!(
        r#"<!doctype html>
<html>
  <head>
    <title>{title}</title>
    <link href='//fonts.googleapis.com/css?family=Lato:300' rel='stylesheet' type='text/css'>
    <style>
      body {{
        background-color: #f0f0f0;
        color: #0b0b0b;
        font-family: 'Lato', sans-serif;
        font-weight: 300;
        margin: 3.5em;
        font-size: 1.3em;
      }}
      h1 {{
        color: #101010;
      }}
      div {{
        margin-bottom: 35pt;
      }}
      #right {{
        text-align: right;
      }}
      #wrap {{
        white-space: pre-wrap;
      }}
    </style>
  </head>
  <body>
    <div style="font-size: 3em; font-weight: bold;">{title}</div>
    Contents of {filename}:
    <div>
      <pre><code class="{lang_class}">{code}</code></pre>
    </div>
    Error message:
    <div>
      <pre id="wrap"><code style="color: #A00000;" class="json">{message}</code></pre>
    </div>
    <div id="right">{version}</div>
  </body>
</html>
"#,
        filename = crate::theme::escape_html(filename),
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles() {
        assert_eq!(title(""), "Error");
        assert_eq!(title("gcss"), "GCSS Error");
        assert_eq!(title("lua"), "Lua Error");
        assert_eq!(title("pongo2"), "Pongo2 Error");
    }

    #[test]
    fn lua_line_numbers() {
        assert_eq!(error_line("index.lua:3: attempt to call a nil value", "lua"), Some(2));
        assert_eq!(error_line("index.lua:7(near 'x'): oops", "lua"), Some(6));
        assert_eq!(error_line("no line here", "lua"), None);
        assert_eq!(error_line("a:b:c", "lua"), None);
    }

    #[test]
    fn amber_line_numbers() {
        assert_eq!(error_line("Amber Error: unexpected token - Line: 4, Column: 2", "amber"), Some(3));
        assert_eq!(error_line("Amber Error - Line: 4", "amber"), None);
    }

    #[test]
    fn highlights_the_offending_line() {
        let src = b"print('a')\nprint(<b>)\nprint('c')";
        let page = String::from_utf8(render("x.lua", src, "x.lua:2: bad", "lua", "kiln 1.0")).unwrap();

        assert!(page.contains("<font style='color: red !important'>print(&lt;b>)</font>"));
        assert!(page.contains("<title>Lua Error</title>"));
        assert!(page.contains("kiln 1.0"));
        assert!(page.contains("x.lua:2: bad"));
    }

    #[test]
    fn renders_without_highlight_when_line_is_unknown() {
        let page = String::from_utf8(render("x.gcss", b"a\nb", "broken", "gcss", "v")).unwrap();
        assert!(!page.contains(PRE_HIGHLIGHT));
        assert!(page.contains("class=\"nohighlight\""));
    }
}
