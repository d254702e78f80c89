//! Form definitions (`.frm`, `.form`) rendered to an HTML `<form>`.
//!
//! ```text
//! title: Sign up
//! action: /register
//! method: post
//! Name: text
//! Password: password
//! About you: textarea
//! [Register]
//! ```
//!
//! `# ...` lines are comments. A field type may be `text`, `password`, `email`,
//! `number`, `date`, `checkbox`, `textarea` or `hidden`; the field name is the
//! lowercased label with spaces replaced by `_`.

use super::RenderError;
use crate::theme::escape_html;

const FIELD_TYPES: &[&str] = &[
    "text", "password", "email", "number", "date", "checkbox", "textarea", "hidden",
];

#[derive(Debug, Default, PartialEq, Eq)]
struct Form {
    title: Option<String>,
    action: String,
    method: String,
    fields: Vec<(String, String)>,
    buttons: Vec<String>,
}

fn field_name(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn parse(source: &str) -> Result<Form, RenderError> {
    let mut form = Form {
        method: "post".to_string(),
        ..Default::default()
    };
    for (i, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(button) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            form.buttons.push(button.trim().to_string());
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(RenderError::Form(format!(
                "expected \"label: type\" - Line: {}, Column: 1",
                i + 1
            )));
        };
        let value = value.trim();
        match key.trim() {
            "title" => form.title = Some(value.to_string()),
            "action" => form.action = value.to_string(),
            "method" => form.method = value.to_lowercase(),
            label => {
                let kind = value.to_lowercase();
                if !FIELD_TYPES.contains(&kind.as_str()) {
                    return Err(RenderError::Form(format!(
                        "unknown field type {value} - Line: {}, Column: {}",
                        i + 1,
                        key.len() + 2
                    )));
                }
                form.fields.push((label.to_string(), kind));
            }
        }
    }
    if form.buttons.is_empty() {
        form.buttons.push("Submit".to_string());
    }
    Ok(form)
}

/// Render a form definition to an HTML fragment.
pub fn render(source: &str) -> Result<Vec<u8>, RenderError> {
    let form = parse(source)?;
    let mut html = String::new();
    if let Some(title) = &form.title {
        html.push_str(&format!("<h2>{}</h2>", escape_html(title)));
    }
    html.push_str(&format!(
        "<form action=\"{}\" method=\"{}\">",
        escape_html(&form.action),
        escape_html(&form.method)
    ));
    for (label, kind) in &form.fields {
        let name = field_name(label);
        let label = escape_html(label);
        match kind.as_str() {
            "hidden" => html.push_str(&format!("<input type=\"hidden\" name=\"{name}\">")),
            "textarea" => html.push_str(&format!(
                "<p><label for=\"{name}\">{label}</label><br><textarea id=\"{name}\" name=\"{name}\"></textarea></p>"
            )),
            "checkbox" => html.push_str(&format!(
                "<p><input type=\"checkbox\" id=\"{name}\" name=\"{name}\"> <label for=\"{name}\">{label}</label></p>"
            )),
            other => html.push_str(&format!(
                "<p><label for=\"{name}\">{label}</label><br><input type=\"{other}\" id=\"{name}\" name=\"{name}\"></p>"
            )),
        }
    }
    for button in &form.buttons {
        html.push_str(&format!("<input type=\"submit\" value=\"{}\">", escape_html(button)));
    }
    html.push_str("</form>");
    Ok(html.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_fields_and_buttons() {
        let form = parse("title: Join\naction: /join\nFull name: text\n# note\nAgree: checkbox\n[Go]").unwrap();
        assert_eq!(form.title.as_deref(), Some("Join"));
        assert_eq!(form.action, "/join");
        assert_eq!(form.method, "post");
        assert_eq!(
            form.fields,
            vec![
                ("Full name".to_string(), "text".to_string()),
                ("Agree".to_string(), "checkbox".to_string())
            ]
        );
        assert_eq!(form.buttons, vec!["Go".to_string()]);
    }

    #[test]
    fn renders_inputs() {
        let html = String::from_utf8(render("Email: email").unwrap()).unwrap();
        assert_eq!(
            html,
            "<form action=\"\" method=\"post\"><p><label for=\"email\">Email</label><br><input type=\"email\" id=\"email\" name=\"email\"></p><input type=\"submit\" value=\"Submit\"></form>"
        );
    }

    #[test]
    fn unknown_types_are_errors() {
        let err = render("Name: texty").unwrap_err();
        assert!(err.to_string().contains("Line: 1"));
    }
}
