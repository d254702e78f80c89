//! Django-style text templates (`.po2`, `.pongo2`, `.tpl`, `.tmpl`).
//!
//! Each render gets its own environment with the data script's values as globals
//! and its functions as template functions, so concurrent renders share nothing.

use super::{RenderError, TemplateData};
use minijinja::value::Rest;
use minijinja::{Environment, ErrorKind, Value, context};

fn environment(data: &TemplateData) -> Environment<'static> {
    let mut env = Environment::new();
    for (name, value) in &data.values {
        env.add_global(name.clone(), Value::from_serialize(value));
    }
    for (name, f) in &data.functions {
        let f = f.clone();
        let fname = name.clone();
        env.add_function(name.clone(), move |args: Rest<String>| -> Result<Value, minijinja::Error> {
            f(&args)
                .map(|v| Value::from_serialize(&v))
                .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, format!("{fname}: {e}")))
        });
    }
    env
}

fn describe(err: &minijinja::Error) -> String {
    match err.line() {
        Some(line) => format!("{err} - Line: {line}, Column: 1"),
        None => err.to_string(),
    }
}

/// Compile and execute a template.
pub fn render(source: &str, data: &TemplateData) -> Result<Vec<u8>, RenderError> {
    let env = environment(data);
    env.render_str(source, context! {})
        .map(String::into_bytes)
        .map_err(|e| RenderError::Pongo(describe(&e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn globals_and_functions() {
        let data = TemplateData::default()
            .with_value("title", "Hi")
            .with_value("items", json!([1, 2, 3]))
            .with_function("shout", |args| Ok(json!(args.join(" ").to_uppercase())));
        let out = render(
            "<h1>{{ title }}</h1>{% for i in items %}{{ i }}{% endfor %} {{ shout(\"a\", \"2\") }}",
            &data,
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "<h1>Hi</h1>123 A 2");
    }

    #[test]
    fn function_errors_fail_the_render() {
        let data = TemplateData::default().with_function("boom", |_| Err("nope".to_string()));
        let err = render("{{ boom() }}", &data).unwrap_err();
        assert!(err.to_string().contains("boom: nope"));
        assert_eq!(err.language(), "pongo2");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = render("line\n{% if %}", &TemplateData::default()).unwrap_err();
        assert!(err.to_string().contains("Line: 2"));
    }
}
