//! Amber templates: indentation based HTML.
//!
//! Supported: `doctype`, `tag#id.class[attr="v"] text`, `tag: child`, `| text`,
//! `tag.` raw text blocks, `// comments`, `if`/`else if`/`else`, `each $v in list`,
//! and `#{expr}` (escaped) or `!{expr}` (raw) interpolation. Expressions are names,
//! dotted paths, string and number literals, calls to data functions, `!expr`, and
//! `==`/`!=` comparisons.

use super::{RenderError, TemplateData, value_to_text};
use crate::theme::escape_html;
use serde_json::Value;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

#[derive(Debug)]
struct Node<'a> {
    line: Line<'a>,
    children: Vec<Node<'a>>,
}

fn error(message: impl std::fmt::Display, line: &Line<'_>) -> RenderError {
    RenderError::Amber(format!(
        "{message} - Line: {}, Column: {}",
        line.number,
        line.indent + 1
    ))
}

/// Render Amber source to HTML.
pub fn render(source: &str, data: &TemplateData) -> Result<Vec<u8>, RenderError> {
    let lines: Vec<Line<'_>> = source
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            let text = l.trim_start();
            Line {
                number: i + 1,
                indent: l.len() - text.len(),
                text: text.trim_end(),
            }
        })
        .collect();

    let mut pos = 0;
    let nodes = parse_block(&lines, &mut pos, None)?;

    let mut renderer = Renderer {
        data,
        scope: Vec::new(),
        out: String::with_capacity(source.len() * 2),
    };
    renderer.nodes(&nodes)?;
    Ok(renderer.out.into_bytes())
}

fn parse_block<'a>(
    lines: &[Line<'a>],
    pos: &mut usize,
    parent: Option<usize>,
) -> Result<Vec<Node<'a>>, RenderError> {
    let mut nodes = Vec::new();
    let mut block_indent = None;
    while *pos < lines.len() {
        let line = lines[*pos];
        if let Some(p) = parent {
            if line.indent <= p {
                break;
            }
        }
        let indent = *block_indent.get_or_insert(line.indent);
        if line.indent != indent {
            return Err(error("inconsistent indentation", &line));
        }
        *pos += 1;
        let children = parse_block(lines, pos, Some(line.indent))?;
        nodes.push(Node { line, children });
    }
    Ok(nodes)
}

fn keyword<'a>(text: &'a str, kw: &str) -> Option<&'a str> {
    if text == kw {
        return Some("");
    }
    text.strip_prefix(kw).and_then(|rest| rest.strip_prefix(' ')).map(str::trim)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Split on `sep` where it is not inside quotes or parentheses.
fn split_top_level<'a>(text: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let mut quote = None;
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, _) if depth == 0 && text[i..].starts_with(sep) => {
                return Some((&text[..i], &text[i + sep.len()..]));
            }
            _ => {}
        }
    }
    None
}

fn split_args(text: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut rest = text;
    while let Some((arg, tail)) = split_top_level(rest, ",") {
        args.push(arg.trim());
        rest = tail;
    }
    if !rest.trim().is_empty() {
        args.push(rest.trim());
    }
    args
}

struct Renderer<'d> {
    data: &'d TemplateData,
    scope: Vec<(String, Value)>,
    out: String,
}

impl Renderer<'_> {
    fn nodes(&mut self, nodes: &[Node<'_>]) -> Result<(), RenderError> {
        let mut i = 0;
        while i < nodes.len() {
            let node = &nodes[i];
            let text = node.line.text;
            i += 1;

            if let Some(cond) = keyword(text, "if") {
                let mut taken = self.condition(cond, &node.line)?;
                if taken {
                    self.nodes(&node.children)?;
                }
                while i < nodes.len() {
                    let next = &nodes[i];
                    if let Some(cond) = next.line.text.strip_prefix("else if ") {
                        if !taken && self.condition(cond, &next.line)? {
                            self.nodes(&next.children)?;
                            taken = true;
                        }
                        i += 1;
                    } else if next.line.text == "else" {
                        if !taken {
                            self.nodes(&next.children)?;
                        }
                        i += 1;
                        break;
                    } else {
                        break;
                    }
                }
                continue;
            }

            if text == "else" || text.starts_with("else ") {
                return Err(error("else without if", &node.line));
            }
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node<'_>) -> Result<(), RenderError> {
        let line = &node.line;
        let text = line.text;

        if text.starts_with("//") {
            return Ok(());
        }
        if let Some(kind) = keyword(text, "doctype").or_else(|| keyword(text, "!!!")) {
            self.out.push_str(&doctype(kind));
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix('|') {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            let rendered = self.interpolate(rest, line)?;
            self.out.push_str(&rendered);
            return Ok(());
        }
        if let Some(spec) = keyword(text, "each") {
            return self.each(spec, node);
        }
        for unsupported in ["extends", "import", "block", "mixin", "include"] {
            if keyword(text, unsupported).is_some() {
                return Err(error(format!("unsupported statement: {unsupported}"), line));
            }
        }
        self.tag(text, node)
    }

    fn each(&mut self, spec: &str, node: &Node<'_>) -> Result<(), RenderError> {
        let line = &node.line;
        let (vars, expr) =
            split_top_level(spec, " in ").ok_or_else(|| error("expected: each $v in list", line))?;
        let vars: Vec<&str> = vars.split(',').map(str::trim).collect();
        let (key_var, value_var) = match vars.as_slice() {
            [v] => (None, *v),
            [k, v] => (Some(*k), *v),
            _ => return Err(error("expected one or two loop variables", line)),
        };

        let items: Vec<(Value, Value)> = match self.eval(expr, line)? {
            Value::Array(list) => list
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            Value::Null => Vec::new(),
            _ => return Err(error(format!("cannot range over {expr}"), line)),
        };

        let depth = self.scope.len();
        for (key, value) in items {
            if let Some(k) = key_var {
                self.scope.push((k.to_string(), key));
            }
            self.scope.push((value_var.to_string(), value));
            let result = self.nodes(&node.children);
            self.scope.truncate(depth);
            result?;
        }
        Ok(())
    }

    fn tag(&mut self, text: &str, node: &Node<'_>) -> Result<(), RenderError> {
        let line = &node.line;
        let name_len = text.find(|c: char| !is_name_char(c)).unwrap_or(text.len());
        let mut name = &text[..name_len];
        let mut rest = &text[name_len..];
        if name.is_empty() {
            if rest.starts_with('#') || rest.starts_with('.') {
                name = "div";
            } else {
                return Err(error(format!("unexpected token: {text}"), line));
            }
        }

        let mut id = None;
        let mut classes: Vec<String> = Vec::new();
        let mut attrs: Vec<(String, Option<String>)> = Vec::new();
        let mut raw_block = false;

        loop {
            if let Some(r) = rest.strip_prefix('#') {
                let end = r.find(|c: char| !is_name_char(c)).unwrap_or(r.len());
                id = Some(r[..end].to_string());
                rest = &r[end..];
            } else if let Some(r) = rest.strip_prefix('[') {
                let end = closing_bracket(r).ok_or_else(|| error("unclosed attribute", line))?;
                attrs.push(self.attribute(&r[..end], line)?);
                rest = &r[end + 1..];
            } else if rest == "." {
                raw_block = true;
                rest = "";
            } else if let Some(r) = rest.strip_prefix('.') {
                let end = r.find(|c: char| !is_name_char(c)).unwrap_or(r.len());
                if end == 0 {
                    return Err(error("empty class name", line));
                }
                classes.push(r[..end].to_string());
                rest = &r[end..];
            } else {
                break;
            }
        }

        self.out.push('<');
        self.out.push_str(name);
        if let Some(id) = id {
            self.out.push_str(&format!(" id=\"{}\"", escape_html(&id)));
        }
        let class_attr = attrs
            .iter()
            .position(|(k, _)| k == "class")
            .map(|i| attrs.remove(i).1.unwrap_or_default());
        if let Some(extra) = class_attr {
            classes.push(extra);
        }
        if !classes.is_empty() {
            self.out.push_str(&format!(" class=\"{}\"", classes.join(" ")));
        }
        for (key, value) in &attrs {
            match value {
                Some(v) => self.out.push_str(&format!(" {key}=\"{v}\"")),
                None => self.out.push_str(&format!(" {key}")),
            }
        }
        self.out.push('>');

        let void = VOID_TAGS.contains(&name);
        if let Some(child) = rest.strip_prefix(": ") {
            let inline = Node {
                line: Line {
                    number: line.number,
                    indent: line.indent + (text.len() - child.len()),
                    text: child.trim(),
                },
                children: Vec::new(),
            };
            self.node(&inline)?;
        } else if let Some(words) = rest.strip_prefix(' ') {
            let rendered = self.interpolate(words, line)?;
            self.out.push_str(&rendered);
        } else if !rest.is_empty() {
            return Err(error(format!("unexpected token: {rest}"), line));
        }

        if raw_block {
            let mut raw = Vec::new();
            collect_raw(&node.children, &mut raw);
            self.out.push_str(&raw.join("\n"));
        } else {
            self.nodes(&node.children)?;
        }

        if !void {
            self.out.push_str(&format!("</{name}>"));
        }
        Ok(())
    }

    fn attribute(&self, spec: &str, line: &Line<'_>) -> Result<(String, Option<String>), RenderError> {
        let Some((key, value)) = spec.split_once('=') else {
            return Ok((spec.trim().to_string(), None));
        };
        let value = value.trim();
        let text = match unquote(value) {
            Some(literal) => self.interpolate(literal, line)?,
            None => escape_html(&value_to_text(&self.eval(value, line)?)),
        };
        Ok((key.trim().to_string(), Some(text.replace('"', "&quot;"))))
    }

    fn interpolate(&self, text: &str, line: &Line<'_>) -> Result<String, RenderError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            let next = [rest.find("#{"), rest.find("!{")]
                .into_iter()
                .flatten()
                .min();
            let Some(start) = next else { break };
            let escaped = rest[start..].starts_with('#');
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| error("unclosed interpolation", line))?;
            let value = value_to_text(&self.eval(&after[..end], line)?);
            if escaped {
                out.push_str(&escape_html(&value));
            } else {
                out.push_str(&value);
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn condition(&self, expr: &str, line: &Line<'_>) -> Result<bool, RenderError> {
        Ok(truthy(&self.eval(expr, line)?))
    }

    fn eval(&self, expr: &str, line: &Line<'_>) -> Result<Value, RenderError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(error("empty expression", line));
        }
        if let Some((a, b)) = split_top_level(expr, "==") {
            return Ok(Value::Bool(self.eval(a, line)? == self.eval(b, line)?));
        }
        if let Some((a, b)) = split_top_level(expr, "!=") {
            return Ok(Value::Bool(self.eval(a, line)? != self.eval(b, line)?));
        }
        if let Some(inner) = expr.strip_prefix('!') {
            return Ok(Value::Bool(!truthy(&self.eval(inner, line)?)));
        }
        if let Some(literal) = unquote(expr) {
            return Ok(Value::String(literal.to_string()));
        }
        match expr {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "nil" | "null" => return Ok(Value::Null),
            _ => {}
        }
        if let Ok(n) = expr.parse::<i64>() {
            return Ok(Value::from(n));
        }
        if let Ok(f) = expr.parse::<f64>() {
            return Ok(Value::from(f));
        }
        if let Some(open) = expr.find('(') {
            if expr.ends_with(')') {
                return self.call(&expr[..open], &expr[open + 1..expr.len() - 1], line);
            }
        }
        self.lookup(expr, line)
    }

    fn call(&self, name: &str, args: &str, line: &Line<'_>) -> Result<Value, RenderError> {
        let name = name.trim();
        let f = self
            .data
            .functions
            .get(name)
            .ok_or_else(|| error(format!("undefined function {name}"), line))?;
        let args = split_args(args)
            .into_iter()
            .map(|a| self.eval(a, line).map(|v| value_to_text(&v)))
            .collect::<Result<Vec<_>, _>>()?;
        f(&args).map_err(|e| error(format!("{name}: {e}"), line))
    }

    fn lookup(&self, path: &str, line: &Line<'_>) -> Result<Value, RenderError> {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();
        let local = self
            .scope
            .iter()
            .rev()
            .find(|(name, _)| name == head)
            .map(|(_, v)| v);
        let mut value = match local.or_else(|| self.data.values.get(head.trim_start_matches('$'))) {
            Some(v) => v.clone(),
            None => return Err(error(format!("undefined variable {head}"), line)),
        };
        for part in parts {
            value = match value {
                Value::Object(mut map) => map.remove(part).unwrap_or(Value::Null),
                Value::Array(mut list) => match part.parse::<usize>() {
                    Ok(i) if i < list.len() => list.swap_remove(i),
                    _ => Value::Null,
                },
                _ => Value::Null,
            };
        }
        Ok(value)
    }
}

fn doctype(kind: &str) -> String {
    match kind {
        "" | "5" | "html" => "<!DOCTYPE html>".to_string(),
        "xml" => "<?xml version=\"1.0\" encoding=\"utf-8\" ?>".to_string(),
        "transitional" => "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Transitional//EN\" \"http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd\">".to_string(),
        other => format!("<!DOCTYPE {other}>"),
    }
}

fn unquote(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

fn closing_bracket(text: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn collect_raw(nodes: &[Node<'_>], out: &mut Vec<String>) {
    for node in nodes {
        out.push(node.line.text.to_string());
        collect_raw(&node.children, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn html(source: &str, data: &TemplateData) -> String {
        String::from_utf8(render(source, data).unwrap()).unwrap()
    }

    #[test]
    fn nested_tags_with_ids_and_classes() {
        let src = "doctype 5\nhtml\n  body\n    h1#top.big.red Hello\n    p\n      | some text\n    br\n";
        assert_eq!(
            html(src, &TemplateData::default()),
            "<!DOCTYPE html><html><body><h1 id=\"top\" class=\"big red\">Hello</h1><p>some text</p><br></body></html>"
        );
    }

    #[test]
    fn attributes_and_inline_children() {
        let src = "ul\n  li: a[href=\"/x\"][target=\"_blank\"] X\n";
        assert_eq!(
            html(src, &TemplateData::default()),
            "<ul><li><a href=\"/x\" target=\"_blank\">X</a></li></ul>"
        );
    }

    #[test]
    fn interpolation_uses_data() {
        let data = TemplateData::default()
            .with_value("name", "<World>")
            .with_function("greet", |args| Ok(json!(format!("hi {}", args.join(" ")))));
        assert_eq!(html("p Hello #{name}", &data), "<p>Hello &lt;World&gt;</p>");
        assert_eq!(html("p !{name}", &data), "<p><World></p>");
        assert_eq!(html("p #{greet(\"a\", name)}", &data), "<p>hi a &lt;World&gt;</p>");
    }

    #[test]
    fn conditionals_and_loops() {
        let data = TemplateData::default()
            .with_value("items", json!(["a", "b"]))
            .with_value("show", false);
        let src = "if show\n  p shown\nelse\n  p hidden\nul\n  each $i in items\n    li #{$i}\n";
        assert_eq!(html(src, &data), "<p>hidden</p><ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn comments_and_raw_blocks() {
        let src = "// not rendered\n  p nope\nscript.\n  var x = 1;\n  go(x);\n";
        assert_eq!(
            html(src, &TemplateData::default()),
            "<script>var x = 1;\ngo(x);</script>"
        );
    }

    #[test]
    fn errors_carry_line_and_column() {
        let err = render("html\n  body\n    p #{missing}\n", &TemplateData::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("undefined variable missing"));
        assert!(message.ends_with("- Line: 3, Column: 5"));
        assert_eq!(crate::error_page::error_line(&message, "amber"), Some(2));
    }

    #[test]
    fn inconsistent_indentation_is_an_error() {
        let err = render("div\n    p a\n  p b\n", &TemplateData::default()).unwrap_err();
        assert!(err.to_string().contains("Line: 3"));
    }
}
