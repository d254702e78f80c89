//! JSX to plain JavaScript.
//!
//! Elements become `React.createElement(type, props, ...children)` calls. Everything
//! that is not JSX is copied through unchanged.

use super::RenderError;

const JSX_AFTER: &str = "([{,=:?!&|;}>+-*%~^";
const JSX_AFTER_KEYWORDS: &[&str] = &["return", "yield", "default", "case", "in", "of", "typeof", "void"];

enum Prop {
    Pair(String, String),
    Spread(String),
}

/// Transform JSX source to JavaScript.
pub fn transform(source: &str) -> Result<String, RenderError> {
    let mut t = Transformer {
        src: source.chars().collect(),
        pos: 0,
    };
    t.js(false)
}

struct Transformer {
    src: Vec<char>,
    pos: usize,
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_name(c: char) -> bool {
    is_ident(c) || c == '-' || c == ':' || c == '.'
}

fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text.replace('"', "\\\"")))
}

fn prop_key(name: &str) -> String {
    let plain = name.chars().next().map(|c| !c.is_ascii_digit()).unwrap_or(false)
        && name.chars().all(is_ident);
    if plain { name.to_string() } else { quote(name) }
}

fn element_type(name: &str) -> String {
    let lower = name.chars().next().map(|c| c.is_ascii_lowercase()).unwrap_or(false);
    if (lower && !name.contains('.')) || name.contains('-') {
        quote(name)
    } else {
        name.to_string()
    }
}

/// Whitespace rules for text between tags: lines are trimmed where they meet a line
/// break and blank lines disappear.
fn clean_text(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len() - 1;
    let mut parts = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let mut t = *line;
        if i > 0 {
            t = t.trim_start();
        }
        if i < last {
            t = t.trim_end();
        }
        if !t.is_empty() {
            parts.push(t);
        }
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn only_comment(expr: &str) -> bool {
    let t = expr.trim();
    t.is_empty() || (t.starts_with("/*") && t.ends_with("*/") && !t[2..t.len() - 2].contains("*/"))
}

fn create(tag: &str, props: Vec<Prop>, children: Vec<String>) -> String {
    let props = if props.is_empty() {
        "null".to_string()
    } else {
        let mut segments = Vec::new();
        let mut pairs = Vec::new();
        let has_spread = props.iter().any(|p| matches!(p, Prop::Spread(_)));
        for prop in props {
            match prop {
                Prop::Pair(k, v) => pairs.push(format!("{}: {v}", prop_key(&k))),
                Prop::Spread(expr) => {
                    if !pairs.is_empty() {
                        segments.push(format!("{{{}}}", pairs.join(", ")));
                        pairs.clear();
                    }
                    segments.push(expr);
                }
            }
        }
        if !pairs.is_empty() {
            segments.push(format!("{{{}}}", pairs.join(", ")));
        }
        if has_spread {
            format!("Object.assign({{}}, {})", segments.join(", "))
        } else {
            segments.join(", ")
        }
    };
    let mut call = format!("React.createElement({tag}, {props}");
    for child in children {
        call.push_str(", ");
        call.push_str(&child);
    }
    call.push(')');
    call
}

impl Transformer {
    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn skip_ws(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> RenderError {
        let upto = &self.src[..self.pos.min(self.src.len())];
        let line = upto.iter().filter(|&&c| c == '\n').count() + 1;
        let column = upto.iter().rev().take_while(|&&c| c != '\n').count() + 1;
        RenderError::Jsx(format!("{message} - Line: {line}, Column: {column}"))
    }

    fn expect(&mut self, c: char) -> Result<(), RenderError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while self.peek().map(is_name).unwrap_or(false) {
            self.pos += 1;
        }
        self.src[start..self.pos].iter().collect()
    }

    /// Copy a quoted string or template literal.
    fn string(&mut self, quote: char, out: &mut String) -> Result<(), RenderError> {
        out.push(quote);
        self.pos += 1;
        while let Some(c) = self.peek() {
            out.push(c);
            self.pos += 1;
            if c == '\\' {
                if let Some(next) = self.peek() {
                    out.push(next);
                    self.pos += 1;
                }
            } else if c == quote {
                return Ok(());
            } else if c == '\n' && quote != '`' {
                return Err(self.error("unterminated string"));
            }
        }
        Err(self.error("unterminated string"))
    }

    fn jsx_starts(&self, last: Option<char>, word: &str) -> bool {
        let next_ok = self
            .peek_at(1)
            .map(|c| c.is_alphabetic() || c == '>')
            .unwrap_or(false);
        if !next_ok {
            return false;
        }
        match last {
            None => true,
            Some(c) if is_ident(c) => JSX_AFTER_KEYWORDS.contains(&word),
            Some(c) => JSX_AFTER.contains(c),
        }
    }

    /// JavaScript until the end of input, or until the `}` closing an expression
    /// container when `in_braces` is set. The closing brace is consumed, not copied.
    fn js(&mut self, in_braces: bool) -> Result<String, RenderError> {
        let mut out = String::new();
        let mut depth = 0usize;
        let mut last: Option<char> = None;
        let mut word = String::new();
        let mut gap = false;

        while let Some(c) = self.peek() {
            match c {
                '"' | '\'' | '`' => {
                    self.string(c, &mut out)?;
                    last = Some(c);
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        out.push(c);
                        self.pos += 1;
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    while self.peek().is_some() && !self.starts_with("*/") {
                        out.extend(self.peek());
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(self.error("unterminated comment"));
                    }
                    out.push_str("*/");
                    self.pos += 2;
                }
                '}' if depth == 0 && in_braces => {
                    self.pos += 1;
                    return Ok(out);
                }
                '<' if self.jsx_starts(last, &word) => {
                    let element = self.element()?;
                    out.push_str(&element);
                    last = Some(')');
                    word.clear();
                }
                c if c.is_whitespace() => {
                    out.push(c);
                    self.pos += 1;
                    gap = true;
                    continue;
                }
                c => {
                    match c {
                        '{' => depth += 1,
                        '}' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    if is_ident(c) {
                        let continues = last.map(is_ident).unwrap_or(false) && !gap;
                        if !continues {
                            word.clear();
                        }
                        word.push(c);
                    }
                    out.push(c);
                    self.pos += 1;
                    last = Some(c);
                }
            }
            gap = false;
        }

        if in_braces {
            Err(self.error("unterminated expression"))
        } else {
            Ok(out)
        }
    }

    fn element(&mut self) -> Result<String, RenderError> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some('>') {
            self.pos += 1;
            let children = self.children("")?;
            return Ok(create("React.Fragment", Vec::new(), children));
        }

        let name = self.name();
        if name.is_empty() {
            return Err(self.error("expected an element name"));
        }
        let props = self.attributes()?;
        if self.starts_with("/>") {
            self.pos += 2;
            return Ok(create(&element_type(&name), props, Vec::new()));
        }
        self.expect('>')?;
        let children = self.children(&name)?;
        Ok(create(&element_type(&name), props, children))
    }

    fn attributes(&mut self) -> Result<Vec<Prop>, RenderError> {
        let mut props = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.error("unterminated element")),
                Some('/') | Some('>') => return Ok(props),
                Some('{') => {
                    self.pos += 1;
                    self.skip_ws();
                    if !self.starts_with("...") {
                        return Err(self.error("expected '...' in attribute spread"));
                    }
                    self.pos += 3;
                    let expr = self.js(true)?;
                    props.push(Prop::Spread(expr.trim().to_string()));
                }
                Some(_) => {
                    let name = self.name();
                    if name.is_empty() {
                        return Err(self.error("expected an attribute name"));
                    }
                    self.skip_ws();
                    if self.peek() != Some('=') {
                        props.push(Prop::Pair(name, "true".to_string()));
                        continue;
                    }
                    self.pos += 1;
                    self.skip_ws();
                    let value = match self.peek() {
                        Some(q @ ('"' | '\'')) => {
                            self.pos += 1;
                            let start = self.pos;
                            while self.peek().map(|c| c != q).unwrap_or(false) {
                                self.pos += 1;
                            }
                            if self.peek().is_none() {
                                return Err(self.error("unterminated attribute value"));
                            }
                            let text: String = self.src[start..self.pos].iter().collect();
                            self.pos += 1;
                            quote(&text)
                        }
                        Some('{') => {
                            self.pos += 1;
                            self.js(true)?.trim().to_string()
                        }
                        Some('<') => self.element()?,
                        _ => return Err(self.error("expected an attribute value")),
                    };
                    props.push(Prop::Pair(name, value));
                }
            }
        }
    }

    fn children(&mut self, closing: &str) -> Result<Vec<String>, RenderError> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(format!("unterminated element <{closing}>")));
                }
                Some('<') if self.peek_at(1) == Some('/') => {
                    self.pos += 2;
                    self.skip_ws();
                    let name = self.name();
                    self.skip_ws();
                    if name != closing {
                        return Err(self.error(format!(
                            "expected closing tag </{closing}>, found </{name}>"
                        )));
                    }
                    self.expect('>')?;
                    return Ok(children);
                }
                Some('<') => children.push(self.element()?),
                Some('{') => {
                    self.pos += 1;
                    let expr = self.js(true)?;
                    if !only_comment(&expr) {
                        children.push(expr.trim().to_string());
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    while self.peek().map(|c| c != '<' && c != '{').unwrap_or(false) {
                        self.pos += 1;
                    }
                    let raw: String = self.src[start..self.pos].iter().collect();
                    if let Some(text) = clean_text(&raw) {
                        children.push(quote(&text));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn elements_with_props_and_children() {
        let js = transform("const el = <div className=\"a\">Hi {name}</div>;").unwrap();
        assert_eq!(
            js,
            "const el = React.createElement(\"div\", {className: \"a\"}, \"Hi \", name);"
        );
    }

    #[test]
    fn components_fragments_and_self_closing() {
        let js = transform("render(<><App title='x' on /><br/></>)").unwrap();
        assert_eq!(
            js,
            "render(React.createElement(React.Fragment, null, React.createElement(App, {title: \"x\", on: true}), React.createElement(\"br\", null)))"
        );
    }

    #[test]
    fn multiline_text_is_collapsed() {
        let js = transform("return (\n  <p>\n    one\n    two\n  </p>\n)").unwrap();
        assert_eq!(js, "return (\n  React.createElement(\"p\", null, \"one two\")\n)");
    }

    #[test]
    fn spread_and_nested_expressions() {
        let js = transform("x = <ul {...props} data-id={1}>{items.map(i => <li>{i}</li>)}</ul>").unwrap();
        assert_eq!(
            js,
            "x = React.createElement(\"ul\", Object.assign({}, props, {\"data-id\": 1}), items.map(i => React.createElement(\"li\", null, i)))"
        );
    }

    #[test]
    fn comparisons_are_left_alone() {
        let src = "if (a < b && c<d) { s = \"<p>\"; }";
        assert_eq!(transform(src).unwrap(), src);
    }

    #[test]
    fn mismatched_tags_report_the_line() {
        let err = transform("a = <div>\n</span>").unwrap_err();
        assert!(err.to_string().contains("Line: 2"));
        assert_eq!(err.language(), "jsx");
    }
}
