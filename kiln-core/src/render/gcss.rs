//! GCSS: indentation based CSS with variables, nesting and mixins.
//!
//! ```text
//! $accent = #a00
//! $rounded($r)
//!   border-radius: $r
//! nav, footer
//!   color: $accent
//!   a
//!     text-decoration: none
//!   &:hover
//!     $rounded(4px)
//! ```

use super::RenderError;
use std::collections::HashMap;

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

#[derive(Debug)]
struct Mixin {
    params: Vec<String>,
    declarations: Vec<String>,
}

fn error(message: impl std::fmt::Display, line: &Line<'_>) -> RenderError {
    RenderError::Gcss(format!(
        "{message} - Line: {}, Column: {}",
        line.number,
        line.indent + 1
    ))
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

/// Compile GCSS source to CSS.
pub fn compile(source: &str) -> Result<String, RenderError> {
    let lines: Vec<Line<'_>> = source
        .lines()
        .enumerate()
        .filter(|(_, l)| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with("//")
        })
        .map(|(i, l)| {
            let text = l.trim_start();
            Line {
                number: i + 1,
                indent: l.len() - text.len(),
                text: text.trim_end().trim_end_matches(';'),
            }
        })
        .collect();
    let mut pos = 0;
    let nodes = parse_block(&lines, &mut pos, None)?;

    let mut compiler = Compiler::default();
    compiler.top_level(&nodes)?;
    Ok(compiler.out)
}

#[derive(Default)]
struct Compiler {
    variables: Vec<(String, String)>,
    mixins: HashMap<String, Mixin>,
    out: String,
}

fn split_call(text: &str) -> Option<(&str, Vec<String>)> {
    let open = text.find('(')?;
    let inner = text[open + 1..].strip_suffix(')')?;
    let args = inner
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    Some((&text[..open], args))
}

fn declaration(text: &str) -> Option<(&str, &str)> {
    let (name, value) = text.split_once(':')?;
    let name = name.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '*');
    valid.then(|| (name, value.trim()))
}

fn variable(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('$')?;
    let split = rest.find(['=', ':'])?;
    let name = rest[..split].trim();
    if name.is_empty() || name.contains(['(', ' ']) {
        return None;
    }
    Some((name, rest[split + 1..].trim()))
}

fn combine(parents: &[String], selector: &str) -> Vec<String> {
    let children: Vec<&str> = selector.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if parents.is_empty() {
        return children.iter().map(|c| c.replace('&', "")).collect();
    }
    let mut out = Vec::with_capacity(parents.len() * children.len());
    for parent in parents {
        for child in &children {
            if child.contains('&') {
                out.push(child.replace('&', parent));
            } else {
                out.push(format!("{parent} {child}"));
            }
        }
    }
    out
}

impl Compiler {
    fn substitute(&self, value: &str) -> String {
        let mut out = value.to_string();
        for (name, replacement) in &self.variables {
            out = out.replace(&format!("${name}"), replacement);
        }
        out
    }

    fn define_variable(&mut self, name: &str, value: &str) {
        let value = self.substitute(value);
        self.variables.retain(|(n, _)| n != name);
        self.variables.push((name.to_string(), value));
        // Longest names first so that `$a` never replaces part of `$ab`.
        self.variables.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    fn top_level(&mut self, nodes: &[Node<'_>]) -> Result<(), RenderError> {
        for node in nodes {
            let text = node.line.text;
            if node.children.is_empty() {
                if let Some((name, value)) = variable(text) {
                    self.define_variable(name, value);
                    continue;
                }
                if text.starts_with('@') {
                    self.out.push_str(&format!("{};", self.substitute(text)));
                    continue;
                }
                return Err(error("expected a selector or a variable", &node.line));
            }
            if let Some(name) = text.strip_prefix('$') {
                let (name, params) =
                    split_call(name).ok_or_else(|| error("invalid mixin definition", &node.line))?;
                let mut declarations = Vec::new();
                for child in &node.children {
                    if !child.children.is_empty() {
                        return Err(error("mixins may only hold declarations", &child.line));
                    }
                    declarations.push(child.line.text.to_string());
                }
                self.mixins.insert(
                    name.trim().to_string(),
                    Mixin {
                        params: params.iter().map(|p| p.trim_start_matches('$').to_string()).collect(),
                        declarations,
                    },
                );
                continue;
            }
            if text.starts_with('@') {
                self.out.push_str(&format!("{}{{", self.substitute(text)));
                self.top_level(&node.children)?;
                self.out.push('}');
                continue;
            }
            self.rule(&[], node)?;
        }
        Ok(())
    }

    fn rule(&mut self, parents: &[String], node: &Node<'_>) -> Result<(), RenderError> {
        let selectors = combine(parents, node.line.text);
        let mut body = String::new();
        let mut nested = Vec::new();

        for child in &node.children {
            let text = child.line.text;
            if !child.children.is_empty() {
                nested.push(child);
                continue;
            }
            if let Some(call) = text.strip_prefix('$') {
                if let Some((name, args)) = split_call(call) {
                    self.expand_mixin(name.trim(), &args, &child.line, &mut body)?;
                    continue;
                }
            }
            match declaration(text) {
                Some((name, value)) => {
                    body.push_str(&format!("{name}:{};", self.substitute(value)));
                }
                None => return Err(error(format!("expected a declaration: {text}"), &child.line)),
            }
        }

        if !body.is_empty() {
            self.out.push_str(&format!("{}{{{body}}}", selectors.join(",")));
        }
        for child in nested {
            self.rule(&selectors, child)?;
        }
        Ok(())
    }

    fn expand_mixin(
        &self,
        name: &str,
        args: &[String],
        line: &Line<'_>,
        body: &mut String,
    ) -> Result<(), RenderError> {
        let mixin = self
            .mixins
            .get(name)
            .ok_or_else(|| error(format!("undefined mixin: {name}"), line))?;
        if mixin.params.len() != args.len() {
            return Err(error(
                format!("mixin {name} takes {} arguments, got {}", mixin.params.len(), args.len()),
                line,
            ));
        }
        let mut params: Vec<(&String, String)> = mixin
            .params
            .iter()
            .zip(args)
            .map(|(p, a)| (p, self.substitute(a)))
            .collect();
        params.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        for decl in &mixin.declarations {
            let (prop, value) =
                declaration(decl).ok_or_else(|| error(format!("expected a declaration: {decl}"), line))?;
            let mut value = value.to_string();
            for (param, arg) in &params {
                value = value.replace(&format!("${param}"), arg);
            }
            body.push_str(&format!("{prop}:{};", self.substitute(&value)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn variables_and_nesting() {
        let src = "$accent = #a00\nnav, footer\n  color: $accent\n  a\n    text-decoration: none\n  &:hover\n    color: black\n";
        assert_eq!(
            compile(src).unwrap(),
            "nav,footer{color:#a00;}nav a,footer a{text-decoration:none;}nav:hover,footer:hover{color:black;}"
        );
    }

    #[test]
    fn mixins_expand_with_arguments() {
        let src = "$size = 2px\n$rounded($r)\n  border-radius: $r\n.box\n  $rounded($size)\n  // a comment\n  padding: 1em\n";
        assert_eq!(compile(src).unwrap(), ".box{border-radius:2px;padding:1em;}");
    }

    #[test]
    fn media_blocks_and_imports() {
        let src = "@import url(a.css)\n@media print\n  body\n    color: black\n";
        assert_eq!(
            compile(src).unwrap(),
            "@import url(a.css);@media print{body{color:black;}}"
        );
    }

    #[test]
    fn stray_text_is_an_error() {
        let err = compile("body\n  color red\n").unwrap_err();
        assert!(err.to_string().contains("Line: 2, Column: 3"));
        assert_eq!(err.language(), "gcss");
    }

    #[test]
    fn undefined_mixin_is_an_error() {
        assert!(compile("p\n  $nope(1)\n").is_err());
    }
}
