//! Detect whether a configuration script registers request handlers.
//!
//! The source is tokenized so that comments, string literals, method calls
//! (`mux:handle(...)`), field accesses and local definitions never count.

const REGISTRATION_CALLS: &[&str] = &["handle", "servedir"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Str,
    Punct(char),
}

/// Whether `source` calls the global `handle` or `servedir`.
pub fn has_handlers(source: &str) -> bool {
    let tokens = tokenize(source);
    tokens.iter().enumerate().any(|(i, tok)| {
        let Token::Name(name) = tok else {
            return false;
        };
        if !REGISTRATION_CALLS.contains(&name.as_str()) {
            return false;
        }
        let shadowed = i
            .checked_sub(1)
            .and_then(|p| tokens.get(p))
            .map(|prev| match prev {
                Token::Punct('.') | Token::Punct(':') => true,
                Token::Name(n) => n == "function" || n == "local",
                _ => false,
            })
            .unwrap_or(false);
        let called = matches!(
            tokens.get(i + 1),
            Some(Token::Punct('(')) | Some(Token::Punct('{')) | Some(Token::Str)
        );
        called && !shadowed
    })
}

fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            i += 2;
            match long_bracket_level(&chars, i) {
                Some(level) => i = skip_long_bracket(&chars, i, level),
                None => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                }
            }
        } else if c == '"' || c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != c && chars[i] != '\n' {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            tokens.push(Token::Str);
        } else if let Some(level) = long_bracket_level(&chars, i) {
            i = skip_long_bracket(&chars, i, level);
            tokens.push(Token::Str);
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Str);
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    tokens
}

/// Level of a long bracket (`[[`, `[==[`) opening at `i`.
fn long_bracket_level(chars: &[char], i: usize) -> Option<usize> {
    if chars.get(i) != Some(&'[') {
        return None;
    }
    let mut level = 0;
    let mut j = i + 1;
    while chars.get(j) == Some(&'=') {
        level += 1;
        j += 1;
    }
    (chars.get(j) == Some(&'[')).then_some(level)
}

/// Index just past the long bracket that opens at `i`.
fn skip_long_bracket(chars: &[char], i: usize, level: usize) -> usize {
    let mut j = i + level + 2;
    while j < chars.len() {
        if chars[j] == ']' {
            let mut k = j + 1;
            let mut eq = 0;
            while chars.get(k) == Some(&'=') {
                eq += 1;
                k += 1;
            }
            if eq == level && chars.get(k) == Some(&']') {
                return k + 1;
            }
        }
        j += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_global_calls() {
        assert!(has_handlers("handle(\"/\", function() print('hi') end)"));
        assert!(has_handlers("SetAddr(':4000')\nservedir('/static', 'public')"));
        assert!(has_handlers("handle \"/\""));
    }

    #[test]
    fn ignores_comments_and_strings() {
        assert!(!has_handlers("-- handle(\"/\", f)\nprint('ok')"));
        assert!(!has_handlers("--[[ servedir('/', '.') ]]"));
        assert!(!has_handlers("--[==[ handle('/') ]==] x = 1"));
        assert!(!has_handlers("print(\"handle(\")"));
        assert!(!has_handlers("s = [[ handle('/', f) ]]"));
    }

    #[test]
    fn ignores_methods_fields_and_definitions() {
        assert!(!has_handlers("mux:handle('/', f)"));
        assert!(!has_handlers("t.handle('/', f)"));
        assert!(!has_handlers("local function handle(x) end"));
        assert!(!has_handlers("function handle(x) end"));
        assert!(!has_handlers("handler = 1\nhandled(2)"));
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        assert!(!has_handlers("x = 'it\\'s handle(1)'"));
        assert!(has_handlers("x = 'it\\'s'\nhandle('/', f)"));
    }
}
