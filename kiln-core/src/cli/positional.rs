/// Values taken from the positional arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Positional {
    pub root: Option<String>,
    pub addr: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
}

fn as_addr(token: &str) -> Option<String> {
    if token.contains(':') {
        Some(token.to_string())
    } else if token.parse::<u16>().is_ok() {
        Some(format!(":{token}"))
    } else {
        None
    }
}

/// Interpret `[file or directory] [host][:port] [cert] [key]`.
///
/// The first token is the serving root when it exists on disk, otherwise an address
/// when it contains `:` or is a port number. The second token is an address when it looks
/// like one. Whatever is left is the certificate, then the key.
pub fn parse_positional(args: &[String], exists: impl Fn(&str) -> bool) -> Positional {
    let mut out = Positional::default();
    let mut leftovers = Vec::new();

    for (i, token) in args.iter().enumerate() {
        match i {
            0 => {
                if exists(token) {
                    let trimmed = token.trim_end_matches(std::path::MAIN_SEPARATOR);
                    let root = if trimmed.is_empty() { token.as_str() } else { trimmed };
                    out.root = Some(root.to_string());
                } else if let Some(addr) = as_addr(token) {
                    out.addr = Some(addr);
                } else {
                    tracing::warn!(argument = %token, "ignoring argument that is neither a path nor an address");
                }
            }
            1 => match as_addr(token) {
                Some(addr) => out.addr = Some(addr),
                None => leftovers.push(token.clone()),
            },
            _ => leftovers.push(token.clone()),
        }
    }

    let mut leftovers = leftovers.into_iter();
    out.cert = leftovers.next();
    out.key = leftovers.next();
    out
}
