use std::path::Path;

/// How a file is turned into a response, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Html,
    Markdown,
    Amber,
    Pongo,
    Lua,
    Gcss,
    Scss,
    HyperApp,
    Jsx,
    Form,
    /// A zipped application, extracted and served as a directory.
    Bundle,
    /// Source code and configuration, shown as text.
    Text,
    /// Offered as a download.
    Binary,
    /// Content type from the extension.
    Other,
}

const BINARY: &[&str] = &[
    "", ".exe", ".com", ".elf", ".tgz", ".tar.gz", ".tbz2", ".tar.bz2", ".tar.xz", ".txz", ".gz",
    ".zip", ".7z", ".rar", ".arj", ".lz",
];

const TEXT: &[&str] = &[
    ".c", ".cc", ".cfg", ".conf", ".cpp", ".cs", ".go", ".h", ".hpp", ".ini", ".java", ".kt",
    ".log", ".mod", ".nim", ".pl", ".py", ".rb", ".rs", ".sh", ".sum", ".swift", ".tl", ".toml",
    ".ts", ".txt", ".yaml", ".yml", ".zig",
];

/// Lowercase extension with its dot. `.hyper.js` and `.hyper.jsx` count as one
/// extension, and so do the compressed tar suffixes.
pub fn extension(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    for double in [".hyper.jsx", ".hyper.js", ".tar.gz", ".tar.bz2", ".tar.xz"] {
        if name.ends_with(double) {
            return double.to_string();
        }
    }
    match name.rfind('.') {
        Some(i) if i > 0 => name[i..].to_string(),
        _ => String::new(),
    }
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n[1..].find('.').is_none())
        .unwrap_or(false)
}

pub fn classify(path: &Path) -> Kind {
    let ext = extension(path);
    match ext.as_str() {
        ".html" | ".htm" => Kind::Html,
        ".md" | ".markdown" => Kind::Markdown,
        ".amber" | ".amb" => Kind::Amber,
        ".po2" | ".pongo2" | ".tpl" | ".tmpl" => Kind::Pongo,
        ".lua" => Kind::Lua,
        ".gcss" => Kind::Gcss,
        ".scss" => Kind::Scss,
        ".happ" | ".hyper" | ".hyper.jsx" | ".hyper.js" => Kind::HyperApp,
        ".jsx" => Kind::Jsx,
        ".frm" | ".form" => Kind::Form,
        ".alg" => Kind::Bundle,
        _ if is_dotfile(path) => Kind::Text,
        e if TEXT.contains(&e) => Kind::Text,
        e if BINARY.contains(&e) => Kind::Binary,
        _ => Kind::Other,
    }
}

/// Content type for files served as they are.
pub fn content_type(path: &Path, kind: Kind) -> String {
    match kind {
        Kind::Text => crate::response::TEXT_UTF8.to_string(),
        Kind::Binary => "application/octet-stream".to_string(),
        _ => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            if mime.type_() == "text" || mime.subtype() == "javascript" || mime.subtype() == "json" {
                format!("{mime};charset=utf-8")
            } else {
                mime.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_extensions() {
        assert_eq!(extension(Path::new("app.Hyper.JSX")), ".hyper.jsx");
        assert_eq!(extension(Path::new("app.hyper.js")), ".hyper.js");
        assert_eq!(extension(Path::new("a.tar.gz")), ".tar.gz");
        assert_eq!(extension(Path::new("plain.js")), ".js");
        assert_eq!(extension(Path::new("README")), "");
    }

    #[test]
    fn kinds() {
        assert_eq!(classify(Path::new("x/INDEX.HTM")), Kind::Html);
        assert_eq!(classify(Path::new("post.markdown")), Kind::Markdown);
        assert_eq!(classify(Path::new("t.tmpl")), Kind::Pongo);
        assert_eq!(classify(Path::new("app.hyper.js")), Kind::HyperApp);
        assert_eq!(classify(Path::new("widget.jsx")), Kind::Jsx);
        assert_eq!(classify(Path::new("signup.frm")), Kind::Form);
        assert_eq!(classify(Path::new("app.alg")), Kind::Bundle);
        assert_eq!(classify(Path::new("main.rs")), Kind::Text);
        assert_eq!(classify(Path::new(".gitignore")), Kind::Text);
        assert_eq!(classify(Path::new("release.tar.xz")), Kind::Binary);
        assert_eq!(classify(Path::new("LICENSE")), Kind::Binary);
        assert_eq!(classify(Path::new("logo.png")), Kind::Other);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("a.css"), Kind::Other), "text/css;charset=utf-8");
        assert_eq!(content_type(Path::new("a.png"), Kind::Other), "image/png");
        assert_eq!(content_type(Path::new("a.zip"), Kind::Binary), "application/octet-stream");
        assert_eq!(content_type(Path::new("a.py"), Kind::Text), "text/plain;charset=utf-8");
    }
}
