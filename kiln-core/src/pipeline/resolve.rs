use crate::cache::FileStatCache;
use crate::request::strip_port;
use std::path::{Component, Path, PathBuf};

/// Index files, in the order they are tried.
pub const INDEX_FILES: &[&str] = &[
    "index.lua",
    "index.html",
    "index.md",
    "index.txt",
    "index.pongo2",
    "index.tmpl",
    "index.po2",
    "index.amber",
    "index.happ",
    "index.hyper",
    "index.hyper.js",
    "index.hyper.jsx",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    File(PathBuf),
    /// A directory. `slash` tells if the request path already ends with `/`.
    Dir { path: PathBuf, slash: bool },
    Missing(PathBuf),
}

/// The directory requests are served from, with the domain appended when `add_domain` is set.
pub fn serving_root(root: &Path, host: &str, add_domain: bool) -> PathBuf {
    if add_domain {
        root.join(strip_port(host))
    } else {
        root.to_path_buf()
    }
}

/// Map a request path to the filesystem below `root`.
///
/// Paths that try to climb out of the root, or that end in `.` or `..`, resolve to
/// [`Resolved::Missing`].
pub fn resolve(root: &Path, url_path: &str, stat: &FileStatCache) -> Resolved {
    let Some(rel) = relative_path(url_path) else {
        tracing::warn!(path = %url_path, "rejecting path that leaves the serving root");
        return Resolved::Missing(root.to_path_buf());
    };
    let path = root.join(&rel);

    if stat.is_dir(&path) {
        return Resolved::Dir {
            path,
            slash: url_path.ends_with('/'),
        };
    }
    if stat.exists(&path) {
        return Resolved::File(path);
    }
    Resolved::Missing(path)
}

/// The first index file present in `dir`.
pub fn find_index(dir: &Path, stat: &FileStatCache) -> Option<PathBuf> {
    INDEX_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| stat.exists(p) && !stat.is_dir(p))
}

/// Decode a request path once and check every component.
fn relative_path(url_path: &str) -> Option<PathBuf> {
    let decoded = percent_encoding::percent_decode_str(url_path)
        .decode_utf8()
        .ok()?;
    let trimmed = decoded.trim_start_matches('/').trim_end_matches('/');

    let last = trimmed.rsplit('/').next().unwrap_or("");
    if last == "." || last == ".." {
        return None;
    }

    let rel = PathBuf::from(trimmed);
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return None,
        }
    }
    Some(rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::Duration;

    fn stat() -> FileStatCache {
        FileStatCache::new(false, Duration::from_secs(60))
    }

    #[test]
    fn files_dirs_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/b.txt"), "b").unwrap();
        let stat = stat();

        assert_eq!(
            resolve(dir.path(), "/a/b.txt", &stat),
            Resolved::File(dir.path().join("a/b.txt"))
        );
        assert_eq!(
            resolve(dir.path(), "/a", &stat),
            Resolved::Dir {
                path: dir.path().join("a"),
                slash: false
            }
        );
        assert_eq!(
            resolve(dir.path(), "/a/", &stat),
            Resolved::Dir {
                path: dir.path().join("a"),
                slash: true
            }
        );
        assert_eq!(
            resolve(dir.path(), "/nope", &stat),
            Resolved::Missing(dir.path().join("nope"))
        );
    }

    #[test]
    fn a_trailing_slash_on_a_file_still_finds_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.alg"), "zip").unwrap();
        assert!(matches!(resolve(dir.path(), "/app.alg/", &stat()), Resolved::File(_)));
    }

    #[test]
    fn traversal_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let stat = stat();
        for path in ["/../etc/passwd", "/a/../../x", "/%2e%2e/secret", "/a/..", "/a/."] {
            assert!(
                matches!(resolve(dir.path(), path, &stat), Resolved::Missing(_)),
                "{path}"
            );
        }
    }

    #[test]
    fn resolving_twice_gives_the_same_answer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.md"), "# x").unwrap();
        let stat = FileStatCache::new(true, Duration::from_secs(60));
        assert_eq!(resolve(dir.path(), "/x.md", &stat), resolve(dir.path(), "/x.md", &stat));
    }

    #[test]
    fn index_files_follow_priority() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.md"), "# md").unwrap();
        fs::write(dir.path().join("index.txt"), "txt").unwrap();
        assert_eq!(find_index(dir.path(), &stat()), Some(dir.path().join("index.md")));

        fs::write(dir.path().join("index.lua"), "print(1)").unwrap();
        assert_eq!(find_index(dir.path(), &stat()), Some(dir.path().join("index.lua")));
    }

    #[test]
    fn domain_directories() {
        let root = Path::new("/srv");
        assert_eq!(serving_root(root, "example.org:3000", true), PathBuf::from("/srv/example.org"));
        assert_eq!(serving_root(root, "example.org:3000", false), PathBuf::from("/srv"));
    }
}
