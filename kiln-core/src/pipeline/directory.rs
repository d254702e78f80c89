use crate::theme;
use std::path::Path;

/// Optional per-directory settings for listings.
pub const DIR_CONFIG: &str = ".kiln";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DirConfig {
    pub title: Option<String>,
    pub theme: Option<String>,
}

/// Read `title` and `theme` from the `[main]` section of a `.kiln` file.
pub fn parse_dir_config(text: &str) -> DirConfig {
    let mut config = DirConfig::default();
    let mut in_main = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_main = section.trim().eq_ignore_ascii_case("main");
            continue;
        }
        if !in_main {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "title" => config.title = Some(value),
            "theme" => config.theme = Some(value),
            _ => {}
        }
    }
    config
}

fn listing_title(dir: &Path) -> String {
    let mut title = dir.display().to_string();
    if let Some(rest) = title.strip_prefix("./") {
        title = rest.to_string();
    }
    while title.contains("//") {
        title = title.replace("//", "/");
    }
    title
}

/// A themed page linking every visible entry of `dir`. `url_path` is the request path
/// of the directory and prefixes each link.
pub fn listing(dir: &Path, url_path: &str, theme_name: &str) -> Vec<u8> {
    let mut entries: Vec<(String, bool)> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                if name.starts_with('.') {
                    return None;
                }
                let is_dir = e.path().is_dir();
                Some((name, is_dir))
            })
            .collect(),
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "could not read directory");
            Vec::new()
        }
    };
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let prefix = url_path.trim_start_matches('/');
    let mut body = String::new();
    for (name, is_dir) in &entries {
        body.push_str(&theme::html_link(name, &format!("{prefix}{name}"), *is_dir));
    }
    if body.is_empty() {
        body.push_str("Empty directory");
    }

    let config = std::fs::read_to_string(dir.join(DIR_CONFIG))
        .map(|text| parse_dir_config(&text))
        .unwrap_or_default();
    let title = config.title.unwrap_or_else(|| listing_title(dir));
    let theme_name = config.theme.as_deref().unwrap_or(theme_name);

    let mut page = theme::message_page(&title, &body, theme::page_theme(theme_name));
    page.extend_from_slice(b"</body></html>");
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_files_and_directories() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a");
        fs::create_dir_all(dir.join("c")).unwrap();
        fs::write(dir.join("b.txt"), "b").unwrap();
        fs::write(dir.join(".hidden"), "h").unwrap();

        let html = String::from_utf8(listing(&dir, "/a/", "default")).unwrap();
        assert!(html.contains("<a href=\"/a/b.txt\">b.txt</a>"), "{html}");
        assert!(html.contains("<a href=\"/a/c/\">c/</a>"), "{html}");
        assert!(!html.contains(".hidden"));
        assert!(html.find("c/</a>").unwrap() < html.find("b.txt</a>").unwrap());
        assert!(html.ends_with("</body></html>"));
    }

    #[test]
    fn empty_directory() {
        let root = tempfile::tempdir().unwrap();
        let html = String::from_utf8(listing(root.path(), "/", "gray")).unwrap();
        assert!(html.contains("Empty directory"));
    }

    #[test]
    fn dir_config_sets_title_and_theme() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(DIR_CONFIG),
            "; listing\n[main]\ntitle = \"My files\"\ntheme=dark\n[other]\ntitle=no\n",
        )
        .unwrap();
        let html = String::from_utf8(listing(root.path(), "/", "gray")).unwrap();
        assert!(html.contains("<title>My files</title>"));
        assert!(html.contains(theme::builtin_css("dark").unwrap()));
    }

    #[test]
    fn titles_are_tidied() {
        assert_eq!(listing_title(Path::new("./a//b/")), "a/b/");
    }
}
