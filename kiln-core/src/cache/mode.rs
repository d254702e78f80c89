use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Selects which file extensions are eligible for the file cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Off,
    On,
    /// Everything except template and script sources.
    Production,
    /// Like `Production`, with the per-entry cap lowered to 64 KiB.
    Small,
    Images,
    /// Everything except template, script and style sources.
    #[default]
    Development,
}

const SOURCE_EXTENSIONS: &[&str] = &[".amber", ".lua", ".po2", ".pongo2", ".tl", ".tpl", ".tmpl"];

const DEVELOPMENT_EXCLUDED: &[&str] = &[
    ".amber", ".gcss", ".happ", ".js", ".jsx", ".lua", ".md", ".po2", ".pongo2", ".scss", ".tl",
    ".tpl", ".tmpl",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    ".apng", ".bmp", ".gif", ".ico", ".jpeg", ".jpg", ".png", ".svg", ".webp",
];

impl CacheMode {
    /// Whether a file with the given lowercase extension (including the dot) should be cached.
    pub fn should_cache(self, ext: &str) -> bool {
        match self {
            CacheMode::Off => false,
            CacheMode::On => true,
            CacheMode::Production | CacheMode::Small => !SOURCE_EXTENSIONS.contains(&ext),
            CacheMode::Images => IMAGE_EXTENSIONS.contains(&ext),
            CacheMode::Development => !DEVELOPMENT_EXCLUDED.contains(&ext),
        }
    }
}

impl FromStr for CacheMode {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to the default mode.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "everything" | "all" | "on" | "1" | "enabled" | "yes" | "enable" => CacheMode::On,
            "production" | "prod" => CacheMode::Production,
            "images" | "image" => CacheMode::Images,
            "small" | "64k" | "64kb" => CacheMode::Small,
            "off" | "disabled" | "0" | "no" | "disable" => CacheMode::Off,
            _ => CacheMode::Development,
        })
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheMode::Off => "Off",
            CacheMode::On => "On",
            CacheMode::Production => "Production",
            CacheMode::Small => "Small",
            CacheMode::Images => "Images",
            CacheMode::Development => "Development",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_skips_sources_and_styles() {
        let mode = CacheMode::Development;
        assert!(!mode.should_cache(".lua"));
        assert!(!mode.should_cache(".md"));
        assert!(!mode.should_cache(".scss"));
        assert!(mode.should_cache(".html"));
        assert!(mode.should_cache(".png"));
    }

    #[test]
    fn production_caches_markdown_but_not_scripts() {
        for mode in [CacheMode::Production, CacheMode::Small] {
            assert!(mode.should_cache(".md"));
            assert!(mode.should_cache(".gcss"));
            assert!(!mode.should_cache(".lua"));
            assert!(!mode.should_cache(".amber"));
        }
    }

    #[test]
    fn images_only_caches_images() {
        assert!(CacheMode::Images.should_cache(".webp"));
        assert!(!CacheMode::Images.should_cache(".html"));
    }

    #[test]
    fn on_and_off_are_absolute() {
        assert!(CacheMode::On.should_cache(".lua"));
        assert!(!CacheMode::Off.should_cache(".png"));
    }

    #[test]
    fn parses_aliases_and_defaults_unknown_names() {
        assert_eq!("prod".parse::<CacheMode>().unwrap(), CacheMode::Production);
        assert_eq!("64KB".parse::<CacheMode>().unwrap(), CacheMode::Small);
        assert_eq!("disable".parse::<CacheMode>().unwrap(), CacheMode::Off);
        assert_eq!("whatever".parse::<CacheMode>().unwrap(), CacheMode::Development);
    }
}
