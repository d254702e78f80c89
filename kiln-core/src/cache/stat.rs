use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Result of one `stat` call.
#[derive(Debug, Clone, Copy)]
pub struct StatEntry {
    pub exists: bool,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
    observed_at: Instant,
}

impl StatEntry {
    fn observe(path: &Path) -> Self {
        let observed_at = Instant::now();
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                is_dir: meta.is_dir(),
                size: meta.len(),
                modified: meta.modified().ok(),
                observed_at,
            },
            Err(_) => Self {
                exists: false,
                is_dir: false,
                size: 0,
                modified: None,
                observed_at,
            },
        }
    }
}

/// Cached `stat` of filesystem paths.
///
/// When disabled every call performs a real `stat`, so no stale answer is ever given.
pub struct FileStatCache {
    enabled: bool,
    refresh: Duration,
    entries: DashMap<PathBuf, StatEntry>,
}

impl FileStatCache {
    pub fn new(enabled: bool, refresh: Duration) -> Self {
        Self {
            enabled,
            refresh,
            entries: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stat(&self, path: &Path) -> StatEntry {
        if !self.enabled {
            return StatEntry::observe(path);
        }

        if let Some(entry) = self.entries.get(path) {
            if entry.observed_at.elapsed() < self.refresh {
                return *entry;
            }
        }

        let entry = StatEntry::observe(path);
        self.entries.insert(path.to_path_buf(), entry);
        entry
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.stat(path).exists
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.stat(path).is_dir
    }

    pub fn size(&self, path: &Path) -> u64 {
        self.stat(path).size
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn disabled_cache_always_reflects_disk() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let cache = FileStatCache::new(false, Duration::from_secs(60));

        assert!(!cache.exists(&file));
        fs::write(&file, "abc").unwrap();
        assert!(cache.exists(&file));
        assert_eq!(cache.size(&file), 3);
    }

    #[test]
    fn enabled_cache_serves_entries_until_expiry() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let cache = FileStatCache::new(true, Duration::from_secs(60));

        assert!(!cache.exists(&file));
        fs::write(&file, "abc").unwrap();
        // Still cached as missing.
        assert!(!cache.exists(&file));

        cache.clear();
        assert!(cache.exists(&file));
    }

    #[test]
    fn expired_entries_are_refilled() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let cache = FileStatCache::new(true, Duration::from_millis(0));

        assert!(!cache.exists(&file));
        fs::write(&file, "abc").unwrap();
        assert!(cache.exists(&file));
    }

    #[test]
    fn reports_directories() {
        let dir = tempdir().unwrap();
        let cache = FileStatCache::new(true, Duration::from_secs(60));
        assert!(cache.is_dir(dir.path()));
    }
}
