use crate::cache::block::{CacheCompression, DataBlock};
use crate::cache::CacheError;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;

/// Size limits and storage format for the [`FileCache`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileCacheConfig {
    /// Upper bound on the total stored bytes.
    pub max_size: u64,
    /// Entries larger than this are never stored.
    pub max_entity_size: u64,
    /// Files larger than this are read through without touching the cache at all.
    pub max_given_data_size: u64,
    pub compression: CacheCompression,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1024 * 1024,                  // 1 MiB
            max_entity_size: 64 * 1024,             // 64 KiB
            max_given_data_size: 7 * 1024 * 1024,   // 7 MiB
            compression: CacheCompression::Speed,
        }
    }
}

/// Cache key: the path plus the lowercase extension that made it cacheable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub path: PathBuf,
    pub ext: String,
}

impl Fingerprint {
    pub fn new(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            ext,
        }
    }
}

struct Entries {
    lru: LruCache<Fingerprint, DataBlock>,
    total: u64,
}

type Flight = Arc<OnceCell<Result<DataBlock, CacheError>>>;

/// Bounded, LRU-evicted cache of file bodies with single-flight fills.
pub struct FileCache {
    config: FileCacheConfig,
    entries: Mutex<Entries>,
    in_flight: DashMap<Fingerprint, Flight>,
    disk_reads: AtomicU64,
}

impl FileCache {
    pub fn new(config: FileCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                total: 0,
            }),
            in_flight: DashMap::new(),
            disk_reads: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &FileCacheConfig {
        &self.config
    }

    /// Number of filesystem reads performed so far.
    pub fn disk_reads(&self) -> u64 {
        self.disk_reads.load(Ordering::Relaxed)
    }

    /// Total bytes currently held.
    pub fn stored_bytes(&self) -> u64 {
        self.entries.lock().total
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.total = 0;
    }

    /// Read a file into memory, going through the cache when `should_cache` is set.
    pub async fn read(&self, path: &Path, should_cache: bool) -> Result<DataBlock, CacheError> {
        if !should_cache || self.config.max_size == 0 {
            return self.read_through(path).await;
        }

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| CacheError::io(path, &e))?
            .len();
        if size > self.config.max_given_data_size {
            return self.read_through(path).await;
        }

        let key = Fingerprint::new(path);
        if let Some(block) = self.entries.lock().lru.get(&key) {
            return Ok(block.clone());
        }

        let flight = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = flight
            .get_or_init(|| async { self.fill(&key).await })
            .await
            .clone();

        // Only the flight that is still registered gets removed.
        self.in_flight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));

        result
    }

    async fn read_through(&self, path: &Path) -> Result<DataBlock, CacheError> {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| CacheError::io(path, &e))?;
        Ok(DataBlock::raw(data))
    }

    async fn fill(&self, key: &Fingerprint) -> Result<DataBlock, CacheError> {
        // A previous flight may have filled the entry while this one was being set up.
        if let Some(block) = self.entries.lock().lru.get(key) {
            return Ok(block.clone());
        }

        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let data = tokio::fs::read(&key.path)
            .await
            .map_err(|e| CacheError::io(&key.path, &e))?;

        if data.len() as u64 > self.config.max_entity_size {
            tracing::debug!(path = %key.path.display(), size = data.len(), "file too large for cache");
            return Ok(DataBlock::raw(data));
        }

        let block = DataBlock::with_compression(data, self.config.compression);
        self.insert(key.clone(), block.clone());
        Ok(block)
    }

    fn insert(&self, key: Fingerprint, block: DataBlock) {
        let size = block.stored_len() as u64;
        if size > self.config.max_size {
            return;
        }

        let mut entries = self.entries.lock();
        if let Some(old) = entries.lru.pop(&key) {
            entries.total -= old.stored_len() as u64;
        }
        while entries.total + size > self.config.max_size {
            match entries.lru.pop_lru() {
                Some((evicted, old)) => {
                    tracing::trace!(path = %evicted.path.display(), "evicting cache entry");
                    entries.total -= old.stored_len() as u64;
                }
                None => break,
            }
        }
        entries.total += size;
        entries.lru.put(key, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn raw_config(max_size: u64, max_entity_size: u64) -> FileCacheConfig {
        FileCacheConfig {
            max_size,
            max_entity_size,
            max_given_data_size: 7 * 1024 * 1024,
            compression: CacheCompression::Raw,
        }
    }

    #[tokio::test]
    async fn cached_reads_hit_disk_once() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.html");
        fs::write(&file, "<p>hello</p>").unwrap();

        let cache = FileCache::new(raw_config(1024, 1024));
        for _ in 0..3 {
            let block = cache.read(&file, true).await.unwrap();
            assert_eq!(&block.data().unwrap()[..], b"<p>hello</p>");
        }
        assert_eq!(cache.disk_reads(), 1);
    }

    #[tokio::test]
    async fn uncacheable_reads_go_to_disk_every_time() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.lua");
        fs::write(&file, "print('x')").unwrap();

        let cache = FileCache::new(raw_config(1024, 1024));
        cache.read(&file, false).await.unwrap();
        cache.read(&file, false).await.unwrap();
        assert_eq!(cache.disk_reads(), 2);
        assert_eq!(cache.stored_bytes(), 0);
    }

    #[tokio::test]
    async fn entity_one_byte_over_the_cap_is_fetched_fresh() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big.txt");
        fs::write(&file, vec![b'x'; 17]).unwrap();

        let cache = FileCache::new(raw_config(1024, 16));
        cache.read(&file, true).await.unwrap();
        cache.read(&file, true).await.unwrap();
        assert_eq!(cache.disk_reads(), 2);
        assert_eq!(cache.stored_bytes(), 0);
    }

    #[tokio::test]
    async fn evicts_least_recently_used_entries() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        fs::write(&a, vec![b'a'; 10]).unwrap();
        fs::write(&b, vec![b'b'; 10]).unwrap();
        fs::write(&c, vec![b'c'; 10]).unwrap();

        let cache = FileCache::new(raw_config(20, 16));
        cache.read(&a, true).await.unwrap();
        cache.read(&b, true).await.unwrap();
        // Touch a so that b becomes the eviction candidate.
        cache.read(&a, true).await.unwrap();
        cache.read(&c, true).await.unwrap();
        assert_eq!(cache.stored_bytes(), 20);
        assert_eq!(cache.disk_reads(), 3);

        cache.read(&a, true).await.unwrap();
        assert_eq!(cache.disk_reads(), 3);
        cache.read(&b, true).await.unwrap();
        assert_eq!(cache.disk_reads(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_read() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("shared.css");
        fs::write(&file, "body { color: red; }").unwrap();

        let cache = Arc::new(FileCache::new(raw_config(1024, 1024)));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let file = file.clone();
            tasks.push(tokio::spawn(async move {
                cache.read(&file, true).await.unwrap().data().unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(&task.await.unwrap()[..], b"body { color: red; }");
        }
        assert_eq!(cache.disk_reads(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(FileCacheConfig::default());
        let err = cache
            .read(&dir.path().join("nope.txt"), true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "abc").unwrap();

        let cache = FileCache::new(raw_config(1024, 1024));
        cache.read(&file, true).await.unwrap();
        cache.clear();
        assert_eq!(cache.stored_bytes(), 0);
        cache.read(&file, true).await.unwrap();
        assert_eq!(cache.disk_reads(), 2);
    }
}
