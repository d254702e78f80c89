mod block;
mod file;
mod mode;
mod stat;

pub use block::{CacheCompression, DataBlock};
pub(crate) use block::gzip_compress;
pub use file::{FileCache, FileCacheConfig, Fingerprint};
pub use mode::CacheMode;
pub use stat::{FileStatCache, StatEntry};

use std::io;
use std::path::Path;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("could not read {path}: {message}")]
    Io {
        path: String,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("could not decompress cached data: {0}")]
    Decompress(String),

    #[error("could not compress data: {0}")]
    Compress(String),
}

impl CacheError {
    pub fn io(path: &Path, err: &io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { kind, .. } if *kind == io::ErrorKind::NotFound)
    }
}
