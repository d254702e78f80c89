use crate::cache::CacheError;
use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// How cached bodies are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCompression {
    Raw,
    Speed,
    Size,
}

impl CacheCompression {
    fn level(self) -> Option<Compression> {
        match self {
            CacheCompression::Raw => None,
            CacheCompression::Speed => Some(Compression::fast()),
            CacheCompression::Size => Some(Compression::best()),
        }
    }
}

/// An immutable in-memory file body, possibly stored gzip-compressed.
#[derive(Debug, Clone)]
pub struct DataBlock {
    body: Bytes,
    compressed: bool,
    original_len: usize,
}

impl DataBlock {
    pub fn raw(data: impl Into<Bytes>) -> Self {
        let body = data.into();
        Self {
            original_len: body.len(),
            body,
            compressed: false,
        }
    }

    /// Store `data` with the given compression. Falls back to raw storage when
    /// compression fails or does not shrink the data.
    pub fn with_compression(data: impl Into<Bytes>, compression: CacheCompression) -> Self {
        let data = data.into();
        let Some(level) = compression.level() else {
            return Self::raw(data);
        };
        match gzip_with(&data, level) {
            Ok(gz) if gz.len() < data.len() => Self {
                original_len: data.len(),
                body: Bytes::from(gz),
                compressed: true,
            },
            _ => Self::raw(data),
        }
    }

    pub fn len(&self) -> usize {
        self.original_len
    }

    pub fn is_empty(&self) -> bool {
        self.original_len == 0
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Bytes held in memory for this block.
    pub fn stored_len(&self) -> usize {
        self.body.len()
    }

    /// The uncompressed body.
    pub fn data(&self) -> Result<Bytes, CacheError> {
        if !self.compressed {
            return Ok(self.body.clone());
        }
        let mut out = Vec::with_capacity(self.original_len);
        GzDecoder::new(&self.body[..])
            .read_to_end(&mut out)
            .map_err(|e| CacheError::Decompress(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    /// The body as a gzip stream, reusing the stored bytes when already compressed.
    pub fn gzip_data(&self) -> Result<Bytes, CacheError> {
        if self.compressed {
            return Ok(self.body.clone());
        }
        gzip_compress(&self.body)
            .map(Bytes::from)
            .map_err(|e| CacheError::Compress(e.to_string()))
    }
}

/// Compress data using gzip
pub(crate) fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    gzip_with(data, Compression::fast())
}

fn gzip_with(data: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    encoder.finish()
}
