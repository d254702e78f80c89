//! Turning bytes and files into response bodies: gzip for larger in-memory bodies,
//! range-capable streaming for large files.

use crate::cache::{DataBlock, gzip_compress};
use crate::request::RequestInfo;
use crate::response::{Body, Response};
use bytes::Bytes;
use http::header::{ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_RANGE, CONTENT_TYPE, LAST_MODIFIED, VARY};
use http::{HeaderValue, StatusCode};
use httpdate::fmt_http_date;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncSeekExt;

/// Bodies at least this large are gzipped for clients that accept it.
pub const GZIP_THRESHOLD: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}

pub fn parse_range_header(header: &str, size: u64) -> Option<ByteRange> {
    let range = header.trim().strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;

    let (start, end) = if start.is_empty() {
        // Suffix range: the last `end` bytes.
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        (size.saturating_sub(suffix), size.saturating_sub(1))
    } else {
        let start: u64 = start.parse().ok()?;
        let end = if end.is_empty() {
            size.saturating_sub(1)
        } else {
            end.parse().ok()?
        };
        (start, end)
    };

    if size == 0 || start > end || end >= size {
        return None;
    }
    Some(ByteRange { start, end })
}

/// A complete in-memory response, compressed when worthwhile.
pub fn data_response(req: &RequestInfo, content_type: &str, data: impl Into<Bytes>) -> Response {
    let data = data.into();
    let mut resp = Response::bytes(StatusCode::OK, content_type, Bytes::new());
    if req.accepts_gzip() && data.len() >= GZIP_THRESHOLD {
        match gzip_compress(&data) {
            Ok(zipped) => {
                resp.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                resp.headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
                resp.body = Body::Bytes(Bytes::from(zipped));
                return resp;
            }
            Err(e) => tracing::warn!(error = %e, "could not gzip response"),
        }
    }
    resp.body = Body::Bytes(data);
    resp
}

/// Like [`data_response`], reusing the compressed form a cache block may already hold.
pub fn block_response(req: &RequestInfo, content_type: &str, block: &DataBlock) -> io::Result<Response> {
    if req.accepts_gzip() && block.len() >= GZIP_THRESHOLD {
        let zipped = block.gzip_data().map_err(io::Error::other)?;
        let mut resp = Response::bytes(StatusCode::OK, content_type, zipped);
        resp.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        resp.headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
        return Ok(resp);
    }
    let data = block.data().map_err(io::Error::other)?;
    Ok(Response::bytes(StatusCode::OK, content_type, data))
}

/// Stream a file from disk without reading it into memory, honouring `Range`.
pub async fn stream_file(path: &Path, content_type: &str, req: &RequestInfo) -> io::Result<Response> {
    let metadata = fs::metadata(path).await?;
    let size = metadata.len();
    let mut file = fs::File::open(path).await?;

    let mut resp = Response::new(StatusCode::OK);
    resp.set_header(CONTENT_TYPE, content_type);
    resp.headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(modified) = metadata.modified() {
        resp.set_header(LAST_MODIFIED, &fmt_http_date(modified));
    }

    let range = req.headers.get(http::header::RANGE).and_then(|v| v.to_str().ok());
    match range.map(|r| parse_range_header(r, size)) {
        Some(Some(range)) => {
            file.seek(io::SeekFrom::Start(range.start)).await?;
            resp.status = StatusCode::PARTIAL_CONTENT;
            resp.set_header(
                CONTENT_RANGE,
                &format!("bytes {}-{}/{}", range.start, range.end, size),
            );
            resp.body = Body::RangedFile {
                file,
                remaining: range.end - range.start + 1,
            };
        }
        Some(None) => {
            resp.status = StatusCode::RANGE_NOT_SATISFIABLE;
            resp.set_header(CONTENT_RANGE, &format!("bytes */{size}"));
        }
        None => {
            resp.body = Body::RangedFile { file, remaining: size };
        }
    }
    resp.set_content_length();
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheCompression;
    use pretty_assertions::assert_eq;

    #[test]
    fn ranges() {
        assert_eq!(parse_range_header("bytes=0-9", 100), Some(ByteRange { start: 0, end: 9 }));
        assert_eq!(parse_range_header("bytes=90-", 100), Some(ByteRange { start: 90, end: 99 }));
        assert_eq!(parse_range_header("bytes=-10", 100), Some(ByteRange { start: 90, end: 99 }));
        assert_eq!(parse_range_header("bytes=50-200", 100), None);
        assert_eq!(parse_range_header("items=0-1", 100), None);
        assert_eq!(parse_range_header("bytes=5-1", 100), None);
    }

    #[test]
    fn small_bodies_stay_plain() {
        let req = RequestInfo::get("/").with_header("accept-encoding", "gzip");
        let resp = data_response(&req, "text/plain", vec![b'a'; GZIP_THRESHOLD - 1]);
        assert!(resp.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(resp.body_bytes().unwrap().len(), GZIP_THRESHOLD - 1);
    }

    #[test]
    fn large_bodies_are_gzipped_when_accepted() {
        let data = vec![b'a'; 5000];
        let gzip = RequestInfo::get("/").with_header("accept-encoding", "gzip, deflate");
        let resp = data_response(&gzip, "text/plain", data.clone());
        assert_eq!(resp.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(resp.body_bytes().unwrap().len() < data.len());

        let plain = data_response(&RequestInfo::get("/"), "text/plain", data.clone());
        assert_eq!(plain.body_bytes().unwrap().len(), data.len());
    }

    #[test]
    fn compressed_blocks_are_reused() {
        let block = DataBlock::with_compression(vec![b'x'; 8000], CacheCompression::Speed);
        let gzip = RequestInfo::get("/").with_header("accept-encoding", "gzip");
        let resp = block_response(&gzip, "text/plain", &block).unwrap();
        assert_eq!(resp.headers.get(CONTENT_ENCODING).unwrap(), "gzip");

        let plain = block_response(&RequestInfo::get("/"), "text/plain", &block).unwrap();
        assert_eq!(plain.body_bytes().unwrap().len(), 8000);
    }

    #[tokio::test]
    async fn streamed_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.bin");
        std::fs::write(&path, (0..100u8).collect::<Vec<_>>()).unwrap();

        let req = RequestInfo::get("/movie.bin").with_header("range", "bytes=10-19");
        let resp = stream_file(&path, "application/octet-stream", &req).await.unwrap();
        assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers.get(CONTENT_RANGE).unwrap(), "bytes 10-19/100");
        assert_eq!(resp.headers.get("content-length").unwrap(), "10");

        let whole = stream_file(&path, "application/octet-stream", &RequestInfo::get("/")).await.unwrap();
        assert_eq!(whole.status, StatusCode::OK);
        assert_eq!(whole.headers.get("content-length").unwrap(), "100");
    }
}
