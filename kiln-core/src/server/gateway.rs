use crate::access_log::{AccessEntry, AccessLogger};
use crate::pipeline::{Dispatch, Pipeline};
use crate::request::RequestInfo;
use crate::response::{Body, DeferredStatus, Response};
use crate::reverse_proxy::ProxyTarget;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{StatusCode, header};
use pingora::prelude::*;
use pingora_http::{RequestHeader, ResponseHeader};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 32 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest request body read into memory for handlers and forms.
pub const MAX_BODY: usize = 32 * 1024 * 1024;

/// Per-request state carried between pingora hooks.
#[derive(Default)]
pub struct RequestCtx {
    pub req: Option<RequestInfo>,
    pub proxy: Option<ProxyTarget>,
    pub deferred_status: Option<DeferredStatus>,
}

/// Serves every request through the dispatch pipeline, forwarding reverse-proxied
/// paths upstream.
pub struct KilnGateway {
    pub pipeline: Arc<Pipeline>,
    pub access: AccessLogger,
}

impl KilnGateway {
    pub fn new(pipeline: Arc<Pipeline>, access: AccessLogger) -> Self {
        Self { pipeline, access }
    }
}

#[async_trait]
impl ProxyHttp for KilnGateway {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        RequestCtx::default()
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let target = ctx
            .proxy
            .as_ref()
            .ok_or_else(|| Error::new(Custom("no upstream selected")))?;

        let peer = HttpPeer::new(
            (target.host.as_str(), target.port),
            target.tls,
            target.host.clone(),
        );
        Ok(Box::new(peer))
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let mut req = request_info(session);

        if !self.pipeline.is_proxied(req.path()) {
            match read_body(session).await? {
                Some(body) => req.body = body,
                None => {
                    tracing::warn!(path = %req.path(), limit = MAX_BODY, "request body too large");
                    session.respond_error(StatusCode::PAYLOAD_TOO_LARGE.as_u16()).await?;
                    ctx.req = Some(req);
                    return Ok(true);
                }
            }
        }

        let dispatch = self.pipeline.dispatch(&req).await;
        let head = req.is_head();
        ctx.req = Some(req);

        match dispatch {
            Dispatch::Proxy(target) => {
                tracing::debug!(upstream = %target.address(), path = %target.path_and_query, "proxying");
                ctx.proxy = Some(target);
                Ok(false)
            }
            Dispatch::Respond(resp) => {
                ctx.deferred_status = resp.deferred_status.clone();
                write_response(session, resp, head, self.pipeline.config().write_timeout).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let Some(target) = &ctx.proxy else {
            return Err(Error::new(Custom("no upstream selected")));
        };
        let uri = target
            .path_and_query
            .parse::<http::Uri>()
            .map_err(|_| Error::new(Custom("invalid upstream path")))?;
        upstream.set_uri(uri);
        upstream.insert_header(header::HOST, target.host_header())?;
        Ok(())
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX)
    where
        Self::CTX: Send + Sync,
    {
        if let Some(e) = e {
            tracing::debug!(error = %e, "request ended with an error");
        }
        if !self.access.is_enabled() {
            return;
        }
        let Some(req) = ctx.req.take() else {
            return;
        };
        let status = logged_status(
            session.response_written().map(|resp| resp.status),
            ctx.deferred_status.as_ref(),
        );
        let bytes = session.body_bytes_sent() as u64;
        let entry = AccessEntry::from_request(&req, self.pipeline.username(&req), status, bytes);
        self.access.log(&entry).await;
    }
}

/// A status a handler set after its head went out wins over the one on the wire.
fn logged_status(written: Option<StatusCode>, deferred: Option<&DeferredStatus>) -> Option<u16> {
    deferred
        .and_then(DeferredStatus::get)
        .or(written)
        .map(|status| status.as_u16())
}

fn request_info(session: &Session) -> RequestInfo {
    let header = session.req_header();
    let mut req = RequestInfo::new(header.method.clone(), header.uri.clone());
    req.version = header.version;
    req.headers = header.headers.clone();
    req.remote_addr = session
        .client_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    req
}

/// The whole request body, or `None` when it is larger than [`MAX_BODY`].
async fn read_body(session: &mut Session) -> Result<Option<Bytes>> {
    let mut body = BytesMut::new();
    loop {
        let chunk = tokio::time::timeout(READ_TIMEOUT, session.read_request_body())
            .await
            .map_err(|_| Error::new(Custom("request body read timed out")))??;
        match chunk {
            Some(chunk) => {
                if body.len() + chunk.len() > MAX_BODY {
                    return Ok(None);
                }
                body.extend_from_slice(&chunk);
            }
            None => return Ok(Some(body.freeze())),
        }
    }
}

async fn write_body(session: &mut Session, chunk: Option<Bytes>, end: bool, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, session.write_response_body(chunk, end)).await {
        Ok(result) => result,
        Err(_) => Err(Error::new(Custom("response write timed out"))),
    }
}

/// Write a pipeline response: the head first, then the body in chunks of at most 32 KiB.
pub async fn write_response(session: &mut Session, mut resp: Response, head: bool, timeout: Duration) -> Result<()> {
    resp.set_content_length();

    let mut header = ResponseHeader::build(resp.status, Some(resp.headers.len()))?;
    for (name, value) in resp.headers.iter() {
        header.append_header(name.clone(), value.clone())?;
    }
    session.write_response_header(Box::new(header), false).await?;

    if head {
        return write_body(session, None, true, timeout).await;
    }

    match resp.body {
        Body::Empty => write_body(session, None, true, timeout).await?,
        Body::Bytes(bytes) => write_body(session, Some(bytes), true, timeout).await?,
        Body::File(mut file) => {
            let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
            loop {
                buf.resize(CHUNK_SIZE, 0);
                let n = file
                    .read(&mut buf[..])
                    .await
                    .map_err(|_| Error::new(Custom("file read error")))?;
                if n == 0 {
                    break;
                }
                buf.truncate(n);
                write_body(session, Some(buf.split().freeze()), false, timeout).await?;
            }
            write_body(session, None, true, timeout).await?;
        }
        Body::RangedFile { mut file, mut remaining } => {
            let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
            while remaining > 0 {
                let to_read = std::cmp::min(CHUNK_SIZE as u64, remaining) as usize;
                buf.resize(to_read, 0);
                let n = file
                    .read(&mut buf[..])
                    .await
                    .map_err(|_| Error::new(Custom("file read error")))?;
                if n == 0 {
                    break;
                }
                remaining -= n as u64;
                buf.truncate(n);
                write_body(session, Some(buf.split().freeze()), false, timeout).await?;
            }
            write_body(session, None, true, timeout).await?;
        }
        Body::Stream(mut rx) => {
            // Dropping `rx` on a failed write tells the script the client went away.
            while let Some(chunk) = rx.recv().await {
                write_body(session, Some(chunk), false, timeout).await?;
            }
            write_body(session, None, true, timeout).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_status_overrides_the_written_one() {
        let deferred = DeferredStatus::default();
        assert_eq!(logged_status(Some(StatusCode::OK), Some(&deferred)), Some(200));

        deferred.set(StatusCode::NOT_FOUND);
        assert_eq!(logged_status(Some(StatusCode::OK), Some(&deferred)), Some(404));
        assert_eq!(logged_status(Some(StatusCode::OK), None), Some(200));
        assert_eq!(logged_status(None, None), None);
    }
}
