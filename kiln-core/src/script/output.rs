//! Response side of a running script.
//!
//! Status and headers stay pending until the first body byte is written (or the
//! script ends); at that point the head is committed through a oneshot channel and
//! body chunks follow over an mpsc channel. In buffered mode body bytes are held
//! back until `flush` or the end of the script, so that an error can still replace
//! the whole response.

use super::ScriptError;
use crate::response::DeferredStatus;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::{mpsc, oneshot};

/// Status and headers of a script response.
#[derive(Debug)]
pub struct Head {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

pub struct Output {
    status: Option<StatusCode>,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<Head>>,
    body_tx: mpsc::Sender<Bytes>,
    buffered: bool,
    buffer: Vec<u8>,
    closed: bool,
    deferred: DeferredStatus,
}

impl Output {
    pub fn new(head_tx: oneshot::Sender<Head>, body_tx: mpsc::Sender<Bytes>, buffered: bool) -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx,
            buffered,
            buffer: Vec::new(),
            closed: false,
            deferred: DeferredStatus::default(),
        }
    }

    pub fn committed(&self) -> bool {
        self.head_tx.is_none()
    }

    /// The status the script asked for, recorded even when it came too late for the wire.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Shared slot receiving statuses set after the head was committed.
    pub fn deferred_status(&self) -> DeferredStatus {
        self.deferred.clone()
    }

    pub fn cancelled(&self) -> bool {
        self.body_tx.is_closed()
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), ScriptError> {
        let status = StatusCode::from_u16(code).map_err(|e| ScriptError::Lua(format!("status: {e}")))?;
        if self.committed() {
            self.status = Some(status);
            self.deferred.set(status);
            return Err(ScriptError::HeadersSent("status"));
        }
        self.status = Some(status);
        Ok(())
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ScriptError> {
        if self.committed() {
            return Err(ScriptError::HeadersSent("setheader"));
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ScriptError::Lua(format!("setheader: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| ScriptError::Lua(format!("setheader: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn content_type(&mut self, value: &str) -> Result<(), ScriptError> {
        if self.committed() {
            return Err(ScriptError::HeadersSent("content"));
        }
        self.set_header(CONTENT_TYPE.as_str(), value)
    }

    pub fn has_content_type(&self) -> bool {
        self.headers.contains_key(CONTENT_TYPE)
    }

    /// Set `Location` and the status, then commit the head.
    pub fn redirect(&mut self, location: &str, code: u16) -> Result<(), ScriptError> {
        if self.committed() {
            return Err(ScriptError::HeadersSent("redirect"));
        }
        self.set_header(LOCATION.as_str(), location)?;
        self.set_status(code)?;
        self.commit();
        Ok(())
    }

    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<(), ScriptError> {
        if self.closed {
            tracing::debug!("write after close ignored");
            return Ok(());
        }
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        if self.buffered {
            self.buffer.extend_from_slice(&data);
            return Ok(());
        }
        self.commit();
        self.send(data)
    }

    /// Send what has been buffered so far. The response can no longer be replaced afterwards.
    pub fn flush(&mut self) -> Result<(), ScriptError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.commit();
        let data = Bytes::from(std::mem::take(&mut self.buffer));
        self.send(data)
    }

    /// Flush and stop accepting output; the connection is not reused.
    pub fn close(&mut self) -> Result<(), ScriptError> {
        if !self.committed() {
            self.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        self.flush()?;
        self.commit();
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drop buffered output after an error. Returns whether anything already left.
    pub fn discard(&mut self) -> bool {
        self.buffer.clear();
        self.committed()
    }

    /// End of the script: flush and make sure a head went out.
    pub fn finish(&mut self) -> Result<(), ScriptError> {
        self.flush()?;
        self.commit();
        Ok(())
    }

    fn commit(&mut self) {
        if let Some(tx) = self.head_tx.take() {
            let head = Head {
                status: self.status.unwrap_or(StatusCode::OK),
                headers: std::mem::take(&mut self.headers),
            };
            // The receiver is gone when the client left; the next send reports it.
            let _ = tx.send(head);
        }
    }

    fn send(&mut self, data: Bytes) -> Result<(), ScriptError> {
        self.body_tx
            .blocking_send(data)
            .map_err(|_| ScriptError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(buffered: bool) -> (Output, oneshot::Receiver<Head>, mpsc::Receiver<Bytes>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(16);
        (Output::new(head_tx, body_tx, buffered), head_rx, body_rx)
    }

    #[test]
    fn first_write_commits_the_head() {
        let (mut out, mut head_rx, mut body_rx) = output(false);
        out.set_status(201).unwrap();
        out.set_header("x-answer", "42").unwrap();
        out.write("hello").unwrap();

        let head = head_rx.try_recv().unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(head.headers.get("x-answer").unwrap(), "42");
        assert_eq!(body_rx.try_recv().unwrap(), Bytes::from("hello"));
    }

    #[test]
    fn headers_after_body_are_errors() {
        let (mut out, _head_rx, _body_rx) = output(false);
        out.write("x").unwrap();
        assert!(matches!(out.set_header("a", "b"), Err(ScriptError::HeadersSent("setheader"))));
        assert!(matches!(out.set_status(404), Err(ScriptError::HeadersSent("status"))));
        assert_eq!(out.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(out.deferred_status().get(), Some(StatusCode::NOT_FOUND));
        assert!(out.redirect("/", 302).is_err());
    }

    #[test]
    fn buffered_output_waits_for_flush() {
        let (mut out, mut head_rx, mut body_rx) = output(true);
        out.write("a").unwrap();
        out.write("b").unwrap();
        assert!(!out.committed());
        assert!(body_rx.try_recv().is_err());

        out.flush().unwrap();
        assert!(head_rx.try_recv().is_ok());
        assert_eq!(body_rx.try_recv().unwrap(), Bytes::from("ab"));
    }

    #[test]
    fn discard_before_commit_drops_everything() {
        let (mut out, _head_rx, mut body_rx) = output(true);
        out.write("partial").unwrap();
        assert!(!out.discard());
        out.finish().unwrap();
        assert!(body_rx.try_recv().is_err());
    }

    #[test]
    fn redirect_commits_location() {
        let (mut out, mut head_rx, _body_rx) = output(false);
        out.redirect("/elsewhere", 301).unwrap();
        let head = head_rx.try_recv().unwrap();
        assert_eq!(head.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(head.headers.get(LOCATION).unwrap(), "/elsewhere");
    }

    #[test]
    fn writes_after_close_are_ignored() {
        let (mut out, mut head_rx, mut body_rx) = output(false);
        out.write("bye").unwrap();
        out.close().unwrap();
        out.write("ignored").unwrap();
        assert!(head_rx.try_recv().is_ok());
        assert_eq!(body_rx.try_recv().unwrap(), Bytes::from("bye"));
        assert!(body_rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_cancels() {
        let (mut out, _head_rx, body_rx) = output(false);
        drop(body_rx);
        assert!(out.cancelled());
        assert!(matches!(out.write("x"), Err(ScriptError::Cancelled)));
    }
}
