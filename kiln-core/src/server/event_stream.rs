use crate::events::TimeEventMap;
use crate::events::sse::{self, Subscription};
use async_trait::async_trait;
use http::StatusCode;
use pingora::prelude::*;
use pingora_http::ResponseHeader;
use std::sync::Arc;
use std::time::Duration;

/// Origins allowed to subscribe. Pages on the main listener live on another port.
const ALLOW_ORIGIN: &str = "*";

/// The Server-Sent Events listener used by auto-refresh.
pub struct EventGateway {
    pub events: Arc<TimeEventMap>,
    pub path: String,
    pub interval: Duration,
}

#[async_trait]
impl ProxyHttp for EventGateway {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        Err(Error::new(Custom("the event server has no upstream")))
    }

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        if session.req_header().uri.path() != self.path {
            session.respond_error(StatusCode::NOT_FOUND.as_u16()).await?;
            return Ok(true);
        }

        let headers = sse::stream_headers(ALLOW_ORIGIN);
        let mut header = ResponseHeader::build(StatusCode::OK, Some(headers.len()))?;
        for (name, value) in headers.iter() {
            header.insert_header(name.clone(), value.clone())?;
        }
        session.write_response_header(Box::new(header), false).await?;

        let mut subscription = Subscription::new(self.events.clone(), self.interval);
        tracing::debug!(client = ?session.client_addr().map(|a| a.to_string()), "event subscriber connected");
        loop {
            for frame in subscription.next_frames().await {
                if let Err(e) = session.write_response_body(Some(frame), false).await {
                    tracing::debug!(error = %e, "event subscriber went away");
                    return Ok(true);
                }
            }
        }
    }
}
