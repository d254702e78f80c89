use super::TimeEventMap;
use bytes::Bytes;
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const EVENT_STREAM: &str = "text/event-stream; charset=utf-8";

/// Idle subscribers get a comment this often, so a closed connection is noticed.
const KEEPALIVE: Duration = Duration::from_secs(15);

/// One server-sent event. Multi-line data becomes one `data:` line per line.
pub fn frame(id: u64, data: &str) -> String {
    let mut out = format!("id: {id}\n");
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

pub fn stream_headers(allow_origin: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    let origin = HeaderValue::from_str(allow_origin).unwrap_or_else(|_| HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers
}

/// One subscriber's view of the event map. Ids keep counting across cycles.
pub struct Subscription {
    events: Arc<TimeEventMap>,
    interval: Duration,
    next_id: u64,
    idle: Duration,
    started: bool,
}

impl Subscription {
    pub fn new(events: Arc<TimeEventMap>, interval: Duration) -> Self {
        Self {
            events,
            interval,
            next_id: 0,
            idle: Duration::ZERO,
            started: false,
        }
    }

    /// Frames for the next cycle, waiting one interval after the previous one.
    /// An idle subscriber gets a comment now and then, so a closed connection is noticed.
    pub async fn next_frames(&mut self) -> Vec<Bytes> {
        if self.started {
            tokio::time::sleep(self.interval).await;
        }
        self.started = true;

        let batch = self.events.cycle(Instant::now());
        if batch.is_empty() {
            self.idle += self.interval;
            if self.idle >= KEEPALIVE {
                self.idle = Duration::ZERO;
                return vec![Bytes::from_static(b": keepalive\n\n")];
            }
            return Vec::new();
        }
        self.idle = Duration::ZERO;
        batch
            .into_iter()
            .map(|event| {
                let frame = frame(self.next_id, &event.path);
                self.next_id += 1;
                Bytes::from(frame)
            })
            .collect()
    }
}
