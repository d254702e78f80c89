use crate::request::{RequestInfo, client_ip};
use chrono::{DateTime, FixedOffset, Local};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// One finished request, as seen by the access log.
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub remote_addr: String,
    pub user: Option<String>,
    pub method: String,
    pub request_uri: String,
    pub proto: String,
    /// `None` when no status was ever written.
    pub status: Option<u16>,
    /// Bytes that reached the socket, after compression.
    pub bytes: u64,
    pub referer: String,
    pub user_agent: String,
}

impl AccessEntry {
    pub fn from_request(req: &RequestInfo, user: Option<String>, status: Option<u16>, bytes: u64) -> Self {
        Self {
            remote_addr: req.remote_addr.clone(),
            user,
            method: req.method.to_string(),
            request_uri: req.request_uri(),
            proto: format!("{:?}", req.version),
            status,
            bytes,
            referer: req.header("referer").to_string(),
            user_agent: req.header("user-agent").to_string(),
        }
    }

    /// NCSA Common Log Format.
    pub fn common(&self, at: &DateTime<FixedOffset>) -> String {
        let user = self.user.as_deref().filter(|u| !u.is_empty()).unwrap_or("-");
        let status = self
            .status
            .filter(|s| *s > 0)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} - {} [{}] \"{} {} {}\" {} {}",
            client_ip(&self.remote_addr),
            user,
            at.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.request_uri,
            self.proto,
            status,
            self.bytes
        )
    }

    /// Combined Log Format: Common plus referer and user agent.
    pub fn combined(&self, at: &DateTime<FixedOffset>) -> String {
        format!(
            "{} \"{}\" \"{}\"",
            self.common(at),
            self.referer,
            self.user_agent
        )
    }
}

/// Appends access log lines to the configured files.
#[derive(Debug, Clone, Default)]
pub struct AccessLogger {
    pub common: Option<PathBuf>,
    pub combined: Option<PathBuf>,
}

impl AccessLogger {
    pub fn is_enabled(&self) -> bool {
        self.common.is_some() || self.combined.is_some()
    }

    pub async fn log(&self, entry: &AccessEntry) {
        let now = Local::now().fixed_offset();
        if let Some(path) = &self.common {
            append_line(path, &entry.common(&now)).await;
        }
        if let Some(path) = &self.combined {
            append_line(path, &entry.combined(&now)).await;
        }
    }
}

async fn append_line(path: &PathBuf, line: &str) {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await;
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "can not open access log");
            return;
        }
    };
    let mut data = line.as_bytes().to_vec();
    data.push(b'\n');
    if let Err(e) = file.write_all(&data).await {
        tracing::warn!(path = %path.display(), error = %e, "can not write to access log");
    }
}
