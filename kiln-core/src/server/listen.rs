use crate::conf::{ListenMode, ServerConfig, bind_addr};
use anyhow::{Context, Result};
use pingora::apps::HttpServerOptions;
use pingora::listeners::tls::TlsSettings;
use pingora::prelude::*;
use pingora::proxy::HttpProxy;
use pingora::services::listening::Service;
use std::io;
use std::path::Path;

/// Ports tried in single-file mode when the configured one is taken.
pub const PORT_ATTEMPTS: u16 = 128;

/// Fail early, with a clear error, when `addr` can not be bound.
pub fn try_bind(addr: &str) -> io::Result<()> {
    std::net::TcpListener::bind(addr).map(drop)
}

/// The first of `attempts` consecutive ports starting at the one in `addr` that can be bound.
pub fn free_port_from(addr: &str, attempts: u16) -> Option<String> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    (0..attempts)
        .filter_map(|i| port.checked_add(i))
        .map(|p| format!("{host}:{p}"))
        .find(|candidate| match try_bind(candidate) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => false,
            Err(e) => {
                tracing::debug!(addr = %candidate, error = %e, "can not bind");
                false
            }
        })
}

/// A user-facing URL for a bound address.
pub fn url_for(addr: &str, tls: bool) -> String {
    let (host, port) = addr.rsplit_once(':').unwrap_or((addr, ""));
    let host = match host {
        "" | "0.0.0.0" | "[::]" => "localhost",
        h => h,
    };
    let scheme = if tls { "https" } else { "http" };
    match (tls, port) {
        (true, "443") | (false, "80") | (_, "") => format!("{scheme}://{host}/"),
        _ => format!("{scheme}://{host}:{port}/"),
    }
}

/// Where the main listeners ended up.
#[derive(Debug, Clone)]
pub struct Bound {
    pub url: String,
}

/// Add the listeners `config.listen_mode` asks for to `svc`.
///
/// `retry` looks for a free port instead of failing when the address is taken.
pub fn add_listeners<SV>(
    svc: &mut Service<HttpProxy<SV>>,
    config: &ServerConfig,
    addr: &str,
    retry: bool,
) -> Result<Bound>
where
    SV: ProxyHttp + Send + Sync + 'static,
    SV::CTX: Send + Sync,
{
    if config.listen_mode == ListenMode::Production {
        let host = config.server_host.as_str();
        let https = bind_addr(&format!("{host}:443"))?;
        let http = bind_addr(&format!("{host}:80"))?;
        try_bind(&https).with_context(|| format!("can not listen on {https}"))?;
        try_bind(&http).with_context(|| format!("can not listen on {http}"))?;
        if !add_tls(svc, &https, &config.cert, &config.key) {
            anyhow::bail!("production mode needs a usable certificate and key");
        }
        svc.add_tcp(&http);
        tracing::info!(https = %https, http = %http, "serving in production mode");
        return Ok(Bound {
            url: url_for(&https, true),
        });
    }

    let mut addr = bind_addr(addr)?;
    if retry {
        match free_port_from(&addr, PORT_ATTEMPTS) {
            Some(free) => {
                if free != addr {
                    tracing::info!(wanted = %addr, using = %free, "address in use, trying the next port");
                }
                addr = free;
            }
            None => anyhow::bail!("no free port in {PORT_ATTEMPTS} attempts from {addr}"),
        }
    } else {
        try_bind(&addr).with_context(|| format!("can not listen on {addr}"))?;
    }

    let tls = match config.listen_mode {
        ListenMode::Https => {
            if add_tls(svc, &addr, &config.cert, &config.key) {
                tracing::info!(addr = %addr, "serving HTTPS and HTTP/2");
                true
            } else {
                tracing::info!(addr = %addr, "falling back to plain HTTP");
                svc.add_tcp(&addr);
                false
            }
        }
        ListenMode::Quic => {
            tracing::warn!(addr = %addr, "QUIC is not available, serving plain HTTP instead");
            svc.add_tcp(&addr);
            false
        }
        ListenMode::Http2 => {
            tracing::warn!(addr = %addr, "serving HTTP/2 without TLS");
            if let Some(app) = svc.app_logic_mut() {
                let mut options = HttpServerOptions::default();
                options.h2c = true;
                app.server_options = Some(options);
            }
            svc.add_tcp(&addr);
            false
        }
        _ => {
            tracing::info!(addr = %addr, "serving HTTP");
            svc.add_tcp(&addr);
            false
        }
    };

    Ok(Bound {
        url: url_for(&addr, tls),
    })
}

/// Add a TLS listener with HTTP/2 enabled. Returns false when the certificate or key
/// can not be used.
fn add_tls<SV>(svc: &mut Service<HttpProxy<SV>>, addr: &str, cert: &Path, key: &Path) -> bool
where
    SV: ProxyHttp + Send + Sync + 'static,
    SV::CTX: Send + Sync,
{
    if !cert.is_file() || !key.is_file() {
        tracing::debug!(cert = %cert.display(), key = %key.display(), "certificate or key not found");
        return false;
    }
    let (Some(cert), Some(key)) = (cert.to_str(), key.to_str()) else {
        return false;
    };
    match TlsSettings::intermediate(cert, key) {
        Ok(mut settings) => {
            settings.enable_h2();
            svc.add_tls_with_settings(addr, None, settings);
            true
        }
        Err(e) => {
            tracing::warn!(cert = %cert, key = %key, error = %e, "TLS setup failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(url_for("0.0.0.0:3000", false), "http://localhost:3000/");
        assert_eq!(url_for("example.com:443", true), "https://example.com/");
        assert_eq!(url_for("127.0.0.1:80", false), "http://127.0.0.1/");
    }

    #[test]
    fn taken_ports_are_skipped() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let free = free_port_from(&addr, PORT_ATTEMPTS).unwrap();
        assert_ne!(free, addr);
        assert!(try_bind(&free).is_ok());
    }

    #[test]
    fn binding_a_taken_port_fails() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        assert!(try_bind(&addr).is_err());
    }
}
