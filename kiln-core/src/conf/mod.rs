//! Server configuration resolved from the command line.
//!
//! Configuration scripts run later and adjust what they are allowed to through
//! [`crate::script::ConfigState`]; the values here are fixed once the server starts.

mod duration;
mod error;

pub use duration::parse_duration;
pub use error::ConfigError;

use crate::cache::{CacheCompression, CacheMode, FileCacheConfig};
use crate::cli::{Cli, parse_positional};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDR: &str = ":3000";
pub const DEFAULT_EVENT_ADDR: &str = ":5553";
pub const DEFAULT_EVENT_PATH: &str = "/fs";
pub const DEFAULT_EVENT_REFRESH: Duration = Duration::from_millis(350);
pub const MIN_EVENT_REFRESH: Duration = Duration::from_millis(100);
pub const DEFAULT_LIMIT: u64 = 10;
pub const DEV_LIMIT: u64 = 700;
pub const DEFAULT_CACHE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_CACHE_MAX_ENTITY: u64 = 64 * 1024;
pub const DEFAULT_CACHE_MAX_GIVEN: u64 = 7 * 1024 * 1024;
pub const DEFAULT_LARGE_FILE_SIZE: u64 = 42 * 1024 * 1024;
pub const STATIC_CACHE_SIZE: u64 = 128 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STAT_CACHE_REFRESH: Duration = Duration::from_secs(60);
pub const DEFAULT_DATA_SCRIPT: &str = "data.lua";
pub const SIMPLE_WRITE_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

const PROD_ROOT: &str = "/srv/kiln";
const PROD_CERT: &str = "/etc/kiln/cert.pem";
const PROD_KEY: &str = "/etc/kiln/key.pem";

/// Which listeners to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    /// HTTPS with HTTP/2 on 443 and plain HTTP on 80.
    Production,
    /// HTTPS with HTTP/2, falling back to HTTP when TLS cannot be set up.
    Https,
    Quic,
    /// Cleartext HTTP/2.
    Http2,
    Http,
    /// No listener, only the console.
    Nothing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// File or directory to serve.
    pub root: PathBuf,
    /// Address given on the command line. Configuration scripts may supply one when unset.
    pub addr: Option<String>,
    /// Prepended to addresses that are only a port.
    pub server_host: String,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub listen_mode: ListenMode,

    pub production: bool,
    pub debug: bool,
    pub server_mode: bool,
    pub simple: bool,
    pub verbose: bool,
    pub quiet: bool,

    pub auto_refresh: bool,
    pub watch_dir: Option<PathBuf>,
    pub event_addr: String,
    pub event_path: String,
    #[serde(with = "millis")]
    pub event_refresh: Duration,

    /// Requests per second per client; `None` disables rate limiting.
    pub rate_limit: Option<u64>,

    pub cache_mode: CacheMode,
    pub cache: FileCacheConfig,
    pub large_file_size: u64,
    pub stat_cache: bool,
    #[serde(with = "millis")]
    pub stat_cache_refresh: Duration,

    #[serde(with = "millis")]
    pub write_timeout: Duration,
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,

    pub server_header: String,
    pub no_headers: bool,
    pub stricter_headers: bool,
    pub theme: String,
    pub add_domain: bool,
    pub data_script: String,

    pub config_scripts: Vec<PathBuf>,
    pub internal_log: Option<PathBuf>,
    pub combined_log: Option<PathBuf>,
    pub common_log: Option<PathBuf>,

    pub clear_prefixes: bool,
    #[serde(skip)]
    pub cookie_secret: String,

    /// Browser command; `Some("")` means the platform default.
    pub open: Option<String>,
    pub quit_after_first_request: bool,
    pub markdown_mode: bool,
    pub ctrl_d_twice: bool,
    pub dump_config: bool,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self::resolve(cli, |p| Path::new(p).exists(), std::env::var("IGNOREEOF").ok())
    }

    fn resolve(cli: &Cli, exists: impl Fn(&str) -> bool, ignore_eof: Option<String>) -> Self {
        let mut root = PathBuf::from(&cli.dir);
        let mut cert = PathBuf::from(&cli.cert);
        let mut key = PathBuf::from(&cli.key);
        let mut addr = cli.addr.clone();
        let mut debug = cli.debug;
        let mut server_mode = cli.server;
        let mut quiet = cli.quiet;
        let mut http_only = cli.httponly;
        let mut rate_limit = (!cli.nolimit).then_some(cli.limit);
        let mut cache_mode = CacheMode::Development;
        let mut no_cache = cli.nocache;
        let mut stat_cache = cli.statcache;
        let mut clear_prefixes = cli.clear;
        let mut no_headers = cli.noheaders;
        let mut write_timeout = Duration::from_secs(cli.timeout);
        let mut open = match (&cli.open, cli.open_browser) {
            (Some(exe), _) => Some(exe.clone()),
            (None, true) => Some(String::new()),
            (None, false) => None,
        };
        let mut quit_after_first_request = cli.quit;
        let mut config_script = Some(cli.conf.clone());

        if cli.markdown {
            quiet = true;
            quit_after_first_request = true;
            open.get_or_insert_with(String::new);
        }
        if cli.lua {
            debug = true;
            config_script = None;
        }
        if server_mode {
            debug = false;
        }

        if cli.prod {
            root = PathBuf::from(PROD_ROOT);
            cert = PathBuf::from(PROD_CERT);
            key = PathBuf::from(PROD_KEY);
            cache_mode = CacheMode::Production;
            server_mode = true;
        } else if cli.dev {
            http_only = true;
            debug = true;
            if cli.limit == DEFAULT_LIMIT {
                rate_limit = rate_limit.map(|_| DEV_LIMIT);
            }
            cache_mode = CacheMode::Development;
        } else if cli.simple {
            http_only = true;
            server_mode = true;
            cache_mode = CacheMode::Off;
            no_cache = true;
            rate_limit = None;
            clear_prefixes = true;
            no_headers = true;
            write_timeout = SIMPLE_WRITE_TIMEOUT;
        }

        let auto_refresh = cli.autorefresh || cli.watchdir.is_some();

        if no_cache {
            cache_mode = CacheMode::Off;
            stat_cache = false;
        }
        if auto_refresh && cli.cache.is_none() {
            cache_mode = CacheMode::Off;
            stat_cache = false;
        }
        if let Some(name) = &cli.cache {
            cache_mode = name.parse().unwrap_or_default();
        }
        let mut cache_size = cli.cachesize;
        if cache_size == 0 {
            cache_mode = CacheMode::Off;
        }
        if cache_mode == CacheMode::Off {
            cache_size = 0;
        }

        let positional = parse_positional(&cli.args, exists);
        if let Some(r) = positional.root {
            root = PathBuf::from(r);
        }
        if let Some(a) = positional.addr {
            addr = Some(a);
        }
        if let Some(c) = positional.cert {
            cert = PathBuf::from(c);
        }
        if let Some(k) = positional.key {
            key = PathBuf::from(k);
        }

        let mut config_scripts = Vec::new();
        if let Some(name) = config_script.filter(|n| !n.is_empty()) {
            config_scripts.push(PathBuf::from(&name));
            let in_root = root.join(&name);
            if !config_scripts.contains(&in_root) {
                config_scripts.push(in_root);
            }
        }

        let listen_mode = if cli.lua {
            ListenMode::Nothing
        } else if cli.prod {
            ListenMode::Production
        } else if cli.quic {
            ListenMode::Quic
        } else if cli.http2only {
            ListenMode::Http2
        } else if http_only {
            ListenMode::Http
        } else {
            ListenMode::Https
        };

        let ctrl_d_twice = cli.ctrld
            || ignore_eof
                .and_then(|v| v.trim().parse::<i64>().ok())
                .map(|n| n > 1)
                .unwrap_or(false);

        Self {
            root,
            addr,
            server_host: String::new(),
            cert,
            key,
            listen_mode,
            production: cli.prod,
            debug: debug && !cli.prod,
            server_mode,
            simple: cli.simple,
            verbose: cli.verbose && !quiet,
            quiet,
            auto_refresh,
            watch_dir: cli.watchdir.clone(),
            event_addr: cli
                .eventserver
                .clone()
                .unwrap_or_else(|| DEFAULT_EVENT_ADDR.to_string()),
            event_path: DEFAULT_EVENT_PATH.to_string(),
            event_refresh: event_refresh(&cli.eventrefresh),
            rate_limit,
            cache_mode,
            cache: FileCacheConfig {
                max_size: cache_size,
                max_entity_size: DEFAULT_CACHE_MAX_ENTITY,
                max_given_data_size: DEFAULT_CACHE_MAX_GIVEN,
                compression: if cli.rawcache {
                    CacheCompression::Raw
                } else {
                    CacheCompression::Speed
                },
            },
            large_file_size: cli.largesize,
            stat_cache,
            stat_cache_refresh: DEFAULT_STAT_CACHE_REFRESH,
            write_timeout,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            server_header: cli
                .servername
                .clone()
                .unwrap_or_else(crate::version_string),
            no_headers,
            stricter_headers: cli.stricter,
            theme: cli.theme.clone(),
            add_domain: cli.domain,
            data_script: DEFAULT_DATA_SCRIPT.to_string(),
            config_scripts,
            internal_log: cli.log.clone(),
            combined_log: cli.accesslog.clone(),
            common_log: cli.ncsa.clone(),
            clear_prefixes,
            cookie_secret: cli.cookiesecret.clone(),
            open,
            quit_after_first_request,
            markdown_mode: cli.markdown,
            ctrl_d_twice,
            dump_config: cli.dump_config,
        }
    }

    /// Main listener address: the command line wins over configuration scripts.
    pub fn listen_addr(&self, from_script: Option<&str>) -> String {
        let addr = self
            .addr
            .as_deref()
            .or(from_script)
            .unwrap_or(DEFAULT_ADDR);
        self.with_host(addr)
    }

    pub fn event_listen_addr(&self) -> String {
        self.with_host(&self.event_addr)
    }

    fn with_host(&self, addr: &str) -> String {
        if addr.starts_with(':') {
            format!("{}{addr}", self.server_host)
        } else {
            addr.to_string()
        }
    }

    /// Debug output in the browser is never shown in production.
    pub fn show_errors(&self) -> bool {
        self.debug && !self.production
    }

    /// Directory the event server watches.
    pub fn watched_dir(&self) -> PathBuf {
        let dir = self.watch_dir.clone().unwrap_or_else(|| self.root.clone());
        std::path::absolute(&dir).unwrap_or(dir)
    }
}

fn event_refresh(value: &str) -> Duration {
    match parse_duration(value) {
        Ok(d) if d < MIN_EVENT_REFRESH => {
            tracing::warn!(refresh = %value, minimum = ?MIN_EVENT_REFRESH, "event refresh interval too short, using the minimum");
            MIN_EVENT_REFRESH
        }
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, default = ?DEFAULT_EVENT_REFRESH, "using the default event refresh interval");
            DEFAULT_EVENT_REFRESH
        }
    }
}

/// Turn `host:port`, `:port` or a bare port into something a socket can bind to.
pub fn bind_addr(addr: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidAddress {
        addr: addr.to_string(),
    };
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => ("", addr),
    };
    let port: u16 = port.parse().map_err(|_| invalid())?;
    let host = match host {
        "" => "0.0.0.0",
        "localhost" => "127.0.0.1",
        h => h,
    };
    Ok(format!("{host}:{port}"))
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
