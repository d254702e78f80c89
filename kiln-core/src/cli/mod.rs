mod positional;

pub use positional::{Positional, parse_positional};

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kiln",
    version,
    disable_version_flag = true,
    about = "kiln: serve a directory, render templates and run Lua handlers",
    after_help = "Positional arguments: [file or directory to serve] [host][:port] [cert] [key]"
)]
pub struct Cli {
    /// Directory or file to serve, then address, certificate and key
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    #[arg(short = 'v', long, action = ArgAction::Version)]
    pub version: Option<bool>,

    /// Server directory
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// Server [host][:port] (":3000" is the default)
    #[arg(long)]
    pub addr: Option<String>,

    /// TLS certificate
    #[arg(long, default_value = "cert.pem")]
    pub cert: String,

    /// TLS key
    #[arg(long, default_value = "key.pem")]
    pub key: String,

    /// Lua configuration script, looked up in the working and the served directory
    #[arg(long, default_value = "serverconf.lua")]
    pub conf: String,

    /// Internal log file
    #[arg(long, visible_alias = "internal")]
    pub log: Option<PathBuf>,

    /// Serve plain HTTP
    #[arg(short = 't', long)]
    pub httponly: bool,

    /// Serve HTTP/2 without TLS
    #[arg(long)]
    pub http2only: bool,

    /// Serve over QUIC (falls back to HTTP)
    #[arg(short = 'u', long)]
    pub quic: bool,

    /// HTTPS on port 443 and HTTP on port 80, serving /srv/kiln
    #[arg(short = 'p', long)]
    pub prod: bool,

    /// Development mode: HTTP only, debug, relaxed rate limit
    #[arg(short = 'e', long)]
    pub dev: bool,

    /// Plain HTTP static file server without limits, permissions or headers
    #[arg(short = 'x', long)]
    pub simple: bool,

    /// Show errors in the browser
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[arg(short = 'V', long)]
    pub verbose: bool,

    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Enable the event server and page auto-refresh
    #[arg(short = 'a', long)]
    pub autorefresh: bool,

    /// Only watch this directory (enables auto-refresh)
    #[arg(long)]
    pub watchdir: Option<PathBuf>,

    /// Event server [host][:port] (":5553" is the default)
    #[arg(long)]
    pub eventserver: Option<String>,

    /// Event refresh interval
    #[arg(long, default_value = "350ms")]
    pub eventrefresh: String,

    /// Requests per second per client
    #[arg(long, default_value_t = crate::conf::DEFAULT_LIMIT)]
    pub limit: u64,

    #[arg(long)]
    pub nolimit: bool,

    /// Cache mode: on, dev, prod, small, images or off
    #[arg(long)]
    pub cache: Option<String>,

    /// Total cache size in bytes
    #[arg(long, default_value_t = crate::conf::DEFAULT_CACHE_SIZE)]
    pub cachesize: u64,

    /// Files above this size are streamed instead of read into memory
    #[arg(long, default_value_t = crate::conf::DEFAULT_LARGE_FILE_SIZE)]
    pub largesize: u64,

    /// Write timeout, in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Store cached files uncompressed
    #[arg(long)]
    pub rawcache: bool,

    /// Value for the Server header
    #[arg(long)]
    pub servername: Option<String>,

    /// Cache file metadata; only use if served files are never removed
    #[arg(short = 'c', long)]
    pub statcache: bool,

    /// Serve from the subdirectory named after the requested domain
    #[arg(long)]
    pub domain: bool,

    /// Open the served URL in the default browser
    #[arg(short = 'o')]
    pub open_browser: bool,

    /// Open the served URL with the given application
    #[arg(long, value_name = "EXECUTABLE")]
    pub open: Option<String>,

    /// Quit shortly after the first request has been served
    #[arg(short = 'z', long)]
    pub quit: bool,

    #[arg(long)]
    pub nocache: bool,

    /// Do not add the security related headers
    #[arg(long)]
    pub noheaders: bool,

    /// Add a same-origin Content-Security-Policy
    #[arg(long)]
    pub stricter: bool,

    /// Theme for Markdown, listings and error pages
    #[arg(long, default_value = "default")]
    pub theme: String,

    /// Server mode: no console, no debug output in the browser
    #[arg(short = 's', long)]
    pub server: bool,

    /// Do not serve anything, only present the Lua console
    #[arg(short = 'l', long)]
    pub lua: bool,

    /// Combined Log Format access log
    #[arg(long)]
    pub accesslog: Option<PathBuf>,

    /// Common Log Format (NCSA) access log
    #[arg(long)]
    pub ncsa: Option<PathBuf>,

    /// Clear the default permission prefixes
    #[arg(long)]
    pub clear: bool,

    /// Secret used for login cookies
    #[arg(long, default_value = "")]
    pub cookiesecret: String,

    /// Press ctrl-d twice to leave the console
    #[arg(long)]
    pub ctrld: bool,

    /// View the given Markdown file in the browser, then quit
    #[arg(short = 'm', long)]
    pub markdown: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub dump_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn short_flags_map_to_modes() {
        let cli = Cli::parse_from(["kiln", "-e", "-a", "-V", ".", ":4000"]);
        assert!(cli.dev);
        assert!(cli.autorefresh);
        assert!(cli.verbose);
        assert_eq!(cli.args, vec![".".to_string(), ":4000".to_string()]);
    }

    #[test]
    fn open_flag_and_executable_are_separate() {
        let cli = Cli::parse_from(["kiln", "-o", "--open", "firefox"]);
        assert!(cli.open_browser);
        assert_eq!(cli.open.as_deref(), Some("firefox"));
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["kiln"]);
        assert_eq!(cli.dir, ".");
        assert_eq!(cli.conf, "serverconf.lua");
        assert_eq!(cli.eventrefresh, "350ms");
        assert_eq!(cli.limit, 10);
        assert_eq!(cli.timeout, 10);
        assert_eq!(cli.theme, "default");
    }
}
