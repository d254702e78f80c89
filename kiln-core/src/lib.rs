pub mod access_log;
pub mod cache;
pub mod cli;
pub mod conf;
pub mod error_page;
pub mod events;
pub mod identity;
pub mod logging;
pub mod phase;
pub mod pipeline;
pub mod rate_limit;
pub mod refresh;
pub mod render;
pub mod request;
pub mod response;
pub mod reverse_proxy;
pub mod script;
pub mod server;
pub mod shutdown;
pub mod theme;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name and version, as shown in the `Server` header and on error pages.
pub fn version_string() -> String {
    format!("kiln {VERSION}")
}
