//! The dispatch pipeline: rate limiting, permissions, reverse proxies, script
//! handlers and file serving, turning one request into one [`Dispatch`].

pub mod body;
pub mod bundle;
pub mod directory;
pub mod ext;
pub mod headers;
mod page;
pub mod resolve;

pub use bundle::Bundles;
pub use page::{PageError, collect};

use crate::cache::{FileCache, FileStatCache};
use crate::conf::ServerConfig;
use crate::identity::{self, IdentityStore};
use crate::rate_limit::{self, RateLimiter};
use crate::refresh::AutoRefresh;
use crate::request::RequestInfo;
use crate::response::{HTML_UTF8, Response};
use crate::reverse_proxy::{ProxyTarget, ReverseProxyConfig};
use crate::script::{self, ConfigState, FilePages, HostInfo, RouteMatch, ScriptExecutor};
use http::{HeaderMap, Method, StatusCode};
use page::Pages;
use parking_lot::Mutex;
use resolve::Resolved;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;

/// What the server is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Site {
    Directory,
    /// A single Markdown document answering every path. Images next to it are served too.
    Markdown(PathBuf),
    /// A single file answering every path.
    File(PathBuf),
}

/// Outcome of dispatching a request.
#[derive(Debug)]
pub enum Dispatch {
    Respond(Response),
    Proxy(ProxyTarget),
}

pub struct PipelineOptions {
    pub site: Site,
    /// Directory files are served from.
    pub root: PathBuf,
    pub scripts: Option<Arc<ConfigState>>,
    pub identity: Arc<dyn IdentityStore>,
    pub proxies: ReverseProxyConfig,
    pub bundles: Arc<Bundles>,
    /// Called once, when the first request arrives.
    pub on_first_request: Option<Box<dyn FnOnce() + Send>>,
}

pub struct Pipeline {
    config: Arc<ServerConfig>,
    site: Site,
    root: PathBuf,
    stat: FileStatCache,
    cache: FileCache,
    executor: ScriptExecutor,
    scripts: Option<Arc<ConfigState>>,
    identity: Arc<dyn IdentityStore>,
    refresh: Option<AutoRefresh>,
    proxies: ReverseProxyConfig,
    limiter: Option<RateLimiter>,
    headers: HeaderMap,
    bundles: Arc<Bundles>,
    on_first_request: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    version: String,
}

impl Pipeline {
    pub fn new(config: Arc<ServerConfig>, opts: PipelineOptions) -> Self {
        let version = crate::version_string();
        let executor = ScriptExecutor::new(HostInfo {
            debug: config.show_errors(),
            server_dir: opts.root.clone(),
            version: version.clone(),
        });
        let refresh = config.auto_refresh.then(|| AutoRefresh {
            event_addr: config.event_addr.clone(),
            event_path: config.event_path.clone(),
            server_host: config.server_host.clone(),
            refresh: config.event_refresh,
        });
        let headers = if config.no_headers {
            HeaderMap::new()
        } else {
            headers::server_headers(&config.server_header, config.auto_refresh, config.stricter_headers)
        };

        Self {
            stat: FileStatCache::new(config.stat_cache, config.stat_cache_refresh),
            cache: FileCache::new(config.cache.clone()),
            limiter: config.rate_limit.map(|rps| RateLimiter::new(rps as f64)),
            site: opts.site,
            root: opts.root,
            executor,
            scripts: opts.scripts,
            identity: opts.identity,
            refresh,
            proxies: opts.proxies,
            headers,
            bundles: opts.bundles,
            on_first_request: Mutex::new(opts.on_first_request),
            version,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn executor(&self) -> &ScriptExecutor {
        &self.executor
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Whether requests for `path` are handed to a reverse proxy. Their bodies are
    /// streamed upstream instead of being read up front.
    pub fn is_proxied(&self, path: &str) -> bool {
        self.proxies.find(path).is_some()
    }

    pub fn username(&self, req: &RequestInfo) -> Option<String> {
        self.identity.username(req)
    }

    /// Forget cached file contents and file system lookups.
    pub fn clear_caches(&self) {
        self.cache.clear();
        self.stat.clear();
        tracing::info!("caches cleared");
    }

    pub async fn dispatch(self: &Arc<Self>, req: &RequestInfo) -> Dispatch {
        if let Some(first) = self.on_first_request.lock().take() {
            first();
        }

        if let Some(limiter) = &self.limiter {
            if !limiter.allow(&req.client_ip()) {
                tracing::debug!(client = %req.client_ip(), path = %req.path(), "rate limited");
                let resp = self.message_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "Rate limit exceeded",
                    rate_limit::LIMIT_MESSAGE,
                );
                return Dispatch::Respond(self.finish(resp));
            }
        }

        if self.identity.rejected(req) {
            return Dispatch::Respond(self.finish(self.deny(req).await));
        }

        if let Some(proxy) = self.proxies.find(req.path()) {
            return Dispatch::Proxy(proxy.target(req.path(), req.uri.query()));
        }

        Dispatch::Respond(self.finish(self.route(req).await))
    }

    fn finish(&self, resp: Response) -> Response {
        resp.with_defaults(&self.headers)
    }

    fn pages(self: &Arc<Self>) -> Arc<dyn FilePages> {
        Arc::new(Pages {
            pipeline: self.clone(),
            handle: Handle::current(),
        })
    }

    async fn route(self: &Arc<Self>, req: &RequestInfo) -> Response {
        if let Some(scripts) = &self.scripts {
            if let Some(file) = scripts.server_file() {
                return self.file_page(&file, req).await;
            }
            if scripts.handler_mode() {
                return match scripts.route(req.path()) {
                    Some(RouteMatch::Handler(index)) => self.handler(scripts.clone(), index, req).await,
                    Some(RouteMatch::Dir { prefix, dir }) => {
                        let rest = req.path().strip_prefix(prefix.as_str()).unwrap_or("");
                        let rest = format!("/{}", rest.trim_start_matches('/'));
                        self.serve_files(&dir, &rest, req).await
                    }
                    None => self.not_found(req.path()),
                };
            }
        }

        match &self.site {
            Site::File(file) => self.file_page(file, req).await,
            Site::Markdown(file) => self.markdown_site(file, req).await,
            Site::Directory => {
                let root = resolve::serving_root(&self.root, req.host(), self.config.add_domain);
                self.serve_files(&root, req.path(), req).await
            }
        }
    }

    async fn serve_files(self: &Arc<Self>, root: &Path, url_path: &str, req: &RequestInfo) -> Response {
        match self.locate(root, url_path) {
            Resolved::File(path) => self.file_page(&path, req).await,
            Resolved::Dir { slash: false, .. } => add_slash(req),
            Resolved::Dir { path, slash: true } => self.dir_page(&path, req).await,
            Resolved::Missing(_) => self.not_found(req.path()),
        }
    }

    /// Like [`resolve::resolve`], but paths below a `.alg` archive resolve inside its
    /// extracted files.
    fn locate(&self, root: &Path, url_path: &str) -> Resolved {
        if let Some((archive, rest)) = bundle_prefix(url_path) {
            let archive = root.join(archive);
            if self.stat.exists(&archive) && !self.stat.is_dir(&archive) {
                return match self.bundles.open(&archive) {
                    Ok(bundle) => resolve::resolve(&bundle, &rest, &self.stat),
                    Err(e) => {
                        tracing::error!(error = %e, "could not open application bundle");
                        Resolved::Missing(archive)
                    }
                };
            }
        }
        resolve::resolve(root, url_path, &self.stat)
    }

    /// The index file of `dir`, or a listing.
    async fn dir_page(self: &Arc<Self>, dir: &Path, req: &RequestInfo) -> Response {
        if let Some(index) = resolve::find_index(dir, &self.stat) {
            return self.file_page(&index, req).await;
        }
        let (dir, url_path, theme) = (dir.to_path_buf(), req.path().to_string(), self.config.theme.clone());
        match tokio::task::spawn_blocking(move || directory::listing(&dir, &url_path, &theme)).await {
            Ok(page) => body::data_response(req, HTML_UTF8, self.inject(&page, req)),
            Err(e) => {
                tracing::error!(error = %e, "directory listing failed");
                self.message_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "Could not list this directory.",
                )
            }
        }
    }

    async fn handler(self: &Arc<Self>, scripts: Arc<ConfigState>, index: usize, req: &RequestInfo) -> Response {
        let pages = self.pages();
        let script_file = scripts.handler_script(index).unwrap_or_default();
        let owned = req.clone();
        let result = script::stream(self.config.show_errors(), move |out| {
            scripts.call_handler(index, &owned, Some(&*pages), out)
        })
        .await;
        match result {
            Ok(resp) => resp,
            Err(source) => {
                let err = PageError::Script {
                    file: script_file.clone(),
                    source,
                };
                self.page_failure(&script_file, err, req).await
            }
        }
    }

    /// The response for a request the permission store turned away.
    async fn deny(self: &Arc<Self>, req: &RequestInfo) -> Response {
        if let Some(scripts) = self.scripts.clone().filter(|s| s.has_deny_handler()) {
            let pages = self.pages();
            let owned = req.clone();
            let result = script::stream(self.config.show_errors(), move |out| {
                scripts.call_deny(&owned, Some(&*pages), out)
            })
            .await;
            match result {
                Ok(mut resp) => {
                    if resp.status == StatusCode::OK {
                        resp.status = StatusCode::FORBIDDEN;
                    }
                    return resp;
                }
                Err(e) => tracing::error!(error = %e, "deny handler failed"),
            }
        }
        let mut page = identity::permission_denied_page(&self.config.theme);
        page.extend_from_slice(b"</body></html>");
        Response::html(StatusCode::FORBIDDEN, page)
    }
}

fn add_slash(req: &RequestInfo) -> Response {
    if req.method == Method::POST {
        tracing::warn!(path = %req.path(), "redirecting a POST request, the body will be lost");
    }
    let mut location = format!("{}/", req.path());
    if !req.query().is_empty() {
        location.push('?');
        location.push_str(req.query());
    }
    Response::redirect(StatusCode::MOVED_PERMANENTLY, &location)
}

/// Split a request path at the first `.alg` segment followed by more path.
fn bundle_prefix(url_path: &str) -> Option<(String, String)> {
    let trimmed = url_path.trim_start_matches('/');
    let mut offset = 0;
    for segment in trimmed.split('/') {
        if segment == ".." {
            return None;
        }
        let end = offset + segment.len();
        if end < trimmed.len() && segment.to_ascii_lowercase().ends_with(".alg") {
            return Some((trimmed[..end].to_string(), trimmed[end..].to_string()));
        }
        offset = end + 1;
    }
    None
}
