//! Configuration scripts and the handlers they register.
//!
//! Every configuration script runs on one long-lived interpreter state. Functions
//! handed to `handle`, `DenyHandler` and `OnReady` stay in that state and are called
//! later with the state locked, one request at a time.

use super::api::{self, Binding};
use super::{Entry, FilePages, HostInfo, Output, ScriptError, chunk_name, has_handlers, run_bound, settle};
use crate::conf::ConfigError;
use crate::identity::PrefixPermissions;
use crate::phase::{Phase, PhaseCell};
use crate::request::RequestInfo;
use crate::reverse_proxy::{ReverseProxy, ReverseProxyConfig};
use mlua::{Function, Lua};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum Target {
    Handler { func: Function, script: PathBuf },
    Dir(PathBuf),
}

struct Route {
    pattern: String,
    target: Target,
}

/// Where the registered routes send a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// Index of a handler registered with `handle`.
    Handler(usize),
    /// A directory registered with `servedir`; `prefix` is the pattern that matched.
    Dir { prefix: String, dir: PathBuf },
}

#[derive(Default)]
struct Settings {
    addr: Option<String>,
    server_file: Option<PathBuf>,
    server_dir: Option<PathBuf>,
    proxies: ReverseProxyConfig,
    routes: Vec<Route>,
    deny: Option<(Function, PathBuf)>,
    on_ready: Option<Function>,
    handler_mode: bool,
}

struct Shared {
    phase: Arc<PhaseCell>,
    permissions: Arc<PrefixPermissions>,
    info: String,
    /// The script currently running; relative paths resolve against its directory.
    current: Mutex<PathBuf>,
    settings: Mutex<Settings>,
}

impl Shared {
    fn script_dir(&self) -> PathBuf {
        let current = self.current.lock();
        let script = std::path::absolute(&*current).unwrap_or_else(|_| current.clone());
        script.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    fn require_config_phase(&self, function: &'static str) -> mlua::Result<()> {
        if self.phase.is(Phase::Config) {
            Ok(())
        } else {
            Err(mlua::Error::external(ScriptError::WrongPhase(function)))
        }
    }
}

/// Settings collected from configuration scripts plus the state their callbacks live in.
pub struct ConfigState {
    lua: Mutex<Lua>,
    shared: Arc<Shared>,
    host: Arc<HostInfo>,
}

impl ConfigState {
    /// `info` is what `ServerInfo()` returns.
    pub fn new(
        host: Arc<HostInfo>,
        phase: Arc<PhaseCell>,
        permissions: Arc<PrefixPermissions>,
        info: String,
    ) -> Result<Self, ScriptError> {
        let shared = Arc::new(Shared {
            phase,
            permissions,
            info,
            current: Mutex::new(PathBuf::new()),
            settings: Mutex::new(Settings::default()),
        });
        let lua = Lua::new();
        api::install_base(&lua, &host)?;
        install(&lua, &shared)?;
        Ok(Self {
            lua: Mutex::new(lua),
            shared,
            host,
        })
    }

    /// Run one configuration script.
    pub fn run_file(&self, path: &Path) -> Result<(), ConfigError> {
        let source = std::fs::read(path).map_err(|e| ConfigError::read_file(path, e))?;
        if has_handlers(&String::from_utf8_lossy(&source)) {
            self.shared.settings.lock().handler_mode = true;
        }
        *self.shared.current.lock() = path.to_path_buf();
        tracing::info!(path = %path.display(), "running configuration script");

        let lua = self.lua.lock();
        lua.load(&source[..])
            .set_name(chunk_name(path))
            .exec()
            .map_err(|e| ConfigError::script(path, super::lua_message(&e)))
    }

    /// Address from `SetAddr`.
    pub fn addr(&self) -> Option<String> {
        self.shared.settings.lock().addr.clone()
    }

    /// Script from `ServerFile` that handles every request.
    pub fn server_file(&self) -> Option<PathBuf> {
        self.shared.settings.lock().server_file.clone()
    }

    /// Serving root from `ServerDir`.
    pub fn server_dir(&self) -> Option<PathBuf> {
        self.shared.settings.lock().server_dir.clone()
    }

    pub fn reverse_proxies(&self) -> ReverseProxyConfig {
        self.shared.settings.lock().proxies.clone()
    }

    /// Whether a script calls `handle` or `servedir`; requests are then only routed
    /// through the registered patterns.
    pub fn handler_mode(&self) -> bool {
        self.shared.settings.lock().handler_mode
    }

    pub fn has_deny_handler(&self) -> bool {
        self.shared.settings.lock().deny.is_some()
    }

    /// Match a path the way a Go style mux does: patterns ending in `/` match their
    /// subtree, others only themselves, and the longest pattern wins.
    pub fn route(&self, path: &str) -> Option<RouteMatch> {
        let settings = self.shared.settings.lock();
        settings
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| pattern_matches(&r.pattern, path))
            .max_by_key(|(_, r)| r.pattern.len())
            .map(|(i, r)| match &r.target {
                Target::Handler { .. } => RouteMatch::Handler(i),
                Target::Dir(dir) => RouteMatch::Dir {
                    prefix: r.pattern.clone(),
                    dir: dir.clone(),
                },
            })
    }

    /// Call a registered handler with the request functions bound. Blocks.
    pub fn call_handler(
        &self,
        index: usize,
        req: &RequestInfo,
        pages: Option<&dyn FilePages>,
        out: Output,
    ) -> Result<(), ScriptError> {
        let (func, script) = {
            let settings = self.shared.settings.lock();
            match settings.routes.get(index).map(|r| &r.target) {
                Some(Target::Handler { func, script }) => (func.clone(), script.clone()),
                _ => return Err(ScriptError::Lua(format!("no handler number {index}"))),
            }
        };
        self.call(func, &script, req, pages, out)
    }

    /// The script that registered handler `index`.
    pub fn handler_script(&self, index: usize) -> Option<PathBuf> {
        match self.shared.settings.lock().routes.get(index).map(|r| &r.target) {
            Some(Target::Handler { script, .. }) => Some(script.clone()),
            _ => None,
        }
    }

    /// Call the function installed with `DenyHandler`. Blocks.
    pub fn call_deny(&self, req: &RequestInfo, pages: Option<&dyn FilePages>, out: Output) -> Result<(), ScriptError> {
        let Some((func, script)) = self.shared.settings.lock().deny.clone() else {
            return Err(ScriptError::Lua("no deny handler".to_string()));
        };
        self.call(func, &script, req, pages, out)
    }

    fn call(
        &self,
        func: Function,
        script: &Path,
        req: &RequestInfo,
        pages: Option<&dyn FilePages>,
        out: Output,
    ) -> Result<(), ScriptError> {
        let lua = self.lua.lock();
        let binding = Binding::new(req, script, &self.host, pages, out);
        let result = run_bound(&lua, &binding, Entry::Function(func));
        settle(binding.out.into_inner(), result, script)
    }

    /// Run the `OnReady` function, once. Errors are logged.
    pub fn run_on_ready(&self) {
        let Some(func) = self.shared.settings.lock().on_ready.take() else {
            return;
        };
        let _lua = self.lua.lock();
        if let Err(e) = func.call::<()>(()) {
            tracing::error!(error = %super::lua_message(&e), "OnReady function failed");
        }
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

fn install(lua: &Lua, shared: &Arc<Shared>) -> mlua::Result<()> {
    let g = lua.globals();

    let s = shared.clone();
    g.set(
        "SetAddr",
        lua.create_function(move |_, addr: String| {
            s.settings.lock().addr = Some(addr);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    g.set(
        "ClearPermissions",
        lua.create_function(move |_, ()| {
            s.permissions.clear();
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    g.set(
        "AddUserPrefix",
        lua.create_function(move |_, prefix: String| {
            s.permissions.add_user_prefix(&prefix);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    g.set(
        "AddAdminPrefix",
        lua.create_function(move |_, prefix: String| {
            s.permissions.add_admin_prefix(&prefix);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    g.set(
        "CookieSecret",
        lua.create_function(move |_, ()| Ok(s.permissions.cookie_secret()))?,
    )?;
    let s = shared.clone();
    g.set(
        "SetCookieSecret",
        lua.create_function(move |_, secret: String| {
            s.permissions.set_cookie_secret(&secret);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    g.set(
        "DenyHandler",
        lua.create_function(move |_, func: Function| {
            let script = s.current.lock().clone();
            s.settings.lock().deny = Some((func, script));
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    g.set(
        "OnReady",
        lua.create_function(move |_, func: Function| {
            s.settings.lock().on_ready = Some(func);
            Ok(())
        })?,
    )?;

    g.set(
        "LogTo",
        lua.create_function(|_, file: String| {
            let path = (!file.is_empty()).then(|| PathBuf::from(&file));
            match crate::logging::log_to(path.as_deref()) {
                Ok(()) => Ok(true),
                Err(e) => {
                    tracing::error!(file, error = %e, "could not log to file");
                    Ok(false)
                }
            }
        })?,
    )?;

    let s = shared.clone();
    g.set(
        "ServerFile",
        lua.create_function(move |_, name: String| {
            let path = s.script_dir().join(&name);
            if !path.is_file() {
                return Ok((false, Some(format!("could not find {}", path.display()))));
            }
            s.settings.lock().server_file = Some(path);
            Ok((true, None))
        })?,
    )?;
    let s = shared.clone();
    g.set(
        "ServerDir",
        lua.create_function(move |_, name: String| {
            let path = s.script_dir().join(&name);
            if !path.is_dir() {
                return Ok((false, Some(format!("could not find {}", path.display()))));
            }
            s.settings.lock().server_dir = Some(path);
            Ok((true, None))
        })?,
    )?;
    let s = shared.clone();
    g.set("ServerInfo", lua.create_function(move |_, ()| Ok(s.info.clone()))?)?;

    let s = shared.clone();
    g.set(
        "AddReverseProxy",
        lua.create_function(move |_, (prefix, url): (String, String)| match ReverseProxy::new(&prefix, &url) {
            Ok(proxy) => {
                tracing::info!(prefix, upstream = %url, "adding reverse proxy");
                s.settings.lock().proxies.add(proxy);
                Ok((true, None))
            }
            Err(e) => Ok((false, Some(e.to_string()))),
        })?,
    )?;

    let s = shared.clone();
    g.set(
        "handle",
        lua.create_function(move |_, (pattern, func): (String, Function)| {
            s.require_config_phase("handle")?;
            let script = s.current.lock().clone();
            s.settings.lock().routes.push(Route {
                pattern,
                target: Target::Handler { func, script },
            });
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    g.set(
        "servedir",
        lua.create_function(move |_, (pattern, dir): (Option<String>, Option<String>)| {
            s.require_config_phase("servedir")?;
            let (Some(pattern), Some(dir)) = (pattern.filter(|p| !p.is_empty()), dir.filter(|d| !d.is_empty())) else {
                tracing::error!("servedir needs an URL path, like \"/\", and a directory relative to the script, like \"./public\"");
                return Ok(());
            };
            let dir = s.script_dir().join(dir);
            s.settings.lock().routes.push(Route {
                pattern,
                target: Target::Dir(dir),
            });
            Ok(())
        })?,
    )?;
    Ok(())
}
