//! Lua scripting: request handlers, data scripts, configuration scripts and the console.
//!
//! Scripts run on blocking threads. A request script streams its output back to the
//! pipeline through channels, so a response can start before the script ends.

mod api;
mod config;
mod console;
mod convert;
mod data;
mod error;
mod handlers;
mod output;
mod pool;

pub use api::file_to_url;
pub use config::{ConfigState, RouteMatch};
pub use console::{Console, Reply};
pub use data::load_data;
pub use error::{ScriptError, lua_message};
pub use handlers::has_handlers;
pub use output::{Head, Output};
pub use pool::StatePool;

use crate::render::TemplateData;
use crate::request::RequestInfo;
use crate::response::{Body, Response};
use api::Binding;
use bytes::Bytes;
use mlua::{Function, Lua};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Body chunks buffered between a script and the connection.
const BODY_CHANNEL: usize = 16;

/// Request independent facts scripts can ask about.
#[derive(Debug, Clone)]
pub struct HostInfo {
    /// Buffer output so errors can replace it, and show renderer errors in the page.
    pub debug: bool,
    pub server_dir: PathBuf,
    pub version: String,
}

/// Renders a file the way a request for it would, for `serve` and `render`.
pub trait FilePages: Send + Sync {
    /// Body of the page for `path`. `data` replaces the data script when given.
    fn page(&self, path: &Path, data: Option<TemplateData>, req: &RequestInfo) -> Result<Bytes, String>;
}

/// Chunk name for a script file; error messages then start with the file name.
pub(crate) fn chunk_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("@{name}")
}

/// What a bound run executes.
pub(crate) enum Entry<'a> {
    Chunk { source: &'a [u8], name: String },
    Function(Function),
}

/// Execute `entry` with the request functions bound.
pub(crate) fn run_bound(lua: &Lua, binding: &Binding<'_>, entry: Entry<'_>) -> mlua::Result<()> {
    let result = lua.scope(|scope| {
        api::bind(lua, scope, binding)?;
        match entry {
            Entry::Chunk { source, name } => lua.load(source).set_name(name).exec(),
            Entry::Function(f) => f.call::<()>(()),
        }
    });
    if let Err(e) = api::unbind(lua) {
        tracing::warn!(error = %e, "could not restore interpreter globals");
    }
    result
}

/// Turn the outcome of a run into what the caller sees. Errors after output already
/// left are logged here, since the response can no longer change.
pub(crate) fn settle(mut out: Output, result: mlua::Result<()>, script: &Path) -> Result<(), ScriptError> {
    match result {
        Ok(()) => out.finish(),
        Err(e) => {
            let err = ScriptError::from(e);
            if !out.discard() {
                return Err(err);
            }
            if err.is_cancelled() {
                tracing::debug!(script = %script.display(), "client went away");
            } else {
                tracing::error!(script = %script.display(), error = %err, "script failed after output started");
            }
            Ok(())
        }
    }
}

/// Start `run` on a blocking thread and wait until it commits a response head or fails.
pub(crate) async fn stream(
    debug: bool,
    run: impl FnOnce(Output) -> Result<(), ScriptError> + Send + 'static,
) -> Result<Response, ScriptError> {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL);
    let out = Output::new(head_tx, body_tx, debug);
    let deferred = out.deferred_status();
    let task = tokio::task::spawn_blocking(move || run(out));

    match head_rx.await {
        Ok(head) => Ok(Response {
            status: head.status,
            headers: head.headers,
            body: Body::Stream(body_rx),
            deferred_status: Some(deferred),
        }),
        Err(_) => match task.await {
            Ok(Ok(())) => Ok(Response::new(http::StatusCode::OK)),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(ScriptError::Join(e.to_string())),
        },
    }
}

/// Runs request scripts and data scripts on pooled interpreter states.
pub struct ScriptExecutor {
    pool: Arc<StatePool>,
    host: Arc<HostInfo>,
}

impl ScriptExecutor {
    pub fn new(host: HostInfo) -> Self {
        let host = Arc::new(host);
        let init_host = host.clone();
        Self {
            pool: Arc::new(StatePool::new(move |lua| api::install_base(lua, &init_host))),
            host,
        }
    }

    pub fn host(&self) -> &Arc<HostInfo> {
        &self.host
    }

    pub fn pool(&self) -> &Arc<StatePool> {
        &self.pool
    }

    /// Stop handing out states. Called once the listeners are quiet.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Run a request script. The returned response streams whatever the script
    /// writes after its head was committed.
    pub async fn run(
        &self,
        script: PathBuf,
        req: RequestInfo,
        pages: Option<Arc<dyn FilePages>>,
    ) -> Result<Response, ScriptError> {
        let pool = self.pool.clone();
        let host = self.host.clone();
        stream(host.debug, move |out| {
            let source = std::fs::read(&script).map_err(|e| ScriptError::read(&script, e))?;
            let lua = pool.get()?;
            let binding = Binding::new(&req, &script, &host, pages.as_deref(), out);
            let entry = Entry::Chunk {
                source: &source,
                name: chunk_name(&script),
            };
            let result = run_bound(&lua, &binding, entry);
            let clean = result.is_ok();
            let settled = settle(binding.out.into_inner(), result, &script);
            if clean {
                pool.put(lua);
            }
            settled
        })
        .await
    }

    /// Evaluate `data_script` (when given) and hand its names to `render` on the same
    /// blocking thread, so template functions can call back into the interpreter.
    pub async fn with_data<T, F>(&self, data_script: Option<PathBuf>, render: F) -> Result<T, ScriptError>
    where
        T: Send + 'static,
        F: FnOnce(&TemplateData) -> T + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let Some(path) = data_script else {
                return Ok(render(&TemplateData::default()));
            };
            let lua = pool.get()?;
            let data = load_data(&lua, &path)?;
            let out = render(&data);
            drop(data);
            pool.put(lua);
            Ok(out)
        })
        .await
        .map_err(|e| ScriptError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests;
