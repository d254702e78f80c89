use crate::access_log::AccessLogger;
use crate::cache::CacheMode;
use crate::conf::{ListenMode, STATIC_CACHE_SIZE, ServerConfig};
use crate::events::{self, TimeEventMap};
use crate::identity::PrefixPermissions;
use crate::logging;
use crate::phase::PhaseCell;
use crate::pipeline::ext::{self, Kind};
use crate::pipeline::{Bundles, Pipeline, PipelineOptions, Site};
use crate::reverse_proxy::ReverseProxyConfig;
use crate::script::{ConfigState, Console, HostInfo};
use crate::server::event_stream::EventGateway;
use crate::server::gateway::KilnGateway;
use crate::server::lifecycle::{self, Browser, Lifecycle};
use crate::server::listen;
use crate::shutdown;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use pingora::prelude::*;
use pingora::server::{RunArgs, Server};
use pingora::server::configuration::ServerConf;
use pingora::services::background::background_service;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const QUIT_DELAY: Duration = Duration::from_secs(3);

/// The serving root after looking at what the command line pointed at.
struct Prepared {
    site: Site,
    root: PathBuf,
    /// Retry the next ports when the address is taken.
    retry: bool,
    /// A `.lua` file given as the serving root.
    root_script: Option<PathBuf>,
}

/// A configured server with its listeners added, ready to run.
pub struct Kiln {
    server: Server,
    url: String,
}

impl Kiln {
    /// Where the main listener can be reached.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serve until SIGTERM. The shutdown hooks run on this thread once the listeners
    /// have drained and their runtimes are gone.
    pub fn run_until_stopped(self) {
        self.server.run(RunArgs::default());
        shutdown::shutdown();
    }

    pub fn run_forever(self) -> ! {
        self.run_until_stopped();
        std::process::exit(0)
    }
}

/// Run the server with the given configuration until it is stopped.
pub fn run(config: ServerConfig) -> Result<()> {
    let kiln = build(config)?;

    ctrlc::set_handler(|| {
        tracing::info!("interrupted");
        shutdown::shutdown();
        std::process::exit(1);
    })
    .context("can not install the interrupt handler")?;

    kiln.run_until_stopped();
    Ok(())
}

/// Prepare everything [`run`] serves: configuration scripts, the pipeline, the
/// listeners and the background lifecycle. Only the console mode does not return.
pub fn build(mut config: ServerConfig) -> Result<Kiln> {
    if let Some(path) = config.internal_log.clone() {
        logging::log_to(Some(&path)).with_context(|| format!("can not log to {}", path.display()))?;
    }

    let phase = Arc::new(PhaseCell::default());
    let permissions = Arc::new(PrefixPermissions::new(&config.cookie_secret));
    if config.clear_prefixes {
        permissions.clear();
    }

    let bundles = Arc::new(Bundles::default());
    shutdown::at_shutdown({
        let bundles = bundles.clone();
        move || bundles.remove()
    });

    let prepared = prepare_root(&mut config, &bundles)?;
    let info = serde_json::to_string_pretty(&config).context("can not describe the configuration")?;

    let host = Arc::new(HostInfo {
        debug: config.show_errors(),
        server_dir: prepared.root.clone(),
        version: crate::version_string(),
    });
    let scripts = run_config_scripts(&config, &prepared, host.clone(), phase.clone(), permissions.clone(), info)?;

    let mut root = prepared.root.clone();
    let mut proxies = ReverseProxyConfig::default();
    let mut script_addr = None;
    if let Some(scripts) = &scripts {
        if let Some(dir) = scripts.server_dir() {
            root = dir;
        }
        proxies = scripts.reverse_proxies();
        script_addr = scripts.addr();
    }
    let addr = config.listen_addr(script_addr.as_deref());

    let config = Arc::new(config);
    let on_first_request: Option<Box<dyn FnOnce() + Send>> = if config.quit_after_first_request {
        Some(Box::new(quit_soon))
    } else {
        None
    };
    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        PipelineOptions {
            site: prepared.site.clone(),
            root: root.clone(),
            scripts: scripts.clone(),
            identity: permissions.clone(),
            proxies,
            bundles,
            on_first_request,
        },
    ));
    shutdown::at_shutdown({
        let pipeline = pipeline.clone();
        move || pipeline.executor().close()
    });

    let console = if config.server_mode {
        None
    } else {
        Some(Console::new((*host).clone(), config.ctrl_d_twice).context("can not start the console")?)
    };

    if config.listen_mode == ListenMode::Nothing {
        console_only(console, &phase, scripts);
    }

    let mut conf = ServerConf::default();
    conf.grace_period_seconds = Some(0);
    conf.graceful_shutdown_timeout_seconds = Some(config.shutdown_timeout.as_secs());
    let mut server = Server::new_with_opt_and_conf(None, conf);
    server.bootstrap();

    let access = AccessLogger {
        common: config.common_log.clone(),
        combined: config.combined_log.clone(),
    };
    let mut svc = http_proxy_service(&server.configuration, KilnGateway::new(pipeline.clone(), access));
    let bound = listen::add_listeners(&mut svc, &config, &addr, prepared.retry)?;
    server.add_service(svc);
    tracing::info!(url = %bound.url, root = %root.display(), "kiln is ready");

    let watcher = if config.auto_refresh {
        let events = Arc::new(TimeEventMap::new(config.event_refresh));
        let dir = config.watched_dir();
        let watcher = events::watch(&dir, events.clone())
            .with_context(|| format!("can not watch {}", dir.display()))?;

        let event_addr = crate::conf::bind_addr(&config.event_listen_addr())?;
        listen::try_bind(&event_addr).with_context(|| format!("can not listen on {event_addr}"))?;
        let mut event_svc = http_proxy_service(
            &server.configuration,
            EventGateway {
                events,
                path: config.event_path.clone(),
                interval: config.event_refresh,
            },
        );
        event_svc.add_tcp(&event_addr);
        server.add_service(event_svc);
        tracing::info!(addr = %event_addr, dir = %dir.display(), "serving file events");
        Some(watcher)
    } else {
        None
    };

    let browser = config.open.clone().map(|command| Browser {
        command,
        url: bound.url.clone(),
    });
    server.add_service(background_service(
        "lifecycle",
        Lifecycle {
            pipeline,
            scripts,
            phase,
            console: Mutex::new(console),
            browser,
            watcher: Mutex::new(watcher),
        },
    ));

    Ok(Kiln { server, url: bound.url })
}

/// Work out what to serve from the root path: a directory, one Markdown file, one
/// page, a configuration script or an application bundle.
fn prepare_root(config: &mut ServerConfig, bundles: &Bundles) -> Result<Prepared> {
    let path = config.root.clone();
    if path.is_dir() {
        return Ok(Prepared {
            site: Site::Directory,
            root: path,
            retry: false,
            root_script: None,
        });
    }
    if !path.exists() {
        anyhow::bail!("{} does not exist", path.display());
    }

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.root = parent.clone();

    let kind = match ext::extension(&path).as_str() {
        ".zip" => Kind::Bundle,
        _ => ext::classify(&path),
    };
    if config.markdown_mode || kind == Kind::Markdown {
        tracing::info!(file = %path.display(), "serving a single Markdown file");
        if config.cache_mode != CacheMode::Off {
            config.cache.max_size = STATIC_CACHE_SIZE;
        }
        return Ok(Prepared {
            site: Site::Markdown(path),
            root: parent,
            retry: config.addr.is_none(),
            root_script: None,
        });
    }

    match kind {
        Kind::Lua => Ok(Prepared {
            site: Site::Directory,
            root: parent,
            retry: false,
            root_script: Some(path),
        }),
        Kind::Bundle => {
            let extracted = bundles
                .open(&path)
                .with_context(|| format!("can not open {}", path.display()))?;
            config.root = extracted.clone();
            for script in config.config_scripts.iter_mut() {
                if script.is_relative() {
                    if let Some(name) = script.file_name() {
                        *script = extracted.join(name);
                    }
                }
            }
            Ok(Prepared {
                site: Site::Directory,
                root: extracted,
                retry: false,
                root_script: None,
            })
        }
        _ => {
            tracing::info!(file = %path.display(), "serving a single file");
            Ok(Prepared {
                site: Site::File(path),
                root: parent,
                retry: false,
                root_script: None,
            })
        }
    }
}

/// Run every configuration script that exists, in order.
fn run_config_scripts(
    config: &ServerConfig,
    prepared: &Prepared,
    host: Arc<HostInfo>,
    phase: Arc<PhaseCell>,
    permissions: Arc<PrefixPermissions>,
    info: String,
) -> Result<Option<Arc<ConfigState>>> {
    let mut files: Vec<PathBuf> = config
        .config_scripts
        .iter()
        .filter(|p| p.is_file())
        .cloned()
        .collect();
    if let Some(script) = &prepared.root_script {
        files.push(script.clone());
    }
    if files.is_empty() {
        return Ok(None);
    }

    let state = ConfigState::new(host, phase, permissions, info).context("can not start the configuration interpreter")?;
    let mut seen: Vec<PathBuf> = Vec::new();
    for file in files {
        let canonical = file.canonicalize().unwrap_or_else(|_| file.clone());
        if seen.contains(&canonical) {
            continue;
        }
        state.run_file(&file)?;
        seen.push(canonical);
    }

    if let Some(script) = &prepared.root_script {
        if !state.handler_mode() {
            tracing::warn!(
                script = %script.display(),
                "no handlers registered, try handle(\"/\", function() print(\"Hello, World!\") end)"
            );
        }
    }
    Ok(Some(Arc::new(state)))
}

/// Only the console: no listeners.
fn console_only(console: Option<Console>, phase: &PhaseCell, scripts: Option<Arc<ConfigState>>) -> ! {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => logging::fatal_exit(&anyhow::Error::new(e).context("can not start the runtime")),
    };
    runtime.block_on(async {
        lifecycle::startup(phase, scripts).await;
        if let Some(console) = console {
            let (ready_tx, ready_rx) = oneshot::channel();
            let _ = ready_tx.send(());
            console.run(ready_rx).await;
        }
    });
    shutdown::shutdown();
    std::process::exit(0);
}

fn quit_soon() {
    tokio::spawn(async {
        tokio::time::sleep(QUIT_DELAY).await;
        tracing::info!("quitting after the first request");
        shutdown::shutdown();
        std::process::exit(0);
    });
}
