use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, reload};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

static HANDLE: OnceCell<reload::Handle<BoxedLayer, Registry>> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Raw,
    Pretty,
}

pub fn default_log_mode() -> LogMode {
    if io::stdout().is_terminal() {
        LogMode::Pretty
    } else {
        LogMode::Raw
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub quiet: bool,
}

impl LogOptions {
    fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn stdout_layer(mode: LogMode) -> BoxedLayer {
    match mode {
        LogMode::Raw => fmt::layer().json().flatten_event(true).boxed(),
        LogMode::Pretty => fmt::layer().boxed(),
    }
}

/// Initialize the logging system.
///
/// - `TOKIO_CONSOLE` in the environment installs the tokio console subscriber instead
/// - otherwise `RUST_LOG` filters events, defaulting to `info` (`debug` when verbose, `warn` when quiet)
/// - JSON output with flattened events when stdout is not a terminal
///
/// The output layer is reloadable so that [`log_to`] can redirect it later.
pub fn init_logging(opts: &LogOptions) {
    if std::env::var("TOKIO_CONSOLE").is_ok() {
        console_subscriber::init();
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.default_directive()));

    let (layer, handle) = reload::Layer::new(stdout_layer(default_log_mode()));
    if tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .is_ok()
    {
        let _ = HANDLE.set(handle);
    }
}

/// Redirect the internal log. `None` goes back to stdout; a path appends JSON lines to that
/// file through a non-blocking writer that is flushed and closed at shutdown.
pub fn log_to(path: Option<&Path>) -> io::Result<()> {
    let Some(handle) = HANDLE.get() else {
        return Err(io::Error::other("logging is not reloadable"));
    };

    let layer = match path {
        None => stdout_layer(default_log_mode()),
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            crate::shutdown::at_shutdown(move || drop(guard));
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_ansi(false)
                .with_writer(writer)
                .boxed()
        }
    };

    handle
        .reload(layer)
        .map_err(|e| io::Error::other(e.to_string()))
}

/// Report a fatal error in plain text on stderr, run the shutdown hooks and exit.
pub fn fatal_exit(err: &anyhow::Error) -> ! {
    if let Some(handle) = HANDLE.get() {
        let _ = handle.reload(fmt::layer().with_writer(io::stderr).boxed());
    }
    tracing::error!(error = %format!("{err:#}"), "fatal");
    crate::shutdown::shutdown();
    std::process::exit(1);
}
