use crate::phase::{Phase, PhaseCell};
use crate::pipeline::Pipeline;
use crate::script::{ConfigState, Console};
use async_trait::async_trait;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use pingora::server::ShutdownWatch;
use pingora::services::background::BackgroundService;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::oneshot;

/// Time the listeners get to come up before the server counts as ready.
const SETTLE: Duration = Duration::from_millis(20);
const BROWSER_DELAY: Duration = Duration::from_millis(200);
const PRUNE_EVERY: Duration = Duration::from_secs(60);

/// A browser to start once the server is serving.
#[derive(Debug, Clone)]
pub struct Browser {
    /// Empty for the platform default.
    pub command: String,
    pub url: String,
}

impl Browser {
    fn launch(&self) {
        tracing::info!(url = %self.url, "opening browser");
        let result = if self.command.is_empty() {
            open::that_detached(&self.url)
        } else {
            open::with_detached(&self.url, &self.command)
        };
        if let Err(e) = result {
            tracing::warn!(url = %self.url, error = %e, "could not open browser");
        }
    }
}

/// Drives startup phases, the console, SIGUSR1 and teardown alongside the listeners.
pub struct Lifecycle {
    pub pipeline: Arc<Pipeline>,
    pub scripts: Option<Arc<ConfigState>>,
    pub phase: Arc<PhaseCell>,
    pub console: Mutex<Option<Console>>,
    pub browser: Option<Browser>,
    /// Kept alive for as long as the server runs.
    pub watcher: Mutex<Option<RecommendedWatcher>>,
}

#[async_trait]
impl BackgroundService for Lifecycle {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(console) = self.console.lock().take() {
            tokio::spawn(async move {
                console.run(ready_rx).await;
                crate::shutdown::shutdown();
                std::process::exit(0);
            });
        }

        tokio::time::sleep(SETTLE).await;
        startup(&self.phase, self.scripts.clone()).await;
        let _ = ready_tx.send(());

        if let Some(browser) = self.browser.clone() {
            let mut cancelled = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(BROWSER_DELAY) => browser.launch(),
                    _ = cancelled.changed() => tracing::debug!("browser launch cancelled"),
                }
            });
        }

        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "could not install the SIGUSR1 handler");
                None
            }
        };
        let mut prune = tokio::time::interval(PRUNE_EVERY);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(()) = next_signal(&mut usr1) => {
                    tracing::info!("SIGUSR1 received");
                    self.pipeline.clear_caches();
                }
                _ = prune.tick() => {
                    if let Some(limiter) = self.pipeline.limiter() {
                        limiter.prune();
                    }
                }
            }
        }

        self.phase.advance(Phase::Shutdown);
        self.watcher.lock().take();
    }
}

/// `Config → Ready`, run `OnReady`, then `Serving`.
pub async fn startup(phase: &PhaseCell, scripts: Option<Arc<ConfigState>>) {
    phase.advance(Phase::Ready);
    if let Some(scripts) = scripts {
        if let Err(e) = tokio::task::spawn_blocking(move || scripts.run_on_ready()).await {
            tracing::error!(error = %e, "OnReady task failed");
        }
    }
    phase.advance(Phase::Serving);
}

async fn next_signal(sig: &mut Option<Signal>) -> Option<()> {
    match sig {
        Some(sig) => sig.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_ends_in_serving() {
        let phase = PhaseCell::default();
        startup(&phase, None).await;
        assert_eq!(phase.get(), Phase::Serving);
    }

    #[tokio::test]
    async fn a_missing_signal_never_fires() {
        let mut none = None;
        let fired = tokio::time::timeout(Duration::from_millis(20), next_signal(&mut none)).await;
        assert!(fired.is_err());
    }
}
