use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io::Write;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    hooks: Vec<Hook>,
    completed: bool,
}

/// FIFO registry of teardown hooks. Hooks run at most once, while the lock is held,
/// so a hook must not register hooks or trigger shutdown itself.
#[derive(Default)]
pub struct ShutdownCoordinator {
    state: Mutex<State>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.completed {
            tracing::warn!("shutdown already completed, hook will not run");
            return;
        }
        state.hooks.push(Box::new(hook));
    }

    /// Run every hook in registration order. Later calls return immediately.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.completed {
            return;
        }
        tracing::info!(hooks = state.hooks.len(), "shutting down");
        for hook in state.hooks.drain(..) {
            hook();
        }
        state.completed = true;
        let _ = std::io::stdout().flush();
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }
}

static GLOBAL: Lazy<ShutdownCoordinator> = Lazy::new(ShutdownCoordinator::new);

/// The process-wide coordinator.
pub fn coordinator() -> &'static ShutdownCoordinator {
    &GLOBAL
}

pub fn at_shutdown(hook: impl FnOnce() + Send + 'static) {
    GLOBAL.at_shutdown(hook);
}

pub fn shutdown() {
    GLOBAL.shutdown();
}
