use super::ScriptError;
use mlua::Lua;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Init = Arc<dyn Fn(&Lua) -> mlua::Result<()> + Send + Sync>;

/// Unbounded pool of interpreter states.
///
/// A state only goes back into the pool when the request that used it finished
/// cleanly; states that saw an error are dropped. Request bindings are not part
/// of a pooled state, they are installed per request and die with it.
pub struct StatePool {
    states: Mutex<Vec<Lua>>,
    closed: AtomicBool,
    init: Init,
}

impl StatePool {
    /// `init` installs the request independent host functions on every new state.
    pub fn new(init: impl Fn(&Lua) -> mlua::Result<()> + Send + Sync + 'static) -> Self {
        Self {
            states: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            init: Arc::new(init),
        }
    }

    pub fn get(&self) -> Result<Lua, ScriptError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScriptError::PoolClosed);
        }
        if let Some(lua) = self.states.lock().pop() {
            return Ok(lua);
        }
        let lua = Lua::new();
        (self.init)(&lua)?;
        Ok(lua)
    }

    pub fn put(&self, lua: Lua) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.states.lock().push(lua);
    }

    /// Drop every idle state and refuse further use.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped = std::mem::take(&mut *self.states.lock());
        tracing::debug!(states = dropped.len(), "closed interpreter pool");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.states.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> StatePool {
        StatePool::new(|lua| lua.globals().set("answer", 42))
    }

    #[test]
    fn new_states_are_initialised() {
        let pool = pool();
        let lua = pool.get().unwrap();
        let answer: i64 = lua.globals().get("answer").unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    fn returned_states_are_reused() {
        let pool = pool();
        let lua = pool.get().unwrap();
        lua.globals().set("marker", true).unwrap();
        pool.put(lua);
        assert_eq!(pool.idle(), 1);

        let lua = pool.get().unwrap();
        let marker: bool = lua.globals().get("marker").unwrap();
        assert!(marker);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn closed_pool_refuses_states() {
        let pool = pool();
        pool.put(pool.get().unwrap());
        pool.close();
        assert_eq!(pool.idle(), 0);
        assert!(matches!(pool.get(), Err(ScriptError::PoolClosed)));
        pool.put(Lua::new());
        assert_eq!(pool.idle(), 0);
    }
}
