use std::sync::atomic::{AtomicU8, Ordering};

/// Startup phases. Handler registration is only possible during `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Config = 0,
    Ready = 1,
    Serving = 2,
    Shutdown = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Config,
            1 => Phase::Ready,
            2 => Phase::Serving,
            _ => Phase::Shutdown,
        }
    }
}

#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl Default for PhaseCell {
    fn default() -> Self {
        Self(AtomicU8::new(Phase::Config as u8))
    }
}

impl PhaseCell {
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move forward to `next`. Phases never go backwards; returns false if `next` is behind.
    pub fn advance(&self, next: Phase) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current > next as u8 {
                return false;
            }
            match self
                .0
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    tracing::debug!(phase = ?next, "entering phase");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is(&self, phase: Phase) -> bool {
        self.get() == phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_move_forward() {
        let cell = PhaseCell::default();
        assert!(cell.is(Phase::Config));
        assert!(cell.advance(Phase::Ready));
        assert!(cell.advance(Phase::Serving));
        assert!(!cell.advance(Phase::Config));
        assert_eq!(cell.get(), Phase::Serving);
        assert!(cell.advance(Phase::Shutdown));
    }
}
