use std::time::Duration;

/// Exponential delay sequence, doubling up to a ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            next_ms: initial_ms.min(max_ms),
            max_ms,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let current = self.next_ms;
        self.next_ms = current.saturating_mul(2).min(self.max_ms);
        Duration::from_millis(current)
    }
}
