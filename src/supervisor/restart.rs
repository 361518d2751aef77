use std::time::Duration;

/// Equal-jitter exponential backoff plus a fast-failure circuit breaker. A
/// second axis, `max_fast_failures` within `failure_window`, lets the
/// supervisor tell "a few restarts while warming up" apart from
/// "crash-looping" and log accordingly.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub reset_after: Duration,
    /// How many restarts inside `failure_window` are tolerated silently
    /// before a `Backoff` event is raised.
    pub max_fast_failures: u32,
    pub failure_window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
            max_fast_failures: 5,
            failure_window: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Duration to wait before the `restart_count`-th restart, following
    /// `initial_delay * 2^restart_count` capped at `max_delay`, with equal
    /// jitter (a random value in `[half, half + half]`, i.e. `[cap/2, cap]`).
    pub fn backoff_delay(&self, restart_count: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * 2_f64.powi(restart_count as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let half = capped_ms / 2.0;
        let jitter = rand::random::<f64>() * half;
        Duration::from_millis((half + jitter) as u64)
    }
}
