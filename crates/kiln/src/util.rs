use std::time::Duration;

/// Fixed delay polling, no backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retry {
    /// Number of attempts; unbounded when `None`
    pub tries: Option<u64>,
    pub delay: Duration,
}

impl Retry {
    /// Call `probe` with the attempt number until it succeeds or the attempts are exhausted
    pub fn poll(&self, mut probe: impl FnMut(u64) -> bool) -> bool {
        let mut attempt = 0;
        loop {
            if probe(attempt) {
                return true;
            }
            attempt += 1;
            if self.tries.is_some_and(|tries| attempt >= tries) {
                tracing::warn!(attempts = attempt, "giving up");
                return false;
            }
            std::thread::sleep(self.delay);
        }
    }
}

/// Seconds as written in configuration documents
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
