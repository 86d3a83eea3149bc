/*! Query deadlines.

Checked between candidates, never inside the tight posting scans. An
expired deadline turns the remaining work into a truncated partial
result, not an error.
!*/
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    until: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { until: None }
    }

    pub fn in_millis(ms: u64) -> Self {
        Self {
            until: Some(Instant::now() + Duration::from_millis(ms)),
        }
    }

    pub fn expired(&self) -> bool {
        self.until.map_or(false, |t| Instant::now() >= t)
    }
}
