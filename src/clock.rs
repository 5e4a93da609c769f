//! Wall-clock capability

use chrono::Utc;

/// Source of unix time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// System clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or_default()
    }
}
