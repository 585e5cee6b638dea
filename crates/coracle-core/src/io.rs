//! Time abstraction and process introspection
//!
//! Timer and expiration logic goes through `TimeProvider` so tests can run
//! under paused tokio time or a simulated clock.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time provider abstraction
///
/// All code that needs current time or sleep uses this trait; never
/// `SystemTime::now()` directly.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Production time provider using the system clock and tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Whether a debugger (tracer) is attached to this process
///
/// Linux: a nonzero `TracerPid` in /proc/self/status. Other platforms
/// report false.
pub fn debugger_attached() -> bool {
    #[cfg(target_os = "linux")]
    {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(s) => s,
            Err(_) => return false,
        };
        status
            .lines()
            .find_map(|line| line.strip_prefix("TracerPid:"))
            .and_then(|rest| rest.trim().parse::<u32>().ok())
            .is_some_and(|pid| pid != 0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
