// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Installs the compact fmt subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Wall clock for per-frame time values fed to shaders.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
        }
    }

    /// Seconds since the clock was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Time since the previous `tick` (or creation).
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.saturating_duration_since(self.last);
        self.last = now;
        tracing::trace!(dt_ms = dt.as_secs_f64() * 1000.0, "frame tick");
        dt
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_monotonic() {
        let clock = FrameClock::new();
        let a = clock.elapsed_secs();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.elapsed_secs();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn tick_measures_since_previous_tick() {
        let mut clock = FrameClock::new();
        std::thread::sleep(Duration::from_millis(2));
        let first = clock.tick();
        assert!(first >= Duration::from_millis(2));
        let second = clock.tick();
        assert!(second < first + Duration::from_secs(1));
    }
}
