//! Jittered delays

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::settings::TimingSettings;

/// Produces the delays between actions
pub struct Humanizer {
    rng: StdRng,
    timings: TimingSettings,
}

impl Humanizer {
    pub fn new(timings: TimingSettings) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            timings,
        }
    }

    /// Deterministic humanizer, for tests
    pub fn seeded(timings: TimingSettings, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            timings,
        }
    }

    pub fn timings(&self) -> &TimingSettings {
        &self.timings
    }

    /// `base_ms` plus up to `jitter_ms` extra
    pub fn jittered(&mut self, base_ms: u64, jitter_ms: u64) -> Duration {
        let extra = if jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=jitter_ms)
        };
        Duration::from_millis(base_ms + extra)
    }

    /// Wait after a click for the page to re-render
    pub fn transition_delay(&mut self) -> Duration {
        self.jittered(
            self.timings.transition_delay_ms,
            self.timings.transition_jitter_ms,
        )
    }

    /// Wait after dismissing a failure screen
    pub fn recovery_delay(&mut self) -> Duration {
        self.jittered(self.timings.recovery_delay_ms, self.timings.recovery_jitter_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.timings.retry_pause_ms)
    }

    pub fn outfit_menu_delay(&self) -> Duration {
        Duration::from_millis(self.timings.outfit_menu_delay_ms)
    }

    pub fn outfit_apply_delay(&self) -> Duration {
        Duration::from_millis(self.timings.outfit_apply_delay_ms)
    }
}
