//! Runtime tuning for the link and the session.
//!
//! Everything has a default, so an empty (or missing) TOML file is valid.
//! Durations are plain millisecond integers in the file.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::screen::ScreenProfile;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?;
        config
            .session
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Timeout and line budget for one shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBudget {
    pub timeout_ms: u64,
    pub max_lines: usize,
}

impl CommandBudget {
    pub const fn new(timeout_ms: u64, max_lines: usize) -> Self {
        Self {
            timeout_ms,
            max_lines,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Pause after opening before the first write; the firmware needs it to settle.
    pub settle_ms: u64,
    /// Upper bound of a single blocking read while waiting for a line.
    pub read_slice_ms: u64,
    pub write_chunk: usize,
    pub write_timeout_ms: u64,
    pub write_retry_timeout_ms: u64,
    pub write_retry_backoff_ms: u64,
    pub drain_reads: usize,
    pub drain_read_ms: u64,
    pub max_pending_lines: usize,
    pub max_line_bytes: usize,
    pub getres: CommandBudget,
    pub linkcaps: CommandBudget,
    /// `max_lines` is added on top of the expected row count.
    pub frame: CommandBudget,
    pub frame_half: CommandBudget,
    pub fast_input: CommandBudget,
    pub input: CommandBudget,
    pub keyboard: CommandBudget,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            settle_ms: 120,
            read_slice_ms: 150,
            write_chunk: 256,
            write_timeout_ms: 2500,
            write_retry_timeout_ms: 4500,
            write_retry_backoff_ms: 80,
            drain_reads: 6,
            drain_read_ms: 25,
            max_pending_lines: 1024,
            max_line_bytes: 4096,
            getres: CommandBudget::new(3500, 16),
            linkcaps: CommandBudget::new(900, 24),
            frame: CommandBudget::new(2800, 16),
            frame_half: CommandBudget::new(1700, 16),
            fast_input: CommandBudget::new(900, 8),
            input: CommandBudget::new(3000, 8),
            keyboard: CommandBudget::new(2600, 8),
        }
    }
}

impl LinkConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn read_slice(&self) -> Duration {
        Duration::from_millis(self.read_slice_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub profile: ScreenProfile,
    pub auto_reconnect: bool,
    pub connect_attempts: u32,
    pub connect_retry_step_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub stream_error_threshold: u32,
    pub hold_turbo_ms: u64,
    pub hold_standard_ms: u64,
    pub hold_wait_max_ms: u64,
    pub frame_interval_turbo_ms: u64,
    pub frame_interval_standard_ms: u64,
    pub stream_error_backoff_ms: u64,
    pub profile_fallback_pause_ms: u64,
    pub busy_backoff_ms: u64,
    pub debounce_ms: u64,
    pub encoder_step_spacing_ms: u64,
    pub drag_px_per_step_coarse: f32,
    pub drag_px_per_step_fine: f32,
    pub dial_rad_per_step_coarse: f32,
    pub dial_rad_per_step_fine: f32,
    pub drag_max_steps: i32,
    pub dial_max_steps: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: ScreenProfile::Auto,
            auto_reconnect: true,
            connect_attempts: 3,
            connect_retry_step_ms: 260,
            reconnect_initial_ms: 1400,
            reconnect_max_ms: 9000,
            stream_error_threshold: 4,
            hold_turbo_ms: 110,
            hold_standard_ms: 300,
            hold_wait_max_ms: 180,
            frame_interval_turbo_ms: 28,
            frame_interval_standard_ms: 80,
            stream_error_backoff_ms: 350,
            profile_fallback_pause_ms: 140,
            busy_backoff_ms: 20,
            debounce_ms: 80,
            encoder_step_spacing_ms: 14,
            drag_px_per_step_coarse: 8.0,
            drag_px_per_step_fine: 16.0,
            dial_rad_per_step_coarse: 0.18,
            dial_rad_per_step_fine: 0.28,
            drag_max_steps: 5,
            dial_max_steps: 6,
        }
    }
}

impl SessionConfig {
    pub fn hold_window(&self, turbo: bool) -> Duration {
        Duration::from_millis(if turbo {
            self.hold_turbo_ms
        } else {
            self.hold_standard_ms
        })
    }

    pub fn frame_interval(&self, turbo: bool) -> Duration {
        Duration::from_millis(if turbo {
            self.frame_interval_turbo_ms
        } else {
            self.frame_interval_standard_ms
        })
    }

    /// Reject gesture tuning the encoder accumulator cannot work with.
    pub fn validate(&self) -> Result<()> {
        for (name, step) in [
            ("drag_px_per_step_coarse", self.drag_px_per_step_coarse),
            ("drag_px_per_step_fine", self.drag_px_per_step_fine),
            ("dial_rad_per_step_coarse", self.dial_rad_per_step_coarse),
            ("dial_rad_per_step_fine", self.dial_rad_per_step_fine),
        ] {
            ensure!(
                step.is_finite() && step > 0.0,
                "session.{} must be a positive number, got {}",
                name,
                step
            );
        }
        for (name, cap) in [
            ("drag_max_steps", self.drag_max_steps),
            ("dial_max_steps", self.dial_max_steps),
        ] {
            ensure!(cap >= 1, "session.{} must be at least 1, got {}", name, cap);
        }
        Ok(())
    }

    pub fn drag_step(&self, fine: bool) -> f32 {
        if fine {
            self.drag_px_per_step_fine
        } else {
            self.drag_px_per_step_coarse
        }
    }

    pub fn dial_step(&self, fine: bool) -> f32 {
        if fine {
            self.dial_rad_per_step_fine
        } else {
            self.dial_rad_per_step_coarse
        }
    }
}

pub(crate) fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}
