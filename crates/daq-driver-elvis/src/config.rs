//! Engine configuration.
//!
//! All fields have defaults matching the ELVIS III FPGA personality, so an
//! empty file (or [`EngineConfig::default`]) is a valid configuration.
//!
//! # Example Configuration
//!
//! ```toml
//! base_clock_hz = 40000000.0
//! max_readback = 10000
//! settle_time_us = 500
//! stall_timeout_ms = 2000
//! n_sample_timeout_ms = -1
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::clock::BASE_CLOCK_HZ;
use crate::error::{ElvisError, Result};
use crate::transfer::WritePlan;
use crate::transport::Timeout;

/// Constants of the sampled I/O engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// FPGA base clock driving the sample clocks
    #[serde(default = "default_base_clock_hz")]
    pub base_clock_hz: f64,

    /// Largest n-sample request per channel (and output payload per channel)
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Largest single FIFO read
    #[serde(default = "default_max_readback")]
    pub max_readback: usize,

    /// Host-side depth of each analog-input FIFO
    #[serde(default = "default_ai_fifo_depth")]
    pub ai_fifo_depth: usize,

    /// Host-side depth of each analog-output FIFO
    #[serde(default = "default_ao_fifo_depth")]
    pub ao_fifo_depth: usize,

    /// Largest first write of a backpressured output transfer
    #[serde(default = "default_ao_first_chunk")]
    pub ao_first_chunk: usize,

    /// Largest follow-up write of a backpressured output transfer
    #[serde(default = "default_ao_follow_up_chunk")]
    pub ao_follow_up_chunk: usize,

    /// Pause after a single-sample configuration commit
    #[serde(default = "default_settle_time_us")]
    pub settle_time_us: u64,

    /// Bound on bank-idle and status-toggle waits
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Bound on a zero-headroom stall during output writes
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// Per-chunk timeout of n-sample drains (-1 waits indefinitely)
    #[serde(default = "default_infinite")]
    pub n_sample_timeout_ms: Timeout,

    /// Wait for the "generation done" interrupt (-1 waits indefinitely)
    #[serde(default = "default_infinite")]
    pub generation_timeout_ms: Timeout,
}

fn default_base_clock_hz() -> f64 {
    BASE_CLOCK_HZ
}

fn default_max_samples() -> usize {
    10_000
}

fn default_max_readback() -> usize {
    10_000
}

fn default_ai_fifo_depth() -> usize {
    default_max_samples() * 100
}

fn default_ao_fifo_depth() -> usize {
    default_max_samples() * 20
}

fn default_ao_first_chunk() -> usize {
    10_000
}

fn default_ao_follow_up_chunk() -> usize {
    5_000
}

fn default_settle_time_us() -> u64 {
    500
}

fn default_idle_timeout_ms() -> u64 {
    1_000
}

fn default_stall_timeout_ms() -> u64 {
    2_000
}

fn default_infinite() -> Timeout {
    Timeout::Infinite
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_clock_hz: default_base_clock_hz(),
            max_samples: default_max_samples(),
            max_readback: default_max_readback(),
            ai_fifo_depth: default_ai_fifo_depth(),
            ao_fifo_depth: default_ao_fifo_depth(),
            ao_first_chunk: default_ao_first_chunk(),
            ao_follow_up_chunk: default_ao_follow_up_chunk(),
            settle_time_us: default_settle_time_us(),
            idle_timeout_ms: default_idle_timeout_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            n_sample_timeout_ms: default_infinite(),
            generation_timeout_ms: default_infinite(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse engine configuration")?;
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine configuration '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to load engine configuration '{}'", path.display()))
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| {
            Err(ElvisError::Config {
                message: message.to_string(),
            })
        };
        if !(self.base_clock_hz.is_finite() && self.base_clock_hz > 0.0) {
            return fail("base_clock_hz must be positive");
        }
        if self.max_readback == 0 {
            return fail("max_readback must be non-zero");
        }
        if self.ao_first_chunk == 0 || self.ao_follow_up_chunk == 0 {
            return fail("output chunk sizes must be non-zero");
        }
        if self.stall_timeout_ms == 0 {
            return fail("stall_timeout_ms must be non-zero");
        }
        if self.ai_fifo_depth < self.max_readback {
            return fail("ai_fifo_depth must hold at least one readback chunk");
        }
        if self.ao_fifo_depth < self.ao_first_chunk {
            return fail("ao_fifo_depth must hold at least the first output chunk");
        }
        Ok(())
    }

    /// Pause after a single-sample commit.
    pub fn settle_time(&self) -> Duration {
        Duration::from_micros(self.settle_time_us)
    }

    /// Bound on bank-idle and status-toggle waits.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Bound on a zero-headroom output stall.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Chunk sizing for output FIFO writes.
    pub fn write_plan(&self) -> WritePlan {
        WritePlan {
            first_chunk: self.ao_first_chunk,
            follow_up_chunk: self.ao_follow_up_chunk,
            stall_timeout: self.stall_timeout(),
        }
    }
}
