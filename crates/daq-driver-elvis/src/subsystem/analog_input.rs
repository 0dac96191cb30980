//! Analog input sessions.
//!
//! ```text
//!              read_single / read_samples
//!   Idle ───────────────────────────────────► SingleSample | NSample
//!    │  ▲
//!    │  └──────────── stop_continuous ◄──────┐
//!    └── start_continuous ──► Continuous ────┘
//!                              (read_continuous)
//! ```
//!
//! Closing a session (explicitly or by dropping it) stops a running stream
//! and releases the session's n-sample references on its banks.

use tracing::{debug, error, info};

use crate::channel::{AiChannelSpec, Bank, ConfigPlan};
use crate::continuous::{self, StreamState};
use crate::device::ElvisDevice;
use crate::error::{ElvisError, Result};
use crate::finite;
use crate::single;
use crate::subsystem::SessionMode;
use crate::transport::Timeout;

/// An open analog-input session.
pub struct AnalogInput {
    device: ElvisDevice,
    plan: ConfigPlan,
    mode: SessionMode,
    n_sample_banks: Vec<Bank>,
    stream: Option<StreamState>,
}

impl AnalogInput {
    pub(crate) fn new(device: ElvisDevice, channels: &[AiChannelSpec]) -> Result<Self> {
        let plan = ConfigPlan::build(channels)?;
        info!(
            banks = ?plan.bank_ids(),
            n_channels = plan.n_channels(),
            "Opened analog input session"
        );
        Ok(Self {
            device,
            plan,
            mode: SessionMode::Idle,
            n_sample_banks: Vec::new(),
            stream: None,
        })
    }

    /// The validated channel plan.
    pub fn plan(&self) -> &ConfigPlan {
        &self.plan
    }

    /// Mode of the last successful operation.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Number of requested channels.
    pub fn n_channels(&self) -> usize {
        self.plan.n_channels()
    }

    /// Whether this session currently streams.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Refuse a one-shot call while any of the session's banks streams.
    fn ensure_idle_banks(&self) -> Result<()> {
        let registry = self.device.ai_registry();
        match self.plan.bank_ids().into_iter().find(|&b| registry.is_continuous(b)) {
            Some(bank) => Err(ElvisError::AlreadyStarted { bank }),
            None => Ok(()),
        }
    }

    fn first_bank(&self) -> Bank {
        self.plan.banks().first().map_or(Bank::A, |b| b.bank)
    }

    /// Convert every channel once. Values are returned in call order.
    pub fn read_single(&mut self) -> Result<Vec<f64>> {
        self.ensure_idle_banks()?;
        let values = single::read_once(&self.device, &self.plan)?;
        self.mode = SessionMode::SingleSample;
        Ok(values)
    }

    /// Acquire `samples` per channel at `rate` samples per second per
    /// channel. Returns one sequence per channel, in call order.
    pub fn read_samples(&mut self, samples: usize, rate: f64) -> Result<Vec<Vec<f64>>> {
        self.ensure_idle_banks()?;
        let registry = self.device.ai_registry();
        for bank in self.plan.bank_ids() {
            if !self.n_sample_banks.contains(&bank) {
                registry.register_n_sample(bank);
                self.n_sample_banks.push(bank);
            }
        }
        let values = finite::read_samples(&self.device, &self.plan, samples, rate)?;
        self.mode = SessionMode::NSample;
        Ok(values)
    }

    /// Start streaming at `rate` samples per second per channel.
    ///
    /// With channels on both banks the banks start from the shared sync
    /// trigger.
    pub fn start_continuous(&mut self, rate: f64) -> Result<()> {
        if self.stream.is_some() {
            return Err(ElvisError::AlreadyStarted {
                bank: self.first_bank(),
            });
        }
        let state = continuous::start_input(&self.device, &self.plan, rate)?;
        self.stream = Some(state);
        self.mode = SessionMode::Continuous;
        Ok(())
    }

    /// Read `samples` per channel from the running stream.
    ///
    /// `timeout` is the budget for the whole call.
    pub fn read_continuous(&mut self, samples: usize, timeout: Timeout) -> Result<Vec<Vec<f64>>> {
        let state = self.stream.as_ref().ok_or(ElvisError::NotStarted {
            bank: self.first_bank(),
        })?;
        continuous::read_input(&self.device, &self.plan, state, samples, timeout)
    }

    /// Stop the running stream. Stopping an idle session is a no-op.
    pub fn stop_continuous(&mut self) -> Result<()> {
        let Some(state) = self.stream.take() else {
            return Ok(());
        };
        self.mode = SessionMode::Idle;
        continuous::stop_input(&self.device, &state)
    }

    /// Stop streaming and release the session's bank references.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let stopped = self.stop_continuous();
        let registry = self.device.ai_registry();
        for bank in self.n_sample_banks.drain(..) {
            registry.release_n_sample(bank);
        }
        debug!(banks = ?self.plan.bank_ids(), "Closed analog input session");
        stopped
    }
}

impl Drop for AnalogInput {
    fn drop(&mut self) {
        if self.stream.is_none() && self.n_sample_banks.is_empty() {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!("Error closing analog input session on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for AnalogInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogInput")
            .field("banks", &self.plan.bank_ids())
            .field("n_channels", &self.plan.n_channels())
            .field("mode", &self.mode)
            .finish()
    }
}
