//! Analog output sessions.
//!
//! Payloads are passed as one row of volts per channel, in the order the
//! channels were requested. Within a bank the FIFO always carries AO0
//! before AO1.

use tracing::{debug, error, info};

use crate::channel::{AoChannelSpec, Bank, OutputPlan};
use crate::continuous::{self, StreamState};
use crate::device::ElvisDevice;
use crate::error::{ElvisError, Result};
use crate::finite;
use crate::single;
use crate::subsystem::SessionMode;
use crate::transport::Timeout;

/// An open analog-output session.
pub struct AnalogOutput {
    device: ElvisDevice,
    plan: OutputPlan,
    mode: SessionMode,
    n_sample_banks: Vec<Bank>,
    stream: Option<StreamState>,
}

impl AnalogOutput {
    pub(crate) fn new(device: ElvisDevice, channels: &[AoChannelSpec]) -> Result<Self> {
        let plan = OutputPlan::build(channels)?;
        info!(
            banks = ?plan.bank_ids(),
            n_channels = plan.n_channels(),
            "Opened analog output session"
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
    pub fn plan(&self) -> &OutputPlan {
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

    fn ensure_idle_banks(&self) -> Result<()> {
        let registry = self.device.ao_registry();
        match self.plan.bank_ids().into_iter().find(|&b| registry.is_continuous(b)) {
            Some(bank) => Err(ElvisError::AlreadyStarted { bank }),
            None => Ok(()),
        }
    }

    fn first_bank(&self) -> Bank {
        self.plan.banks().first().map_or(Bank::A, |b| b.bank)
    }

    /// Drive every channel to `volts`. Values beyond ±10 V are coerced.
    pub fn write_single(&mut self, volts: f64) -> Result<()> {
        self.ensure_idle_banks()?;
        single::write_once(&self.device, &self.plan, volts)?;
        self.mode = SessionMode::SingleSample;
        Ok(())
    }

    /// Generate `values` once at `rate` samples per second and wait until
    /// the hardware reports the generation done.
    pub fn write_samples(&mut self, values: &[Vec<f64>], rate: f64) -> Result<()> {
        self.ensure_idle_banks()?;
        let registry = self.device.ao_registry();
        for bank in self.plan.bank_ids() {
            if !self.n_sample_banks.contains(&bank) {
                registry.register_n_sample(bank);
                self.n_sample_banks.push(bank);
            }
        }
        finite::write_samples(&self.device, &self.plan, values, rate)?;
        self.mode = SessionMode::NSample;
        Ok(())
    }

    /// Preload `values` and start generating at `rate`.
    pub fn start_continuous(&mut self, values: &[Vec<f64>], rate: f64, timeout: Timeout) -> Result<()> {
        if self.stream.is_some() {
            return Err(ElvisError::AlreadyStarted {
                bank: self.first_bank(),
            });
        }
        let state = continuous::start_output(&self.device, &self.plan, values, rate, timeout)?;
        self.stream = Some(state);
        self.mode = SessionMode::Continuous;
        Ok(())
    }

    /// Append `values` to the running stream. `timeout` bounds the whole
    /// call.
    pub fn write_continuous(&mut self, values: &[Vec<f64>], timeout: Timeout) -> Result<()> {
        if self.stream.is_none() {
            return Err(ElvisError::NotStarted {
                bank: self.first_bank(),
            });
        }
        continuous::write_output(&self.device, &self.plan, values, timeout)
    }

    /// Stop the running stream. Stopping an idle session is a no-op.
    pub fn stop_continuous(&mut self) -> Result<()> {
        let Some(state) = self.stream.take() else {
            return Ok(());
        };
        self.mode = SessionMode::Idle;
        continuous::stop_output(&self.device, &state)
    }

    /// Stop generating and release the session's bank references.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let stopped = self.stop_continuous();
        let registry = self.device.ao_registry();
        for bank in self.n_sample_banks.drain(..) {
            registry.release_n_sample(bank);
        }
        debug!(banks = ?self.plan.bank_ids(), "Closed analog output session");
        stopped
    }
}

impl Drop for AnalogOutput {
    fn drop(&mut self) {
        if self.stream.is_none() && self.n_sample_banks.is_empty() {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!("Error closing analog output session on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for AnalogOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogOutput")
            .field("banks", &self.plan.bank_ids())
            .field("n_channels", &self.plan.n_channels())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::MockTransport;
    use crate::registers;

    #[test]
    fn test_single_write_lands_in_value_register() {
        let mock = Arc::new(MockTransport::new());
        let device = ElvisDevice::new(mock.clone());
        let mut output = device.open_output(&[AoChannelSpec::new(Bank::A, 1)]).unwrap();

        output.write_single(5.0).unwrap();
        let word = mock.register(&registers::ao_value(Bank::A, 1));
        assert_eq!(crate::channel::register_code(word), 16_384);
        assert_eq!(output.mode(), SessionMode::SingleSample);
    }

    #[test]
    fn test_single_write_rejects_nan() {
        let device = ElvisDevice::new(Arc::new(MockTransport::new()));
        let mut output = device.open_output(&[AoChannelSpec::new(Bank::B, 0)]).unwrap();
        assert!(output.write_single(f64::NAN).unwrap_err().is_validation());
    }

    #[test]
    fn test_stream_write_requires_start() {
        let device = ElvisDevice::new(Arc::new(MockTransport::new()));
        let mut output = device.open_output(&[AoChannelSpec::new(Bank::B, 0)]).unwrap();
        let err = output
            .write_continuous(&[vec![0.0; 4]], Timeout::Infinite)
            .unwrap_err();
        assert!(matches!(err, ElvisError::NotStarted { bank: Bank::B }));
    }
}
