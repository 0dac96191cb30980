//! Device façade.
//!
//! [`ElvisDevice`] owns the register/FIFO transport, the engine
//! configuration, and one [`BankRegistry`] per direction. It is cheap to
//! clone: every session keeps a clone, so the shared per-bank state lives as
//! long as the last session that may still touch it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use daq_driver_elvis::{AiChannelSpec, AiRange, Bank, ElvisDevice, MockTransport};
//!
//! let device = ElvisDevice::new(Arc::new(MockTransport::new()));
//! let mut input = device.open_input(&[AiChannelSpec::new(Bank::A, 0).range(AiRange::PlusMinus5V)])?;
//! let volts = input.read_single()?;
//! assert_eq!(volts.len(), 1);
//! # Ok::<(), daq_driver_elvis::ElvisError>(())
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::channel::{AiChannelSpec, AoChannelSpec, Bank};
use crate::clock::ClockSetting;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::pwm::Pwm;
use crate::registry::{BankRegistry, BankState};
use crate::spi::SpiClockConfig;
use crate::subsystem::analog_input::AnalogInput;
use crate::subsystem::analog_output::AnalogOutput;
use crate::transfer::Direction;
use crate::transport::Transport;

struct DeviceInner {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    ai: BankRegistry,
    ao: BankRegistry,
}

/// Handle to one FPGA board.
#[derive(Clone)]
pub struct ElvisDevice {
    inner: Arc<DeviceInner>,
}

impl ElvisDevice {
    /// Wrap `transport` with the default engine configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::build(transport, EngineConfig::default())
    }

    /// Wrap `transport` with a validated engine configuration.
    pub fn with_config(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(transport, config))
    }

    /// Wrap `transport` with the configuration stored in a TOML file.
    pub fn from_config_file(transport: Arc<dyn Transport>, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = EngineConfig::load(path)?;
        Self::with_config(transport, config)
            .with_context(|| format!("Failed to open device with '{}'", path.display()))
    }

    fn build(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        debug!(
            base_clock_hz = config.base_clock_hz,
            max_samples = config.max_samples,
            max_readback = config.max_readback,
            "Created device"
        );
        Self {
            inner: Arc::new(DeviceInner {
                transport,
                config,
                ai: BankRegistry::new(Direction::Input),
                ao: BankRegistry::new(Direction::Output),
            }),
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Open an analog-input session on `channels`.
    ///
    /// The request is validated in full before any register is touched.
    pub fn open_input(&self, channels: &[AiChannelSpec]) -> Result<AnalogInput> {
        AnalogInput::new(self.clone(), channels)
    }

    /// Open an analog-output session on `channels`.
    pub fn open_output(&self, channels: &[AoChannelSpec]) -> Result<AnalogOutput> {
        AnalogOutput::new(self.clone(), channels)
    }

    /// Open PWM generator `channel` on `bank` and route its pin.
    pub fn open_pwm(&self, bank: Bank, channel: u8) -> Result<Pwm> {
        Pwm::new(self.clone(), bank, channel)
    }

    /// Program the SPI bit clock of `bank`.
    pub fn configure_spi(&self, bank: Bank, spi: &SpiClockConfig) -> Result<ClockSetting> {
        let setting = spi.configure(self.transport(), bank)?;
        info!(bank = %bank, frequency = setting.actual, "Configured SPI clock");
        Ok(setting)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Engine constants in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Snapshot of a bank's shared DMA state.
    pub fn bank_state(&self, direction: Direction, bank: Bank) -> BankState {
        self.registry(direction).state(bank)
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn registry(&self, direction: Direction) -> &BankRegistry {
        match direction {
            Direction::Input => &self.inner.ai,
            Direction::Output => &self.inner.ao,
        }
    }

    pub(crate) fn ai_registry(&self) -> &BankRegistry {
        &self.inner.ai
    }

    pub(crate) fn ao_registry(&self) -> &BankRegistry {
        &self.inner.ao
    }
}

impl fmt::Debug for ElvisDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElvisDevice")
            .field("config", &self.inner.config)
            .field("ai", &self.inner.ai)
            .field("ao", &self.inner.ao)
            .finish_non_exhaustive()
    }
}
