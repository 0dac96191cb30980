//! PWM generators.
//!
//! Each digital pin of a bank can be routed to a PWM generator. The
//! generator counts `0..=top` at `base / divisor` and drives the pin high
//! while the count is below the compare value, so
//!
//! ```text
//! frequency = base / (divisor * (top + 1))
//! duty      = compare / top
//! ```

use tracing::{debug, info};

use crate::channel::Bank;
use crate::clock::{self, ClockParams, ClockSetting};
use crate::device::ElvisDevice;
use crate::error::{ElvisError, Result};
use crate::handshake;
use crate::registers::{self, PwmRegisters, DIGITAL_PINS, FUNCTION_SELECT_WIDTH};

/// Number of PWM-capable pins per bank.
pub const PWM_CHANNELS: u8 = DIGITAL_PINS as u8;

/// Function-select pattern routing a pin to its PWM generator.
const PWM_FUNCTION: u64 = 0b01;

/// Generator mode: asymmetric counting, output enabled.
const PWM_MODE: u32 = 0b100;

/// A PWM generator routed to its pin.
#[derive(Clone)]
pub struct Pwm {
    device: ElvisDevice,
    bank: Bank,
    channel: u8,
    registers: PwmRegisters,
}

impl Pwm {
    pub(crate) fn new(device: ElvisDevice, bank: Bank, channel: u8) -> Result<Self> {
        if channel >= PWM_CHANNELS {
            return Err(ElvisError::validation(format!(
                "PWM channel {channel} on bank {bank} does not exist (0..{PWM_CHANNELS})"
            )));
        }

        let transport = device.transport();
        let select = registers::sys_select(bank);
        let current = transport.read_register64(&select)?;
        let routed = registers::set_function_select(
            current,
            u32::from(channel),
            1,
            FUNCTION_SELECT_WIDTH,
            PWM_FUNCTION,
        );
        handshake::commit(transport, &select, routed, None)?;
        info!(bank = %bank, channel, "Opened PWM channel");

        Ok(Self {
            registers: registers::pwm(bank, channel),
            device,
            bank,
            channel,
        })
    }

    /// Bank the generator belongs to.
    pub fn bank(&self) -> Bank {
        self.bank
    }

    /// Pin index within the bank.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Generate `frequency` Hz at `duty` (0.0 to 1.0).
    ///
    /// Returns the quantized clock; `actual` is the frequency the pin
    /// produces.
    pub fn configure(&self, frequency: f64, duty: f64) -> Result<ClockSetting> {
        if !(0.0..=1.0).contains(&duty) {
            return Err(ElvisError::invalid_parameter(format!(
                "duty cycle must be in [0, 1], got {duty}"
            )));
        }
        let setting = clock::quantize(frequency, &ClockParams::pwm(self.device.config().base_clock_hz))?;
        let compare = (duty * f64::from(setting.top)).round() as u32;

        let transport = self.device.transport();
        handshake::commit(transport, &self.registers.compare, compare, None)?;
        handshake::commit(transport, &self.registers.max, setting.top, None)?;
        handshake::commit(transport, &self.registers.config, PWM_MODE, None)?;
        handshake::commit(
            transport,
            &self.registers.clock_select,
            setting.divisor_index as u32 + 1,
            None,
        )?;

        debug!(
            bank = %self.bank,
            channel = self.channel,
            frequency = setting.actual,
            duty,
            compare,
            "Configured PWM"
        );
        Ok(setting)
    }

    /// Stop the generator's clock. The pin stays routed to PWM.
    pub fn disable(&self) -> Result<()> {
        handshake::commit(self.device.transport(), &self.registers.clock_select, 0u32, None)?;
        debug!(bank = %self.bank, channel = self.channel, "Disabled PWM");
        Ok(())
    }
}

impl std::fmt::Debug for Pwm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pwm")
            .field("bank", &self.bank)
            .field("channel", &self.channel)
            .finish()
    }
}
