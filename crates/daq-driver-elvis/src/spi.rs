//! SPI bit-clock configuration.
//!
//! Only the clock side of the SPI engine is programmed here: the bit clock
//! is quantized against the 20 MHz SPI base clock and packed together with
//! the frame format into the bank's configuration word.
//!
//! ```text
//!  15 14 | 13 .. 8 |  7 .. 4      | 3   | 2   | 1   | 0
//!  divsr | unused  | frame len-1  | lsb | pol | pha | -
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::Bank;
use crate::clock::{self, ClockParams, ClockSetting};
use crate::error::{ElvisError, Result};
use crate::handshake;
use crate::registers::{self, FUNCTION_SELECT_WIDTH};
use crate::transport::Transport;

/// First pin of the SPI function (clock, MISO, MOSI).
const SPI_FIRST_PIN: u32 = 5;
const SPI_PIN_COUNT: u32 = 3;
const SPI_FUNCTION: u64 = 0b11;

/// Supported frame lengths in bits.
pub const FRAME_LENGTHS: std::ops::RangeInclusive<u8> = 4..=16;

/// SPI clock and frame format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpiClockConfig {
    /// Bit clock in Hz
    pub frequency: f64,
    /// Sample on the trailing clock edge
    #[serde(default)]
    pub phase: bool,
    /// Clock idles high
    #[serde(default)]
    pub polarity: bool,
    /// Shift the least significant bit first
    #[serde(default)]
    pub lsb_first: bool,
    /// Bits per frame
    #[serde(default = "default_frame_length")]
    pub frame_length: u8,
}

fn default_frame_length() -> u8 {
    8
}

impl Default for SpiClockConfig {
    fn default() -> Self {
        Self {
            frequency: 1_000_000.0,
            phase: false,
            polarity: false,
            lsb_first: false,
            frame_length: default_frame_length(),
        }
    }
}

impl SpiClockConfig {
    /// Pack the configuration word for a quantized clock.
    pub fn config_word(&self, divisor_index: usize) -> u32 {
        (u32::from(self.phase) << 1)
            | (u32::from(self.polarity) << 2)
            | (u32::from(self.lsb_first) << 3)
            | ((u32::from(self.frame_length.saturating_sub(1)) & 0xF) << 4)
            | ((divisor_index as u32 & 0b11) << 14)
    }

    /// Quantize the bit clock and program bank `bank`'s SPI engine.
    pub fn configure(&self, transport: &dyn Transport, bank: Bank) -> Result<ClockSetting> {
        if !FRAME_LENGTHS.contains(&self.frame_length) {
            return Err(ElvisError::invalid_parameter(format!(
                "SPI frame length must be 4 to 16 bits, got {}",
                self.frame_length
            )));
        }
        let setting = clock::quantize(self.frequency, &ClockParams::spi())?;
        let regs = registers::spi(bank);
        let word = self.config_word(setting.divisor_index);

        handshake::commit(transport, &regs.config, word, None)?;
        handshake::commit(transport, &regs.counter, setting.top, None)?;

        let select = registers::sys_select(bank);
        let current = transport.read_register64(&select)?;
        let routed = registers::set_function_select(
            current,
            SPI_FIRST_PIN,
            SPI_PIN_COUNT,
            FUNCTION_SELECT_WIDTH,
            SPI_FUNCTION,
        );
        handshake::commit(transport, &select, routed, None)?;

        debug!(bank = %bank, word, top = setting.top, divisor = setting.divisor, "Programmed SPI clock");
        Ok(setting)
    }
}
