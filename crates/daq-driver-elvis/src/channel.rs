//! Channel configuration model.
//!
//! Turns caller channel requests into immutable per-bank plans:
//!
//! - [`ConfigPlan`] for analog input: the ordered ConfigWord list of each
//!   bank (its channel-scan table) plus the binding of every requested
//!   channel to its scan slot and value register.
//! - [`OutputPlan`] for analog output: per-bank channel lists and DMA masks.
//!
//! Plans are built and validated completely before any register is touched,
//! then passed unchanged to the single-sample, finite and continuous paths.
//!
//! # ConfigWord layout
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! +---+---+-------+---+-----------+
//! | 0 | 0 | range |SE | channel   |
//! +---+---+-------+---+-----------+
//! range: 00 = ±10 V, 01 = ±5 V, 10 = ±2 V, 11 = ±1 V
//! SE:    1 = single-ended, 0 = differential (channel k against k + 4)
//! ```

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{ElvisError, Result};
use crate::registers;

/// Number of entries in a bank's channel-scan table.
pub const SCAN_TABLE_LEN: usize = 12;

/// Analog-input channels per bank in single-ended mode.
pub const SINGLE_ENDED_CHANNELS: u8 = 8;

/// Analog-input channels per bank in differential mode.
pub const DIFFERENTIAL_CHANNELS: u8 = 4;

/// Analog-output channels per bank.
pub const OUTPUT_CHANNELS: u8 = 2;

/// Full scale of the analog outputs in volts.
pub const OUTPUT_FULL_SCALE: f64 = 10.0;

/// Scan counter for single-sample reads: 40 MHz / 1000 = 40 kS/s.
pub const SINGLE_SAMPLE_COUNTER: u32 = 1000;

// =============================================================================
// Banks, modes and ranges
// =============================================================================

/// One of the two symmetric hardware partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bank {
    /// Bank A
    A,
    /// Bank B
    B,
}

impl Bank {
    /// Both banks, in register order.
    pub const ALL: [Bank; 2] = [Bank::A, Bank::B];

    /// Zero-based bank index.
    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

impl FromStr for Bank {
    type Err = ElvisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            other => Err(ElvisError::validation(format!(
                "unknown bank '{other}', expected A or B"
            ))),
        }
    }
}

/// Analog-input terminal configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiMode {
    /// Channel measured against ground
    #[default]
    SingleEnded,
    /// Channel k measured against channel k + 4
    Differential,
}

/// Analog-input voltage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AiRange {
    /// ±10 V
    #[default]
    PlusMinus10V,
    /// ±5 V
    PlusMinus5V,
    /// ±2 V
    PlusMinus2V,
    /// ±1 V
    PlusMinus1V,
}

impl AiRange {
    /// Range code as stored in bits 4..=5 of a ConfigWord.
    pub fn code(self) -> u8 {
        match self {
            Self::PlusMinus10V => 0b00,
            Self::PlusMinus5V => 0b01,
            Self::PlusMinus2V => 0b10,
            Self::PlusMinus1V => 0b11,
        }
    }

    fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0b00 => Self::PlusMinus10V,
            0b01 => Self::PlusMinus5V,
            0b10 => Self::PlusMinus2V,
            _ => Self::PlusMinus1V,
        }
    }

    /// Positive full-scale voltage.
    pub fn full_scale(self) -> f64 {
        match self {
            Self::PlusMinus10V => 10.0,
            Self::PlusMinus5V => 5.0,
            Self::PlusMinus2V => 2.0,
            Self::PlusMinus1V => 1.0,
        }
    }
}

// =============================================================================
// ConfigWord
// =============================================================================

/// Bit-packed per-channel scan-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigWord(u8);

impl ConfigWord {
    const CHANNEL_MASK: u8 = 0b0111;
    const SINGLE_ENDED: u8 = 0b1000;
    const RANGE_SHIFT: u8 = 4;

    /// Pack a channel configuration. The channel index must already be valid
    /// for `mode`.
    pub fn encode(channel: u8, mode: AiMode, range: AiRange) -> Self {
        let mode_bit = match mode {
            AiMode::SingleEnded => Self::SINGLE_ENDED,
            AiMode::Differential => 0,
        };
        Self((channel & Self::CHANNEL_MASK) | mode_bit | (range.code() << Self::RANGE_SHIFT))
    }

    /// Unpack into (channel, mode, range).
    pub fn decode(self) -> (u8, AiMode, AiRange) {
        let mode = if self.0 & Self::SINGLE_ENDED != 0 {
            AiMode::SingleEnded
        } else {
            AiMode::Differential
        };
        (
            self.0 & Self::CHANNEL_MASK,
            mode,
            AiRange::from_code(self.0 >> Self::RANGE_SHIFT),
        )
    }

    /// Raw byte as written to the scan table.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl From<u8> for ConfigWord {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

impl From<ConfigWord> for u8 {
    fn from(word: ConfigWord) -> Self {
        word.0
    }
}

// =============================================================================
// Analog input
// =============================================================================

/// One analog-input channel request.
///
/// Mode and range are optional; omitted values take the defaults
/// (single-ended, ±10 V).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiChannelSpec {
    /// Bank holding the channel
    pub bank: Bank,
    /// Channel index within the bank
    pub channel: u8,
    /// Terminal configuration (single-ended when omitted)
    #[serde(default)]
    pub mode: Option<AiMode>,
    /// Input range (±10 V when omitted)
    #[serde(default)]
    pub range: Option<AiRange>,
}

impl AiChannelSpec {
    /// Request `channel` on `bank` with default mode and range.
    pub fn new(bank: Bank, channel: u8) -> Self {
        Self {
            bank,
            channel,
            mode: None,
            range: None,
        }
    }

    /// Set the terminal configuration.
    pub fn mode(mut self, mode: AiMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the input range.
    pub fn range(mut self, range: AiRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// A requested channel bound to its scan slot and value register.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBinding {
    /// Index of the request in the caller's list
    pub position: usize,
    /// Index of the channel's word in the bank's scan table
    pub slot: usize,
    /// Channel index within the bank
    pub channel: u8,
    /// Terminal configuration
    pub mode: AiMode,
    /// Input range
    pub range: AiRange,
    /// Encoded scan-table entry
    pub word: ConfigWord,
    /// Register holding the latest single-sample conversion
    pub value_register: String,
}

/// Everything one bank needs for a sampled acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct BankPlan {
    /// Bank the plan applies to
    pub bank: Bank,
    /// ConfigWords in call order; this is also FIFO order
    pub words: Vec<ConfigWord>,
    /// Requested channels in slot order
    pub bindings: Vec<ChannelBinding>,
}

impl BankPlan {
    /// Number of scan slots used by the bank.
    pub fn n_channels(&self) -> usize {
        self.words.len()
    }

    /// The streamed scan table: the plan's words followed by zero padding.
    pub fn scan_table(&self) -> Vec<u8> {
        let mut table = vec![0u8; SCAN_TABLE_LEN];
        for (entry, word) in table.iter_mut().zip(&self.words) {
            *entry = word.bits();
        }
        table
    }

    /// The single-sample scan table: the default table with each requested
    /// channel's slot overwritten by its configured word.
    pub fn single_sample_table(&self) -> Vec<u8> {
        let mut table = default_single_sample_table();
        for binding in &self.bindings {
            table[single_sample_slot(binding.channel, binding.mode)] = binding.word.bits();
        }
        table
    }
}

/// Default single-sample scan table: single-ended AI0..AI7 in slots 0..=7,
/// differential AI0..AI3 in slots 8..=11, all ±10 V.
pub fn default_single_sample_table() -> Vec<u8> {
    let single_ended = (0..SINGLE_ENDED_CHANNELS)
        .map(|ch| ConfigWord::encode(ch, AiMode::SingleEnded, AiRange::PlusMinus10V).bits());
    let differential = (0..DIFFERENTIAL_CHANNELS)
        .map(|ch| ConfigWord::encode(ch, AiMode::Differential, AiRange::PlusMinus10V).bits());
    single_ended.chain(differential).collect()
}

fn single_sample_slot(channel: u8, mode: AiMode) -> usize {
    match mode {
        AiMode::SingleEnded => usize::from(channel),
        AiMode::Differential => usize::from(SINGLE_ENDED_CHANNELS + channel),
    }
}

/// Immutable analog-input plan covering every bank a session touches.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigPlan {
    banks: Vec<BankPlan>,
    n_channels: usize,
}

impl ConfigPlan {
    /// Validate `specs` and build the per-bank plans.
    ///
    /// Fails with [`ElvisError::Validation`] on an empty request, an
    /// out-of-range channel, a repeated channel, or a single-ended request
    /// on a pin already used by a differential pair.
    pub fn build(specs: &[AiChannelSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(ElvisError::validation("at least one channel is required"));
        }

        let mut banks: Vec<BankPlan> = Vec::new();
        for (position, spec) in specs.iter().enumerate() {
            let mode = spec.mode.unwrap_or_default();
            let range = spec.range.unwrap_or_default();
            let limit = match mode {
                AiMode::SingleEnded => SINGLE_ENDED_CHANNELS,
                AiMode::Differential => DIFFERENTIAL_CHANNELS,
            };
            if spec.channel >= limit {
                return Err(ElvisError::validation(format!(
                    "channel AI{} is not available in {:?} mode (0..{})",
                    spec.channel, mode, limit
                )));
            }

            let plan = match banks.iter().position(|b| b.bank == spec.bank) {
                Some(index) => &mut banks[index],
                None => {
                    banks.push(BankPlan {
                        bank: spec.bank,
                        words: Vec::new(),
                        bindings: Vec::new(),
                    });
                    let last = banks.len() - 1;
                    &mut banks[last]
                }
            };

            if let Some(existing) = plan
                .bindings
                .iter()
                .find(|b| conflicts(b.channel, b.mode, spec.channel, mode))
            {
                return Err(ElvisError::validation(format!(
                    "AI{} ({:?}) on bank {} conflicts with AI{} ({:?}) requested earlier",
                    spec.channel, mode, spec.bank, existing.channel, existing.mode
                )));
            }
            if plan.words.len() == SCAN_TABLE_LEN {
                return Err(ElvisError::validation(format!(
                    "bank {} scan table holds at most {SCAN_TABLE_LEN} channels",
                    spec.bank
                )));
            }

            let word = ConfigWord::encode(spec.channel, mode, range);
            plan.bindings.push(ChannelBinding {
                position,
                slot: plan.words.len(),
                channel: spec.channel,
                mode,
                range,
                word,
                value_register: registers::ai_value(spec.bank, spec.channel, mode),
            });
            plan.words.push(word);
        }

        banks.sort_by_key(|b| b.bank);
        Ok(Self {
            banks,
            n_channels: specs.len(),
        })
    }

    /// Per-bank plans, bank A first.
    pub fn banks(&self) -> &[BankPlan] {
        &self.banks
    }

    /// Plan of `bank`, if the request uses it.
    pub fn bank(&self, bank: Bank) -> Option<&BankPlan> {
        self.banks.iter().find(|b| b.bank == bank)
    }

    /// Total number of requested channels across banks.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Largest per-bank channel count.
    pub fn max_bank_channels(&self) -> usize {
        self.banks.iter().map(BankPlan::n_channels).max().unwrap_or(0)
    }

    /// Whether the request spans both banks.
    pub fn is_multi_bank(&self) -> bool {
        self.banks.len() > 1
    }

    /// Banks used by the request, bank A first.
    pub fn bank_ids(&self) -> Vec<Bank> {
        self.banks.iter().map(|b| b.bank).collect()
    }
}

/// Same pin in both modes, or a single-ended pin that is the negative input
/// of a differential pair.
fn conflicts(a_channel: u8, a_mode: AiMode, b_channel: u8, b_mode: AiMode) -> bool {
    if a_mode == b_mode {
        return a_channel == b_channel;
    }
    let (diff, single) = match a_mode {
        AiMode::Differential => (a_channel, b_channel),
        AiMode::SingleEnded => (b_channel, a_channel),
    };
    single == diff || single == diff + DIFFERENTIAL_CHANNELS
}

// =============================================================================
// Analog output
// =============================================================================

bitflags! {
    /// Per-bank analog-output DMA gate mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AoChannelMask: u32 {
        /// Gate of AO0
        const AO0 = 0b01;
        /// Gate of AO1
        const AO1 = 0b10;
    }
}

impl AoChannelMask {
    fn for_channel(channel: u8) -> Self {
        if channel == 0 {
            Self::AO0
        } else {
            Self::AO1
        }
    }
}

/// One analog-output channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoChannelSpec {
    /// Bank holding the channel
    pub bank: Bank,
    /// Output index within the bank (AO0 or AO1)
    pub channel: u8,
}

impl AoChannelSpec {
    /// Request output `channel` on `bank`.
    pub fn new(bank: Bank, channel: u8) -> Self {
        Self { bank, channel }
    }
}

/// A requested output channel bound to its value register.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBinding {
    /// Index of the request in the caller's list
    pub position: usize,
    /// Output index within the bank
    pub channel: u8,
    /// Register taking single-point values
    pub value_register: String,
}

/// Output channels of one bank.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBankPlan {
    /// Bank the plan applies to
    pub bank: Bank,
    /// Requested channels in call order
    pub bindings: Vec<OutputBinding>,
    /// Gate bits of the requested channels
    pub mask: AoChannelMask,
}

impl OutputBankPlan {
    /// Number of requested channels on the bank.
    pub fn n_channels(&self) -> usize {
        self.bindings.len()
    }
}

/// Immutable analog-output plan.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPlan {
    banks: Vec<OutputBankPlan>,
    n_channels: usize,
}

impl OutputPlan {
    /// Validate `specs` and group them by bank.
    pub fn build(specs: &[AoChannelSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(ElvisError::validation("at least one channel is required"));
        }

        let mut banks: Vec<OutputBankPlan> = Vec::new();
        for (position, spec) in specs.iter().enumerate() {
            if spec.channel >= OUTPUT_CHANNELS {
                return Err(ElvisError::validation(format!(
                    "channel AO{} does not exist (0..{OUTPUT_CHANNELS})",
                    spec.channel
                )));
            }
            let mask = AoChannelMask::for_channel(spec.channel);
            let plan = match banks.iter().position(|b| b.bank == spec.bank) {
                Some(index) => &mut banks[index],
                None => {
                    banks.push(OutputBankPlan {
                        bank: spec.bank,
                        bindings: Vec::new(),
                        mask: AoChannelMask::empty(),
                    });
                    let last = banks.len() - 1;
                    &mut banks[last]
                }
            };
            if plan.mask.contains(mask) {
                return Err(ElvisError::validation(format!(
                    "AO{} on bank {} requested twice",
                    spec.channel, spec.bank
                )));
            }
            plan.mask |= mask;
            plan.bindings.push(OutputBinding {
                position,
                channel: spec.channel,
                value_register: registers::ao_value(spec.bank, spec.channel),
            });
        }

        banks.sort_by_key(|b| b.bank);
        Ok(Self {
            banks,
            n_channels: specs.len(),
        })
    }

    /// Per-bank plans, bank A first.
    pub fn banks(&self) -> &[OutputBankPlan] {
        &self.banks
    }

    /// Total number of requested channels across banks.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Whether the request spans both banks.
    pub fn is_multi_bank(&self) -> bool {
        self.banks.len() > 1
    }

    /// Banks used by the request, bank A first.
    pub fn bank_ids(&self) -> Vec<Bank> {
        self.banks.iter().map(|b| b.bank).collect()
    }
}

// =============================================================================
// Sample codecs
// =============================================================================

/// Reinterpret a register word as a signed 16-bit sample code.
pub fn register_code(word: u32) -> i32 {
    i32::from(word as u16 as i16)
}

/// Register word carrying a signed 16-bit sample code.
pub fn code_word(code: i16) -> u32 {
    u32::from(code as u16)
}

/// Convert an input sample code to volts.
pub fn code_to_volts(code: i32, range: AiRange) -> f64 {
    f64::from(code) / 32_768.0 * range.full_scale()
}

/// Convert volts to an output sample code, coercing to ±10 V.
pub fn volts_to_code(volts: f64) -> i16 {
    let clamped = volts.clamp(-OUTPUT_FULL_SCALE, OUTPUT_FULL_SCALE);
    (clamped / OUTPUT_FULL_SCALE * 32_767.0).round() as i16
}

/// Convert an output sample code back to volts.
pub fn output_code_to_volts(code: i16) -> f64 {
    f64::from(code) / 32_767.0 * OUTPUT_FULL_SCALE
}
