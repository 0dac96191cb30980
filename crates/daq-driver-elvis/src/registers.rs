//! Register, FIFO and interrupt names of the FPGA personality.
//!
//! Banks are symmetric: every per-bank name exists once for bank A and once
//! for bank B. Names are what the engine hands to the [`Transport`].
//!
//! [`Transport`]: crate::transport::Transport

use crate::channel::{AiMode, Bank};

/// Shared trigger that starts both banks' sample clocks in the same cycle.
pub const SYNC: &str = "SYNC";

/// Analog-output DMA engine ready flag (global).
pub const AO_DMA_SYSTEM_READY: &str = "DMA.SYS.RDY";

/// Analog-output single-point strobe (global).
pub const AO_GO: &str = "AO.SYS.GO";

/// Analog-output status bit, toggled after each single-point update (global).
pub const AO_STATUS: &str = "AO.SYS.STAT";

/// Per-bank analog-input registers.
#[derive(Debug, Clone, Copy)]
pub struct AiRegisters {
    /// Channel-scan table (array register, 12 entries)
    pub config: &'static str,
    /// Configuration-applied flag
    pub ready: &'static str,
    /// Number of channels in the active scan
    pub count: &'static str,
    /// Sample clock tick count
    pub counter: &'static str,
    /// Non-zero while the bank is acquiring
    pub status: &'static str,
    /// DMA gate
    pub dma_enable: &'static str,
    /// Set by the hardware when the DMA buffer overflowed
    pub dma_full: &'static str,
    /// Per-bank sync arm
    pub sync: &'static str,
    /// Sample FIFO
    pub fifo: &'static str,
}

const AI_A: AiRegisters = AiRegisters {
    config: "AI.A.CNFG",
    ready: "AI.A.VAL.RDY",
    count: "AI.A.CNT",
    counter: "AI.A.CNTR",
    status: "AI.A.STAT",
    dma_enable: "AI.A.DMA_ENA",
    dma_full: "AI.A.DMA_FULL",
    sync: "A.SYNC",
    fifo: "AI.A.DMA",
};

const AI_B: AiRegisters = AiRegisters {
    config: "AI.B.CNFG",
    ready: "AI.B.VAL.RDY",
    count: "AI.B.CNT",
    counter: "AI.B.CNTR",
    status: "AI.B.STAT",
    dma_enable: "AI.B.DMA_ENA",
    dma_full: "AI.B.DMA_FULL",
    sync: "B.SYNC",
    fifo: "AI.B.DMA",
};

/// Per-bank analog-output registers.
#[derive(Debug, Clone, Copy)]
pub struct AoRegisters {
    /// Non-zero once the bank's DMA engine has drained
    pub dma_idle: &'static str,
    /// Sample clock tick count
    pub counter: &'static str,
    /// DMA gate, one bit per channel
    pub dma_enable: &'static str,
    /// Set by the hardware when the generation FIFO ran dry
    pub underflow: &'static str,
    /// Per-bank sync arm
    pub sync: &'static str,
    /// Sample FIFO
    pub fifo: &'static str,
    /// "Generation done" interrupt
    pub done_irq: u8,
}

const AO_A: AoRegisters = AoRegisters {
    dma_idle: "AO.A.DMA_IDL",
    counter: "AO.A.DMA_CNTR",
    dma_enable: "AO.A.DMA_ENA",
    underflow: "AO.A.DMA_UNDR",
    sync: "A.SYNC",
    fifo: "AO.A.DMA",
    done_irq: 31,
};

const AO_B: AoRegisters = AoRegisters {
    dma_idle: "AO.B.DMA_IDL",
    counter: "AO.B.DMA_CNTR",
    dma_enable: "AO.B.DMA_ENA",
    underflow: "AO.B.DMA_UNDR",
    sync: "B.SYNC",
    fifo: "AO.B.DMA",
    done_irq: 30,
};

/// Analog-input registers of `bank`.
pub fn ai(bank: Bank) -> &'static AiRegisters {
    match bank {
        Bank::A => &AI_A,
        Bank::B => &AI_B,
    }
}

/// Analog-output registers of `bank`.
pub fn ao(bank: Bank) -> &'static AoRegisters {
    match bank {
        Bank::A => &AO_A,
        Bank::B => &AO_B,
    }
}

/// Value register of an analog-input channel.
pub fn ai_value(bank: Bank, channel: u8, mode: AiMode) -> String {
    match mode {
        AiMode::SingleEnded => format!("AI.{bank}_{channel}.VAL"),
        AiMode::Differential => format!("AI.DIFF_{bank}_{channel}.VAL"),
    }
}

/// Value register of an analog-output channel.
pub fn ao_value(bank: Bank, channel: u8) -> String {
    format!("AO.{bank}_{channel}.VAL")
}

/// Registers of one PWM generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwmRegisters {
    /// Mode word
    pub config: String,
    /// Prescaler select (divisor index + 1, 0 stops the clock)
    pub clock_select: String,
    /// Counter top
    pub max: String,
    /// Compare value setting the duty cycle
    pub compare: String,
}

/// Registers of PWM generator `channel` on `bank`.
pub fn pwm(bank: Bank, channel: u8) -> PwmRegisters {
    let prefix = format!("PWM.{bank}_{channel}");
    PwmRegisters {
        config: format!("{prefix}.CNFG"),
        clock_select: format!("{prefix}.CS"),
        max: format!("{prefix}.MAX"),
        compare: format!("{prefix}.CMP"),
    }
}

/// Register names of an SPI engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiRegisters {
    /// Packed clock/frame configuration
    pub config: String,
    /// Bit clock counter
    pub counter: String,
}

/// Registers of the SPI engine on `bank`.
pub fn spi(bank: Bank) -> SpiRegisters {
    SpiRegisters {
        config: format!("SPI.{bank}.CNFG"),
        counter: format!("SPI.{bank}.CNT"),
    }
}

/// Bits per pin in a function-select register.
pub const FUNCTION_SELECT_WIDTH: u32 = 2;

/// Digital pins per bank routed through the function-select register.
pub const DIGITAL_PINS: u32 = 20;

/// Pin function-select register of `bank` (64 bits wide).
pub fn sys_select(bank: Bank) -> String {
    format!("SYS.SELECT{bank}")
}

/// Replace `width` bits per pin for `count` consecutive pins starting at
/// `first_pin` with `pattern`.
pub fn set_function_select(current: u64, first_pin: u32, count: u32, width: u32, pattern: u64) -> u64 {
    let mask = (1u64 << width) - 1;
    (first_pin..first_pin + count).fold(current, |value, pin| {
        let shift = pin * width;
        (value & !(mask << shift)) | ((pattern & mask) << shift)
    })
}
