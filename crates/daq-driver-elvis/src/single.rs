//! Single-sample path.
//!
//! One-shot configure-then-convert for analog input and one-shot update for
//! analog output. Both are synchronous: when a call returns, every channel
//! reflects the configuration it committed.

use std::thread;

use tracing::{debug, warn};

use crate::channel::{self, ConfigPlan, OutputPlan, SCAN_TABLE_LEN, SINGLE_SAMPLE_COUNTER};
use crate::device::ElvisDevice;
use crate::error::{ElvisError, Result};
use crate::handshake::{self, RegisterValue};
use crate::registers;
use crate::transfer::Direction;

/// Convert every channel of `plan` once. Values are returned in call order.
pub(crate) fn read_once(device: &ElvisDevice, plan: &ConfigPlan) -> Result<Vec<f64>> {
    let transport = device.transport();
    let mut values = vec![0.0; plan.n_channels()];

    for bank_plan in plan.banks() {
        let regs = registers::ai(bank_plan.bank);
        let table = bank_plan.single_sample_table();

        handshake::commit_all(
            transport,
            &[
                (regs.count, RegisterValue::Word(SCAN_TABLE_LEN as u32)),
                (regs.counter, RegisterValue::Word(SINGLE_SAMPLE_COUNTER)),
            ],
            None,
        )?;
        handshake::commit(transport, regs.config, table.as_slice(), Some(regs.ready))?;
        debug!(bank = %bank_plan.bank, channels = bank_plan.n_channels(), "Committed single-sample configuration");
    }

    let settle = device.config().settle_time();
    if !settle.is_zero() {
        thread::sleep(settle);
    }

    for bank_plan in plan.banks() {
        for binding in &bank_plan.bindings {
            let word = transport.read_register(&binding.value_register)?;
            values[binding.position] = channel::code_to_volts(channel::register_code(word), binding.range);
        }
    }
    Ok(values)
}

/// Drive every channel of `plan` to `volts` and wait for each update to land.
pub(crate) fn write_once(device: &ElvisDevice, plan: &OutputPlan, volts: f64) -> Result<()> {
    let transport = device.transport();
    let idle = device.config().idle_timeout();

    if !volts.is_finite() {
        return Err(ElvisError::invalid_parameter(format!(
            "output value must be finite, got {volts}"
        )));
    }
    if volts.abs() > channel::OUTPUT_FULL_SCALE {
        warn!(volts, "Output value coerced to ±10 V");
    }
    let word = channel::code_word(channel::volts_to_code(volts));

    for bank_plan in plan.banks() {
        let regs = registers::ao(bank_plan.bank);
        for binding in &bank_plan.bindings {
            handshake::commit(transport, regs.dma_enable, 0u32, None)?;

            let toggled = u32::from(transport.read_register(registers::AO_STATUS)? == 0);
            transport.write_register(&binding.value_register, word)?;
            transport.write_register(registers::AO_GO, 1)?;
            handshake::wait_for_value(transport, registers::AO_STATUS, toggled, idle)
                .map_err(|e| Direction::Output.map_transport(bank_plan.bank, e))?;

            debug!(bank = %bank_plan.bank, channel = binding.channel, volts, "Wrote single point");
        }
    }
    Ok(())
}
