//! Finite-buffer ("n-sample") path.
//!
//! Input runs `Idle -> Armed -> Draining -> Idle` once per bank:
//!
//! 1. *Arm*: commit {count = 0, scan table, sample clock, DMA gate}, reset
//!    the FIFO, then commit the channel count, which starts the scan.
//! 2. *Drain*: read `channels * samples` elements in chunks of at most
//!    `max_readback`, each with the configured per-chunk timeout.
//! 3. *Disarm*: close the gate, zero the count, wait for the bank to idle.
//!
//! Output loads the bank's FIFO with backpressure and waits for the
//! "generation done" interrupt.

use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{self, Bank, BankPlan, ConfigPlan, OutputBankPlan, OutputPlan};
use crate::clock::{self, AI_CLOCK_RANGE, AO_RATE_RANGE};
use crate::device::ElvisDevice;
use crate::error::{ElvisError, Result};
use crate::handshake::{self, RegisterValue};
use crate::registers;
use crate::transfer::{self, Budget, Direction};
use crate::transport::{FifoHandle, Timeout, Transport};

/// Highest per-channel rate with a single channel.
pub const MAX_RATE_SINGLE_CHANNEL: f64 = 1_000_000.0;

/// Highest per-channel n-sample rate with several channels.
pub const MAX_N_SAMPLE_RATE_MULTI_CHANNEL: f64 = 500_000.0;

/// Check an input rate against the channel-count dependent ceiling.
pub(crate) fn validate_input_rate(rate: f64, n_channels: usize, multi_channel_max: f64) -> Result<()> {
    let max = if n_channels <= 1 {
        MAX_RATE_SINGLE_CHANNEL
    } else {
        multi_channel_max
    };
    if !rate.is_finite() || !(1.0..=max).contains(&rate) {
        return Err(ElvisError::invalid_parameter(format!(
            "sample rate {rate} Hz outside [1, {max}] Hz for {n_channels} channel(s)"
        )));
    }
    Ok(())
}

/// Check an output rate.
pub(crate) fn validate_output_rate(rate: f64) -> Result<()> {
    let (min, max) = AO_RATE_RANGE;
    if !rate.is_finite() || !(min..=max).contains(&rate) {
        return Err(ElvisError::invalid_parameter(format!(
            "sample rate {rate} Hz outside [{min}, {max}] Hz"
        )));
    }
    Ok(())
}

/// Validate an output payload against `plan` and return its samples per
/// channel.
pub(crate) fn validate_payload(plan: &OutputPlan, values: &[Vec<f64>], max_samples: usize) -> Result<usize> {
    if values.len() != plan.n_channels() {
        return Err(ElvisError::invalid_parameter(format!(
            "expected {} rows of samples, got {}",
            plan.n_channels(),
            values.len()
        )));
    }
    let samples = values.first().map_or(0, Vec::len);
    if samples == 0 || samples > max_samples {
        return Err(ElvisError::invalid_parameter(format!(
            "samples per channel must be in [1, {max_samples}], got {samples}"
        )));
    }
    if values.iter().any(|row| row.len() != samples) {
        return Err(ElvisError::invalid_parameter(
            "every channel must receive the same number of samples",
        ));
    }
    if values.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ElvisError::invalid_parameter("output samples must be finite"));
    }
    Ok(samples)
}

/// Interleave one bank's rows in DMA slot order (AO0 before AO1).
pub(crate) fn bank_payload(bank_plan: &OutputBankPlan, values: &[Vec<f64>]) -> Vec<i32> {
    let mut bindings: Vec<_> = bank_plan.bindings.iter().collect();
    bindings.sort_by_key(|b| b.channel);
    let rows: Vec<Vec<i32>> = bindings
        .iter()
        .map(|b| {
            values[b.position]
                .iter()
                .map(|&v| i32::from(channel::volts_to_code(v)))
                .collect()
        })
        .collect();
    transfer::interleave(&rows)
}

/// Open (or reuse) a bank's input FIFO.
pub(crate) fn input_fifo(device: &ElvisDevice, bank: Bank) -> Result<FifoHandle> {
    let depth = device.config().ai_fifo_depth;
    device.ai_registry().acquire(bank, || {
        Ok(device.transport().open_fifo(registers::ai(bank).fifo, depth)?)
    })
}

/// Open (or reuse) a bank's output FIFO.
pub(crate) fn output_fifo(device: &ElvisDevice, bank: Bank) -> Result<FifoHandle> {
    let depth = device.config().ao_fifo_depth;
    device.ao_registry().acquire(bank, || {
        Ok(device.transport().open_fifo(registers::ao(bank).fifo, depth)?)
    })
}

/// Start then stop a FIFO, discarding whatever it still buffers.
pub(crate) fn reset_fifo(transport: &dyn Transport, fifo: FifoHandle) -> Result<()> {
    transport.fifo_start(fifo)?;
    transport.fifo_stop(fifo)?;
    Ok(())
}

/// Commit count = 0, the streamed scan table, the sample clock and the DMA
/// gate as one step.
pub(crate) fn arm_bank(transport: &dyn Transport, bank_plan: &BankPlan, ticks: u32) -> Result<()> {
    let regs = registers::ai(bank_plan.bank);
    let table = bank_plan.scan_table();
    handshake::commit_all(
        transport,
        &[
            (regs.count, RegisterValue::Word(0)),
            (regs.config, RegisterValue::Table(&table)),
            (regs.counter, RegisterValue::Word(ticks)),
            (regs.dma_enable, RegisterValue::Word(1)),
        ],
        None,
    )?;
    debug!(bank = %bank_plan.bank, ticks, channels = bank_plan.n_channels(), "Armed bank");
    Ok(())
}

/// Close the gate, zero the count and wait for the bank to report idle.
pub(crate) fn disarm_bank(transport: &dyn Transport, bank: Bank, idle: Duration) -> Result<()> {
    let regs = registers::ai(bank);
    handshake::commit_all(
        transport,
        &[
            (regs.dma_enable, RegisterValue::Word(0)),
            (regs.count, RegisterValue::Word(0)),
        ],
        None,
    )?;
    handshake::wait_for_value(transport, regs.status, 0, idle)
        .map_err(|e| Direction::Input.map_transport(bank, e))?;
    debug!(bank = %bank, "Disarmed bank");
    Ok(())
}

/// Acquire `samples` per channel at `rate` per channel.
///
/// Returns one sequence per requested channel, in call order.
pub(crate) fn read_samples(
    device: &ElvisDevice,
    plan: &ConfigPlan,
    samples: usize,
    rate: f64,
) -> Result<Vec<Vec<f64>>> {
    let config = device.config();
    validate_input_rate(rate, plan.n_channels(), MAX_N_SAMPLE_RATE_MULTI_CHANNEL)?;
    if samples > config.max_samples {
        return Err(ElvisError::invalid_parameter(format!(
            "samples per channel must be in [0, {}], got {samples}",
            config.max_samples
        )));
    }

    let mut result = vec![Vec::new(); plan.n_channels()];
    if samples == 0 {
        return Ok(result);
    }

    for bank_plan in plan.banks() {
        let fifo = input_fifo(device, bank_plan.bank)?;
        let raw = acquire_bank(device, bank_plan, fifo, samples, rate)?;
        let per_slot = transfer::deinterleave(&raw, bank_plan.n_channels(), bank_plan.n_channels());
        for (binding, codes) in bank_plan.bindings.iter().zip(per_slot) {
            result[binding.position] = codes
                .into_iter()
                .map(|code| channel::code_to_volts(code, binding.range))
                .collect();
        }
    }
    Ok(result)
}

fn acquire_bank(
    device: &ElvisDevice,
    bank_plan: &BankPlan,
    fifo: FifoHandle,
    samples: usize,
    rate: f64,
) -> Result<Vec<i32>> {
    let transport = device.transport();
    let config = device.config();
    let regs = registers::ai(bank_plan.bank);
    let n_channels = bank_plan.n_channels();

    let clock = clock::sample_clock(config.base_clock_hz, rate * n_channels as f64, AI_CLOCK_RANGE)?;
    arm_bank(transport, bank_plan, clock.ticks())?;
    reset_fifo(transport, fifo)?;
    handshake::commit(transport, regs.count, n_channels as u32, None)?;

    let raw = transfer::read_chunked(
        transport,
        fifo,
        bank_plan.bank,
        n_channels * samples,
        config.max_readback,
        Budget::PerChunk(config.n_sample_timeout_ms),
    )?;

    disarm_bank(transport, bank_plan.bank, config.idle_timeout())?;
    info!(
        bank = %bank_plan.bank,
        channels = n_channels,
        samples,
        actual_rate = clock.actual / n_channels as f64,
        "Finished n-sample acquisition"
    );
    Ok(raw)
}

/// Generate `values` (one row per channel, call order) once at `rate`.
pub(crate) fn write_samples(device: &ElvisDevice, plan: &OutputPlan, values: &[Vec<f64>], rate: f64) -> Result<()> {
    let transport = device.transport();
    let config = device.config();
    validate_output_rate(rate)?;
    let samples = validate_payload(plan, values, config.max_samples)?;
    let clock = clock::sample_clock(config.base_clock_hz, rate, AO_RATE_RANGE)?;

    handshake::poll_until(config.idle_timeout(), || {
        Ok(transport.read_register(registers::AO_DMA_SYSTEM_READY)? != 0)
    })
    .map_err(|e| {
        let bank = plan.banks().first().map_or(Bank::A, |b| b.bank);
        Direction::Output.map_transport(bank, e)
    })?;

    for bank_plan in plan.banks() {
        let bank = bank_plan.bank;
        let regs = registers::ao(bank);
        let fifo = output_fifo(device, bank)?;
        let payload = bank_payload(bank_plan, values);

        handshake::commit(transport, regs.dma_enable, bank_plan.mask.bits(), None)?;
        handshake::commit(transport, regs.counter, clock.ticks(), None)?;
        transfer::write_backpressured(
            transport,
            fifo,
            bank,
            &payload,
            &config.write_plan(),
            Budget::Total(Timeout::Infinite),
        )?;

        let timeout = config.generation_timeout_ms;
        let asserted = transport
            .wait_on_interrupt(regs.done_irq, timeout)
            .map_err(|e| Direction::Output.map_transport(bank, e))?;
        if !asserted {
            return Err(Direction::Output.timeout_error(bank, timeout.duration().unwrap_or_default()));
        }
        transport.acknowledge_interrupt(regs.done_irq)?;
        handshake::commit(transport, regs.dma_enable, 0u32, None)?;

        info!(bank = %bank, channels = bank_plan.n_channels(), samples, actual_rate = clock.actual, "Finished n-sample generation");
    }
    Ok(())
}
