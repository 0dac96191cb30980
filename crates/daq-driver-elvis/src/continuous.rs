//! Continuous streaming path.
//!
//! A stream runs `Idle -> Starting -> Streaming -> Stopping -> Idle`. The
//! bank registry guarantees at most one continuous stream per bank and
//! direction; the bank is reserved before any register write and released
//! only by [`stop_input`] / [`stop_output`].
//!
//! When a session spans both banks the configuration of each bank is
//! committed first, then each bank's sync arm is set, and the shared
//! [`SYNC`](crate::registers::SYNC) trigger starts both sample clocks in the
//! same cycle. Single-bank streams never touch the sync registers.
//!
//! ```text
//!   bank A: arm ──┐                         ┌── stream
//!                 ├── A.SYNC, B.SYNC ── SYNC ┤
//!   bank B: arm ──┘                         └── stream
//! ```
//!
//! Before the first transfer of a call, every bank is checked to be still
//! streaming ([`ElvisError::NotStarted`]) and free of a hardware overflow or
//! underflow flag ([`ElvisError::BufferOverrun`]). The call's timeout
//! is one budget spent across all chunks and banks.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::channel::{self, Bank, ConfigPlan, OutputPlan};
use crate::clock::{self, AI_CLOCK_RANGE, AO_RATE_RANGE};
use crate::device::ElvisDevice;
use crate::error::{ElvisError, Result};
use crate::finite;
use crate::handshake::{self, RegisterValue};
use crate::registers;
use crate::transfer::{self, Budget, Direction};
use crate::transport::{FifoHandle, Timeout};

/// Highest per-channel continuous input rate with several channels.
pub const MAX_CONTINUOUS_RATE_MULTI_CHANNEL: f64 = 250_000.0;

/// Bookkeeping of a running stream, owned by the session that started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    /// Banks reserved by the stream
    pub banks: Vec<Bank>,
    /// Elements per scan in each bank's FIFO
    pub stride: usize,
    /// Whether the banks were started through the shared sync trigger
    pub synced: bool,
}

/// Call-wide timeout budget spread over several banks.
struct Deadline {
    timeout: Timeout,
    start: Instant,
}

impl Deadline {
    fn new(timeout: Timeout) -> Self {
        Self {
            timeout,
            start: Instant::now(),
        }
    }

    /// Budget left for the next bank. The first bank always gets the full
    /// timeout.
    fn remaining(&self, first: bool, direction: Direction, bank: Bank) -> Result<Timeout> {
        match self.timeout {
            Timeout::Infinite => Ok(Timeout::Infinite),
            Timeout::After(total) => {
                let left = total.saturating_sub(self.start.elapsed());
                if !first && left.is_zero() {
                    return Err(direction.timeout_error(bank, total));
                }
                Ok(Timeout::After(if first { total } else { left }))
            }
        }
    }
}

// =============================================================================
// Analog input
// =============================================================================

/// Reserve the plan's banks and start streaming at `rate` per channel.
pub(crate) fn start_input(device: &ElvisDevice, plan: &ConfigPlan, rate: f64) -> Result<StreamState> {
    finite::validate_input_rate(rate, plan.n_channels(), MAX_CONTINUOUS_RATE_MULTI_CHANNEL)?;

    let banks = plan.bank_ids();
    let registry = device.ai_registry();
    registry.begin_continuous(&banks)?;

    match start_input_reserved(device, plan, rate) {
        Ok(state) => Ok(state),
        Err(e) => {
            for &bank in &banks {
                registry.end_continuous(bank);
            }
            Err(e)
        }
    }
}

fn start_input_reserved(device: &ElvisDevice, plan: &ConfigPlan, rate: f64) -> Result<StreamState> {
    let transport = device.transport();
    let config = device.config();
    let synced = plan.is_multi_bank();
    let stride = plan.max_bank_channels();

    let mut fifos: Vec<(Bank, FifoHandle)> = Vec::with_capacity(plan.banks().len());
    for bank_plan in plan.banks() {
        fifos.push((bank_plan.bank, finite::input_fifo(device, bank_plan.bank)?));
    }

    let clock = clock::sample_clock(config.base_clock_hz, rate * stride as f64, AI_CLOCK_RANGE)?;

    // A bank left running by a timed-out n-sample read must be idle first
    for bank_plan in plan.banks() {
        finite::disarm_bank(transport, bank_plan.bank, config.idle_timeout())?;
    }
    for bank_plan in plan.banks() {
        finite::arm_bank(transport, bank_plan, clock.ticks())?;
    }
    if synced {
        for bank_plan in plan.banks() {
            handshake::commit(transport, registers::ai(bank_plan.bank).sync, 1u32, None)?;
        }
    }
    for &(_, fifo) in &fifos {
        finite::reset_fifo(transport, fifo)?;
    }

    // The count register is what starts the scan; with a sync arm the scan
    // waits for the shared trigger instead.
    let counts: Vec<(&str, RegisterValue<'_>)> = plan
        .banks()
        .iter()
        .map(|b| (registers::ai(b.bank).count, RegisterValue::Word(stride as u32)))
        .collect();
    handshake::commit_all(transport, &counts, None)?;

    if synced {
        transport.write_register(registers::SYNC, 1)?;
    }

    info!(
        banks = ?plan.bank_ids(),
        stride,
        synced,
        actual_rate = clock.actual / stride as f64,
        "Started continuous acquisition"
    );
    Ok(StreamState {
        banks: plan.bank_ids(),
        stride,
        synced,
    })
}

/// Read `samples` per channel from a running stream.
pub(crate) fn read_input(
    device: &ElvisDevice,
    plan: &ConfigPlan,
    state: &StreamState,
    samples: usize,
    timeout: Timeout,
) -> Result<Vec<Vec<f64>>> {
    let transport = device.transport();
    let config = device.config();
    let registry = device.ai_registry();
    let total = state.stride.checked_mul(samples).ok_or_else(|| {
        ElvisError::invalid_parameter(format!("{samples} samples per channel is too many"))
    })?;

    // Check every bank before draining any FIFO
    let mut fifos = Vec::with_capacity(plan.banks().len());
    for bank_plan in plan.banks() {
        let bank = bank_plan.bank;
        let regs = registers::ai(bank);

        let fifo = registry.fifo(bank).filter(|_| registry.is_continuous(bank));
        let fifo = fifo.ok_or(ElvisError::NotStarted { bank })?;
        if transport.read_register(regs.count)? != state.stride as u32 {
            return Err(ElvisError::NotStarted { bank });
        }
        if transport.read_register(regs.dma_full)? != 0 {
            warn!(bank = %bank, "Input DMA buffer overflowed");
            return Err(ElvisError::BufferOverrun { bank });
        }
        fifos.push(fifo);
    }

    let mut result = vec![Vec::new(); plan.n_channels()];
    if samples == 0 {
        return Ok(result);
    }
    let deadline = Deadline::new(timeout);
    for (index, (bank_plan, fifo)) in plan.banks().iter().zip(fifos).enumerate() {
        let bank = bank_plan.bank;
        let budget = deadline.remaining(index == 0, Direction::Input, bank)?;
        let raw = transfer::read_chunked(transport, fifo, bank, total, config.max_readback, Budget::Total(budget))?;
        let per_slot = transfer::deinterleave(&raw, state.stride, bank_plan.n_channels());
        for (binding, codes) in bank_plan.bindings.iter().zip(per_slot) {
            result[binding.position] = codes
                .into_iter()
                .map(|code| channel::code_to_volts(code, binding.range))
                .collect();
        }
    }
    Ok(result)
}

/// Stop a running input stream. Banks that are not streaming are skipped.
pub(crate) fn stop_input(device: &ElvisDevice, state: &StreamState) -> Result<()> {
    let registry = device.ai_registry();
    let idle = device.config().idle_timeout();

    let mut first_error = None;
    for &bank in &state.banks {
        if !registry.is_continuous(bank) {
            continue;
        }
        let outcome = stop_input_bank(device, bank, state.synced, idle);
        registry.end_continuous(bank);
        if let Err(e) = outcome {
            warn!(bank = %bank, error = %e, "Continuous acquisition did not stop cleanly");
            first_error.get_or_insert(e);
        } else {
            info!(bank = %bank, "Stopped continuous acquisition");
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn stop_input_bank(device: &ElvisDevice, bank: Bank, synced: bool, idle: Duration) -> Result<()> {
    let transport = device.transport();
    let regs = registers::ai(bank);
    handshake::commit_all(
        transport,
        &[
            (regs.count, RegisterValue::Word(0)),
            (regs.dma_enable, RegisterValue::Word(0)),
        ],
        None,
    )?;
    if synced {
        handshake::commit(transport, regs.sync, 0u32, None)?;
    }
    handshake::wait_for_value(transport, regs.status, 0, idle)
        .map_err(|e| Direction::Input.map_transport(bank, e))?;
    Ok(())
}

// =============================================================================
// Analog output
// =============================================================================

/// Reserve the plan's banks, preload `values` and start generating at
/// `rate`.
pub(crate) fn start_output(
    device: &ElvisDevice,
    plan: &OutputPlan,
    values: &[Vec<f64>],
    rate: f64,
    timeout: Timeout,
) -> Result<StreamState> {
    finite::validate_output_rate(rate)?;
    finite::validate_payload(plan, values, device.config().ao_fifo_depth)?;

    let banks = plan.bank_ids();
    let registry = device.ao_registry();
    registry.begin_continuous(&banks)?;

    match start_output_reserved(device, plan, values, rate, timeout) {
        Ok(state) => Ok(state),
        Err(e) => {
            for &bank in &banks {
                registry.end_continuous(bank);
            }
            Err(e)
        }
    }
}

fn start_output_reserved(
    device: &ElvisDevice,
    plan: &OutputPlan,
    values: &[Vec<f64>],
    rate: f64,
    timeout: Timeout,
) -> Result<StreamState> {
    let transport = device.transport();
    let config = device.config();
    let synced = plan.is_multi_bank();
    let clock = clock::sample_clock(config.base_clock_hz, rate, AO_RATE_RANGE)?;
    let deadline = Deadline::new(timeout);

    for (index, bank_plan) in plan.banks().iter().enumerate() {
        let bank = bank_plan.bank;
        let regs = registers::ao(bank);
        let fifo = finite::output_fifo(device, bank)?;

        handshake::commit(transport, regs.dma_enable, 0u32, None)?;
        handshake::wait_for_value(transport, regs.dma_idle, 1, config.idle_timeout())
            .map_err(|e| Direction::Output.map_transport(bank, e))?;
        handshake::commit(transport, regs.counter, clock.ticks(), None)?;
        finite::reset_fifo(transport, fifo)?;

        let budget = deadline.remaining(index == 0, Direction::Output, bank)?;
        let payload = finite::bank_payload(bank_plan, values);
        transfer::write_backpressured(transport, fifo, bank, &payload, &config.write_plan(), Budget::Total(budget))?;
        debug!(bank = %bank, preloaded = payload.len(), "Preloaded output FIFO");
    }

    if synced {
        for bank_plan in plan.banks() {
            handshake::commit(transport, registers::ao(bank_plan.bank).sync, 1u32, None)?;
        }
    }
    for bank_plan in plan.banks() {
        handshake::commit(transport, registers::ao(bank_plan.bank).dma_enable, bank_plan.mask.bits(), None)?;
    }
    if synced {
        transport.write_register(registers::SYNC, 1)?;
    }

    info!(banks = ?plan.bank_ids(), synced, actual_rate = clock.actual, "Started continuous generation");
    Ok(StreamState {
        banks: plan.bank_ids(),
        stride: plan.banks().iter().map(|b| b.n_channels()).max().unwrap_or(0),
        synced,
    })
}

/// Append `values` to a running output stream.
pub(crate) fn write_output(
    device: &ElvisDevice,
    plan: &OutputPlan,
    values: &[Vec<f64>],
    timeout: Timeout,
) -> Result<()> {
    let transport = device.transport();
    let config = device.config();
    let registry = device.ao_registry();
    finite::validate_payload(plan, values, config.ao_fifo_depth)?;

    let mut fifos = Vec::with_capacity(plan.banks().len());
    for bank_plan in plan.banks() {
        let bank = bank_plan.bank;
        let regs = registers::ao(bank);

        let fifo = registry.fifo(bank).filter(|_| registry.is_continuous(bank));
        let fifo = fifo.ok_or(ElvisError::NotStarted { bank })?;
        if transport.read_register(regs.dma_enable)? != bank_plan.mask.bits() {
            return Err(ElvisError::NotStarted { bank });
        }
        if transport.read_register(regs.underflow)? != 0 {
            warn!(bank = %bank, "Output DMA buffer ran dry");
            return Err(ElvisError::BufferOverrun { bank });
        }
        fifos.push(fifo);
    }

    let deadline = Deadline::new(timeout);
    for (index, (bank_plan, fifo)) in plan.banks().iter().zip(fifos).enumerate() {
        let bank = bank_plan.bank;
        let budget = deadline.remaining(index == 0, Direction::Output, bank)?;
        let payload = finite::bank_payload(bank_plan, values);
        transfer::write_backpressured(transport, fifo, bank, &payload, &config.write_plan(), Budget::Total(budget))?;
    }
    Ok(())
}

/// Stop a running output stream. Banks that are not streaming are skipped.
pub(crate) fn stop_output(device: &ElvisDevice, state: &StreamState) -> Result<()> {
    let registry = device.ao_registry();
    let idle = device.config().idle_timeout();

    let mut first_error = None;
    for &bank in &state.banks {
        if !registry.is_continuous(bank) {
            continue;
        }
        let outcome = stop_output_bank(device, bank, state.synced, idle);
        registry.end_continuous(bank);
        if let Err(e) = outcome {
            warn!(bank = %bank, error = %e, "Continuous generation did not stop cleanly");
            first_error.get_or_insert(e);
        } else {
            info!(bank = %bank, "Stopped continuous generation");
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn stop_output_bank(device: &ElvisDevice, bank: Bank, synced: bool, idle: Duration) -> Result<()> {
    let transport = device.transport();
    let regs = registers::ao(bank);
    handshake::commit(transport, regs.dma_enable, 0u32, None)?;
    if synced {
        handshake::commit(transport, regs.sync, 0u32, None)?;
    }
    handshake::wait_for_value(transport, regs.dma_idle, 1, idle)
        .map_err(|e| Direction::Output.map_transport(bank, e))?;
    Ok(())
}
