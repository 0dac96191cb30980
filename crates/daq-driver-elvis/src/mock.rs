//! In-memory transport for tests, benchmarks and hardware-free development.
//!
//! [`MockTransport`] models just enough of the FPGA personality to drive
//! every engine path:
//!
//! - Scalar and array registers, with optional write latency: after a
//!   write, the next `n` reads of that register still return the previous
//!   value. 64-bit registers settle immediately.
//! - Ready flags (`*.VAL.RDY`, `DMA.SYS.RDY`) and output idle flags
//!   (`*.DMA_IDL`) read 1 until a test overrides them.
//! - Writing `AO.SYS.GO` toggles `AO.SYS.STAT`.
//! - Analog-input value registers report voltages set with
//!   [`MockTransport::set_input_voltage`], encoded with the range found in
//!   the bank's current scan table.
//! - FIFOs keyed by name. Input FIFOs return preloaded data first, then a
//!   synthetic ramp `slot * 1000 + scan % 1000` where the slot count comes
//!   from the bank's `CNT` register. Output FIFOs report headroom from a
//!   script, a fixed value, or their depth.
//! - Interrupts assert immediately unless disabled.
//!
//! Every transport call is logged as a [`Call`] for ordering assertions.

use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::channel::{self, AiMode, Bank, ConfigWord};
use crate::registers;
use crate::transport::{FifoHandle, Timeout, Transport, TransportError, TransportResult};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Scalar register read
    ReadRegister(String),
    /// Scalar register write with the written word
    WriteRegister(String, u32),
    /// 64-bit register read
    ReadRegister64(String),
    /// 64-bit register write with the written word
    WriteRegister64(String, u64),
    /// Array register read
    ReadArray(String),
    /// Array register write with the written bytes
    WriteArray(String, Vec<u8>),
    /// FIFO open with the requested depth
    OpenFifo(String, usize),
    /// FIFO read of this many elements
    FifoRead(String, usize),
    /// FIFO write of this many elements (0 for a headroom probe)
    FifoWrite(String, usize),
    /// FIFO DMA start
    FifoStart(String),
    /// FIFO DMA stop
    FifoStop(String),
    /// Interrupt wait
    WaitOnInterrupt(u8),
    /// Interrupt acknowledge
    AcknowledgeInterrupt(u8),
}

#[derive(Debug, Default)]
struct MockFifo {
    handle: Option<FifoHandle>,
    depth: usize,
    open_count: usize,
    input: VecDeque<i32>,
    produced: usize,
    read_delay: Option<Duration>,
    reads: Vec<usize>,
    headroom_script: VecDeque<usize>,
    fixed_headroom: Option<usize>,
    last_headroom: usize,
    payload_writes: Vec<usize>,
    written: Vec<i32>,
    starts: usize,
}

#[derive(Debug, Clone, Copy)]
struct InputVoltage {
    bank: Bank,
    channel: u8,
    mode: AiMode,
    volts: f64,
}

#[derive(Debug, Default)]
struct MockState {
    registers: HashMap<String, u32>,
    wide_registers: HashMap<String, u64>,
    arrays: HashMap<String, Vec<u8>>,
    stale_registers: HashMap<String, (u32, usize)>,
    stale_arrays: HashMap<String, (Vec<u8>, usize)>,
    write_latency: usize,
    failing: Vec<String>,
    inputs: Vec<InputVoltage>,
    fifos: HashMap<String, MockFifo>,
    handles: Vec<String>,
    deasserted: Vec<u8>,
    calls: Vec<Call>,
}

impl MockState {
    fn check(&self, name: &str) -> TransportResult<()> {
        if self.failing.iter().any(|f| f == name) {
            return Err(TransportError::Device {
                message: format!("injected fault on '{name}'"),
            });
        }
        Ok(())
    }

    fn stored(&self, name: &str) -> u32 {
        if let Some(&value) = self.registers.get(name) {
            return value;
        }
        if let Some(volts) = self.input_code(name) {
            return volts;
        }
        let ready = name.ends_with(".VAL.RDY")
            || name == registers::AO_DMA_SYSTEM_READY
            || name.ends_with(".DMA_IDL");
        u32::from(ready)
    }

    fn input_code(&self, name: &str) -> Option<u32> {
        let input = self
            .inputs
            .iter()
            .rev()
            .find(|i| registers::ai_value(i.bank, i.channel, i.mode) == name)?;
        let table = self.arrays.get(registers::ai(input.bank).config)?;
        let range = table
            .iter()
            .map(|&byte| ConfigWord::from(byte).decode())
            .find(|&(ch, mode, _)| ch == input.channel && mode == input.mode)
            .map(|(_, _, range)| range)?;
        let code = (input.volts / range.full_scale() * 32_768.0)
            .round()
            .clamp(f64::from(i16::MIN), f64::from(i16::MAX));
        Some(channel::code_word(code as i16))
    }

    fn fifo_name(&self, fifo: FifoHandle) -> TransportResult<String> {
        self.handles
            .get(fifo.0 as usize)
            .cloned()
            .ok_or(TransportError::UnknownFifo { handle: fifo })
    }

    fn synthesize(&mut self, name: &str, count: usize) -> Vec<i32> {
        let slots = name
            .strip_suffix(".DMA")
            .map(|prefix| self.stored(&format!("{prefix}.CNT")))
            .unwrap_or(1)
            .max(1) as usize;
        let fifo = self.fifos.entry(name.to_string()).or_default();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            if let Some(value) = fifo.input.pop_front() {
                out.push(value);
                continue;
            }
            let index = fifo.produced;
            fifo.produced += 1;
            let slot = (index % slots) as i32;
            let scan = ((index / slots) % 1000) as i32;
            out.push(slot * 1000 + scan);
        }
        out
    }
}

/// Simulated register/FIFO transport.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Fresh board with every register at its power-on value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `reads` reads after every write return the old value.
    pub fn set_write_latency(&self, reads: usize) {
        self.state.lock().write_latency = reads;
    }

    /// Overwrite a register immediately, bypassing latency.
    pub fn set_register(&self, name: &str, value: u32) {
        let mut state = self.state.lock();
        state.stale_registers.remove(name);
        state.registers.insert(name.to_string(), value);
    }

    /// Current (settled) value of a scalar register.
    pub fn register(&self, name: &str) -> u32 {
        self.state.lock().stored(name)
    }

    /// Overwrite a 64-bit register.
    pub fn set_register64(&self, name: &str, value: u64) {
        self.state.lock().wide_registers.insert(name.to_string(), value);
    }

    /// Current value of a 64-bit register.
    pub fn register64(&self, name: &str) -> u64 {
        self.state.lock().wide_registers.get(name).copied().unwrap_or(0)
    }

    /// Current (settled) contents of an array register.
    pub fn array(&self, name: &str) -> Vec<u8> {
        self.state.lock().arrays.get(name).cloned().unwrap_or_default()
    }

    /// Make every access to `name` fail with a device error.
    pub fn fail_register(&self, name: &str) {
        self.state.lock().failing.push(name.to_string());
    }

    /// Voltage present on an analog-input pin.
    pub fn set_input_voltage(&self, bank: Bank, channel: u8, mode: AiMode, volts: f64) {
        self.state.lock().inputs.push(InputVoltage {
            bank,
            channel,
            mode,
            volts,
        });
    }

    /// Queue raw elements to be returned by the named input FIFO before
    /// the synthetic ramp.
    pub fn push_input(&self, fifo: &str, values: &[i32]) {
        let mut state = self.state.lock();
        state
            .fifos
            .entry(fifo.to_string())
            .or_default()
            .input
            .extend(values.iter().copied());
    }

    /// Delay every read of the named FIFO.
    pub fn set_read_delay(&self, fifo: &str, delay: Duration) {
        self.state.lock().fifos.entry(fifo.to_string()).or_default().read_delay = Some(delay);
    }

    /// Headroom reported by successive probes of the named FIFO.
    pub fn script_headroom(&self, fifo: &str, headroom: Vec<usize>) {
        self.state
            .lock()
            .fifos
            .entry(fifo.to_string())
            .or_default()
            .headroom_script = headroom.into();
    }

    /// Fixed headroom once the script is exhausted (`None` reports depth).
    pub fn set_headroom(&self, fifo: &str, headroom: Option<usize>) {
        self.state.lock().fifos.entry(fifo.to_string()).or_default().fixed_headroom = headroom;
    }

    /// Whether interrupt `irq` asserts when waited on.
    pub fn set_interrupt(&self, irq: u8, asserted: bool) {
        let mut state = self.state.lock();
        state.deasserted.retain(|&i| i != irq);
        if !asserted {
            state.deasserted.push(irq);
        }
    }

    /// Sizes of the reads issued against the named FIFO.
    pub fn fifo_reads(&self, fifo: &str) -> Vec<usize> {
        self.state
            .lock()
            .fifos
            .get(fifo)
            .map(|f| f.reads.clone())
            .unwrap_or_default()
    }

    /// Sizes of the non-empty writes issued against the named FIFO.
    pub fn fifo_payload_writes(&self, fifo: &str) -> Vec<usize> {
        self.state
            .lock()
            .fifos
            .get(fifo)
            .map(|f| f.payload_writes.clone())
            .unwrap_or_default()
    }

    /// Every element written to the named FIFO, in order.
    pub fn fifo_written(&self, fifo: &str) -> Vec<i32> {
        self.state
            .lock()
            .fifos
            .get(fifo)
            .map(|f| f.written.clone())
            .unwrap_or_default()
    }

    /// How many times the named FIFO was opened.
    pub fn open_count(&self, fifo: &str) -> usize {
        self.state.lock().fifos.get(fifo).map_or(0, |f| f.open_count)
    }

    /// How many times the named FIFO was started.
    pub fn start_count(&self, fifo: &str) -> usize {
        self.state.lock().fifos.get(fifo).map_or(0, |f| f.starts)
    }

    /// Every transport call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl Transport for MockTransport {
    fn read_register(&self, name: &str) -> TransportResult<u32> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReadRegister(name.to_string()));
        state.check(name)?;
        if let Some((old, remaining)) = state.stale_registers.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(*old);
            }
        }
        Ok(state.stored(name))
    }

    fn write_register(&self, name: &str, value: u32) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WriteRegister(name.to_string(), value));
        state.check(name)?;
        if state.write_latency > 0 {
            let old = state.stored(name);
            let latency = state.write_latency;
            state.stale_registers.insert(name.to_string(), (old, latency));
        }
        state.registers.insert(name.to_string(), value);

        if name == registers::AO_GO && value != 0 {
            let status = state.stored(registers::AO_STATUS);
            state
                .registers
                .insert(registers::AO_STATUS.to_string(), u32::from(status == 0));
        }
        Ok(())
    }

    fn read_register64(&self, name: &str) -> TransportResult<u64> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReadRegister64(name.to_string()));
        state.check(name)?;
        Ok(state.wide_registers.get(name).copied().unwrap_or(0))
    }

    fn write_register64(&self, name: &str, value: u64) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WriteRegister64(name.to_string(), value));
        state.check(name)?;
        state.wide_registers.insert(name.to_string(), value);
        Ok(())
    }

    fn read_array(&self, name: &str) -> TransportResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.calls.push(Call::ReadArray(name.to_string()));
        state.check(name)?;
        if let Some((old, remaining)) = state.stale_arrays.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(old.clone());
            }
        }
        Ok(state.arrays.get(name).cloned().unwrap_or_default())
    }

    fn write_array(&self, name: &str, values: &[u8]) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WriteArray(name.to_string(), values.to_vec()));
        state.check(name)?;
        if state.write_latency > 0 {
            let old = state.arrays.get(name).cloned().unwrap_or_default();
            let latency = state.write_latency;
            state.stale_arrays.insert(name.to_string(), (old, latency));
        }
        state.arrays.insert(name.to_string(), values.to_vec());
        Ok(())
    }

    fn open_fifo(&self, name: &str, depth: usize) -> TransportResult<FifoHandle> {
        let mut state = self.state.lock();
        state.calls.push(Call::OpenFifo(name.to_string(), depth));
        let next = FifoHandle(state.handles.len() as u32);
        let fifo = state.fifos.entry(name.to_string()).or_default();
        fifo.depth = depth;
        fifo.open_count += 1;
        let handle = *fifo.handle.get_or_insert(next);
        if handle == next {
            state.handles.push(name.to_string());
        }
        trace!(fifo = name, depth, handle = %handle, "Mock FIFO opened");
        Ok(handle)
    }

    fn fifo_read(&self, fifo: FifoHandle, count: usize, timeout: Timeout) -> TransportResult<Vec<i32>> {
        let (name, delay) = {
            let mut state = self.state.lock();
            let name = state.fifo_name(fifo)?;
            state.calls.push(Call::FifoRead(name.clone(), count));
            let delay = state.fifos.get(&name).and_then(|f| f.read_delay);
            (name, delay)
        };

        if let Some(delay) = delay {
            match timeout.duration() {
                Some(limit) if limit < delay => {
                    thread::sleep(limit);
                    return Err(TransportError::Timeout { elapsed: limit });
                }
                _ => thread::sleep(delay),
            }
        }

        let mut state = self.state.lock();
        let values = state.synthesize(&name, count);
        state.fifos.entry(name).or_default().reads.push(count);
        Ok(values)
    }

    fn fifo_write(&self, fifo: FifoHandle, values: &[i32], _timeout: Timeout) -> TransportResult<usize> {
        let mut state = self.state.lock();
        let name = state.fifo_name(fifo)?;
        state.calls.push(Call::FifoWrite(name.clone(), values.len()));
        let fifo = state.fifos.entry(name.clone()).or_default();

        if values.is_empty() {
            let headroom = fifo
                .headroom_script
                .pop_front()
                .or(fifo.fixed_headroom)
                .unwrap_or(fifo.depth);
            fifo.last_headroom = headroom;
            return Ok(headroom);
        }
        if values.len() > fifo.last_headroom {
            return Err(TransportError::Device {
                message: format!(
                    "write of {} elements overflows '{name}' (headroom {})",
                    values.len(),
                    fifo.last_headroom
                ),
            });
        }
        fifo.last_headroom -= values.len();
        fifo.payload_writes.push(values.len());
        fifo.written.extend_from_slice(values);
        Ok(fifo.last_headroom)
    }

    fn fifo_start(&self, fifo: FifoHandle) -> TransportResult<()> {
        let mut state = self.state.lock();
        let name = state.fifo_name(fifo)?;
        state.calls.push(Call::FifoStart(name.clone()));
        state.fifos.entry(name).or_default().starts += 1;
        Ok(())
    }

    fn fifo_stop(&self, fifo: FifoHandle) -> TransportResult<()> {
        let mut state = self.state.lock();
        let name = state.fifo_name(fifo)?;
        state.calls.push(Call::FifoStop(name.clone()));
        // Rewind the synthetic ramp; preloaded input survives
        state.fifos.entry(name).or_default().produced = 0;
        Ok(())
    }

    fn wait_on_interrupt(&self, irq: u8, timeout: Timeout) -> TransportResult<bool> {
        let asserted = {
            let mut state = self.state.lock();
            state.calls.push(Call::WaitOnInterrupt(irq));
            !state.deasserted.contains(&irq)
        };
        if !asserted {
            if let Some(limit) = timeout.duration() {
                thread::sleep(limit);
            }
        }
        Ok(asserted)
    }

    fn acknowledge_interrupt(&self, irq: u8) -> TransportResult<()> {
        self.state.lock().calls.push(Call::AcknowledgeInterrupt(irq));
        Ok(())
    }
}
