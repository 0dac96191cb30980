//! Write-then-verify register handshake.
//!
//! [`commit`] writes a register and spins until a fresh read returns the same
//! value (and, optionally, a ready flag reads set). There is no timeout at
//! this level: the loop guards sub-microsecond propagation latency in the
//! transport and a faulted transport hangs it. Waits that span observable
//! time go through [`poll_until`], which is bounded.

use std::hint;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::transport::{Transport, TransportError, TransportResult};

/// A value destined for a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue<'a> {
    /// Scalar register word
    Word(u32),
    /// 64-bit scalar register word
    Wide(u64),
    /// Array register contents
    Table(&'a [u8]),
}

impl<'a> From<u32> for RegisterValue<'a> {
    fn from(word: u32) -> Self {
        Self::Word(word)
    }
}

impl<'a> From<u64> for RegisterValue<'a> {
    fn from(word: u64) -> Self {
        Self::Wide(word)
    }
}

impl<'a> From<&'a [u8]> for RegisterValue<'a> {
    fn from(table: &'a [u8]) -> Self {
        Self::Table(table)
    }
}

impl RegisterValue<'_> {
    fn write(&self, transport: &dyn Transport, register: &str) -> TransportResult<()> {
        match self {
            Self::Word(word) => transport.write_register(register, *word),
            Self::Wide(word) => transport.write_register64(register, *word),
            Self::Table(table) => transport.write_array(register, table),
        }
    }

    fn matches(&self, transport: &dyn Transport, register: &str) -> TransportResult<bool> {
        Ok(match self {
            Self::Word(word) => transport.read_register(register)? == *word,
            Self::Wide(word) => transport.read_register64(register)? == *word,
            Self::Table(table) => transport.read_array(register)?.as_slice() == *table,
        })
    }
}

/// Write `value` to `register` and spin until it reads back, and until
/// `ready` (if given) reads non-zero.
pub fn commit<'a>(
    transport: &dyn Transport,
    register: &str,
    value: impl Into<RegisterValue<'a>>,
    ready: Option<&str>,
) -> TransportResult<()> {
    commit_all(transport, &[(register, value.into())], ready)
}

/// Write every pair in order, then spin until all of them read back together.
///
/// Used where several registers form one configuration step and the
/// hardware must observe them as a unit before the next step.
pub fn commit_all(
    transport: &dyn Transport,
    writes: &[(&str, RegisterValue<'_>)],
    ready: Option<&str>,
) -> TransportResult<()> {
    for (register, value) in writes {
        value.write(transport, register)?;
    }

    let mut spins: u64 = 0;
    loop {
        if settled(transport, writes, ready)? {
            break;
        }
        spins += 1;
        hint::spin_loop();
    }

    trace!(registers = writes.len(), spins, "Handshake committed");
    Ok(())
}

fn settled(
    transport: &dyn Transport,
    writes: &[(&str, RegisterValue<'_>)],
    ready: Option<&str>,
) -> TransportResult<bool> {
    for (register, value) in writes {
        if !value.matches(transport, register)? {
            return Ok(false);
        }
    }
    match ready {
        Some(flag) => Ok(transport.read_register(flag)? != 0),
        None => Ok(true),
    }
}

/// Spin until `condition` holds, failing with [`TransportError::Timeout`]
/// once `limit` has elapsed.
pub fn poll_until<F>(limit: Duration, mut condition: F) -> TransportResult<()>
where
    F: FnMut() -> TransportResult<bool>,
{
    let start = Instant::now();
    loop {
        if condition()? {
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= limit {
            return Err(TransportError::Timeout { elapsed });
        }
        hint::spin_loop();
    }
}

/// Spin until `register` reads `expected`, bounded by `limit`.
pub fn wait_for_value(
    transport: &dyn Transport,
    register: &str,
    expected: u32,
    limit: Duration,
) -> TransportResult<()> {
    poll_until(limit, || Ok(transport.read_register(register)? == expected))
}
