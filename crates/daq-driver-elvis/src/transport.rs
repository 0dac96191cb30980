//! Register/FIFO transport consumed by the engine.
//!
//! The FPGA session is an external collaborator: the engine only needs an
//! addressable register file, addressable streaming FIFOs with timeouts, and
//! interrupt wait/acknowledge. [`Transport`] captures that contract so the
//! vendor session and [`MockTransport`](crate::mock::MockTransport) are
//! interchangeable.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a register/FIFO transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The register map has no entry with this name
    #[error("Unknown register '{name}'")]
    UnknownRegister {
        /// Register name as requested
        name: String,
    },

    /// The FIFO was never opened or has been closed
    #[error("Unknown FIFO {handle}")]
    UnknownFifo {
        /// Handle as passed by the caller
        handle: FifoHandle,
    },

    /// A FIFO transfer or interrupt wait did not finish in time
    #[error("Transport operation timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before giving up
        elapsed: Duration,
    },

    /// Any other failure reported by the underlying session
    #[error("Transport error: {message}")]
    Device {
        /// Session-specific description
        message: String,
    },
}

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Opaque handle to a streaming FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FifoHandle(pub u32);

impl fmt::Display for FifoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Timeout for a blocking transfer.
///
/// Crosses the caller boundary as integer milliseconds where `-1` means
/// "wait indefinitely".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Timeout {
    /// Block until the operation completes
    #[default]
    Infinite,
    /// Fail once this much time has passed
    After(Duration),
}

impl Timeout {
    /// Sentinel millisecond value for [`Timeout::Infinite`].
    pub const INFINITE_MS: i64 = -1;

    /// Convert a caller timeout in milliseconds.
    ///
    /// Returns `None` for negative values other than `-1`.
    pub fn from_millis(ms: i64) -> Option<Self> {
        match ms {
            Self::INFINITE_MS => Some(Self::Infinite),
            ms if ms >= 0 => Some(Self::After(Duration::from_millis(ms.unsigned_abs()))),
            _ => None,
        }
    }

    /// Milliseconds representation, `-1` for infinite.
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Infinite => Self::INFINITE_MS,
            Self::After(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Finite duration, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(*d),
        }
    }

    /// Whether this waits indefinitely.
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

impl TryFrom<i64> for Timeout {
    type Error = String;

    fn try_from(ms: i64) -> std::result::Result<Self, Self::Error> {
        Self::from_millis(ms).ok_or_else(|| format!("timeout must be -1 or >= 0 ms, got {ms}"))
    }
}

impl From<Timeout> for i64 {
    fn from(t: Timeout) -> Self {
        t.as_millis()
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => write!(f, "infinite"),
            Self::After(d) => write!(f, "{} ms", d.as_millis()),
        }
    }
}

/// Register/FIFO access to the FPGA personality.
///
/// Implementations must be thread-safe: sessions on different banks may be
/// driven from separate threads against one shared transport.
///
/// Scalar registers carry 32-bit words, except the wide pin function-select
/// registers which carry 64. Array registers (the per-bank channel-scan
/// tables) carry bytes. FIFO elements are signed words.
pub trait Transport: Send + Sync {
    /// Read a scalar register.
    fn read_register(&self, name: &str) -> TransportResult<u32>;

    /// Write a scalar register.
    fn write_register(&self, name: &str, value: u32) -> TransportResult<()>;

    /// Read a 64-bit scalar register.
    fn read_register64(&self, name: &str) -> TransportResult<u64>;

    /// Write a 64-bit scalar register.
    fn write_register64(&self, name: &str, value: u64) -> TransportResult<()>;

    /// Read an array register.
    fn read_array(&self, name: &str) -> TransportResult<Vec<u8>>;

    /// Write an array register.
    fn write_array(&self, name: &str, values: &[u8]) -> TransportResult<()>;

    /// Open (or re-open) a FIFO and size its host buffer to `depth` elements.
    fn open_fifo(&self, name: &str, depth: usize) -> TransportResult<FifoHandle>;

    /// Read exactly `count` elements, blocking up to `timeout`.
    fn fifo_read(
        &self,
        fifo: FifoHandle,
        count: usize,
        timeout: Timeout,
    ) -> TransportResult<Vec<i32>>;

    /// Write `values`, blocking up to `timeout` for space.
    ///
    /// Returns the remaining writable capacity after the write. An empty
    /// write is a pure headroom probe.
    fn fifo_write(
        &self,
        fifo: FifoHandle,
        values: &[i32],
        timeout: Timeout,
    ) -> TransportResult<usize>;

    /// Start the FIFO's DMA engine.
    fn fifo_start(&self, fifo: FifoHandle) -> TransportResult<()>;

    /// Stop the FIFO's DMA engine, discarding buffered elements.
    fn fifo_stop(&self, fifo: FifoHandle) -> TransportResult<()>;

    /// Block until interrupt `irq` asserts. Returns `false` on timeout.
    fn wait_on_interrupt(&self, irq: u8, timeout: Timeout) -> TransportResult<bool>;

    /// Acknowledge an asserted interrupt.
    fn acknowledge_interrupt(&self, irq: u8) -> TransportResult<()>;
}
