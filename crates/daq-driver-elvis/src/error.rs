//! Error types for the sampled I/O engine.
//!
//! Every failure surfaced by the engine maps onto one [`ElvisError`] variant.
//! Configuration-time errors are raised before any register is touched;
//! streaming errors leave the bank armed and require an explicit stop.

use std::time::Duration;

use thiserror::Error;

use crate::channel::Bank;
use crate::transport::TransportError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ElvisError>;

/// Errors that can occur while configuring or streaming a bank.
#[derive(Error, Debug)]
pub enum ElvisError {
    /// Malformed channel, bank, range or mode request
    #[error("Invalid channel request: {message}")]
    Validation {
        /// What was wrong with the request
        message: String,
    },

    /// Sample count, rate or payload outside the documented bounds
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Which bound was violated
        message: String,
    },

    /// Requested frequency cannot be represented by the clock hardware
    #[error("Frequency {requested} Hz out of range [{min}, {max}] Hz")]
    OutOfRange {
        /// Frequency asked for, in Hz
        requested: f64,
        /// Lowest representable frequency, in Hz
        min: f64,
        /// Highest representable frequency, in Hz
        max: f64,
    },

    /// Continuous mode is already running on the bank
    #[error("Continuous mode already started on bank {bank}")]
    AlreadyStarted {
        /// Bank owned by the running stream
        bank: Bank,
    },

    /// Continuous mode has not been started on the bank
    #[error("Continuous mode not started on bank {bank}")]
    NotStarted {
        /// Bank that is not streaming
        bank: Bank,
    },

    /// A chunked FIFO read did not complete within its timeout
    #[error("Acquisition timed out on bank {bank} after {timeout:?}")]
    AcquisitionTimeout {
        /// Bank being drained
        bank: Bank,
        /// Budget that ran out
        timeout: Duration,
    },

    /// A chunked FIFO write or generation wait did not complete in time
    #[error("Generation timed out on bank {bank} after {timeout:?}")]
    GenerationTimeout {
        /// Bank being fed
        bank: Bank,
        /// Budget that ran out
        timeout: Duration,
    },

    /// Hardware reported a FIFO overflow (input) or underflow (output)
    #[error("DMA buffer overrun on bank {bank}; stop and restart the stream")]
    BufferOverrun {
        /// Bank whose FIFO flagged the fault
        bank: Bank,
    },

    /// Error propagated unchanged from the register/FIFO transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Engine configuration is inconsistent
    #[error("Invalid configuration: {message}")]
    Config {
        /// The violated invariant
        message: String,
    },

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ElvisError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Check if this is a transfer timeout (acquisition or generation).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionTimeout { .. } | Self::GenerationTimeout { .. }
        )
    }

    /// Check if this is a continuous-mode precondition violation.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::AlreadyStarted { .. } | Self::NotStarted { .. })
    }

    /// Check if the request was rejected before any register write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::InvalidParameter { .. } | Self::OutOfRange { .. }
        )
    }

    /// Check if the stream must be stopped before the bank is reused.
    pub fn requires_stop(&self) -> bool {
        self.is_timeout() || matches!(self, Self::BufferOverrun { .. })
    }
}
