//! Caller-facing sessions.
//!
//! - [`analog_input`] - Analog input (AI) sessions
//! - [`analog_output`] - Analog output (AO) sessions
//!
//! A session is bound to one validated channel plan. Which engine path a
//! call takes is decided by the call and the session's [`SessionMode`]:
//! single-sample and n-sample calls are refused while the session streams,
//! and stream reads/writes are refused while it does not.

pub mod analog_input;
pub mod analog_output;

use std::fmt;

/// What a session last did, or is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Opened, or stopped after streaming
    #[default]
    Idle,
    /// Last call was a single-sample read or write
    SingleSample,
    /// Last call was a finite n-sample transfer
    NSample,
    /// A continuous stream is running
    Continuous,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SingleSample => "single",
            Self::NSample => "n-sample",
            Self::Continuous => "continuous",
        };
        write!(f, "{name}")
    }
}
