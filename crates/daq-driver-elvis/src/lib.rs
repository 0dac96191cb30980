//! Sampled I/O streaming engine for NI ELVIS III class FPGA DAQ boards.
//!
//! The board's analog conversion runs in an FPGA reached through a fixed
//! register/FIFO map. This crate drives that map: it encodes channel
//! configurations, commits them with a write-then-verify handshake, and
//! moves samples through the per-bank DMA FIFOs in three modes.
//!
//! # Architecture
//!
//! ## Device Access
//! - [`ElvisDevice`] - Owns the transport, the engine configuration and the
//!   per-bank shared DMA state; opens sessions
//! - [`Transport`] - Register/FIFO/interrupt contract of the FPGA session
//! - [`MockTransport`] - Simulated FPGA for tests and hardware-free use
//!
//! ## Sessions
//! - [`AnalogInput`] - Single-sample, n-sample and continuous acquisition
//! - [`AnalogOutput`] - Single-point, n-sample and continuous generation
//! - [`Pwm`] / [`SpiClockConfig`] - Clock-quantizer consumers
//!
//! ## Engine
//! - [`clock`] - Divisor/counter quantization shared by every clocked function
//! - [`handshake`] - Write-then-verify register commits
//! - [`channel`] - Channel validation and scan-table encoding
//! - [`transfer`] - Chunked FIFO transfers with timeout budgets and backpressure
//! - [`registry`] - Reference-counted per-bank DMA handles
//!
//! # Examples
//!
//! ## N-Sample Acquisition on Both Banks
//!
//! ```
//! use std::sync::Arc;
//! use daq_driver_elvis::{AiChannelSpec, Bank, ElvisDevice, MockTransport};
//!
//! # fn example() -> daq_driver_elvis::Result<()> {
//! let device = ElvisDevice::new(Arc::new(MockTransport::new()));
//! let mut input = device.open_input(&[
//!     AiChannelSpec::new(Bank::A, 0),
//!     AiChannelSpec::new(Bank::B, 1),
//! ])?;
//!
//! let groups = input.read_samples(100, 1_000.0)?;
//! assert_eq!(groups.len(), 2);
//! assert!(groups.iter().all(|g| g.len() == 100));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Continuous Streaming
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use daq_driver_elvis::{AiChannelSpec, Bank, ElvisDevice, MockTransport, Timeout};
//!
//! # fn example() -> daq_driver_elvis::Result<()> {
//! let device = ElvisDevice::new(Arc::new(MockTransport::new()));
//! let mut input = device.open_input(&[AiChannelSpec::new(Bank::A, 2)])?;
//!
//! input.start_continuous(10_000.0)?;
//! let block = input.read_continuous(500, Timeout::After(Duration::from_millis(100)))?;
//! assert_eq!(block[0].len(), 500);
//! input.stop_continuous()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod channel;
pub mod clock;
pub mod config;
pub mod continuous;
pub mod device;
pub mod error;
pub mod finite;
pub mod handshake;
pub mod mock;
pub mod pwm;
pub mod registers;
pub mod registry;
pub mod single;
pub mod spi;
pub mod subsystem;
pub mod transfer;
pub mod transport;

pub use channel::{AiChannelSpec, AiMode, AiRange, AoChannelMask, AoChannelSpec, Bank, ConfigPlan, ConfigWord, OutputPlan};
pub use clock::{quantize, ClockParams, ClockSetting};
pub use config::EngineConfig;
pub use continuous::StreamState;
pub use device::ElvisDevice;
pub use error::{ElvisError, Result};
pub use mock::{Call, MockTransport};
pub use pwm::Pwm;
pub use registry::{BankRegistry, BankState};
pub use spi::SpiClockConfig;
pub use subsystem::analog_input::AnalogInput;
pub use subsystem::analog_output::AnalogOutput;
pub use subsystem::SessionMode;
pub use transfer::Direction;
pub use transport::{FifoHandle, Timeout, Transport, TransportError, TransportResult};
