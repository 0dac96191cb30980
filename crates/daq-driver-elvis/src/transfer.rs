//! Chunked DMA transfers.
//!
//! Shared by the finite and continuous paths:
//!
//! - [`read_chunked`] drains a FIFO in chunks of at most `max_chunk`
//!   elements, either with a fixed timeout per chunk or with one budget
//!   decremented by the measured cost of every chunk.
//! - [`write_backpressured`] feeds a FIFO without ever exceeding the
//!   headroom it reports, erroring when no progress is possible for longer
//!   than the stall limit.
//! - [`deinterleave`] / [`interleave`] convert between the FIFO's
//!   round-robin layout and per-channel sequences.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::channel::Bank;
use crate::error::{ElvisError, Result};
use crate::transport::{FifoHandle, Timeout, Transport, TransportError};

/// Pause between headroom probes while the FIFO is full.
const STALL_BACKOFF: Duration = Duration::from_micros(100);

/// Transfer direction, used to classify timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Analog input (acquisition)
    Input,
    /// Analog output (generation)
    Output,
}

impl Direction {
    /// The timeout error of this direction.
    pub fn timeout_error(self, bank: Bank, timeout: Duration) -> ElvisError {
        match self {
            Self::Input => ElvisError::AcquisitionTimeout { bank, timeout },
            Self::Output => ElvisError::GenerationTimeout { bank, timeout },
        }
    }

    /// Reclassify a transport timeout; other transport errors pass through.
    pub fn map_transport(self, bank: Bank, err: TransportError) -> ElvisError {
        match err {
            TransportError::Timeout { elapsed } => self.timeout_error(bank, elapsed),
            other => ElvisError::Transport(other),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "AI"),
            Self::Output => write!(f, "AO"),
        }
    }
}

/// How a multi-chunk transfer spends its time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Every chunk gets the full timeout
    PerChunk(Timeout),
    /// One timeout for the whole call, decremented chunk by chunk
    Total(Timeout),
}

struct BudgetTracker {
    budget: Budget,
    remaining: Option<Duration>,
    chunks: usize,
}

impl BudgetTracker {
    fn new(budget: Budget) -> Self {
        let remaining = match budget {
            Budget::Total(timeout) => timeout.duration(),
            Budget::PerChunk(_) => None,
        };
        Self {
            budget,
            remaining,
            chunks: 0,
        }
    }

    /// Timeout for the next chunk, or the spent budget if it ran out before
    /// a follow-up chunk.
    fn next_timeout(&self) -> std::result::Result<Timeout, Duration> {
        match self.budget {
            Budget::PerChunk(timeout) => Ok(timeout),
            Budget::Total(Timeout::Infinite) => Ok(Timeout::Infinite),
            Budget::Total(Timeout::After(total)) => {
                let remaining = self.remaining.unwrap_or(Duration::ZERO);
                if self.chunks > 0 && remaining.is_zero() {
                    Err(total)
                } else {
                    Ok(Timeout::After(remaining))
                }
            }
        }
    }

    fn charge(&mut self, cost: Duration) {
        self.chunks += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(cost);
        }
    }
}

/// Read exactly `total` elements from `fifo` in chunks of at most
/// `max_chunk`. A zero-length request issues no read.
pub fn read_chunked(
    transport: &dyn Transport,
    fifo: FifoHandle,
    bank: Bank,
    total: usize,
    max_chunk: usize,
    budget: Budget,
) -> Result<Vec<i32>> {
    if max_chunk == 0 {
        return Err(ElvisError::Config {
            message: "maximum readback size must be non-zero".to_string(),
        });
    }

    let mut values = Vec::with_capacity(total);
    let mut tracker = BudgetTracker::new(budget);
    while values.len() < total {
        let n = (total - values.len()).min(max_chunk);
        let timeout = tracker
            .next_timeout()
            .map_err(|spent| Direction::Input.timeout_error(bank, spent))?;

        let start = Instant::now();
        let chunk = transport
            .fifo_read(fifo, n, timeout)
            .map_err(|e| Direction::Input.map_transport(bank, e))?;
        if chunk.len() != n {
            return Err(ElvisError::Transport(TransportError::Device {
                message: format!("short FIFO read: expected {n} elements, got {}", chunk.len()),
            }));
        }
        tracker.charge(start.elapsed());
        values.extend_from_slice(&chunk);
        trace!(bank = %bank, chunk = n, collected = values.len(), total, "Read FIFO chunk");
    }
    Ok(values)
}

/// Chunk sizing for backpressured writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePlan {
    /// Largest first write
    pub first_chunk: usize,
    /// Largest write after the first
    pub follow_up_chunk: usize,
    /// How long the FIFO may report zero headroom before the write fails
    pub stall_timeout: Duration,
}

/// Write `payload` to `fifo`, never exceeding the reported headroom.
///
/// Returns the number of non-empty writes issued.
pub fn write_backpressured(
    transport: &dyn Transport,
    fifo: FifoHandle,
    bank: Bank,
    payload: &[i32],
    plan: &WritePlan,
    budget: Budget,
) -> Result<usize> {
    if plan.first_chunk == 0 || plan.follow_up_chunk == 0 {
        return Err(ElvisError::Config {
            message: "write chunk sizes must be non-zero".to_string(),
        });
    }

    let mut offset = 0;
    let mut limit = plan.first_chunk;
    let mut tracker = BudgetTracker::new(budget);
    let mut stalled_since: Option<Instant> = None;

    while offset < payload.len() {
        let headroom = transport
            .fifo_write(fifo, &[], Timeout::After(Duration::ZERO))
            .map_err(|e| Direction::Output.map_transport(bank, e))?;

        if headroom == 0 {
            let since = *stalled_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= plan.stall_timeout {
                return Err(Direction::Output.timeout_error(bank, plan.stall_timeout));
            }
            thread::sleep(STALL_BACKOFF);
            continue;
        }
        stalled_since = None;

        let n = (payload.len() - offset).min(limit).min(headroom);
        let timeout = tracker
            .next_timeout()
            .map_err(|spent| Direction::Output.timeout_error(bank, spent))?;

        let start = Instant::now();
        transport
            .fifo_write(fifo, &payload[offset..offset + n], timeout)
            .map_err(|e| Direction::Output.map_transport(bank, e))?;
        tracker.charge(start.elapsed());

        offset += n;
        limit = plan.follow_up_chunk;
        trace!(bank = %bank, chunk = n, headroom, written = offset, total = payload.len(), "Wrote FIFO chunk");
    }

    Ok(tracker.chunks)
}

/// Split round-robin FIFO data into per-slot sequences.
///
/// `stride` is the number of slots per scan; only the first `slots` of each
/// scan are kept, trailing padding slots are discarded.
pub fn deinterleave<T: Copy>(raw: &[T], stride: usize, slots: usize) -> Vec<Vec<T>> {
    if stride == 0 {
        return vec![Vec::new(); slots];
    }
    let scans = raw.len() / stride;
    let mut channels = vec![Vec::with_capacity(scans); slots];
    for scan in raw.chunks_exact(stride) {
        for (channel, &value) in channels.iter_mut().zip(scan) {
            channel.push(value);
        }
    }
    channels
}

/// Merge equal-length per-channel sequences into round-robin order.
pub fn interleave<T: Copy>(rows: &[Vec<T>]) -> Vec<T> {
    let scans = rows.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(scans * rows.len());
    for scan in 0..scans {
        out.extend(rows.iter().filter_map(|row| row.get(scan).copied()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn plan() -> WritePlan {
        WritePlan {
            first_chunk: 10_000,
            follow_up_chunk: 5_000,
            stall_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_deinterleave_discards_padding() {
        let raw = [1, 2, 0, 3, 4, 0, 5, 6, 0];
        assert_eq!(deinterleave(&raw, 3, 2), vec![vec![1, 3, 5], vec![2, 4, 6]]);
    }

    #[test]
    fn test_interleave() {
        let rows = vec![vec![1, 3, 5], vec![2, 4, 6]];
        assert_eq!(interleave(&rows), vec![1, 2, 3, 4, 5, 6]);
        assert!(interleave::<i32>(&[]).is_empty());
    }

    #[test]
    fn test_read_chunked_splits_into_max_chunks() {
        let mock = MockTransport::new();
        let fifo = mock.open_fifo("AI.A.DMA", 100_000).unwrap();

        let values =
            read_chunked(&mock, fifo, Bank::A, 25_000, 10_000, Budget::PerChunk(Timeout::Infinite))
                .unwrap();
        assert_eq!(values.len(), 25_000);
        assert_eq!(mock.fifo_reads("AI.A.DMA"), vec![10_000, 10_000, 5_000]);
    }

    #[test]
    fn test_read_chunked_zero_issues_no_read() {
        let mock = MockTransport::new();
        let fifo = mock.open_fifo("AI.A.DMA", 100).unwrap();
        let values =
            read_chunked(&mock, fifo, Bank::A, 0, 10_000, Budget::Total(Timeout::Infinite))
                .unwrap();
        assert!(values.is_empty());
        assert!(mock.fifo_reads("AI.A.DMA").is_empty());
    }

    #[test]
    fn test_read_budget_expires_between_chunks() {
        let mock = MockTransport::new();
        let fifo = mock.open_fifo("AI.B.DMA", 100_000).unwrap();
        mock.set_read_delay("AI.B.DMA", Duration::from_millis(15));

        let err = read_chunked(
            &mock,
            fifo,
            Bank::B,
            30_000,
            10_000,
            Budget::Total(Timeout::After(Duration::from_millis(20))),
        )
        .unwrap_err();
        assert!(matches!(err, ElvisError::AcquisitionTimeout { bank: Bank::B, .. }));
    }

    #[test]
    fn test_write_respects_shrinking_headroom() {
        let mock = MockTransport::new();
        let fifo = mock.open_fifo("AO.A.DMA", 200_000).unwrap();
        mock.script_headroom("AO.A.DMA", vec![12_000, 3_000, 2_500, 8_000, 8_000]);

        let payload: Vec<i32> = (0..18_000).collect();
        let chunks = write_backpressured(
            &mock,
            fifo,
            Bank::A,
            &payload,
            &plan(),
            Budget::Total(Timeout::Infinite),
        )
        .unwrap();

        assert_eq!(mock.fifo_payload_writes("AO.A.DMA"), vec![10_000, 3_000, 2_500, 2_500]);
        assert_eq!(chunks, 4);
        assert_eq!(mock.fifo_written("AO.A.DMA"), payload);
    }

    #[test]
    fn test_write_stall_times_out() {
        let mock = MockTransport::new();
        let fifo = mock.open_fifo("AO.B.DMA", 200_000).unwrap();
        mock.set_headroom("AO.B.DMA", Some(0));

        let err = write_backpressured(
            &mock,
            fifo,
            Bank::B,
            &[1, 2, 3],
            &plan(),
            Budget::Total(Timeout::Infinite),
        )
        .unwrap_err();
        assert!(matches!(err, ElvisError::GenerationTimeout { bank: Bank::B, .. }));
    }

    #[test]
    fn test_transport_errors_pass_through() {
        let err = Direction::Input.map_transport(
            Bank::A,
            TransportError::Device {
                message: "bus fault".to_string(),
            },
        );
        assert!(matches!(err, ElvisError::Transport(_)));

        let err = Direction::Output.map_transport(
            Bank::A,
            TransportError::Timeout {
                elapsed: Duration::from_millis(3),
            },
        );
        assert!(err.is_timeout());
    }
}
