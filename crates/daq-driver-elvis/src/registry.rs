//! Per-bank shared DMA state.
//!
//! Both streaming modes share one physical FIFO per bank and direction, but
//! have different lifetime rules:
//!
//! - n-sample users are reference counted; the last one to release drops
//!   the FIFO handle,
//! - at most one continuous stream may run per bank, and only its stop
//!   clears the continuous flag.
//!
//! A [`BankRegistry`] is owned by the device and handed to every session of
//! its direction, so the bookkeeping is explicit rather than global.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::Bank;
use crate::error::{ElvisError, Result};
use crate::transfer::Direction;
use crate::transport::FifoHandle;

#[derive(Debug, Default, Clone, Copy)]
struct BankSlot {
    fifo: Option<FifoHandle>,
    n_sample_users: usize,
    continuous: bool,
}

/// Snapshot of one bank's shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankState {
    /// FIFO handle, open while any user needs it
    pub fifo: Option<FifoHandle>,
    /// Sessions holding an n-sample reference
    pub n_sample_users: usize,
    /// Whether a continuous stream owns the bank
    pub continuous: bool,
}

/// Registry of shared DMA handles for one direction.
#[derive(Debug)]
pub struct BankRegistry {
    direction: Direction,
    slots: Mutex<[BankSlot; 2]>,
}

impl BankRegistry {
    /// Empty registry for `direction`.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            slots: Mutex::new([BankSlot::default(); 2]),
        }
    }

    /// Direction whose FIFOs this registry manages.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Return the bank's FIFO, creating it with `open` on first use.
    pub fn acquire<F>(&self, bank: Bank, open: F) -> Result<FifoHandle>
    where
        F: FnOnce() -> Result<FifoHandle>,
    {
        let mut slots = self.slots.lock();
        let slot = &mut slots[bank.index()];
        if let Some(fifo) = slot.fifo {
            return Ok(fifo);
        }
        let fifo = open()?;
        slot.fifo = Some(fifo);
        info!(direction = %self.direction, bank = %bank, fifo = %fifo, "Opened bank DMA FIFO");
        Ok(fifo)
    }

    /// Count a session as an n-sample user of `bank`.
    pub fn register_n_sample(&self, bank: Bank) {
        let mut slots = self.slots.lock();
        slots[bank.index()].n_sample_users += 1;
        debug!(
            direction = %self.direction,
            bank = %bank,
            users = slots[bank.index()].n_sample_users,
            "Registered n-sample user"
        );
    }

    /// Drop one n-sample reference. Returns `true` if the FIFO handle was
    /// released.
    pub fn release_n_sample(&self, bank: Bank) -> bool {
        let mut slots = self.slots.lock();
        let slot = &mut slots[bank.index()];
        slot.n_sample_users = slot.n_sample_users.saturating_sub(1);
        let released = slot.n_sample_users == 0 && !slot.continuous && slot.fifo.take().is_some();
        if released {
            info!(direction = %self.direction, bank = %bank, "Released bank DMA FIFO");
        }
        released
    }

    /// Mark every bank in `banks` as continuous, or none of them.
    pub fn begin_continuous(&self, banks: &[Bank]) -> Result<()> {
        let mut slots = self.slots.lock();
        if let Some(&bank) = banks.iter().find(|b| slots[b.index()].continuous) {
            return Err(ElvisError::AlreadyStarted { bank });
        }
        for bank in banks {
            slots[bank.index()].continuous = true;
        }
        Ok(())
    }

    /// Clear the continuous flag. Returns `true` if the FIFO handle was
    /// released because no n-sample user remains.
    pub fn end_continuous(&self, bank: Bank) -> bool {
        let mut slots = self.slots.lock();
        let slot = &mut slots[bank.index()];
        slot.continuous = false;
        let released = slot.n_sample_users == 0 && slot.fifo.take().is_some();
        if released {
            info!(direction = %self.direction, bank = %bank, "Released bank DMA FIFO");
        }
        released
    }

    /// Whether a continuous stream owns `bank`.
    pub fn is_continuous(&self, bank: Bank) -> bool {
        self.slots.lock()[bank.index()].continuous
    }

    /// The bank's FIFO, if open.
    pub fn fifo(&self, bank: Bank) -> Option<FifoHandle> {
        self.slots.lock()[bank.index()].fifo
    }

    /// Snapshot of `bank`.
    pub fn state(&self, bank: Bank) -> BankState {
        let slot = self.slots.lock()[bank.index()];
        BankState {
            fifo: slot.fifo,
            n_sample_users: slot.n_sample_users,
            continuous: slot.continuous,
        }
    }
}
