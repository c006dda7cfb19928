//! Transfer state shared between the issuing driver and the completion
//! interrupt.
//!
//! The driver is the only code that moves the state `Idle → Pending`; the
//! [`CompletionHandle`] handed to the bus port is the only code that moves it
//! `Pending → Idle`. A completion first claims the transfer
//! (`Pending → Completing`), records the outcome, then releases it; a
//! cancel landing in between waits for the release, so a completion can
//! never write its outcome into the next transaction. Both sides touch
//! nothing but two atomics, so the handle is safe to call from interrupt
//! context.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::trace;

use super::{BusError, TwiEvent};

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const COMPLETING: u8 = 2;

const OUTCOME_NONE: u8 = 0;
const OUTCOME_OK: u8 = 1;
const OUTCOME_ADDRESS_NACK: u8 = 2;
const OUTCOME_DATA_NACK: u8 = 3;
const OUTCOME_BUS_TIMEOUT: u8 = 4;

/// Whether a bus transaction is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Pending,
}

#[derive(Debug)]
pub(crate) struct TransferFlag {
    state: AtomicU8,
    outcome: AtomicU8,
}

impl TransferFlag {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            outcome: AtomicU8::new(OUTCOME_NONE),
        }
    }

    pub(crate) fn state(&self) -> TransferState {
        match self.state.load(Ordering::Acquire) {
            PENDING | COMPLETING => TransferState::Pending,
            _ => TransferState::Idle,
        }
    }

    /// Claim the bus for one transaction. Refused while one is pending.
    pub(crate) fn try_begin(&self) -> Result<(), BusError> {
        self.state
            .compare_exchange(IDLE, PENDING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BusError::Busy)?;
        // The port has not been started yet, so no completion can race this.
        self.outcome.store(OUTCOME_NONE, Ordering::Relaxed);
        Ok(())
    }

    /// Drop a pending transaction without a completion (start refused or
    /// wait expired). If a completion is mid-flight, waits for it to land.
    pub(crate) fn cancel(&self) {
        loop {
            match self
                .state
                .compare_exchange(PENDING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Err(COMPLETING) => core::hint::spin_loop(),
                _ => return,
            }
        }
    }

    /// Result of the last completed transaction.
    pub(crate) fn outcome(&self) -> Result<(), BusError> {
        match self.outcome.load(Ordering::Acquire) {
            OUTCOME_OK => Ok(()),
            OUTCOME_ADDRESS_NACK => Err(BusError::AddressNack),
            OUTCOME_DATA_NACK => Err(BusError::DataNack),
            OUTCOME_BUS_TIMEOUT => Err(BusError::BusTimeout),
            _ => Err(BusError::Busy),
        }
    }

    /// Take ownership of the pending transaction for completion. Fails
    /// when nothing is pending.
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record the outcome of a claimed transaction and return to idle.
    fn publish(&self, outcome: u8) {
        self.outcome.store(outcome, Ordering::Release);
        self.state.store(IDLE, Ordering::Release);
    }
}

/// The sanctioned completion callback, handed to the bus port at init.
///
/// Cloning is cheap; every clone completes the same driver's transfers.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    flag: Arc<TransferFlag>,
}

impl CompletionHandle {
    pub(crate) fn new(flag: Arc<TransferFlag>) -> Self {
        Self { flag }
    }

    /// Report a hardware event. ISR-safe (two atomics, no allocation).
    ///
    /// `Done` completes the pending transaction, the fault kinds complete it
    /// with an error, `Progress` is ignored. Events arriving while idle
    /// (late completion after a timeout) are dropped.
    pub fn on_event(&self, event: TwiEvent) {
        let outcome = match event {
            TwiEvent::Done => OUTCOME_OK,
            TwiEvent::AddressNack => OUTCOME_ADDRESS_NACK,
            TwiEvent::DataNack => OUTCOME_DATA_NACK,
            TwiEvent::Timeout => OUTCOME_BUS_TIMEOUT,
            TwiEvent::Progress => return,
        };
        if self.flag.claim() {
            self.flag.publish(outcome);
        } else {
            trace!("twi: {:?} while idle, dropped", event);
        }
    }
}
