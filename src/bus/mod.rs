//! Blocking two-wire (TWI / I²C) transaction driver.
//!
//! The hardware primitive is asynchronous: a transfer is started, and an
//! interrupt later reports completion through a [`CompletionHandle`]. The
//! driver turns that into a synchronous API by marking the transfer pending,
//! starting it, and polling the transfer state until the completion callback
//! clears it, bounded by [`BusConfig::transfer_timeout_ms`].
//!
//! ```text
//!  caller ──▶ TwiDriver ──start_tx/start_rx──▶ TwiPort (hardware)
//!               │  ▲                                 │
//!               │  └──── TransferFlag ◀── on_event ──┘  (ISR)
//!               └── Clock (bounded wait)
//! ```
//!
//! ## Single caller
//!
//! Every operation takes `&mut self`, so only one logical caller can drive a
//! bus at a time. The transfer state is additionally claimed with a
//! compare-exchange; issuing while a transfer is pending returns
//! [`BusError::Busy`] instead of corrupting the state.
//!
//! ## Stop conditions
//!
//! `write_byte` and the register-select phase of both reads end with a stop
//! condition. `write_bytes` leaves the bus open so the caller can chain a
//! further transaction. The `embedded_hal` [`I2c`] implementation follows the
//! `embedded-hal` contract instead: adjacent operations of the same kind form
//! one transfer, repeated start between transfers, stop after the last one.
//! An empty write there is an address-only transfer (device probe).
//!
//! Sensor drivers reach the bus through [`RegisterBus`]; on this driver that
//! is `write_byte` and `read_bytes`.

mod registers;
mod transfer;

use core::fmt;
use std::sync::Arc;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use log::{debug, error, info, warn};

use crate::app::ports::Clock;
use crate::config::BusConfig;
use crate::error::Error;

pub use registers::{HalBus, RegisterBus};
pub use transfer::{CompletionHandle, TransferState};
use transfer::TransferFlag;

/// Longest transfer the hardware length register accepts.
pub const MAX_TRANSFER_LEN: usize = u8::MAX as usize;

// ───────────────────────────────────────────────────────────────
// Hardware events and errors
// ───────────────────────────────────────────────────────────────

/// Event kinds reported by the bus interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwiEvent {
    /// The transfer finished.
    Done,
    /// The addressed device did not acknowledge its address.
    AddressNack,
    /// The device stopped acknowledging data bytes.
    DataNack,
    /// The peripheral gave up on the transfer (SCL held low).
    Timeout,
    /// Intermediate progress report; not a completion.
    Progress,
}

/// Errors from bus transactions. Every bus operation returns one of these
/// rather than a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// A transaction is already pending on this bus.
    Busy,
    /// The hardware refused to start the transfer (driver return code).
    Rejected(i32),
    /// No device acknowledged the address.
    AddressNack,
    /// The device NACKed a data byte.
    DataNack,
    /// The peripheral reported a bus timeout.
    BusTimeout,
    /// No completion arrived within the configured wait bound.
    Timeout,
    /// Zero-length transfer requested.
    EmptyTransfer,
    /// Transfer longer than [`MAX_TRANSFER_LEN`].
    TooLong(usize),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "transfer already pending"),
            Self::Rejected(rc) => write!(f, "transfer start rejected (rc={})", rc),
            Self::AddressNack => write!(f, "address not acknowledged"),
            Self::DataNack => write!(f, "data not acknowledged"),
            Self::BusTimeout => write!(f, "peripheral bus timeout"),
            Self::Timeout => write!(f, "transfer timed out"),
            Self::EmptyTransfer => write!(f, "empty transfer"),
            Self::TooLong(n) => write!(f, "transfer of {} bytes exceeds {}", n, MAX_TRANSFER_LEN),
        }
    }
}

impl embedded_hal::i2c::Error for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Self::BusTimeout => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Port trait (hardware collaborator)
// ───────────────────────────────────────────────────────────────

/// The asynchronous bus primitive. Implementations start transfers and
/// report their completion later through the [`CompletionHandle`] received
/// in [`init`](TwiPort::init).
///
/// Return codes are the platform driver's raw error codes.
pub trait TwiPort {
    /// Configure pins, clock, interrupt priority and sensor power; keep the
    /// completion handle for the interrupt handler.
    fn init(&mut self, config: &BusConfig, completion: CompletionHandle) -> Result<(), i32>;

    /// Enable the peripheral.
    fn enable(&mut self);

    /// Start writing `bytes` to `address`; end with a stop condition when
    /// `stop` is set.
    fn start_tx(&mut self, address: u8, bytes: &[u8], stop: bool) -> Result<(), i32>;

    /// Start reading `buf.len()` bytes from `address`. `buf` stays borrowed
    /// until the driver has observed completion or called [`abort`](TwiPort::abort).
    fn start_rx(&mut self, address: u8, buf: &mut [u8]) -> Result<(), i32>;

    /// Stop any transfer in progress and release the bus lines.
    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────

/// Synchronous transaction driver over an interrupt-completed [`TwiPort`].
pub struct TwiDriver<P: TwiPort, C: Clock> {
    port: P,
    clock: C,
    flag: Arc<TransferFlag>,
    timeout_us: u64,
}

impl<P: TwiPort, C: Clock> TwiDriver<P, C> {
    /// Bring the bus up. A port that fails to initialise is reported as
    /// [`Error::Init`]; the firmware treats that as fatal.
    pub fn init(mut port: P, clock: C, config: &BusConfig) -> Result<Self, Error> {
        let flag = Arc::new(TransferFlag::new());
        if let Err(rc) = port.init(config, CompletionHandle::new(Arc::clone(&flag))) {
            error!("twi: init failed (rc={})", rc);
            return Err(Error::Init("TWI init failed"));
        }
        port.enable();
        info!(
            "twi: enabled (SDA={} SCL={} {} Hz, irq prio {}, timeout {} ms)",
            config.sda_pin,
            config.scl_pin,
            config.frequency.hz(),
            config.interrupt_priority,
            config.transfer_timeout_ms,
        );
        Ok(Self {
            port,
            clock,
            flag,
            timeout_us: u64::from(config.transfer_timeout_ms) * 1000,
        })
    }

    /// Current transfer state. `Idle` whenever no call is in progress.
    pub fn transfer_state(&self) -> TransferState {
        self.flag.state()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Write `value` into `register` of the device at `address`.
    pub fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<(), BusError> {
        self.transmit(address, &[register, value], true)
    }

    /// Write `data` to `address` without a trailing stop condition.
    pub fn write_bytes(&mut self, address: u8, data: &[u8]) -> Result<(), BusError> {
        self.transmit(address, data, false)
    }

    /// Read one register.
    pub fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.read_bytes(address, register, &mut value)?;
        Ok(value[0])
    }

    /// Read `dest.len()` consecutive registers starting at `register`.
    ///
    /// The register-select phase is checked before the read phase is
    /// started; on failure nothing is read and `dest` is left untouched.
    pub fn read_bytes(&mut self, address: u8, register: u8, dest: &mut [u8]) -> Result<(), BusError> {
        check_len(dest.len())?;
        if let Err(e) = self.transmit(address, &[register], true) {
            debug!("twi: select 0x{:02X}/0x{:02X} failed: {}", address, register, e);
            return Err(e);
        }
        self.receive(address, dest)
    }

    fn transmit(&mut self, address: u8, bytes: &[u8], stop: bool) -> Result<(), BusError> {
        check_len(bytes.len())?;
        self.start_write(address, bytes, stop)
    }

    /// Write phase without the length check; empty `bytes` addresses the
    /// device and sends no data.
    fn start_write(&mut self, address: u8, bytes: &[u8], stop: bool) -> Result<(), BusError> {
        self.flag.try_begin()?;
        if let Err(rc) = self.port.start_tx(address, bytes, stop) {
            self.flag.cancel();
            return Err(BusError::Rejected(rc));
        }
        self.wait_for_completion()
    }

    fn receive(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        check_len(buf.len())?;
        self.flag.try_begin()?;
        if let Err(rc) = self.port.start_rx(address, buf) {
            self.flag.cancel();
            return Err(BusError::Rejected(rc));
        }
        self.wait_for_completion()
    }

    fn wait_for_completion(&mut self) -> Result<(), BusError> {
        let start = self.clock.now_us();
        while self.flag.state() == TransferState::Pending {
            if self.clock.now_us().wrapping_sub(start) >= self.timeout_us {
                // Abort first so the hardware no longer owns any buffer.
                self.port.abort();
                self.flag.cancel();
                warn!("twi: no completion after {} us, transfer aborted", self.timeout_us);
                return Err(BusError::Timeout);
            }
            core::hint::spin_loop();
        }
        self.flag.outcome()
    }
}

fn check_len(len: usize) -> Result<(), BusError> {
    match len {
        0 => Err(BusError::EmptyTransfer),
        n if n > MAX_TRANSFER_LEN => Err(BusError::TooLong(n)),
        _ => Ok(()),
    }
}

// ───────────────────────────────────────────────────────────────
// embedded-hal
// ───────────────────────────────────────────────────────────────

impl<P: TwiPort, C: Clock> ErrorType for TwiDriver<P, C> {
    type Error = BusError;
}

impl<P: TwiPort, C: Clock> I2c for TwiDriver<P, C> {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let mut start = 0;
        while start < operations.len() {
            let writing = is_write(&operations[start]);
            let end = operations[start..]
                .iter()
                .position(|op| is_write(op) != writing)
                .map_or(operations.len(), |n| start + n);
            let last = end == operations.len();
            let run = &mut operations[start..end];
            if writing {
                self.write_run(address, run, last)?;
            } else {
                self.read_run(address, run)?;
            }
            start = end;
        }
        Ok(())
    }
}

impl<P: TwiPort, C: Clock> TwiDriver<P, C> {
    /// Send a run of adjacent writes as one transfer.
    fn write_run(&mut self, address: u8, run: &[Operation<'_>], stop: bool) -> Result<(), BusError> {
        let mut frame: heapless::Vec<u8, MAX_TRANSFER_LEN> = heapless::Vec::new();
        for op in run {
            if let Operation::Write(bytes) = op {
                frame
                    .extend_from_slice(bytes)
                    .map_err(|_| BusError::TooLong(run_len(run)))?;
            }
        }
        self.start_write(address, &frame, stop)
    }

    /// Fill a run of adjacent reads from one transfer.
    fn read_run(&mut self, address: u8, run: &mut [Operation<'_>]) -> Result<(), BusError> {
        let total = run_len(run);
        if total == 0 {
            return Ok(());
        }
        check_len(total)?;
        let mut frame = [0u8; MAX_TRANSFER_LEN];
        self.receive(address, &mut frame[..total])?;

        let mut offset = 0;
        for op in run.iter_mut() {
            if let Operation::Read(buf) = op {
                let len = buf.len();
                buf.copy_from_slice(&frame[offset..offset + len]);
                offset += len;
            }
        }
        Ok(())
    }
}

fn is_write(op: &Operation<'_>) -> bool {
    matches!(op, Operation::Write(_))
}

fn run_len(run: &[Operation<'_>]) -> usize {
    run.iter()
        .map(|op| match op {
            Operation::Write(bytes) => bytes.len(),
            Operation::Read(buf) => buf.len(),
        })
        .sum()
}
