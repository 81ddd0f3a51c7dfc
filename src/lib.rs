//! Host-side AVR in-system programmer driving a PRU coprocessor over a
//! shared-memory mailbox.
//!
//! The TI AM335x PRU subsystem contains small real-time cores which can bit-bang the
//! AVR ISP waveform far more reliably than a Linux process.  This crate is the host
//! half of such a programmer: it places commands into a fixed-layout mailbox in PRU
//! shared RAM, lets the PRU firmware execute them, and waits for the PRU's completion
//! interrupt before reading back any results.
//!
//! ## Architecture
//!
//! Assumes a Host (Linux process) and Coprocessor (PRU0 running the ISP firmware)
//! architecture.
//!
//! There is a single mailbox, used in both directions:
//! - The host writes arguments, then the command opcode into word 0.  Writing the
//!   opcode is the "go" signal.
//! - The coprocessor executes the command, writes any results back into the same
//!   mailbox and raises a host interrupt.
//!
//! The mailbox carries no sequence numbers or checksums.  Correctness relies on
//! strict lock-step: write, wait, read.  Only one command may be outstanding at a
//! time, which the [`engine::Engine`] enforces with a lock held across the whole
//! transaction.
//!
//! Payload bytes are transferred one per 32-bit mailbox word, in the low 8 bits, as
//! that is what the PRU firmware expects.
//!
//! ## Modules
//!
//! - [`mailbox`] - Mailbox wire layout and word offsets
//! - [`command`] - The coprocessor command set, as a typed enum and as raw opcodes
//! - [`io`] - Traits for accessing the mailbox words and waiting for completion,
//!   plus a volatile implementation over mapped shared RAM
//! - [`engine`] - The mailbox protocol engine
//! - [`driver`] - Trait for the PRU driver which loads firmware and maps shared RAM
//! - [`session`] - An open programming session, owning the engine
//! - [`config`] - Programmer configuration, built from extended parameters
//! - [`region`] - Target memory regions handed in by the caller
//! - [`programmer`] - The registration contract and the PRUSS programmer itself
//! - [`sim`] - A software coprocessor, for testing without hardware (`sim` feature)
//!
//! ## Getting Started
//!
//! **Host setup**:
//! 1. Implement [`driver::PruDriver`] on top of your PRU driver (typically
//!    `prussdrv`/UIO)
//! 2. Create a [`programmer::PrussProgrammer`] with that driver, and call
//!    [`programmer::Programmer::setup()`]
//! 3. Optionally pass extended parameters (`data=`, `text=`, `timeout=`) to
//!    [`programmer::Programmer::parse_ext_params()`]
//! 4. [`programmer::Programmer::open()`] loads and starts the firmware and maps the
//!    mailbox
//! 5. Use the read/write/erase operations, then [`programmer::Programmer::close()`]
//!
//! Alternatively, if you already have a mapped mailbox and a completion event, build
//! an [`engine::Engine`] directly and use it without the programmer layer.
//!
//! ## Features
//!
//! No features are enabled by default.
//!
//! Optional features:
//! - `sim` - Include the [`sim`] software coprocessor and driver.  Enabled
//!   automatically for this crate's own tests.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod command;
pub mod config;
pub mod driver;
pub mod engine;
pub mod io;
pub mod mailbox;
pub mod programmer;
pub mod region;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;

use thiserror::Error;

/// Stage of opening a programming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// Initializing the PRU driver
    DriverInit,
    /// Opening the host event device
    DeviceOpen,
    /// Initializing the PRU interrupt controller
    InterruptInit,
    /// Loading the firmware data image
    LoadData,
    /// Loading and starting the firmware text image
    ExecProgram,
    /// Mapping the shared RAM mailbox
    MapMailbox,
}

impl core::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SessionStage::DriverInit => "PRU initialization",
            SessionStage::DeviceOpen => "PRU device open",
            SessionStage::InterruptInit => "PRU interrupts initialization",
            SessionStage::LoadData => "PRU data image load",
            SessionStage::ExecProgram => "PRU program start",
            SessionStage::MapMailbox => "shared RAM mapping",
        };
        f.write_str(s)
    }
}

/// Programmer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Memory region not handled by this operation
    #[error("Memory '{0}' is not supported by this operation")]
    UnsupportedRegion(String),

    /// Single byte writes are not implemented by the coprocessor
    #[error("Write byte to memory '{0}' is not supported")]
    WriteNotSupported(String),

    /// Opening the session failed
    #[error("{stage} failed: {reason}")]
    SessionInit { stage: SessionStage, reason: String },

    /// Transfer larger than the mailbox payload area
    #[error("Transfer of {len} bytes exceeds mailbox payload of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// Region buffer too small for the requested address range
    #[error("Range {addr:#06X}+{len} is outside a {size} byte buffer")]
    BufferTooSmall { addr: u32, len: usize, size: usize },

    /// Timed out waiting for the coprocessor's completion interrupt
    #[error("Timeout waiting for coprocessor completion")]
    Timeout,

    /// No session is open
    #[error("Programmer is not open")]
    NotOpen,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error reported by the PRU driver or mailbox accessor
    #[error("Driver error: {0}")]
    Driver(String),
}

/// Type to represent the result of a programmer operation
pub type Result<T> = core::result::Result<T, Error>;
