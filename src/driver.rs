//! PRU driver abstraction.
//!
//! The host talks to the PRU subsystem through a kernel driver (UIO) and a
//! userspace library (`prussdrv`).  This trait captures the handful of calls
//! a programming session needs, so the session logic can be tested without
//! the hardware.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::path::Path;

use crate::Result;
use crate::io::{CompletionEvent, MailboxIo};

/// PRU core that runs the ISP firmware
pub const PRU_NUM: u32 = 0;

/// Entry point of the ISP firmware in PRU instruction RAM
pub const START_ADDR: u32 = 0x0000_0c20;

/// Host event the firmware raises on completion (PRU_EVTOUT_0)
pub const PRU_EVTOUT_0: u32 = 0;

/// Interface to the PRU subsystem driver.
///
/// Calls are made in the order they are declared when a session is opened,
/// and [`Self::disable()`] then [`Self::exit()`] when it is closed.
pub trait PruDriver {
    /// Mailbox accessor returned once shared RAM is mapped
    type Mailbox: MailboxIo;

    /// Completion event for the opened host event
    type Event: CompletionEvent;

    /// Initialize the driver library
    fn init(&mut self) -> Result<()>;

    /// Open the device for host event `host_event`
    fn open(&mut self, host_event: u32) -> Result<()>;

    /// Initialize the PRU interrupt controller with the default mapping
    fn intc_init(&mut self) -> Result<()>;

    /// Load a data image into `pru`'s data RAM
    fn load_data(&mut self, pru: u32, path: &Path) -> Result<()>;

    /// Load a text image into `pru`'s instruction RAM and start it at
    /// `start_addr`
    fn exec_program_at(&mut self, pru: u32, path: &Path, start_addr: u32) -> Result<()>;

    /// Map PRU shared RAM and return the mailbox and completion event
    fn map_mailbox(&mut self) -> Result<(Self::Mailbox, Self::Event)>;

    /// Halt `pru`
    fn disable(&mut self, pru: u32) -> Result<()>;

    /// Release all driver resources
    fn exit(&mut self);
}
