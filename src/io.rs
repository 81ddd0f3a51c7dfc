//! Traits for accessing the shared mailbox and waiting for the coprocessor.
//!
//! The PRU driver maps PRU shared RAM into the host process and exposes the
//! PRU-to-host interrupt as a blocking event.  This module abstracts both:
//!
//! - [`MailboxIo`] - word access to the mailbox
//! - [`CompletionEvent`] - blocking wait for the coprocessor's completion
//!   interrupt
//!
//! # Possible implementations
//!
//! - On an AM335x: [`RamMailboxIo`] over the pointer returned by
//!   `prussdrv_map_prumem()`, and an event wrapping `prussdrv_pru_wait_event()`
//!   and `prussdrv_pru_clear_event()`
//! - For testing: an in-memory mailbox with a software coprocessor, see
//!   [`crate::sim`]
//!
//! # Addressing
//!
//! Mailbox accesses use word indices, not byte addresses.  See
//! [`crate::mailbox`] for the layout.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{Ordering, fence};
use core::time::Duration;

use crate::mailbox::MAILBOX_WORDS;
use crate::{Error, Result};

/// Trait for accessing the mailbox in shared memory.
pub trait MailboxIo {
    /// Single word read
    fn read_u32(&mut self, index: usize) -> Result<u32>;

    /// Single word write
    fn write_u32(&mut self, index: usize, value: u32) -> Result<()>;

    /// Bulk read starting at `index`
    fn read_bulk(&mut self, index: usize, buf: &mut [u32]) -> Result<()> {
        for (i, word) in buf.iter_mut().enumerate() {
            *word = self.read_u32(index + i)?;
        }
        Ok(())
    }

    /// Bulk write starting at `index`
    fn write_bulk(&mut self, index: usize, data: &[u32]) -> Result<()> {
        for (i, word) in data.iter().enumerate() {
            self.write_u32(index + i, *word)?;
        }
        Ok(())
    }

    /// Zero `len` words starting at `index`
    fn fill_zero(&mut self, index: usize, len: usize) -> Result<()> {
        for i in index..index + len {
            self.write_u32(i, 0)?;
        }
        Ok(())
    }
}

/// Trait for waiting on the coprocessor's completion interrupt.
pub trait CompletionEvent {
    /// Block until the coprocessor signals completion, then clear the event
    /// so it can fire again.
    ///
    /// There is no timeout.  A coprocessor that never signals hangs the
    /// caller.
    fn wait(&mut self) -> Result<()>;

    /// Block until the coprocessor signals completion or `timeout` expires.
    ///
    /// Returns `Ok(true)` if completion was observed (and cleared), and
    /// `Ok(false)` if the deadline passed first.  In the latter case the
    /// coprocessor may still complete later.
    ///
    /// The default implementation ignores the deadline and waits forever, for
    /// drivers that cannot do better.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let _ = timeout;
        self.wait()?;
        Ok(true)
    }
}

impl<T: MailboxIo + ?Sized> MailboxIo for &mut T {
    fn read_u32(&mut self, index: usize) -> Result<u32> {
        (**self).read_u32(index)
    }

    fn write_u32(&mut self, index: usize, value: u32) -> Result<()> {
        (**self).write_u32(index, value)
    }

    fn read_bulk(&mut self, index: usize, buf: &mut [u32]) -> Result<()> {
        (**self).read_bulk(index, buf)
    }

    fn write_bulk(&mut self, index: usize, data: &[u32]) -> Result<()> {
        (**self).write_bulk(index, data)
    }

    fn fill_zero(&mut self, index: usize, len: usize) -> Result<()> {
        (**self).fill_zero(index, len)
    }
}

impl<T: CompletionEvent + ?Sized> CompletionEvent for &mut T {
    fn wait(&mut self) -> Result<()> {
        (**self).wait()
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        (**self).wait_timeout(timeout)
    }
}

/// Mailbox I/O implementation using direct access to mapped shared RAM.
///
/// All accesses are volatile.  Each write is preceded by a release fence, so
/// the coprocessor sees the arguments before the opcode, and each read by an
/// acquire fence, so results are not read ahead of the completion wait.
pub struct RamMailboxIo {
    base: *mut u32,
}

// The pointer refers to device memory shared with the PRU, not to host
// memory with thread affinity.
unsafe impl Send for RamMailboxIo {}

impl RamMailboxIo {
    /// Create a new RamMailboxIo instance over mapped shared RAM.
    ///
    /// # Safety
    ///
    /// `base` must be valid for volatile reads and writes of
    /// [`MAILBOX_WORDS`] 32-bit words, 4-byte aligned, and remain mapped for
    /// the lifetime of the returned object.
    pub unsafe fn new(base: *mut u32) -> Result<Self> {
        if base.is_null() {
            return Err(Error::Driver("shared RAM not mapped".into()));
        }
        if base as usize % core::mem::align_of::<u32>() != 0 {
            return Err(Error::Driver(format!(
                "shared RAM at {:p} not word aligned",
                base
            )));
        }
        Ok(Self { base })
    }

    fn check_index(index: usize) -> Result<()> {
        if index >= MAILBOX_WORDS {
            Err(Error::InvalidParameter(format!(
                "mailbox word {index} out of range"
            )))
        } else {
            Ok(())
        }
    }
}

impl MailboxIo for RamMailboxIo {
    fn read_u32(&mut self, index: usize) -> Result<u32> {
        Self::check_index(index)?;
        fence(Ordering::Acquire);
        Ok(unsafe { core::ptr::read_volatile(self.base.add(index)) })
    }

    fn write_u32(&mut self, index: usize, value: u32) -> Result<()> {
        Self::check_index(index)?;
        fence(Ordering::Release);
        unsafe { core::ptr::write_volatile(self.base.add(index), value) };
        Ok(())
    }
}
