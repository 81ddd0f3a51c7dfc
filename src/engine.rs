//! Mailbox protocol engine - drives commands through the mailbox to the
//! coprocessor and blocks until each completes.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::command::{Command, Opcode};
use crate::io::{CompletionEvent, MailboxIo};
use crate::mailbox::{
    self, ARG2_WORD, COMMAND_WORD, MAILBOX_WORDS, PAYLOAD_CAPACITY, PAYLOAD_WORD,
};
use crate::region::{MemoryRegion, RegionKind};
use crate::{Error, Result};

/// Where the current (or last) mailbox transaction has got to
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started
    #[default]
    Idle,
    /// Arguments and payload are in the mailbox, opcode not yet written
    ArgsWritten,
    /// Opcode written - the coprocessor owns the mailbox
    CommandIssued,
    /// Waiting for the completion interrupt
    AwaitingInterrupt,
    /// Completion observed, results may be read
    Completed,
}

impl TransactionState {
    /// Whether the coprocessor may still be using the mailbox
    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            TransactionState::CommandIssued | TransactionState::AwaitingInterrupt
        )
    }
}

// Everything needed to run a transaction, held under the engine's lock.
struct Link<I, E> {
    io: I,
    event: E,
    state: TransactionState,
    pending: Option<Opcode>,
}

impl<I: MailboxIo, E: CompletionEvent> Link<I, E> {
    fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.state = TransactionState::AwaitingInterrupt;
        trace!("Waiting for interrupt from PRU");
        let completed = match timeout {
            Some(timeout) => self.event.wait_timeout(timeout)?,
            None => {
                self.event.wait()?;
                true
            }
        };
        if !completed {
            warn!(
                "Timed out after {timeout:?} waiting for {:?} to complete",
                self.pending
            );
            return Err(Error::Timeout);
        }
        self.state = TransactionState::Completed;
        self.pending = None;
        Ok(())
    }

    // A previous transaction was abandoned after its command was issued.  Its
    // completion must be consumed before the mailbox can be reused.
    fn settle(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.state.in_flight() {
            debug!(
                "Draining completion of abandoned {:?} before next command",
                self.pending
            );
            self.wait(timeout)?;
        }
        Ok(())
    }

    fn issue(&mut self, cmd: &Command<'_>) -> Result<()> {
        if cmd.clears_mailbox() {
            self.io.fill_zero(COMMAND_WORD, MAILBOX_WORDS)?;
        }

        if let Some(data) = cmd.payload() {
            trace!("Payload: {data:02X?}");
            let mut words = [0u32; PAYLOAD_CAPACITY];
            mailbox::widen(data, &mut words);
            self.io.write_bulk(PAYLOAD_WORD, &words[..data.len()])?;
        }

        for (index, value) in cmd.arguments() {
            self.io.write_u32(index, value)?;
        }
        self.state = TransactionState::ArgsWritten;

        // Writing the opcode hands the mailbox to the coprocessor
        let opcode = cmd.opcode();
        self.io.write_u32(COMMAND_WORD, opcode as u32)?;
        self.state = TransactionState::CommandIssued;
        self.pending = Some(opcode);

        Ok(())
    }
}

/// The mailbox protocol engine.
///
/// Owns the mailbox accessor and the completion event.  Every operation
/// takes the engine's lock, writes its arguments, writes the opcode, waits
/// for the completion interrupt and reads back any results, all before the
/// lock is released.  This guarantees only one command is ever outstanding,
/// however many threads share the engine.
///
/// By default the completion wait has no timeout.  See
/// [`Self::with_timeout()`].
pub struct Engine<I, E> {
    link: Mutex<Link<I, E>>,
    timeout: Option<Duration>,
}

impl<I: MailboxIo, E: CompletionEvent> Engine<I, E> {
    /// Create a new engine.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`MailboxIo`] to access the mailbox
    /// - `event` - Object implementing [`CompletionEvent`] to wait for the
    ///   coprocessor
    pub fn new(io: I, event: E) -> Self {
        Self {
            link: Mutex::new(Link {
                io,
                event,
                state: TransactionState::Idle,
                pending: None,
            }),
            timeout: None,
        }
    }

    /// Set a deadline on each completion wait.
    ///
    /// When a wait times out the operation fails with [`Error::Timeout`] and
    /// the mailbox contents are undefined, as the coprocessor may still be
    /// executing.  The next operation first waits for that completion before
    /// touching the mailbox.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The completion deadline, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Current transaction state
    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    /// Release the mailbox accessor and completion event
    pub fn into_inner(self) -> (I, E) {
        let link = self
            .link
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        (link.io, link.event)
    }

    /// Run one complete transaction: issue `cmd`, wait for completion, then
    /// call `complete` with the mailbox to collect results.
    pub fn transact<T>(
        &self,
        cmd: &Command<'_>,
        complete: impl FnOnce(&mut I) -> Result<T>,
    ) -> Result<T> {
        cmd.validate()?;

        let mut link = self.lock();
        link.settle(self.timeout)?;
        link.state = TransactionState::Idle;

        debug!("Issuing {cmd:?}");
        link.issue(cmd)?;
        link.wait(self.timeout)?;

        complete(&mut link.io)
    }

    /// Erase the whole chip.
    ///
    /// The coprocessor reports no status for this command, so this succeeds
    /// whenever the completion interrupt arrives.
    pub fn chip_erase(&self) -> Result<()> {
        debug!("Chip erase");
        self.transact(&Command::ChipErase, |_| Ok(()))
    }

    /// Ask the coprocessor to enter programming mode.
    pub fn enter_progmode(&self) -> Result<()> {
        self.transact(&Command::EnterProgmode, |_| Ok(()))
    }

    /// Ask the coprocessor to leave programming mode.
    pub fn leave_progmode(&self) -> Result<()> {
        self.transact(&Command::LeaveProgmode, |_| Ok(()))
    }

    /// Read the signature byte at `address`.
    pub fn read_signature(&self, address: u32) -> Result<u8> {
        self.transact(&Command::ReadSignature { address }, |io| {
            let value = io.read_u32(ARG2_WORD)?;
            debug!("Signature byte {address:#x} = {value:#04X}");
            Ok((value & 0xFF) as u8)
        })
    }

    /// Read `buf.len()` bytes of flash starting at `address`.  At most
    /// [`PAYLOAD_CAPACITY`] bytes can be read at once.
    pub fn read_flash(&self, address: u32, buf: &mut [u8]) -> Result<()> {
        let cmd = Command::ReadFlash {
            address,
            len: buf.len(),
        };
        self.transact(&cmd, |io| {
            let mut words = [0u32; PAYLOAD_CAPACITY];
            let words = &mut words[..buf.len()];
            io.read_bulk(PAYLOAD_WORD, words)?;
            mailbox::narrow(words, buf);
            trace!("Read flash at {address:#x}: {buf:02X?}");
            Ok(())
        })
    }

    /// Program `data` into flash at `address`.  At most
    /// [`PAYLOAD_CAPACITY`] bytes can be written at once.
    pub fn program_flash(&self, address: u32, page_size: u32, data: &[u8]) -> Result<()> {
        let cmd = Command::ProgramFlash {
            address,
            page_size,
            data,
        };
        self.transact(&cmd, |_| Ok(()))
    }

    /// Read a single byte from a region.  Only the signature region supports
    /// this.
    pub fn read_byte(&self, region: &MemoryRegion<'_>, address: u32) -> Result<u8> {
        debug!("read_byte(.., {}, {address:#x}, ...)", region.name);
        match region.kind() {
            Some(RegionKind::Signature) => self.read_signature(address),
            _ => Err(unsupported(region, "Read byte from")),
        }
    }

    /// Write a single byte to a region.  Never supported by the coprocessor.
    pub fn write_byte(&self, region: &MemoryRegion<'_>, address: u32, value: u8) -> Result<()> {
        error!(
            "Write byte {value:#04X} to memory '{}' at {address:#x} is not supported",
            region.name
        );
        Err(Error::WriteNotSupported(region.name.to_string()))
    }

    /// Read `byte_count` bytes from `address` in a region into the region's
    /// buffer at the same offset.  Only flash is supported.
    pub fn read_region(
        &self,
        region: &mut MemoryRegion<'_>,
        address: u32,
        byte_count: usize,
    ) -> Result<()> {
        debug!(
            "paged_load(.., {}, {address:#x}, {byte_count}, {}...)",
            region.name, region.page_size
        );
        if region.kind() != Some(RegionKind::Flash) {
            return Err(unsupported(region, "Read from"));
        }
        let range = buffer_range(region, address, byte_count)?;
        self.read_flash(address, &mut region.buf[range])
    }

    /// Write `byte_count` bytes from the region's buffer at `address` to the
    /// same address in the region.  Only flash is supported.
    pub fn write_region(
        &self,
        region: &MemoryRegion<'_>,
        address: u32,
        byte_count: usize,
        page_size: u32,
    ) -> Result<()> {
        debug!(
            "paged_write(.., {}, {address:#x}, {byte_count}, {page_size}...)",
            region.name
        );
        if region.kind() != Some(RegionKind::Flash) {
            return Err(unsupported(region, "Write to"));
        }
        let range = buffer_range(region, address, byte_count)?;
        self.program_flash(address, page_size, &region.buf[range])
    }

    fn lock(&self) -> MutexGuard<'_, Link<I, E>> {
        // A panic mid-transaction leaves `state` recording how far it got,
        // which `settle()` handles, so a poisoned lock is still usable.
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unsupported(region: &MemoryRegion<'_>, what: &str) -> Error {
    error!("{what} memory '{}' is not supported", region.name);
    Error::UnsupportedRegion(region.name.to_string())
}

// Checks a transfer fits in both the mailbox and the region buffer, before
// anything is written to the mailbox.
fn buffer_range(
    region: &MemoryRegion<'_>,
    address: u32,
    byte_count: usize,
) -> Result<core::ops::Range<usize>> {
    if byte_count > PAYLOAD_CAPACITY {
        error!(
            "Transfer of {byte_count} bytes exceeds mailbox payload of {PAYLOAD_CAPACITY} bytes"
        );
        return Err(Error::PayloadTooLarge {
            len: byte_count,
            max: PAYLOAD_CAPACITY,
        });
    }
    let start = address as usize;
    match start.checked_add(byte_count) {
        Some(end) if end <= region.size() => Ok(start..end),
        _ => {
            error!(
                "Range {address:#x}+{byte_count} outside '{}' buffer of {} bytes",
                region.name,
                region.size()
            );
            Err(Error::BufferTooSmall {
                addr: address,
                len: byte_count,
                size: region.size(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mailbox which records every write, with a completion event that
    // either fires or times out.
    #[derive(Default)]
    struct Recorder {
        words: Vec<u32>,
        writes: Vec<(usize, u32)>,
        panic_on_read: bool,
        // Words the coprocessor fills in when an opcode is written
        results: Vec<(usize, u32)>,
    }

    impl MailboxIo for Recorder {
        fn read_u32(&mut self, index: usize) -> Result<u32> {
            if self.panic_on_read {
                panic!("mailbox read of word {index} failed");
            }
            Ok(self.words[index])
        }

        fn write_u32(&mut self, index: usize, value: u32) -> Result<()> {
            self.writes.push((index, value));
            self.words[index] = value;
            if index == COMMAND_WORD && value != 0 {
                for (i, word) in &self.results {
                    self.words[*i] = *word;
                }
            }
            Ok(())
        }
    }

    struct Event {
        fire: Vec<bool>,
        waits: usize,
    }

    impl CompletionEvent for Event {
        fn wait(&mut self) -> Result<()> {
            self.waits += 1;
            Ok(())
        }

        fn wait_timeout(&mut self, _timeout: Duration) -> Result<bool> {
            self.waits += 1;
            Ok(self.fire.pop().unwrap_or(true))
        }
    }

    fn engine(fire: Vec<bool>) -> Engine<Recorder, Event> {
        let io = Recorder {
            words: vec![0; MAILBOX_WORDS],
            ..Default::default()
        };
        Engine::new(io, Event { fire, waits: 0 })
    }

    #[test]
    fn test_chip_erase_writes_only_opcode() {
        let engine = engine(vec![]);
        engine.chip_erase().unwrap();
        assert_eq!(engine.state(), TransactionState::Completed);

        let (io, event) = engine.into_inner();
        assert_eq!(io.writes, vec![(0, 0x13)]);
        assert_eq!(event.waits, 1);
    }

    #[test]
    fn test_read_signature_wiring() {
        let engine = engine(vec![]);
        // Pre-load a result word with junk in the upper bits
        engine.lock().io.words[2] = 0xABCD_EF1E;
        assert_eq!(engine.read_signature(1).unwrap(), 0x1E);

        let (io, _) = engine.into_inner();
        assert_eq!(io.writes, vec![(1, 1), (0, 0x12)]);
    }

    #[test]
    fn test_opcode_written_last() {
        let engine = engine(vec![]);
        engine.program_flash(0x80, 64, &[1, 2, 3]).unwrap();

        let (io, _) = engine.into_inner();
        assert_eq!(io.writes.last(), Some(&(0, 0x14)));
        // Only the zero-fill touches word 0 before the opcode
        let opcode_writes: Vec<_> = io.writes.iter().filter(|(i, v)| *i == 0 && *v != 0).collect();
        assert_eq!(opcode_writes.len(), 1);
    }

    #[test]
    fn test_timeout_then_drain() {
        // First wait times out, the drain and the next command's wait succeed
        let engine = engine(vec![true, true, false]).with_timeout(Some(Duration::from_millis(5)));

        assert_eq!(engine.chip_erase(), Err(Error::Timeout));
        assert_eq!(engine.state(), TransactionState::AwaitingInterrupt);

        engine.read_signature(0).unwrap();
        assert_eq!(engine.state(), TransactionState::Completed);

        let (io, event) = engine.into_inner();
        assert_eq!(event.waits, 3);
        // No mailbox writes happened between the timed-out erase and the drain
        assert_eq!(io.writes, vec![(0, 0x13), (1, 0), (0, 0x12)]);
    }

    #[test]
    fn test_drain_timeout_blocks_new_command() {
        let engine = engine(vec![false, false]).with_timeout(Some(Duration::from_millis(5)));
        assert_eq!(engine.chip_erase(), Err(Error::Timeout));
        assert_eq!(engine.chip_erase(), Err(Error::Timeout));

        let (io, _) = engine.into_inner();
        assert_eq!(io.writes, vec![(0, 0x13)]);
    }

    #[test]
    fn test_oversized_transfer_rejected_before_writes() {
        let engine = engine(vec![]);
        let mut buf = [0u8; 512];
        assert!(matches!(
            engine.read_flash(0, &mut buf),
            Err(Error::PayloadTooLarge { len: 512, .. })
        ));

        let (io, event) = engine.into_inner();
        assert!(io.writes.is_empty());
        assert_eq!(event.waits, 0);
    }

    #[test]
    fn test_poisoned_lock_recovered() {
        let engine = engine(vec![]);
        engine.lock().io.panic_on_read = true;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.read_signature(0)
        }));
        assert!(result.is_err());
        assert!(engine.link.is_poisoned());

        engine.lock().io.panic_on_read = false;
        engine.chip_erase().unwrap();
        assert_eq!(engine.state(), TransactionState::Completed);

        let (io, _) = engine.into_inner();
        assert_eq!(io.writes.last(), Some(&(0, 0x13)));
    }

    #[test]
    fn test_transfer_ending_at_buffer_end() {
        let engine = engine(vec![]);
        engine.lock().io.results = [0x1A1, 0x2B2, 0x3C3, 0x4D4]
            .into_iter()
            .enumerate()
            .map(|(i, word)| (PAYLOAD_WORD + i, word))
            .collect();

        let mut buf = [0u8; 8];
        let mut region = MemoryRegion::new("flash", 4, &mut buf);
        engine.read_region(&mut region, 4, 4).unwrap();
        assert_eq!(*region.buf, [0, 0, 0, 0, 0xA1, 0xB2, 0xC3, 0xD4]);

        engine.lock().io.results.clear();
        engine.write_region(&region, 4, 4, 4).unwrap();
        let (io, _) = engine.into_inner();
        assert_eq!(io.writes.last(), Some(&(0, 0x14)));
        assert_eq!(io.words[PAYLOAD_WORD..PAYLOAD_WORD + 4], [0xA1, 0xB2, 0xC3, 0xD4]);
        assert_eq!(io.words[1..4], [4, 4, 4]);

        // One byte further is out of range
        let engine = self::engine(vec![]);
        let mut buf = [0u8; 8];
        let mut region = MemoryRegion::new("flash", 4, &mut buf);
        assert!(matches!(
            engine.read_region(&mut region, 5, 4),
            Err(Error::BufferTooSmall { addr: 5, len: 4, size: 8 })
        ));
    }
}
