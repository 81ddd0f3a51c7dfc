//! Software coprocessor - emulates the PRU ISP firmware and an AVR target in
//! memory.
//!
//! Useful for testing and development without an AM335x.  The mailbox lives
//! in host memory and commands execute when the host waits for completion,
//! which is indistinguishable from the real firmware as far as the lock-step
//! protocol is concerned.
//!
//! The emulation also checks the protocol: any mailbox write made while a
//! command is outstanding is counted as a violation.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::command::Opcode;
use crate::driver::PruDriver;
use crate::io::{CompletionEvent, MailboxIo};
use crate::mailbox::{
    self, ARG2_WORD, COMMAND_WORD, IDLE, MAILBOX_WORDS, MailboxHeader,
    PAYLOAD_CAPACITY, PAYLOAD_WORD,
};
use crate::{Error, Result, SessionStage};

/// Configuration for the emulated target
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Flash size in bytes
    pub flash_size: usize,
    /// Signature bytes, indexed by signature address
    pub signature: Vec<u8>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            flash_size: 32 * 1024,
            // ATmega328P
            signature: vec![0x1E, 0x95, 0x0F],
        }
    }
}

#[derive(Debug)]
struct SimState {
    words: Vec<u32>,
    flash: Vec<u8>,
    signature: Vec<u8>,
    progmode: bool,
    outstanding: Option<Opcode>,
    stalled: bool,
    stall_next: bool,
    violations: usize,
    writes: usize,
    history: Vec<Opcode>,
    last_issued: Vec<u32>,
}

impl SimState {
    fn write(&mut self, index: usize, value: u32) -> Result<()> {
        check_index(index)?;
        self.writes += 1;
        if let Some(opcode) = self.outstanding {
            warn!("Mailbox word {index} written while {opcode:?} outstanding");
            self.violations += 1;
        }
        self.words[index] = value;

        if index == COMMAND_WORD && value != IDLE {
            let opcode = Opcode::try_from(value)?;
            self.outstanding = Some(opcode);
            self.stalled = core::mem::take(&mut self.stall_next);
            self.history.push(opcode);
            self.last_issued = self.words.clone();
        }
        Ok(())
    }

    // Run the outstanding command, if it is allowed to complete.  Returns
    // whether the completion interrupt has been raised.
    fn complete(&mut self) -> Result<bool> {
        let Some(opcode) = self.outstanding else {
            return Err(Error::Driver("wait with no command outstanding".into()));
        };
        if self.stalled {
            return Ok(false);
        }

        self.execute(opcode);
        self.words[COMMAND_WORD] = IDLE;
        self.outstanding = None;
        Ok(true)
    }

    fn execute(&mut self, opcode: Opcode) {
        let header = MailboxHeader::from_words(&self.words);
        let address = header.address as usize;
        trace!("PRU executing {opcode:?} address {address:#x}");
        match opcode {
            Opcode::EnterProgmode => self.progmode = true,
            Opcode::LeaveProgmode => self.progmode = false,
            Opcode::ReadSignature => {
                let value = self.signature.get(address).copied().unwrap_or(0xFF);
                self.words[ARG2_WORD] = value as u32;
            }
            Opcode::ChipErase => self.flash.fill(0xFF),
            Opcode::ProgramFlash => {
                let len = (header.arg3 as usize).min(PAYLOAD_CAPACITY);
                let end = (address + len).min(self.flash.len());
                let start = address.min(end);
                let payload = &self.words[PAYLOAD_WORD..PAYLOAD_WORD + (end - start)];
                mailbox::narrow(payload, &mut self.flash[start..end]);
            }
            Opcode::ReadFlash => {
                let len = header.arg2 as usize;
                let end = (address + len).min(self.flash.len());
                let start = address.min(end);
                mailbox::widen(&self.flash[start..end], &mut self.words[PAYLOAD_WORD..]);
            }
        }
    }
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

/// Emulated coprocessor and target.  Clones share the same state.
#[derive(Debug, Clone)]
pub struct SimCoprocessor {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimCoprocessor {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimCoprocessor {
    /// Create a new emulated coprocessor with erased flash
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                words: vec![0; MAILBOX_WORDS],
                flash: vec![0xFF; config.flash_size],
                signature: config.signature,
                progmode: false,
                outstanding: None,
                stalled: false,
                stall_next: false,
                violations: 0,
                writes: 0,
                history: Vec::new(),
                last_issued: vec![0; MAILBOX_WORDS],
            })),
        }
    }

    /// Mailbox accessor and completion event, as a driver would return them
    pub fn endpoints(&self) -> (SimMailbox, SimEvent) {
        (
            SimMailbox {
                sim: self.clone(),
            },
            SimEvent {
                sim: self.clone(),
            },
        )
    }

    /// Copy of the emulated flash
    pub fn flash(&self) -> Vec<u8> {
        self.lock().flash.clone()
    }

    /// Overwrite emulated flash from `address`
    pub fn load_flash(&self, address: usize, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let size = state.flash.len();
        let dest = address
            .checked_add(data.len())
            .and_then(|end| state.flash.get_mut(address..end))
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "{} bytes at {address:#x} outside emulated flash of {size} bytes",
                    data.len()
                ))
            })?;
        dest.copy_from_slice(data);
        Ok(())
    }

    /// Current mailbox contents
    pub fn words(&self) -> Vec<u32> {
        self.lock().words.clone()
    }

    /// Mailbox contents at the moment the last opcode was written
    pub fn last_issued(&self) -> Vec<u32> {
        self.lock().last_issued.clone()
    }

    /// Opcodes issued so far
    pub fn history(&self) -> Vec<Opcode> {
        self.lock().history.clone()
    }

    /// Number of mailbox writes so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Number of writes made while a command was outstanding
    pub fn violations(&self) -> usize {
        self.lock().violations
    }

    /// Whether the target is in programming mode
    pub fn progmode(&self) -> bool {
        self.lock().progmode
    }

    /// Hold the next command's completion until [`Self::release()`]
    pub fn stall_next(&self) {
        self.lock().stall_next = true;
    }

    /// Allow a stalled command to complete
    pub fn release(&self) {
        self.lock().stalled = false;
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mailbox accessor for a [`SimCoprocessor`]
#[derive(Debug)]
pub struct SimMailbox {
    sim: SimCoprocessor,
}

impl MailboxIo for SimMailbox {
    fn read_u32(&mut self, index: usize) -> Result<u32> {
        check_index(index)?;
        Ok(self.sim.lock().words[index])
    }

    fn write_u32(&mut self, index: usize, value: u32) -> Result<()> {
        self.sim.lock().write(index, value)
    }
}

/// Completion event for a [`SimCoprocessor`]
#[derive(Debug)]
pub struct SimEvent {
    sim: SimCoprocessor,
}

impl CompletionEvent for SimEvent {
    fn wait(&mut self) -> Result<()> {
        // A stalled command would never complete - report it rather than
        // hang the caller.
        if self.sim.lock().complete()? {
            Ok(())
        } else {
            Err(Error::Driver("coprocessor never signalled completion".into()))
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let completed = self.sim.lock().complete()?;
        if !completed {
            std::thread::sleep(timeout);
        }
        Ok(completed)
    }
}

/// Driver for a [`SimCoprocessor`], with failure injection.
#[derive(Debug, Default)]
pub struct SimDriver {
    sim: SimCoprocessor,
    fail_at: Option<SessionStage>,
    calls: Vec<&'static str>,
    data_path: Option<PathBuf>,
    text_path: Option<PathBuf>,
    start_addr: Option<u32>,
}

impl SimDriver {
    pub fn new(sim: SimCoprocessor) -> Self {
        Self {
            sim,
            ..Default::default()
        }
    }

    /// Make the given session stage fail
    pub fn fail_at(mut self, stage: SessionStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// The emulated coprocessor
    pub fn sim(&self) -> &SimCoprocessor {
        &self.sim
    }

    /// Driver calls made so far, in order
    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    /// Data image loaded, if any
    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    /// Text image started, if any
    pub fn text_path(&self) -> Option<&Path> {
        self.text_path.as_deref()
    }

    /// Firmware entry point used, if started
    pub fn start_addr(&self) -> Option<u32> {
        self.start_addr
    }

    fn call(&mut self, name: &'static str, stage: SessionStage) -> Result<()> {
        self.calls.push(name);
        if self.fail_at == Some(stage) {
            Err(Error::Driver(format!("{name} failed")))
        } else {
            Ok(())
        }
    }
}

impl PruDriver for SimDriver {
    type Mailbox = SimMailbox;
    type Event = SimEvent;

    fn init(&mut self) -> Result<()> {
        self.call("init", SessionStage::DriverInit)
    }

    fn open(&mut self, _host_event: u32) -> Result<()> {
        self.call("open", SessionStage::DeviceOpen)
    }

    fn intc_init(&mut self) -> Result<()> {
        self.call("intc_init", SessionStage::InterruptInit)
    }

    fn load_data(&mut self, _pru: u32, path: &Path) -> Result<()> {
        self.call("load_data", SessionStage::LoadData)?;
        self.data_path = Some(path.to_path_buf());
        Ok(())
    }

    fn exec_program_at(&mut self, _pru: u32, path: &Path, start_addr: u32) -> Result<()> {
        self.call("exec_program_at", SessionStage::ExecProgram)?;
        self.text_path = Some(path.to_path_buf());
        self.start_addr = Some(start_addr);
        Ok(())
    }

    fn map_mailbox(&mut self) -> Result<(SimMailbox, SimEvent)> {
        self.call("map_mailbox", SessionStage::MapMailbox)?;
        Ok(self.sim.endpoints())
    }

    fn disable(&mut self, _pru: u32) -> Result<()> {
        self.calls.push("disable");
        Ok(())
    }

    fn exit(&mut self) {
        self.calls.push("exit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::ADDRESS_WORD;

    #[test]
    fn test_executes_on_wait() {
        let sim = SimCoprocessor::default();
        let (mut io, mut event) = sim.endpoints();

        io.write_u32(ADDRESS_WORD, 1).unwrap();
        io.write_u32(COMMAND_WORD, Opcode::ReadSignature as u32).unwrap();
        // Nothing happens until the host waits
        assert_eq!(io.read_u32(ARG2_WORD).unwrap(), 0);

        event.wait().unwrap();
        assert_eq!(io.read_u32(ARG2_WORD).unwrap(), 0x95);
        assert_eq!(io.read_u32(COMMAND_WORD).unwrap(), IDLE);
        assert_eq!(sim.violations(), 0);
    }

    #[test]
    fn test_flags_write_while_outstanding() {
        let sim = SimCoprocessor::default();
        let (mut io, mut event) = sim.endpoints();

        io.write_u32(COMMAND_WORD, Opcode::ChipErase as u32).unwrap();
        io.write_u32(ADDRESS_WORD, 0).unwrap();
        assert_eq!(sim.violations(), 1);

        event.wait().unwrap();
        assert!(event.wait().is_err());
    }

    #[test]
    fn test_stall_and_release() {
        let sim = SimCoprocessor::default();
        let (mut io, mut event) = sim.endpoints();

        sim.stall_next();
        io.write_u32(COMMAND_WORD, Opcode::ChipErase as u32).unwrap();
        assert!(!event.wait_timeout(Duration::from_millis(1)).unwrap());
        assert!(event.wait().is_err());

        sim.release();
        assert!(event.wait_timeout(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let sim = SimCoprocessor::default();
        let (mut io, _) = sim.endpoints();
        assert!(io.write_u32(COMMAND_WORD, 0x42).is_err());
        assert!(io.write_u32(MAILBOX_WORDS, 0).is_err());
    }

    #[test]
    fn test_load_flash_bounds() {
        let sim = SimCoprocessor::new(SimConfig {
            flash_size: 256,
            ..Default::default()
        });
        sim.load_flash(252, &[1, 2, 3, 4]).unwrap();
        assert_eq!(sim.flash()[252..], [1, 2, 3, 4]);

        assert!(matches!(
            sim.load_flash(253, &[0; 4]),
            Err(Error::InvalidParameter(_))
        ));
        assert!(sim.load_flash(usize::MAX, &[0]).is_err());
        assert_eq!(sim.writes(), 0);
    }
}
