//! Programmer registration contract, and the PRUSS programmer.
//!
//! A programmer framework (such as avrdude) drives every programmer through
//! the same table of operations, [`Programmer`].  [`PrussProgrammer`]
//! implements it by running each operation through the mailbox protocol
//! engine of an open [`Session`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::PrussConfig;
use crate::driver::PruDriver;
use crate::engine::Engine;
use crate::region::MemoryRegion;
use crate::session::Session;
use crate::{Error, Result};

/// Operations a programmer provides to the framework.
///
/// Operations which a programmer has no use for must still succeed (or
/// fail) as documented, as the framework calls them unconditionally.
pub trait Programmer {
    /// Short programmer type name
    fn type_name(&self) -> &'static str;

    /// Human readable description
    fn description(&self) -> &'static str;

    /// Prepare private state, before any other operation
    fn setup(&mut self);

    /// Release private state, after all other operations
    fn teardown(&mut self);

    /// Handle extended (`-x`) parameters.  Called before [`Self::open()`].
    fn parse_ext_params(&mut self, params: &[&str]) -> Result<()>;

    /// Connect to the programmer hardware
    fn open(&mut self, port: &str) -> Result<()>;

    /// Disconnect from the programmer hardware
    fn close(&mut self);

    /// Prepare the target for programming
    fn initialize(&mut self) -> Result<()>;

    /// Show programmer-specific information
    fn display(&self, prefix: &str);

    /// Enable the programmer's outputs
    fn enable(&mut self);

    /// Disable the programmer's outputs
    fn disable(&mut self);

    /// Put the target into programming mode
    fn program_enable(&mut self) -> Result<()>;

    /// Erase the whole target chip
    fn chip_erase(&mut self) -> Result<()>;

    /// Send a raw 4-byte ISP command
    fn cmd(&mut self, cmd: &[u8; 4], res: &mut [u8; 4]) -> Result<()>;

    /// Read a single byte from a memory region
    fn read_byte(&mut self, mem: &MemoryRegion<'_>, addr: u32) -> Result<u8>;

    /// Write a single byte to a memory region
    fn write_byte(&mut self, mem: &MemoryRegion<'_>, addr: u32, value: u8) -> Result<()>;

    /// Read `n_bytes` at `addr` into `mem.buf[addr..]`
    fn paged_load(
        &mut self,
        mem: &mut MemoryRegion<'_>,
        page_size: u32,
        addr: u32,
        n_bytes: usize,
    ) -> Result<()>;

    /// Write `n_bytes` from `mem.buf[addr..]` to `addr`
    fn paged_write(
        &mut self,
        mem: &MemoryRegion<'_>,
        page_size: u32,
        addr: u32,
        n_bytes: usize,
    ) -> Result<()>;
}

/// AVR ISP programmer using a PRU coprocessor on a TI AM335x.
///
/// Example usage:
///
/// ```rust
/// use pruss_isp::programmer::{Programmer, PrussProgrammer};
/// use pruss_isp::region::MemoryRegion;
/// use pruss_isp::sim::{SimCoprocessor, SimDriver};
///
/// let mut pgm = PrussProgrammer::new(SimDriver::new(SimCoprocessor::default()));
/// pgm.setup();
/// pgm.open("").unwrap();
///
/// let mut sig = [0u8; 3];
/// let region = MemoryRegion::new("signature", 0, &mut sig);
/// assert_eq!(pgm.read_byte(&region, 0).unwrap(), 0x1E);
///
/// pgm.close();
/// pgm.teardown();
/// ```
pub struct PrussProgrammer<D: PruDriver> {
    driver: D,
    config: PrussConfig,
    session: Option<Session<D>>,
}

impl<D: PruDriver> PrussProgrammer<D> {
    /// Programmer type name
    pub const TYPE: &'static str = "PRUSS";

    /// Programmer description
    pub const DESCRIPTION: &'static str = "TI AM335x PRUSS Programmer";

    /// Create a new programmer over `driver`, with default configuration
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            config: PrussConfig::default(),
            session: None,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &PrussConfig {
        &self.config
    }

    /// The PRU driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Whether a session is open
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// The protocol engine of the open session
    pub fn engine(&self) -> Result<&Engine<D::Mailbox, D::Event>> {
        match &self.session {
            Some(session) => Ok(session.engine()),
            None => {
                error!("Programmer is not open");
                Err(Error::NotOpen)
            }
        }
    }
}

impl<D: PruDriver> Programmer for PrussProgrammer<D> {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn description(&self) -> &'static str {
        Self::DESCRIPTION
    }

    fn setup(&mut self) {
        self.config = PrussConfig::default();
    }

    fn teardown(&mut self) {
        self.close();
        self.config = PrussConfig::default();
    }

    fn parse_ext_params(&mut self, params: &[&str]) -> Result<()> {
        if self.is_open() {
            warn!("Extended parameters take effect on next open");
        }
        self.config.apply_ext_params(params)
    }

    fn open(&mut self, port: &str) -> Result<()> {
        if !port.is_empty() {
            debug!("Ignoring port {port}");
        }
        self.close();
        let session = Session::open(&mut self.driver, &self.config)?;
        self.session = Some(session);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close(&mut self.driver);
        }
    }

    fn initialize(&mut self) -> Result<()> {
        self.program_enable()
    }

    fn display(&self, prefix: &str) {
        info!(
            "{prefix}{} (data {}, text {})",
            Self::DESCRIPTION,
            self.config.data_path.display(),
            self.config.text_path.display()
        );
    }

    fn enable(&mut self) {}

    fn disable(&mut self) {}

    // Programming mode is never requested from the firmware
    fn program_enable(&mut self) -> Result<()> {
        Ok(())
    }

    fn chip_erase(&mut self) -> Result<()> {
        self.engine()?.chip_erase()
    }

    fn cmd(&mut self, _cmd: &[u8; 4], _res: &mut [u8; 4]) -> Result<()> {
        Ok(())
    }

    fn read_byte(&mut self, mem: &MemoryRegion<'_>, addr: u32) -> Result<u8> {
        self.engine()?.read_byte(mem, addr)
    }

    fn write_byte(&mut self, mem: &MemoryRegion<'_>, addr: u32, value: u8) -> Result<()> {
        // Refused even with no session open
        match &self.session {
            Some(session) => session.engine().write_byte(mem, addr, value),
            None => {
                error!("Write byte to memory '{}' is not supported", mem.name);
                Err(Error::WriteNotSupported(mem.name.to_string()))
            }
        }
    }

    fn paged_load(
        &mut self,
        mem: &mut MemoryRegion<'_>,
        _page_size: u32,
        addr: u32,
        n_bytes: usize,
    ) -> Result<()> {
        self.engine()?.read_region(mem, addr, n_bytes)
    }

    fn paged_write(
        &mut self,
        mem: &MemoryRegion<'_>,
        page_size: u32,
        addr: u32,
        n_bytes: usize,
    ) -> Result<()> {
        self.engine()?.write_region(mem, addr, n_bytes, page_size)
    }
}

impl<D: PruDriver> Drop for PrussProgrammer<D> {
    fn drop(&mut self) {
        self.close();
    }
}
