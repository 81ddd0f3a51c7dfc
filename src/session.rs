//! An open programming session.
//!
//! Opening a session brings up the PRU driver, loads and starts the ISP
//! firmware, and maps the mailbox.  The session owns the resulting
//! [`Engine`], so only the session holder can issue commands.  Closing the
//! session halts the PRU, releases the driver and drops the mailbox.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::PrussConfig;
use crate::driver::{PRU_EVTOUT_0, PRU_NUM, PruDriver};
use crate::engine::Engine;
use crate::{Error, Result, SessionStage};

/// Programming session over a [`PruDriver`]
pub struct Session<D: PruDriver> {
    engine: Engine<D::Mailbox, D::Event>,
}

impl<D: PruDriver> Session<D> {
    /// Open a session.
    ///
    /// On failure the driver is released (if it got as far as being
    /// initialized) and the error names the stage that failed.
    pub fn open(driver: &mut D, config: &PrussConfig) -> Result<Self> {
        debug!("Open programmer");

        stage(SessionStage::DriverInit, driver.init())?;

        match Self::start(driver, config) {
            Ok(engine) => {
                info!(
                    "PRU{PRU_NUM} running {} from {:#06X}",
                    config.text_path.display(),
                    config.start_addr
                );
                Ok(Self {
                    engine: engine.with_timeout(config.timeout),
                })
            }
            Err(e) => {
                driver.exit();
                Err(e)
            }
        }
    }

    fn start(driver: &mut D, config: &PrussConfig) -> Result<Engine<D::Mailbox, D::Event>> {
        stage(SessionStage::DeviceOpen, driver.open(PRU_EVTOUT_0))?;
        stage(SessionStage::InterruptInit, driver.intc_init())?;
        stage(
            SessionStage::LoadData,
            driver.load_data(PRU_NUM, &config.data_path),
        )?;
        stage(
            SessionStage::ExecProgram,
            driver.exec_program_at(PRU_NUM, &config.text_path, config.start_addr),
        )?;
        let (mailbox, event) = stage(SessionStage::MapMailbox, driver.map_mailbox())?;
        Ok(Engine::new(mailbox, event))
    }

    /// The mailbox protocol engine for this session
    pub fn engine(&self) -> &Engine<D::Mailbox, D::Event> {
        &self.engine
    }

    /// Halt the PRU and release the driver.
    pub fn close(self, driver: &mut D) {
        debug!("Close programmer");
        if let Err(e) = driver.disable(PRU_NUM) {
            warn!("Failed to disable PRU{PRU_NUM}: {e}");
        }
        driver.exit();
        // The mailbox mapping is gone once the driver has exited
        drop(self.engine);
    }
}

fn stage<T>(stage: SessionStage, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        error!("{stage} failed: {e}");
        let reason = match e {
            Error::Driver(reason) => reason,
            other => other.to_string(),
        };
        Error::SessionInit { stage, reason }
    })
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::{SimCoprocessor, SimDriver};

    #[test]
    fn test_open_sequence() {
        let mut driver = SimDriver::new(SimCoprocessor::default());
        let config = PrussConfig::default();
        let session = Session::open(&mut driver, &config).unwrap();

        assert_eq!(
            driver.calls(),
            [
                "init",
                "open",
                "intc_init",
                "load_data",
                "exec_program_at",
                "map_mailbox"
            ]
        );
        assert_eq!(driver.data_path(), Some(config.data_path.as_path()));
        assert_eq!(driver.text_path(), Some(config.text_path.as_path()));
        assert_eq!(driver.start_addr(), Some(0x0c20));

        session.close(&mut driver);
        assert_eq!(&driver.calls()[6..], ["disable", "exit"]);
    }

    #[test]
    fn test_open_failure_names_stage() {
        let stages = [
            SessionStage::DriverInit,
            SessionStage::DeviceOpen,
            SessionStage::InterruptInit,
            SessionStage::LoadData,
            SessionStage::ExecProgram,
            SessionStage::MapMailbox,
        ];
        for failing in stages {
            let mut driver = SimDriver::new(SimCoprocessor::default()).fail_at(failing);
            match Session::open(&mut driver, &PrussConfig::default()) {
                Err(Error::SessionInit { stage, .. }) => assert_eq!(stage, failing),
                Err(e) => panic!("unexpected error {e}"),
                Ok(_) => panic!("open succeeded despite {failing} failure"),
            }

            // Nothing after the failing stage is attempted, and the driver is
            // released unless init itself failed
            let calls = driver.calls();
            if failing == SessionStage::DriverInit {
                assert_eq!(calls, ["init"]);
            } else {
                assert_eq!(calls.last(), Some(&"exit"));
                assert!(!calls.contains(&"disable"));
            }
        }
    }

    #[test]
    fn test_timeout_applied() {
        let mut driver = SimDriver::new(SimCoprocessor::default());
        let mut config = PrussConfig::default();
        config.apply_ext_params(&["timeout=100"]).unwrap();

        let session = Session::open(&mut driver, &config).unwrap();
        assert_eq!(
            session.engine().timeout(),
            Some(std::time::Duration::from_millis(100))
        );
        session.close(&mut driver);
    }
}
