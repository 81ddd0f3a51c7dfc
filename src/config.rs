//! Programmer configuration.
//!
//! Configuration comes from avrdude-style extended parameters, `-x name=value`:
//!
//! - `data=<path>` - PRU data RAM image
//! - `text=<path>` - PRU instruction RAM image
//! - `timeout=<ms>` - deadline for each coprocessor command, 0 for none

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use std::path::PathBuf;
use std::time::Duration;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::driver::START_ADDR;
use crate::{Error, Result};

/// Default location of the PRU data image
pub const DEFAULT_DATA_PATH: &str = "/usr/share/avrdude/pruss/data.bin";

/// Default location of the PRU text image
pub const DEFAULT_TEXT_PATH: &str = "/usr/share/avrdude/pruss/text.bin";

/// PRUSS programmer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrussConfig {
    /// PRU data RAM image
    pub data_path: PathBuf,
    /// PRU instruction RAM image
    pub text_path: PathBuf,
    /// Firmware entry point
    pub start_addr: u32,
    /// Deadline for each coprocessor command.  `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PrussConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            text_path: PathBuf::from(DEFAULT_TEXT_PATH),
            start_addr: START_ADDR,
            timeout: None,
        }
    }
}

impl PrussConfig {
    /// Apply extended parameters.
    ///
    /// Every parameter is processed, even after an invalid one.  Returns the
    /// first error, if any parameter was rejected.
    pub fn apply_ext_params<S: AsRef<str>>(&mut self, params: &[S]) -> Result<()> {
        let mut result = Ok(());
        for param in params {
            if let Err(e) = self.apply_ext_param(param.as_ref()) {
                error!("{e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn apply_ext_param(&mut self, param: &str) -> Result<()> {
        let invalid = || Error::InvalidParameter(format!("invalid '{param}'"));

        if let Some(path) = param.strip_prefix("data=") {
            self.data_path = image_path(path).ok_or_else(invalid)?;
            debug!("Data image set to {}", self.data_path.display());
        } else if let Some(path) = param.strip_prefix("text=") {
            self.text_path = image_path(path).ok_or_else(invalid)?;
            debug!("Text image set to {}", self.text_path.display());
        } else if let Some(ms) = param.strip_prefix("timeout=") {
            let ms: u64 = ms.trim().parse().map_err(|_| invalid())?;
            self.timeout = (ms > 0).then(|| Duration::from_millis(ms));
            debug!("Command timeout set to {:?}", self.timeout);
        } else {
            return Err(Error::InvalidParameter(format!(
                "invalid extended parameter '{param}'"
            )));
        }
        Ok(())
    }
}

// Paths are taken up to the first whitespace, and must not be empty.
fn image_path(value: &str) -> Option<PathBuf> {
    value.split_whitespace().next().map(PathBuf::from)
}
