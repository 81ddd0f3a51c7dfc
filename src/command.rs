//! Coprocessor command set.
//!
//! On the wire a command is an opcode in word 0 plus arguments in words 1-3,
//! whose meaning depends on the opcode.  [`Command`] carries each command's
//! arguments explicitly, and knows how to lay them out in the mailbox.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::mailbox::{ADDRESS_WORD, ARG2_WORD, ARG3_WORD, PAYLOAD_CAPACITY};
use crate::{Error, Result};

/// Command opcodes understood by the PRU firmware
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    EnterProgmode = 0x10,
    LeaveProgmode = 0x11,
    ReadSignature = 0x12,
    ChipErase = 0x13,
    ProgramFlash = 0x14,
    ReadFlash = 0x15,
}

impl TryFrom<u32> for Opcode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x10 => Ok(Opcode::EnterProgmode),
            0x11 => Ok(Opcode::LeaveProgmode),
            0x12 => Ok(Opcode::ReadSignature),
            0x13 => Ok(Opcode::ChipErase),
            0x14 => Ok(Opcode::ProgramFlash),
            0x15 => Ok(Opcode::ReadFlash),
            _ => Err(Error::InvalidParameter(format!(
                "unknown opcode {value:#04X}"
            ))),
        }
    }
}

/// A command, with its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Put the target into programming mode
    EnterProgmode,
    /// Take the target out of programming mode
    LeaveProgmode,
    /// Read one signature byte.  The result is returned in word 2.
    ReadSignature { address: u32 },
    /// Erase the whole chip
    ChipErase,
    /// Program `data` into flash at `address`
    ProgramFlash {
        address: u32,
        page_size: u32,
        data: &'a [u8],
    },
    /// Read `len` bytes of flash from `address` into the payload area
    ReadFlash { address: u32, len: usize },
}

impl Command<'_> {
    /// Opcode for this command
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::EnterProgmode => Opcode::EnterProgmode,
            Command::LeaveProgmode => Opcode::LeaveProgmode,
            Command::ReadSignature { .. } => Opcode::ReadSignature,
            Command::ChipErase => Opcode::ChipErase,
            Command::ProgramFlash { .. } => Opcode::ProgramFlash,
            Command::ReadFlash { .. } => Opcode::ReadFlash,
        }
    }

    /// Check the command fits in the mailbox.
    pub fn validate(&self) -> Result<()> {
        let len = match self {
            Command::ProgramFlash { data, .. } => data.len(),
            Command::ReadFlash { len, .. } => *len,
            _ => 0,
        };
        if len > PAYLOAD_CAPACITY {
            return Err(Error::PayloadTooLarge {
                len,
                max: PAYLOAD_CAPACITY,
            });
        }
        Ok(())
    }

    /// Whether the mailbox must be cleared before this command's arguments
    /// are written, so no stale payload from a previous transfer survives.
    pub fn clears_mailbox(&self) -> bool {
        matches!(
            self,
            Command::ProgramFlash { .. } | Command::ReadFlash { .. }
        )
    }

    /// Argument words for this command, as `(word index, value)`, in the
    /// order they are written.  The opcode itself is not included.
    pub fn arguments(&self) -> impl Iterator<Item = (usize, u32)> {
        let args: [(usize, Option<u32>); 3] = match *self {
            Command::ReadSignature { address } => [
                (ADDRESS_WORD, Some(address)),
                (ARG2_WORD, None),
                (ARG3_WORD, None),
            ],
            Command::ProgramFlash {
                address,
                page_size,
                data,
            } => [
                (ADDRESS_WORD, Some(address)),
                (ARG2_WORD, Some(page_size)),
                (ARG3_WORD, Some(data.len() as u32)),
            ],
            Command::ReadFlash { address, len } => [
                (ADDRESS_WORD, Some(address)),
                (ARG2_WORD, Some(len as u32)),
                (ARG3_WORD, None),
            ],
            Command::EnterProgmode | Command::LeaveProgmode | Command::ChipErase => {
                [(ADDRESS_WORD, None), (ARG2_WORD, None), (ARG3_WORD, None)]
            }
        };
        args.into_iter()
            .filter_map(|(word, value)| value.map(|value| (word, value)))
    }

    /// Payload bytes to send with this command, if any
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Command::ProgramFlash { data, .. } => Some(*data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::EnterProgmode as u32, 0x10);
        assert_eq!(Opcode::LeaveProgmode as u32, 0x11);
        assert_eq!(Opcode::ReadSignature as u32, 0x12);
        assert_eq!(Opcode::ChipErase as u32, 0x13);
        assert_eq!(Opcode::ProgramFlash as u32, 0x14);
        assert_eq!(Opcode::ReadFlash as u32, 0x15);

        assert_eq!(Opcode::try_from(0x14), Ok(Opcode::ProgramFlash));
        assert!(Opcode::try_from(0).is_err());
        assert!(Opcode::try_from(0x16).is_err());
    }

    #[test]
    fn test_program_flash_arguments() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let cmd = Command::ProgramFlash {
            address: 0x100,
            page_size: 64,
            data: &data,
        };
        let args: Vec<_> = cmd.arguments().collect();
        assert_eq!(args, vec![(1, 0x100), (2, 64), (3, 4)]);
        assert_eq!(cmd.payload(), Some(&data[..]));
        assert!(cmd.clears_mailbox());
    }

    #[test]
    fn test_word_two_reuse() {
        // Word 2 is the byte count for reads, but page size for writes
        let read = Command::ReadFlash {
            address: 0,
            len: 128,
        };
        assert_eq!(read.arguments().collect::<Vec<_>>(), vec![(1, 0), (2, 128)]);

        let sig = Command::ReadSignature { address: 2 };
        assert_eq!(sig.arguments().collect::<Vec<_>>(), vec![(1, 2)]);
        assert!(!sig.clears_mailbox());
    }

    #[test]
    fn test_no_argument_commands() {
        for cmd in [
            Command::ChipErase,
            Command::EnterProgmode,
            Command::LeaveProgmode,
        ] {
            assert_eq!(cmd.arguments().count(), 0);
            assert_eq!(cmd.payload(), None);
            assert!(!cmd.clears_mailbox());
        }
    }

    #[test]
    fn test_validate_payload_capacity() {
        let data = [0u8; PAYLOAD_CAPACITY + 1];
        let too_big = Command::ProgramFlash {
            address: 0,
            page_size: 128,
            data: &data,
        };
        assert_eq!(
            too_big.validate(),
            Err(Error::PayloadTooLarge { len: 257, max: 256 })
        );

        let full = Command::ReadFlash {
            address: 0,
            len: PAYLOAD_CAPACITY,
        };
        assert!(full.validate().is_ok());
        assert!(Command::ReadFlash { address: 0, len: 0 }.validate().is_ok());
    }
}
