//! Mailbox wire layout shared between the Host and the PRU firmware.
//!
//! The mailbox lives at the start of PRU shared data RAM.  It consists of a
//! fixed header followed by a payload area.  Every field, including each
//! payload byte, occupies a full 32-bit word.
//!
//! See [`crate`] for a description of the protocol.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Header of the mailbox.  Word meanings depend on the command in progress -
/// see [`crate::command::Command`] for the per-command encoding.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MailboxHeader {
    /// Command opcode, 0 when idle.  Written last by the Host.
    pub command: u32,

    /// Address argument
    pub address: u32,

    /// Byte count (READ_FLASH), page size (PROGRAM_FLASH), or the returned
    /// signature byte (READ_SIGNATURE)
    pub arg2: u32,

    /// Byte count (PROGRAM_FLASH)
    pub arg3: u32,

    /// Reserved
    pub reserved: u32,
}

/// Word index of the command opcode
pub const COMMAND_WORD: usize =
    MailboxHeader::word_index(core::mem::offset_of!(MailboxHeader, command));

/// Word index of the address argument
pub const ADDRESS_WORD: usize =
    MailboxHeader::word_index(core::mem::offset_of!(MailboxHeader, address));

/// Word index of the second argument / signature result
pub const ARG2_WORD: usize =
    MailboxHeader::word_index(core::mem::offset_of!(MailboxHeader, arg2));

/// Word index of the third argument
pub const ARG3_WORD: usize =
    MailboxHeader::word_index(core::mem::offset_of!(MailboxHeader, arg3));

/// Word index of the first payload word
pub const PAYLOAD_WORD: usize = core::mem::size_of::<MailboxHeader>() / WORD_SIZE;

/// Number of payload words, and so the maximum bytes in one transfer
pub const PAYLOAD_CAPACITY: usize = 256;

/// Total size of the mailbox in words
pub const MAILBOX_WORDS: usize = PAYLOAD_WORD + PAYLOAD_CAPACITY;

/// Size of a mailbox word in bytes
pub const WORD_SIZE: usize = core::mem::size_of::<u32>();

/// Opcode value meaning no command is pending
pub const IDLE: u32 = 0;

impl MailboxHeader {
    const fn word_index(byte_offset: usize) -> usize {
        byte_offset / WORD_SIZE
    }

    /// Build a header from the first [`PAYLOAD_WORD`] words of a mailbox.
    pub fn from_words(words: &[u32]) -> Self {
        let word = |i: usize| words.get(i).copied().unwrap_or(0);
        Self {
            command: word(COMMAND_WORD),
            address: word(ADDRESS_WORD),
            arg2: word(ARG2_WORD),
            arg3: word(ARG3_WORD),
            reserved: word(PAYLOAD_WORD - 1),
        }
    }
}

/// Widen bytes into mailbox payload words, one byte per word.
pub fn widen(bytes: &[u8], words: &mut [u32]) {
    for (word, byte) in words.iter_mut().zip(bytes) {
        *word = *byte as u32;
    }
}

/// Narrow mailbox payload words into bytes, keeping the low 8 bits of each.
pub fn narrow(words: &[u32], bytes: &mut [u8]) {
    for (byte, word) in bytes.iter_mut().zip(words) {
        *byte = (*word & 0xFF) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(COMMAND_WORD, 0);
        assert_eq!(ADDRESS_WORD, 1);
        assert_eq!(ARG2_WORD, 2);
        assert_eq!(ARG3_WORD, 3);
        assert_eq!(PAYLOAD_WORD, 5);
        assert_eq!(MAILBOX_WORDS, 261);
        assert_eq!(MAILBOX_WORDS * WORD_SIZE, 1044);
    }

    #[test]
    fn test_narrow_keeps_low_byte() {
        let words = [0x1234_56AB, 0xFF, 0x100];
        let mut bytes = [0u8; 3];
        narrow(&words, &mut bytes);
        assert_eq!(bytes, [0xAB, 0xFF, 0x00]);
    }

    #[test]
    fn test_widen_one_byte_per_word() {
        let mut words = [0xFFFF_FFFF; 4];
        widen(&[0xDE, 0xAD], &mut words);
        assert_eq!(words, [0xDE, 0xAD, 0xFFFF_FFFF, 0xFFFF_FFFF]);
    }

    #[test]
    fn test_header_from_words() {
        let header = MailboxHeader::from_words(&[0x14, 0x40, 0x80, 0x10, 0]);
        assert_eq!(header.command, 0x14);
        assert_eq!(header.address, 0x40);
        assert_eq!(header.arg2, 0x80);
        assert_eq!(header.arg3, 0x10);

        // Short slices read as zero
        assert_eq!(MailboxHeader::from_words(&[0x13]).address, 0);
    }
}
