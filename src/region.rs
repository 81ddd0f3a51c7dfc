//! Target memory regions, as handed to the programmer by its caller.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Memory types the PRU firmware knows how to access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Flash,
    Signature,
}

impl RegionKind {
    /// Look up a region by its symbolic name.  Names are matched exactly.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "flash" => Some(RegionKind::Flash),
            "signature" => Some(RegionKind::Signature),
            _ => None,
        }
    }
}

/// A target memory region.
///
/// The buffer is owned by the caller and mirrors the whole region: reads
/// land at `buf[address..]` and writes are taken from the same offsets.
#[derive(Debug)]
pub struct MemoryRegion<'a> {
    /// Symbolic name, e.g. "flash" or "signature"
    pub name: &'a str,
    /// Programming page size in bytes
    pub page_size: u32,
    /// Backing buffer for the whole region
    pub buf: &'a mut [u8],
}

impl<'a> MemoryRegion<'a> {
    pub fn new(name: &'a str, page_size: u32, buf: &'a mut [u8]) -> Self {
        Self {
            name,
            page_size,
            buf,
        }
    }

    /// The region kind, or `None` if the PRU firmware doesn't handle it
    pub fn kind(&self) -> Option<RegionKind> {
        RegionKind::from_name(self.name)
    }

    /// Size of the region in bytes
    pub fn size(&self) -> usize {
        self.buf.len()
    }
}
