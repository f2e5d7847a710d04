use std::fmt;

use crate::error::{ParseError, StorageError};

/// Parsed, signature-checked manifest.
pub trait Manifest {
    fn component_count(&self) -> usize;

    /// Where the component's payload can be fetched, if anywhere.
    fn uri(&self, component: usize) -> Option<&str>;

    /// Storage location the component's payload is written to.
    fn storage_location(&self, component: usize) -> Option<&str>;

    /// Declared image size, `None` when the size parameter cannot be resolved.
    fn image_size(&self, component: usize) -> Option<u64>;
}

pub trait ManifestParser: Send {
    type Manifest: Manifest + Send;

    fn parse(&mut self, data: &[u8]) -> Result<Self::Manifest, ParseError>;
}

/// Bounded writes into a storage location.
pub trait StorageBackend: Send {
    fn write(&mut self, location: &str, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    fn finish(&mut self, location: &str) -> Result<(), StorageError>;
}

pub type SlotIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub magic: u32,
    pub version: u32,
    pub start_addr: u32,
    pub checksum: u32,
}

impl fmt::Display for SlotHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image magic_number: {:#010x}\nImage Version: {:#010x}\nImage start address: {:#010x}\nHeader chksum: {:#010x}",
            self.magic, self.version, self.start_addr, self.checksum
        )
    }
}

/// Slot information and reboot control provided by the bootloader.
pub trait Bootloader: Send + Sync {
    fn current_slot(&self) -> SlotIndex;

    fn other_slot(&self) -> SlotIndex;

    fn header(&self, slot: SlotIndex) -> Option<SlotHeader>;

    fn validate(&self, header: &SlotHeader) -> bool;

    fn reboot(&self);
}
