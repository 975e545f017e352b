//! Memory dump files mapped from disk.
//!
//! This module provides [`MappedImage`], a [`crate::memory::MemorySource`] over a raw dump of
//! another process's memory. The dump is mapped read-only with `memmap2` and placed at the base
//! address it was taken from, so addresses found inside the dump can be followed directly.
//!
//! # Examples
//!
//! ```rust,no_run
//! use protoscope::memory::{io::read_le, MappedImage};
//!
//! // A dump of the region starting at 0x1_0000_0000 in the crashed process
//! let image = MappedImage::new("crash/heap.bin", 0x1_0000_0000)?;
//! let isa: Option<u64> = read_le(&image, 0x1_0000_0040);
//! # Ok::<(), protoscope::Error>(())
//! ```

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{
    memory::{range_end, Address, MemorySource},
    Error::{Empty, FileError, OutOfBounds},
    Result,
};

/// A raw memory dump mapped from disk at a fixed base address.
///
/// Reads are bounds checked against the mapped length. The mapping is never written.
#[derive(Debug)]
pub struct MappedImage {
    /// Memory-mapped dump data
    data: Mmap,
    /// Address of the first byte of the dump in the inspected process
    base: Address,
}

impl MappedImage {
    /// Map the dump at `path`, placing its first byte at `base`.
    ///
    /// # Arguments
    /// * `path` - Path to the dump file
    /// * `base` - Address the first byte was read from
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped,
    /// [`crate::Error::Empty`] for an empty file, and [`crate::Error::OutOfBounds`] if the dump
    /// would extend past the end of the address space.
    pub fn new(path: impl AsRef<Path>, base: Address) -> Result<MappedImage> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        MappedImage::from_std_file(file, base)
    }

    /// Map an already opened dump file, placing its first byte at `base`.
    ///
    /// # Errors
    /// See [`MappedImage::new`].
    #[allow(clippy::needless_pass_by_value)]
    pub fn from_std_file(file: fs::File, base: Address) -> Result<MappedImage> {
        if file.metadata()?.len() == 0 {
            return Err(Empty);
        }

        let data = unsafe { Mmap::map(&file) }?;
        if range_end(base, data.len()).is_none() {
            return Err(OutOfBounds);
        }

        Ok(MappedImage { data, base })
    }

    /// Address of the first byte of the dump.
    #[must_use]
    pub fn base(&self) -> Address {
        self.base
    }

    /// Size of the dump in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the dump holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset_of(&self, address: Address, len: usize) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = offset.checked_add(len)?;
        (end <= self.data.len()).then_some(offset)
    }
}

impl MemorySource for MappedImage {
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()> {
        let offset = self.offset_of(address, out.len())?;
        out.copy_from_slice(&self.data[offset..offset + out.len()]);
        Some(())
    }

    fn is_readable(&self, address: Address, len: usize) -> bool {
        self.offset_of(address, len).is_some()
    }
}
