//! Validated access to the memory being inspected.
//!
//! The conformance walker never dereferences an address directly. It asks a
//! [`MemorySource`] to copy bytes out of the inspected address space, and the source decides
//! whether the range is safe to touch. This keeps the single unsafe concern (reading live process
//! memory) in one small, isolated place and lets the same walker run against snapshots, dump
//! files and synthetic fixtures.
//!
//! # Key Components
//!
//! ## Core Trait
//! - [`MemorySource`] - The validated read primitive
//!
//! ## Implementations
//! - [`LiveMemory`] - The current process, read through the kernel
//! - [`MemoryImage`] - An owned snapshot made of disjoint segments
//! - [`MappedImage`] - A raw memory dump file mapped from disk
//! - [`SyntheticImage`] - Builder laying out type hierarchies for fixtures and benchmarks
//!
//! ## Helpers
//! - [`io`] - Typed, endian-aware reads and writes
//!
//! # Examples
//!
//! ```rust
//! use protoscope::memory::{MemoryImage, MemorySource};
//!
//! let mut image = MemoryImage::new();
//! image.add_segment(0x1000, vec![0xAA; 16])?;
//!
//! let mut buffer = [0u8; 4];
//! assert!(image.read_exact(0x1008, &mut buffer).is_some());
//! assert_eq!(buffer, [0xAA; 4]);
//! assert!(image.read_exact(0x100E, &mut buffer).is_none());
//! # Ok::<(), protoscope::Error>(())
//! ```

pub mod io;
mod image;
mod live;
mod mapped;
mod regions;
mod synthetic;

pub use image::MemoryImage;
pub use live::LiveMemory;
pub use mapped::MappedImage;
pub use regions::{Protection, Region, RegionMap};
pub use synthetic::SyntheticImage;

/// An opaque address inside the inspected address space.
///
/// Addresses carry no type information. `0` is the null address and is never read.
pub type Address = u64;

/// The validated read primitive used by every traversal step.
///
/// Implementations must check that the complete range `address..address + out.len()` is
/// readable before copying any byte, and must not block, lock, allocate or fault while doing so.
/// A `None` result means "not readable" and is treated by callers as an invalid branch, never as
/// an error to propagate.
pub trait MemorySource: Send + Sync {
    /// Copies `out.len()` bytes starting at `address` into `out`.
    ///
    /// # Arguments
    ///
    /// * `address` - The first byte to read
    /// * `out` - Destination buffer, fully written on success
    ///
    /// # Returns
    ///
    /// `Some(())` if every byte was readable and copied, `None` otherwise. On `None` the content
    /// of `out` is unspecified.
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()>;

    /// Returns `true` if the complete range `address..address + len` is readable.
    fn is_readable(&self, address: Address, len: usize) -> bool;
}

impl<T: MemorySource + ?Sized> MemorySource for &T {
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()> {
        (**self).read_exact(address, out)
    }

    fn is_readable(&self, address: Address, len: usize) -> bool {
        (**self).is_readable(address, len)
    }
}

impl<T: MemorySource + ?Sized> MemorySource for Box<T> {
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()> {
        (**self).read_exact(address, out)
    }

    fn is_readable(&self, address: Address, len: usize) -> bool {
        (**self).is_readable(address, len)
    }
}

/// Computes the exclusive end of `address..address + len`, refusing ranges that wrap.
pub(crate) fn range_end(address: Address, len: usize) -> Option<Address> {
    address.checked_add(u64::try_from(len).ok()?)
}
