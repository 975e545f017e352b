//! Typed, endian-aware reads through a [`crate::memory::MemorySource`].
//!
//! Every access to inspected memory funnels through the helpers in this module. They copy the
//! requested bytes into a fixed-size stack buffer via [`crate::memory::MemorySource::read_exact`]
//! and decode them with the requested byte order, so a read never touches memory the source has
//! not validated and never allocates.
//!
//! # Key Components
//!
//! - [`MemIO`] - Trait describing how a primitive is decoded from and encoded to raw bytes
//! - [`Endian`] - Byte order of the inspected address space
//! - [`read`] / [`read_le`] / [`read_be`] - Validated typed reads
//! - [`read_dyn`] - Reads a 4- or 8-byte field and widens it to `u64`
//! - [`write`] / [`write_dyn`] - Encoders used when crafting synthetic images
//!
//! # Examples
//!
//! ```rust
//! use protoscope::memory::{io::{read_le, read_dyn, Endian}, MemoryImage};
//!
//! let mut image = MemoryImage::new();
//! image.add_segment(0x1000, vec![0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00])?;
//!
//! assert_eq!(read_le::<u32, _>(&image, 0x1000), Some(1));
//! assert_eq!(read_dyn(&image, 0x1004, 4, Endian::Little), Some(2));
//! assert_eq!(read_le::<u64, _>(&image, 0x1004), None);
//! # Ok::<(), protoscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! All functions are pure with respect to shared state and may be called concurrently, including
//! from signal handlers, provided the [`crate::memory::MemorySource`] implementation is itself
//! async-signal-safe.

use crate::{
    memory::{Address, MemorySource},
    Error::OutOfBounds,
    Result,
};

/// Byte order of the inspected address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

impl Endian {
    /// The byte order of the process this library runs in.
    #[must_use]
    pub const fn native() -> Endian {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// Trait for implementing type-specific binary decoding and encoding of primitives.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size byte
/// array required for that particular type (e.g., `[u8; 4]` for `u32`). Because the buffer is a
/// plain array it lives on the stack, which keeps reads allocation-free.
pub trait MemIO: Sized + Copy {
    /// Fixed-size byte array holding an encoded value.
    type Bytes: Default + AsRef<[u8]> + AsMut<[u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_memio {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl MemIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_memio!(u8 => 1, u16 => 2, u32 => 4, i32 => 4, u64 => 8, i64 => 8);

/// Reads a value of type `T` at `address` using the given byte order.
///
/// # Arguments
///
/// * `source` - The validating memory source
/// * `address` - Address of the first byte
/// * `endian` - Byte order of the inspected address space
///
/// # Returns
///
/// `None` if any byte of the value is not readable through `source`.
pub fn read<T: MemIO, S: MemorySource + ?Sized>(
    source: &S,
    address: Address,
    endian: Endian,
) -> Option<T> {
    let mut bytes = T::Bytes::default();
    source.read_exact(address, bytes.as_mut())?;

    Some(match endian {
        Endian::Little => T::from_le_bytes(bytes),
        Endian::Big => T::from_be_bytes(bytes),
    })
}

/// Reads a little-endian value of type `T` at `address`.
pub fn read_le<T: MemIO, S: MemorySource + ?Sized>(source: &S, address: Address) -> Option<T> {
    read(source, address, Endian::Little)
}

/// Reads a big-endian value of type `T` at `address`.
pub fn read_be<T: MemIO, S: MemorySource + ?Sized>(source: &S, address: Address) -> Option<T> {
    read(source, address, Endian::Big)
}

/// Dynamically reads either a 4-byte or 8-byte value and widens it to `u64`.
///
/// Pointer-sized and count fields change width with the inspected process's word size; this
/// keeps the callers independent of it.
///
/// # Arguments
///
/// * `source` - The validating memory source
/// * `address` - Address of the first byte
/// * `width` - Field width in bytes, `4` or `8`
/// * `endian` - Byte order of the inspected address space
///
/// # Returns
///
/// `None` if the field is unreadable or `width` is neither 4 nor 8.
pub fn read_dyn<S: MemorySource + ?Sized>(
    source: &S,
    address: Address,
    width: usize,
    endian: Endian,
) -> Option<u64> {
    match width {
        4 => read::<u32, S>(source, address, endian).map(u64::from),
        8 => read::<u64, S>(source, address, endian),
        _ => None,
    }
}

/// Encodes `value` into `data` at `offset` using the given byte order.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes in `data`.
pub fn write<T: MemIO>(data: &mut [u8], offset: usize, value: T, endian: Endian) -> Result<()> {
    let bytes = match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    };
    let bytes = bytes.as_ref();

    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[offset..end].copy_from_slice(bytes);
    Ok(())
}

/// Encodes `value` as a 4-byte or 8-byte field.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short or if `value` does not fit into a
/// 4-byte field, and a [`crate::Error::Malformed`] error for any other width.
pub fn write_dyn(
    data: &mut [u8],
    offset: usize,
    value: u64,
    width: usize,
    endian: Endian,
) -> Result<()> {
    match width {
        4 => {
            let Ok(narrow) = u32::try_from(value) else {
                return Err(OutOfBounds);
            };
            write(data, offset, narrow, endian)
        }
        8 => write(data, offset, value, endian),
        _ => Err(malformed_error!("Unsupported field width - {}", width)),
    }
}
