use crate::{
    memory::{range_end, Address, MemorySource},
    Error::{Empty, OutOfBounds},
    Result,
};

/// One contiguous run of bytes placed at a base address.
#[derive(Debug, Clone)]
struct Segment {
    base: Address,
    data: Vec<u8>,
}

impl Segment {
    fn end(&self) -> Address {
        self.base + self.data.len() as u64
    }
}

/// Owned memory snapshot made of disjoint segments.
///
/// A `MemoryImage` models an address space that was copied out of another process, captured in
/// a crash report, or crafted by hand. Reads are validated against the segment boundaries; a read
/// that straddles two segments or touches a gap fails, even if both segments are adjacent.
///
/// # Examples
///
/// ```rust
/// use protoscope::memory::{io::read_le, MemoryImage};
///
/// let mut image = MemoryImage::new();
/// image.add_segment(0x7000_0000, vec![0u8; 64])?;
/// image.write(0x7000_0008, &0xDEAD_BEEF_u32.to_le_bytes())?;
///
/// assert_eq!(read_le::<u32, _>(&image, 0x7000_0008), Some(0xDEAD_BEEF));
/// # Ok::<(), protoscope::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    /// Segments sorted by base address, never overlapping
    segments: Vec<Segment>,
}

impl MemoryImage {
    /// Create an empty image.
    #[must_use]
    pub fn new() -> MemoryImage {
        MemoryImage {
            segments: Vec::new(),
        }
    }

    /// Create an image holding a single segment.
    ///
    /// ## Arguments
    /// * 'base' - Address of the first byte of `data`
    /// * 'data' - The bytes to consume
    ///
    /// # Errors
    /// See [`MemoryImage::add_segment`].
    pub fn from_segment(base: Address, data: Vec<u8>) -> Result<MemoryImage> {
        let mut image = MemoryImage::new();
        image.add_segment(base, data)?;
        Ok(image)
    }

    /// Place `data` at `base`.
    ///
    /// ## Arguments
    /// * 'base' - Address of the first byte of `data`
    /// * 'data' - The bytes to consume
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer, [`crate::Error::OutOfBounds`] if the
    /// segment would wrap the address space, and a [`crate::Error::Malformed`] error if it overlaps
    /// an existing segment.
    pub fn add_segment(&mut self, base: Address, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return Err(Empty);
        }
        let Some(end) = range_end(base, data.len()) else {
            return Err(OutOfBounds);
        };

        let index = self.segments.partition_point(|segment| segment.base < base);
        if let Some(next) = self.segments.get(index) {
            if next.base < end {
                return Err(malformed_error!(
                    "Segment 0x{:X}..0x{:X} overlaps segment at 0x{:X}",
                    base,
                    end,
                    next.base
                ));
            }
        }
        if let Some(previous) = index.checked_sub(1).and_then(|i| self.segments.get(i)) {
            if previous.end() > base {
                return Err(malformed_error!(
                    "Segment 0x{:X}..0x{:X} overlaps segment at 0x{:X}",
                    base,
                    end,
                    previous.base
                ));
            }
        }

        self.segments.insert(index, Segment { base, data });
        Ok(())
    }

    /// Overwrite bytes inside an existing segment.
    ///
    /// ## Arguments
    /// * 'address' - First byte to overwrite
    /// * 'bytes' - Replacement content
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range is not fully inside one segment.
    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let Some((index, offset)) = self.locate(address, bytes.len()) else {
            return Err(OutOfBounds);
        };

        self.segments[index].data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Number of segments in this image.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total number of bytes across all segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.iter().map(|segment| segment.data.len()).sum()
    }

    /// Returns `true` if the image holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Finds the segment fully containing `address..address + len` and the offset into it.
    fn locate(&self, address: Address, len: usize) -> Option<(usize, usize)> {
        let end = range_end(address, len)?;
        let index = self
            .segments
            .partition_point(|segment| segment.base <= address)
            .checked_sub(1)?;

        let segment = &self.segments[index];
        if end > segment.end() {
            return None;
        }

        let offset = usize::try_from(address - segment.base).ok()?;
        Some((index, offset))
    }
}

impl MemorySource for MemoryImage {
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()> {
        let (index, offset) = self.locate(address, out.len())?;
        out.copy_from_slice(&self.segments[index].data[offset..offset + out.len()]);
        Some(())
    }

    fn is_readable(&self, address: Address, len: usize) -> bool {
        self.locate(address, len).is_some()
    }
}
