use std::collections::HashMap;

use crate::{
    layout::{
        field_address, CompositionFlags, FieldPath, LayoutTable, MetadataKind, NestedList,
    },
    memory::{
        image::MemoryImage,
        io::{write, write_dyn},
        range_end, Address, MemorySource,
    },
    Error::{NotSupported, OutOfBounds},
    Result,
};

/// Default address of the first synthetic block.
const DEFAULT_BASE: Address = 0x1000_0000;
/// Alignment of every synthetic block; keeps the low bits free for masked flags.
const BLOCK_ALIGN: usize = 16;
/// Smallest block handed out.
const MIN_BLOCK: usize = 64;

/// Lays out objects, type descriptors and protocols following a [`LayoutTable`].
///
/// Everything is written into one contiguous buffer starting at a chosen base address, reachable
/// through the same field paths the walker follows, including intermediate blocks for multi-hop
/// paths. The result can be queried in place, since `SyntheticImage` is itself a
/// [`MemorySource`], or frozen into a [`MemoryImage`] and corrupted afterwards.
///
/// # Examples
///
/// ```rust
/// use protoscope::{memory::SyntheticImage, HostRuntime};
///
/// let mut image = SyntheticImage::new(HostRuntime::ObjC2Arm64.layout());
/// let copying = image.protocol(&[])?;
/// let ty = image.type_descriptor(None, &[copying])?;
/// let object = image.object(ty)?;
///
/// let memory = image.into_image()?;
/// assert!(memory.len() > 0);
/// # let _ = object;
/// # Ok::<(), protoscope::Error>(())
/// ```
pub struct SyntheticImage {
    layout: LayoutTable,
    base: Address,
    data: Vec<u8>,
    /// Incorporated list of each protocol, for layouts that store it in the record
    nested_lists: HashMap<Address, Address>,
}

impl SyntheticImage {
    /// Create an empty image at the default base address.
    ///
    /// ## Arguments
    /// * 'layout' - The layout every structure is written in
    #[must_use]
    pub fn new(layout: LayoutTable) -> SyntheticImage {
        Self::with_base(layout, DEFAULT_BASE)
    }

    /// Create an empty image whose first block starts at `base`.
    #[must_use]
    pub fn with_base(layout: LayoutTable, base: Address) -> SyntheticImage {
        SyntheticImage {
            layout,
            base,
            data: Vec::new(),
            nested_lists: HashMap::new(),
        }
    }

    /// The layout structures are written in.
    #[must_use]
    pub fn layout(&self) -> &LayoutTable {
        &self.layout
    }

    /// Returns the number of bytes laid out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been laid out yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lay out a protocol descriptor.
    ///
    /// ## Arguments
    /// * 'incorporates' - Protocols this protocol incorporates
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the image outgrows the address space of the layout.
    pub fn protocol(&mut self, incorporates: &[Address]) -> Result<Address> {
        let word = self.word();
        let size = match self.layout.record.nested {
            NestedList::InInterface(offset) => offset + word,
            _ => word,
        };
        let protocol = self.allocate(size)?;

        let list = self.list(incorporates)?;
        match self.layout.record.nested {
            NestedList::InInterface(offset) => self.write_pointer(at(protocol, offset)?, list)?,
            NestedList::InRecord(_) => {
                self.nested_lists.insert(protocol, list);
            }
            NestedList::None => {}
        }

        Ok(protocol)
    }

    /// Lay out a type descriptor.
    ///
    /// ## Arguments
    /// * 'superclass' - The parent type, if any
    /// * 'conforms_to' - Protocols the type itself declares
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the image outgrows the address space of the layout.
    pub fn type_descriptor(
        &mut self,
        superclass: Option<Address>,
        conforms_to: &[Address],
    ) -> Result<Address> {
        let size = [&self.layout.superclass, &self.layout.conformances]
            .iter()
            .map(|path| path.hops()[0].offset)
            .max()
            .unwrap_or(0)
            + self.word();
        let ty = self.allocate(size)?;

        let conformances = self.layout.conformances;
        let list = self.list(conforms_to)?;
        self.store(ty, &conformances, list)?;
        if let Some(superclass) = superclass {
            self.set_superclass(ty, superclass)?;
        }

        Ok(ty)
    }

    /// Lay out an object whose type descriptor is `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the image outgrows the address space of the layout.
    pub fn object(&mut self, ty: Address) -> Result<Address> {
        let object_type = self.layout.object_type;
        let object = self.allocate(object_type.hops()[0].offset + self.word())?;
        self.store(object, &object_type, ty)?;
        Ok(object)
    }

    /// Lay out a protocol composition requiring every protocol in `protocols` and, if given,
    /// the superclass `superclass`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] if the layout has no composition encoding and
    /// [`crate::Error::OutOfBounds`] if the image outgrows the address space of the layout.
    pub fn composition(
        &mut self,
        protocols: &[Address],
        superclass: Option<Address>,
    ) -> Result<Address> {
        let Some(encoding) = self.layout.composition else {
            return Err(NotSupported);
        };
        let word = self.word();
        let count = u32::try_from(protocols.len()).map_err(|_| OutOfBounds)?;
        let trailing = protocols.len() + usize::from(superclass.is_some());
        let composition = self.allocate(encoding.trailing_offset + trailing * word)?;

        let kind = at(composition, encoding.kind_offset)?;
        self.write_word(kind, MetadataKind::Existential.raw())?;

        let flags = if superclass.is_some() {
            CompositionFlags::HAS_SUPERCLASS
        } else {
            CompositionFlags::empty()
        };
        self.write_u32(at(composition, encoding.flags_offset)?, flags.bits())?;
        self.write_u32(at(composition, encoding.count_offset)?, count)?;

        let mut cursor = at(composition, encoding.trailing_offset)?;
        for reference in superclass.iter().chain(protocols) {
            self.write_pointer(cursor, *reference)?;
            cursor = at(cursor, word)?;
        }

        Ok(composition)
    }

    /// Replace the superclass of `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `ty` was not laid out by this image.
    pub fn set_superclass(&mut self, ty: Address, superclass: Address) -> Result<()> {
        let path = self.layout.superclass;
        self.store(ty, &path, superclass)
    }

    /// The conformance list of `ty`, if it has one.
    #[must_use]
    pub fn conformance_list(&self, ty: Address) -> Option<Address> {
        match self.layout.follow(self, ty, &self.layout.conformances) {
            Some(0) | None => None,
            Some(list) => Some(list),
        }
    }

    /// Overwrite the pointer-sized field at `address` with `value`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the field lies outside the image or `value` does
    /// not fit the pointer width.
    pub fn write_pointer(&mut self, address: Address, value: Address) -> Result<()> {
        self.write_word(address, value)
    }

    /// Freeze the laid out bytes into a [`MemoryImage`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if nothing was laid out.
    pub fn into_image(self) -> Result<MemoryImage> {
        MemoryImage::from_segment(self.base, self.data)
    }

    fn word(&self) -> usize {
        self.layout.pointer_width.bytes()
    }

    /// Lays out a conformance list naming `interfaces`; an empty list is the null pointer.
    fn list(&mut self, interfaces: &[Address]) -> Result<Address> {
        if interfaces.is_empty() {
            return Ok(0);
        }

        let list_layout = self.layout.list;
        let record = self.layout.record;
        let size = interfaces
            .len()
            .checked_mul(record.stride)
            .and_then(|records| records.checked_add(list_layout.entries_offset))
            .ok_or(OutOfBounds)?;
        let list = self.allocate(size)?;

        let offset = self.offset(
            at(list, list_layout.count_offset)?,
            list_layout.count_width.bytes(),
        )?;
        write_dyn(
            &mut self.data,
            offset,
            interfaces.len() as u64,
            list_layout.count_width.bytes(),
            self.layout.endian,
        )?;

        let mut entry = at(list, list_layout.entries_offset)?;
        for interface in interfaces {
            self.write_pointer(at(entry, record.interface_offset)?, *interface)?;
            if let NestedList::InRecord(offset) = record.nested {
                let nested = self.nested_lists.get(interface).copied().unwrap_or(0);
                self.write_pointer(at(entry, offset)?, nested)?;
            }
            entry = at(entry, record.stride)?;
        }

        Ok(list)
    }

    /// Stores `value` as the field `path` describes from `base`, creating intermediate blocks.
    fn store(&mut self, base: Address, path: &FieldPath, value: Address) -> Result<()> {
        let word = self.word();
        let hops = path.hops();
        let mut current = base;

        for (index, hop) in hops.iter().enumerate() {
            let field = at(current, hop.offset)?;
            if index + 1 == hops.len() {
                return self.write_pointer(field, value);
            }

            let existing = self.layout.read_pointer(&*self, field).ok_or(OutOfBounds)? & hop.mask;
            current = if existing != 0 {
                existing
            } else {
                let block = self.allocate(hops[index + 1].offset + word)?;
                self.write_pointer(field, block)?;
                block
            };
        }

        Ok(())
    }

    /// Appends a zeroed, aligned block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<Address> {
        let size = size.max(MIN_BLOCK).next_multiple_of(BLOCK_ALIGN);
        let start = self.data.len().next_multiple_of(BLOCK_ALIGN);
        let end = start.checked_add(size).ok_or(OutOfBounds)?;

        let address = at(self.base, start)?;
        let last = at(self.base, end - 1)?;
        if last > self.layout.pointer_width.max_value() {
            return Err(OutOfBounds);
        }

        self.data.resize(end, 0);
        Ok(address)
    }

    fn offset(&self, address: Address, len: usize) -> Result<usize> {
        let start = address.checked_sub(self.base).ok_or(OutOfBounds)?;
        let start = usize::try_from(start).map_err(|_| OutOfBounds)?;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start),
            _ => Err(OutOfBounds),
        }
    }

    fn write_word(&mut self, address: Address, value: u64) -> Result<()> {
        let word = self.word();
        let offset = self.offset(address, word)?;
        write_dyn(&mut self.data, offset, value, word, self.layout.endian)
    }

    fn write_u32(&mut self, address: Address, value: u32) -> Result<()> {
        let offset = self.offset(address, 4)?;
        write(&mut self.data, offset, value, self.layout.endian)
    }
}

fn at(base: Address, offset: usize) -> Result<Address> {
    field_address(base, offset).ok_or(OutOfBounds)
}

impl MemorySource for SyntheticImage {
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()> {
        range_end(address, out.len())?;
        let start = self.offset(address, out.len()).ok()?;
        out.copy_from_slice(&self.data[start..start + out.len()]);
        Some(())
    }

    fn is_readable(&self, address: Address, len: usize) -> bool {
        range_end(address, len).is_some() && self.offset(address, len).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layout::HostRuntime, memory::io::read_dyn};

    #[test]
    fn compact_structures() {
        let layout = HostRuntime::Compact64.layout();
        let mut image = SyntheticImage::new(layout);

        let inner = image.protocol(&[]).unwrap();
        let outer = image.protocol(&[inner]).unwrap();
        let ty = image.type_descriptor(None, &[outer]).unwrap();
        let object = image.object(ty).unwrap();

        assert_eq!(layout.read_pointer(&image, object), Some(ty));
        assert_eq!(layout.read_pointer(&image, ty + 8), Some(0));

        let list = image.conformance_list(ty).unwrap();
        assert_eq!(layout.read_count(&image, list), Some(1));
        assert_eq!(layout.read_pointer(&image, list + 8), Some(outer));

        // The record carries the incorporated list of the protocol it names
        let nested = layout.read_pointer(&image, list + 16).unwrap();
        assert_ne!(nested, 0);
        assert_eq!(layout.read_pointer(&image, nested + 8), Some(inner));
    }

    #[test]
    fn objc_paths_create_intermediate_blocks() {
        let layout = HostRuntime::ObjC2Arm64.layout();
        let mut image = SyntheticImage::new(layout);

        let protocol = image.protocol(&[]).unwrap();
        let ty = image.type_descriptor(None, &[protocol]).unwrap();
        image.set_superclass(ty, 0).unwrap();

        let list = image.conformance_list(ty).unwrap();
        assert_eq!(read_dyn(&image, list, 8, layout.endian), Some(1));
        assert_eq!(layout.read_pointer(&image, list + 8), Some(protocol));
        assert_eq!(image.len() % BLOCK_ALIGN, 0);
    }

    #[test]
    fn compact32_stays_in_range() {
        let layout = HostRuntime::Compact32.layout();
        let mut image = SyntheticImage::with_base(layout, 0xFFFF_FF80);

        assert!(image.protocol(&[]).is_ok());
        assert!(image.protocol(&[]).is_ok());
        assert!(matches!(image.protocol(&[]), Err(OutOfBounds)));
    }

    #[test]
    fn compositions() {
        let layout = HostRuntime::Compact64.layout();
        let mut image = SyntheticImage::new(layout);
        let protocol = image.protocol(&[]).unwrap();
        let base = image.type_descriptor(None, &[]).unwrap();
        let composition = image.composition(&[protocol], Some(base)).unwrap();

        assert_eq!(
            layout.read_word(&image, composition),
            Some(MetadataKind::Existential.raw())
        );
        assert_eq!(
            layout.read_u32(&image, composition + 8),
            Some(CompositionFlags::HAS_SUPERCLASS.bits())
        );
        assert_eq!(layout.read_u32(&image, composition + 12), Some(1));
        assert_eq!(layout.read_pointer(&image, composition + 16), Some(base));
        assert_eq!(layout.read_pointer(&image, composition + 24), Some(protocol));

        let mut objc = SyntheticImage::new(HostRuntime::ObjC2Arm64.layout());
        assert!(matches!(objc.composition(&[], None), Err(NotSupported)));
    }

    #[test]
    fn writes_outside_rejected() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        assert!(image.write_pointer(0x1000_0000, 1).is_err());
        assert!(image.into_image().is_err());
    }
}
