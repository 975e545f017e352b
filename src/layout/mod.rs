//! Structural description of a host runtime's metadata.
//!
//! A [`LayoutTable`] holds every offset, width and mask the walker needs to interpret raw
//! memory: where an object keeps its type descriptor, where a type descriptor keeps its superclass
//! and its conformance list, how a list counts and strides its records, and where a record keeps
//! the interface it names and the interfaces that interface incorporates.
//!
//! Tables are plain values. They are selected from the compiled-in [`HostRuntime`] catalogue by
//! [`resolver::resolve`], validated once, and afterwards only read.
//!
//! # Key Components
//!
//! - [`LayoutTable`] - The complete description consumed by the walker
//! - [`FieldPath`] - A pointer field reached through up to [`MAX_PATH_HOPS`] indirections
//! - [`ListLayout`] / [`RecordLayout`] / [`NestedList`] - Conformance list encoding
//! - [`CompositionLayout`] - Protocol composition (existential) encoding
//! - [`HostRuntime`] - The versioned catalogue of known layouts
//! - [`MetadataKind`] - Decoder for the metadata kind word
//!
//! # Examples
//!
//! ```rust
//! use protoscope::{layout::NestedList, HostRuntime};
//!
//! let table = HostRuntime::Compact64.layout();
//! table.validate()?;
//!
//! assert_eq!(table.pointer_width.bytes(), 8);
//! assert_eq!(table.record.nested, NestedList::InRecord(8));
//! # Ok::<(), protoscope::Error>(())
//! ```

mod kind;
pub mod resolver;
mod runtime;

pub use kind::{CompositionFlags, KindFlags, MetadataKind};
pub use resolver::{resolve, Resolution, UnresolvedReason};
pub use runtime::HostRuntime;

use crate::{
    memory::{
        io::{read, read_dyn, Endian},
        Address, MemorySource,
    },
    Result,
};

/// Maximum number of indirections a [`FieldPath`] can describe.
pub const MAX_PATH_HOPS: usize = 4;

/// Width of a pointer or count field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 4 bytes
    Four,
    /// 8 bytes
    Eight,
}

impl Width {
    /// Size of the field in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Width::Four => 4,
            Width::Eight => 8,
        }
    }

    /// The largest value representable in a field of this width.
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Width::Four => u32::MAX as u64,
            Width::Eight => u64::MAX,
        }
    }
}

/// One indirection step of a [`FieldPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHop {
    /// Offset of the pointer field from the current base
    pub offset: usize,
    /// Mask applied to the loaded value, stripping flag bits stored alongside the pointer
    pub mask: u64,
    /// Tag bit marking a value that points at a wrapper whose first word is the real pointer
    pub indirect_tag: u64,
}

impl FieldHop {
    /// A plain pointer field at `offset`.
    #[must_use]
    pub const fn direct(offset: usize) -> FieldHop {
        FieldHop {
            offset,
            mask: u64::MAX,
            indirect_tag: 0,
        }
    }

    /// A pointer field at `offset` sharing its word with flag bits outside `mask`.
    #[must_use]
    pub const fn masked(offset: usize, mask: u64) -> FieldHop {
        FieldHop {
            offset,
            mask,
            indirect_tag: 0,
        }
    }

    /// A pointer field at `offset` that, when `tag` is set, points at a wrapper holding the
    /// real pointer in its first word.
    #[must_use]
    pub const fn tagged(offset: usize, tag: u64) -> FieldHop {
        FieldHop {
            offset,
            mask: !tag,
            indirect_tag: tag,
        }
    }
}

/// A pointer field reached by following up to [`MAX_PATH_HOPS`] pointers from a base address.
///
/// Each hop loads a pointer from `base + hop.offset`, masks it, and makes the result the next
/// base. The value of the last hop is the field value. A null pointer at any hop makes the whole
/// field null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldPath {
    hops: [FieldHop; MAX_PATH_HOPS],
    len: usize,
}

impl FieldPath {
    /// A field stored directly at `offset`.
    #[must_use]
    pub const fn direct(offset: usize) -> FieldPath {
        FieldPath::single(FieldHop::direct(offset))
    }

    /// A field described by a single hop.
    #[must_use]
    pub const fn single(hop: FieldHop) -> FieldPath {
        FieldPath {
            hops: [hop, FieldHop::direct(0), FieldHop::direct(0), FieldHop::direct(0)],
            len: 1,
        }
    }

    /// Build a path from a sequence of hops.
    ///
    /// ## Arguments
    /// * 'hops' - The indirections in the order they are followed
    ///
    /// # Errors
    /// Returns a [`crate::Error::Malformed`] error if `hops` is empty or longer than
    /// [`MAX_PATH_HOPS`].
    pub fn new(hops: &[FieldHop]) -> Result<FieldPath> {
        if hops.is_empty() || hops.len() > MAX_PATH_HOPS {
            return Err(malformed_error!(
                "A field path needs between 1 and {} hops, got {}",
                MAX_PATH_HOPS,
                hops.len()
            ));
        }

        let mut path = FieldPath::single(hops[0]);
        path.hops[..hops.len()].copy_from_slice(hops);
        path.len = hops.len();
        Ok(path)
    }

    /// The hops of this path in the order they are followed.
    #[must_use]
    pub fn hops(&self) -> &[FieldHop] {
        &self.hops[..self.len]
    }
}

/// Where the list of interfaces incorporated by an interface is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NestedList {
    /// Interfaces never incorporate other interfaces
    None,
    /// A list pointer at this offset inside each conformance record
    InRecord(usize),
    /// A list pointer at this offset inside the interface descriptor the record names
    InInterface(usize),
}

/// Encoding of a conformance list: a count followed by fixed-stride records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListLayout {
    /// Offset of the record count from the list start
    pub count_offset: usize,
    /// Width of the record count
    pub count_width: Width,
    /// Offset of the first record from the list start
    pub entries_offset: usize,
}

/// Encoding of one conformance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLayout {
    /// Distance between consecutive records
    pub stride: usize,
    /// Offset of the interface pointer inside the record
    pub interface_offset: usize,
    /// Location of the incorporated interface list
    pub nested: NestedList,
}

/// Encoding of a protocol composition (existential metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositionLayout {
    /// Offset of the pointer-sized metadata kind word
    pub kind_offset: usize,
    /// Offset of the 32-bit [`CompositionFlags`] word
    pub flags_offset: usize,
    /// Offset of the 32-bit protocol count
    pub count_offset: usize,
    /// Offset of the first trailing word: the superclass constraint if present, else the first
    /// protocol reference
    pub trailing_offset: usize,
    /// Mask applied to protocol references, stripping their tag bits
    pub protocol_mask: u64,
}

/// Complete description of a host runtime's metadata layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutTable {
    /// Width of pointers in the inspected address space
    pub pointer_width: Width,
    /// Byte order of the inspected address space
    pub endian: Endian,
    /// Mask applied to every pointer loaded from memory
    pub pointer_mask: u64,
    /// Object header to type descriptor
    pub object_type: FieldPath,
    /// Type descriptor to superclass type descriptor
    pub superclass: FieldPath,
    /// Type descriptor to its conformance list
    pub conformances: FieldPath,
    /// Conformance list encoding
    pub list: ListLayout,
    /// Conformance record encoding
    pub record: RecordLayout,
    /// Protocol composition encoding, if the runtime has one
    pub composition: Option<CompositionLayout>,
}

impl LayoutTable {
    /// Check the table for internal consistency.
    ///
    /// # Errors
    /// Returns a [`crate::Error::Malformed`] error if a field would overlap another field of the
    /// same structure, a record does not fit its stride, or a mask removes every address bit.
    pub fn validate(&self) -> Result<()> {
        let word = self.pointer_width.bytes();

        if self.pointer_mask == 0 {
            return Err(malformed_error!("The pointer mask clears every bit"));
        }
        for (name, path) in [
            ("object type", &self.object_type),
            ("superclass", &self.superclass),
            ("conformances", &self.conformances),
        ] {
            if path.hops().iter().any(|hop| hop.mask == 0) {
                return Err(malformed_error!("The {} path masks every bit", name));
            }
        }

        let record = &self.record;
        if record.stride == 0 {
            return Err(malformed_error!("Conformance records need a non-zero stride"));
        }
        if record.interface_offset + word > record.stride {
            return Err(malformed_error!(
                "Interface pointer at {} does not fit a record of {} bytes",
                record.interface_offset,
                record.stride
            ));
        }
        if let NestedList::InRecord(offset) = record.nested {
            if offset + word > record.stride {
                return Err(malformed_error!(
                    "Nested list pointer at {} does not fit a record of {} bytes",
                    offset,
                    record.stride
                ));
            }
            if offset.abs_diff(record.interface_offset) < word {
                return Err(malformed_error!(
                    "Nested list pointer at {} overlaps the interface pointer",
                    offset
                ));
            }
        }

        let list = &self.list;
        if list.count_offset + list.count_width.bytes() > list.entries_offset {
            return Err(malformed_error!(
                "List count at {} overlaps the records at {}",
                list.count_offset,
                list.entries_offset
            ));
        }

        if let Some(composition) = &self.composition {
            if composition.protocol_mask == 0 {
                return Err(malformed_error!("The protocol mask clears every bit"));
            }
            let header_end = [
                composition.kind_offset + word,
                composition.flags_offset + 4,
                composition.count_offset + 4,
            ];
            if header_end
                .iter()
                .any(|end| *end > composition.trailing_offset)
            {
                return Err(malformed_error!(
                    "Composition header overlaps the trailing words at {}",
                    composition.trailing_offset
                ));
            }
        }

        Ok(())
    }

    /// Loads the pointer stored at `address`, masked with [`LayoutTable::pointer_mask`].
    ///
    /// Returns `Some(0)` for a null pointer and `None` if the field is unreadable.
    pub fn read_pointer<S: MemorySource + ?Sized>(
        &self,
        source: &S,
        address: Address,
    ) -> Option<Address> {
        read_dyn(source, address, self.pointer_width.bytes(), self.endian)
            .map(|value| value & self.pointer_mask)
    }

    /// Loads the pointer-sized word stored at `address` without masking it.
    pub fn read_word<S: MemorySource + ?Sized>(&self, source: &S, address: Address) -> Option<u64> {
        read_dyn(source, address, self.pointer_width.bytes(), self.endian)
    }

    /// Loads a list record count stored at `address`.
    pub fn read_count<S: MemorySource + ?Sized>(&self, source: &S, address: Address) -> Option<u64> {
        read_dyn(source, address, self.list.count_width.bytes(), self.endian)
    }

    /// Loads a 32-bit field stored at `address`.
    pub fn read_u32<S: MemorySource + ?Sized>(&self, source: &S, address: Address) -> Option<u32> {
        read::<u32, S>(source, address, self.endian)
    }

    /// Follows `path` starting at `base`.
    ///
    /// Returns `Some(0)` if any hop yields a null pointer and `None` if any hop is unreadable.
    pub fn follow<S: MemorySource + ?Sized>(
        &self,
        source: &S,
        base: Address,
        path: &FieldPath,
    ) -> Option<Address> {
        let mut current = base;

        for hop in path.hops() {
            let field = field_address(current, hop.offset)?;
            let raw = self.read_pointer(source, field)?;

            current = if hop.indirect_tag != 0 && raw & hop.indirect_tag != 0 {
                self.read_pointer(source, raw & hop.mask)?
            } else {
                raw & hop.mask
            };

            if current == 0 {
                return Some(0);
            }
        }

        Some(current)
    }
}

/// Computes `base + offset`, refusing results that wrap the address space.
pub(crate) fn field_address(base: Address, offset: usize) -> Option<Address> {
    base.checked_add(u64::try_from(offset).ok()?)
}
