use bitflags::bitflags;
use strum::{Display, EnumCount, EnumIter};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Flag bits that qualify the raw metadata kind value
    pub struct KindFlags : u64 {
        /// The metadata is runtime-private and not described by a public ABI
        const RUNTIME_PRIVATE = 0x100;
        /// The metadata does not describe a heap-allocated type
        const NON_HEAP = 0x200;
        /// The metadata does not describe a type at all
        const NON_TYPE = 0x400;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Flags word of a protocol composition
    pub struct CompositionFlags : u32 {
        /// Set when the composition is not constrained to class instances
        const ANY_OBJECT = 0x8000_0000;
        /// A superclass constraint word precedes the protocol references
        const HAS_SUPERCLASS = 0x4000_0000;
        /// Identifies a runtime special protocol
        const SPECIAL_PROTOCOL = 0x3F00_0000;
        /// Number of witness tables carried by an existential value
        const WITNESS_TABLES = 0x00FF_FFFF;
    }
}

/// Decoded metadata kind.
///
/// Kinds are recognised both by their legacy small values and by their flag-qualified values.
/// Any value that is neither decodes as [`MetadataKind::Class`], because class metadata stores an
/// isa pointer in the kind slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
pub enum MetadataKind {
    /// Value type with stored properties
    Struct,
    /// Value type with cases
    Enum,
    /// The optional enum
    Optional,
    /// Opaque builtin
    Opaque,
    /// Tuple
    Tuple,
    /// Function type
    Function,
    /// Protocol composition
    Existential,
    /// Metatype of a concrete type
    Metatype,
    /// Wrapper around a foreign class object
    ObjCClassWrapper,
    /// Metatype of an existential
    ExistentialMetatype,
    /// Foreign class
    ForeignClass,
    /// Heap box of a captured local
    HeapLocalVariable,
    /// Heap box of a captured generic local
    HeapGenericLocalVariable,
    /// Boxed error value
    ErrorObject,
    /// Class metadata
    Class,
}

impl MetadataKind {
    /// Decode a raw kind word.
    ///
    /// ## Arguments
    /// * 'raw' - The pointer-sized value stored in the kind slot
    #[must_use]
    pub fn from_raw(raw: u64) -> MetadataKind {
        match raw {
            1 | 0x200 => MetadataKind::Struct,
            2 | 0x201 => MetadataKind::Enum,
            3 | 0x202 => MetadataKind::Optional,
            8 | 0x300 => MetadataKind::Opaque,
            16 | 0x203 => MetadataKind::ForeignClass,
            9 | 0x301 => MetadataKind::Tuple,
            10 | 0x302 => MetadataKind::Function,
            12 | 0x303 => MetadataKind::Existential,
            13 | 0x304 => MetadataKind::Metatype,
            14 | 0x305 => MetadataKind::ObjCClassWrapper,
            15 | 0x306 => MetadataKind::ExistentialMetatype,
            64 | 0x400 => MetadataKind::HeapLocalVariable,
            65 | 0x500 => MetadataKind::HeapGenericLocalVariable,
            128 | 0x501 => MetadataKind::ErrorObject,
            _ => MetadataKind::Class,
        }
    }

    /// The canonical flag-qualified kind value.
    #[must_use]
    pub fn raw(self) -> u64 {
        match self {
            MetadataKind::Struct => 0x200,
            MetadataKind::Enum => 0x201,
            MetadataKind::Optional => 0x202,
            MetadataKind::ForeignClass => 0x203,
            MetadataKind::Opaque => 0x300,
            MetadataKind::Tuple => 0x301,
            MetadataKind::Function => 0x302,
            MetadataKind::Existential => 0x303,
            MetadataKind::Metatype => 0x304,
            MetadataKind::ObjCClassWrapper => 0x305,
            MetadataKind::ExistentialMetatype => 0x306,
            MetadataKind::HeapLocalVariable => 0x400,
            MetadataKind::HeapGenericLocalVariable => 0x500,
            MetadataKind::ErrorObject => 0x501,
            MetadataKind::Class => 0,
        }
    }

    /// The flag bits of the canonical kind value.
    #[must_use]
    pub fn flags(self) -> KindFlags {
        KindFlags::from_bits_truncate(self.raw())
    }
}
