//! Catalogue of known host runtime layouts.
//!
//! Every supported host object model release is one [`HostRuntime`] variant mapping to a
//! compiled-in [`LayoutTable`]. Runtimes missing from the catalogue are not guessed at: resolution
//! reports them unresolved and all queries answer `false`.
//!
//! # Objective-C 2 (64-bit)
//!
//! ```text
//! object            class                 class_rw_t          class_ro_t
//! +0  isa ────────► +0  isa               +0  flags           +0  flags, sizes
//!                   +8  superclass        +8  ro_or_rw_ext ─► ...
//!                   +16 cache (2 words)                       +40 baseProtocols ─► protocol_list_t
//!                   +32 bits ─(masked)──►                                          +0 count (word)
//!                                                                                  +8 protocol_t*[]
//! protocol_t: +0 isa, +8 mangledName, +16 protocols ─► protocol_list_t
//! ```
//!
//! The isa and the class data bits share their word with flag bits and are masked. The read-write
//! data either points at the read-only data directly or, with its low bit set, at an extension
//! whose first word is that pointer. Protocols added by categories at run time live in the
//! extension's protocol array and are not visited.
//!
//! # Compact (32- and 64-bit)
//!
//! A flat layout used by instrumented runtimes and synthetic images: the type pointer is the first
//! word of an object, superclass and conformance list pointers follow the descriptor's first word,
//! and each conformance record carries its interface pointer and the interface's own incorporated
//! list side by side. Protocol compositions are supported.

use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{
    layout::{
        CompositionLayout, FieldHop, FieldPath, LayoutTable, ListLayout, NestedList, RecordLayout,
        Width,
    },
    memory::io::Endian,
    Error::UnknownRuntime,
    Result,
};

/// Objective-C isa mask on arm64 without pointer authentication
const OBJC_ISA_MASK_ARM64: u64 = 0x0000_000F_FFFF_FFF8;
/// Objective-C isa mask on x86_64
const OBJC_ISA_MASK_X86_64: u64 = 0x0000_7FFF_FFFF_FFF8;
/// Objective-C class data bits mask on 64-bit targets
const OBJC_FAST_DATA_MASK: u64 = 0x0000_7FFF_FFFF_FFF8;
/// User space addresses on 64-bit Apple platforms fit in 47 bits
const APPLE_POINTER_MASK: u64 = 0x0000_7FFF_FFFF_FFFF;

/// A host object model release with a known metadata layout.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumCount,
    EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum HostRuntime {
    /// Objective-C 2 runtime on 64-bit ARM
    #[strum(serialize = "objc2-arm64")]
    ObjC2Arm64,
    /// Objective-C 2 runtime on x86_64
    #[strum(serialize = "objc2-x86_64")]
    ObjC2X86_64,
    /// Compact reference layout, 64-bit pointers
    #[strum(serialize = "compact64")]
    Compact64,
    /// Compact reference layout, 32-bit pointers
    #[strum(serialize = "compact32")]
    Compact32,
}

impl HostRuntime {
    /// The runtime the current build targets, if it is in the catalogue.
    #[must_use]
    pub fn detect() -> Option<HostRuntime> {
        if cfg!(all(target_vendor = "apple", target_arch = "aarch64")) {
            Some(HostRuntime::ObjC2Arm64)
        } else if cfg!(all(target_vendor = "apple", target_arch = "x86_64")) {
            Some(HostRuntime::ObjC2X86_64)
        } else {
            None
        }
    }

    /// Look up a runtime by its canonical name, ignoring ASCII case.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownRuntime`] if no catalogue entry carries that name.
    pub fn from_name(name: &str) -> Result<HostRuntime> {
        name.trim()
            .parse::<HostRuntime>()
            .map_err(|_| UnknownRuntime(name.to_string()))
    }

    /// The compiled-in layout for this runtime.
    #[must_use]
    pub fn layout(self) -> LayoutTable {
        match self {
            HostRuntime::ObjC2Arm64 => objc2_64(OBJC_ISA_MASK_ARM64),
            HostRuntime::ObjC2X86_64 => objc2_64(OBJC_ISA_MASK_X86_64),
            HostRuntime::Compact64 => compact(Width::Eight),
            HostRuntime::Compact32 => compact(Width::Four),
        }
    }

    /// The canonical name of this runtime, as accepted by [`std::str::FromStr`].
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

fn objc2_64(isa_mask: u64) -> LayoutTable {
    LayoutTable {
        pointer_width: Width::Eight,
        endian: Endian::Little,
        pointer_mask: APPLE_POINTER_MASK,
        object_type: FieldPath::single(FieldHop::masked(0, isa_mask)),
        superclass: FieldPath::direct(8),
        conformances: FieldPath {
            hops: [
                FieldHop::masked(32, OBJC_FAST_DATA_MASK),
                FieldHop::tagged(8, 1),
                FieldHop::direct(40),
                FieldHop::direct(0),
            ],
            len: 3,
        },
        list: ListLayout {
            count_offset: 0,
            count_width: Width::Eight,
            entries_offset: 8,
        },
        record: RecordLayout {
            stride: 8,
            interface_offset: 0,
            nested: NestedList::InInterface(16),
        },
        composition: None,
    }
}

fn compact(width: Width) -> LayoutTable {
    let word = width.bytes();

    LayoutTable {
        pointer_width: width,
        endian: Endian::native(),
        pointer_mask: width.max_value(),
        object_type: FieldPath::direct(0),
        superclass: FieldPath::direct(word),
        conformances: FieldPath::direct(2 * word),
        list: ListLayout {
            count_offset: 0,
            count_width: Width::Four,
            entries_offset: word,
        },
        record: RecordLayout {
            stride: 2 * word,
            interface_offset: 0,
            nested: NestedList::InRecord(word),
        },
        composition: Some(CompositionLayout {
            kind_offset: 0,
            flags_offset: word,
            count_offset: word + 4,
            trailing_offset: word + 8,
            protocol_mask: !1,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn names_round_trip() {
        for runtime in HostRuntime::iter() {
            assert_eq!(runtime.name().parse::<HostRuntime>().unwrap(), runtime);
            assert_eq!(runtime.to_string(), runtime.name());
        }
        assert_eq!(HostRuntime::COUNT, 4);
    }

    #[test]
    fn names_case_insensitive() {
        assert_eq!(
            "OBJC2-ARM64".parse::<HostRuntime>().unwrap(),
            HostRuntime::ObjC2Arm64
        );
        assert_eq!(
            "Compact32".parse::<HostRuntime>().unwrap(),
            HostRuntime::Compact32
        );
        assert!("objc1".parse::<HostRuntime>().is_err());

        assert_eq!(
            HostRuntime::from_name(" compact64 ").unwrap(),
            HostRuntime::Compact64
        );
        assert!(matches!(
            HostRuntime::from_name("objc1"),
            Err(UnknownRuntime(name)) if name == "objc1"
        ));
    }

    #[test]
    fn objc2_layout() {
        let table = HostRuntime::ObjC2Arm64.layout();

        assert_eq!(table.object_type.hops()[0].mask, OBJC_ISA_MASK_ARM64);
        assert_eq!(table.conformances.hops().len(), 3);
        assert_eq!(table.conformances.hops()[1].indirect_tag, 1);
        assert_eq!(table.record.nested, NestedList::InInterface(16));
        assert!(table.composition.is_none());

        let x86 = HostRuntime::ObjC2X86_64.layout();
        assert_eq!(x86.object_type.hops()[0].mask, OBJC_ISA_MASK_X86_64);
    }

    #[test]
    fn compact_layouts() {
        let wide = HostRuntime::Compact64.layout();
        assert_eq!(wide.superclass, FieldPath::direct(8));
        assert_eq!(wide.record.stride, 16);

        let narrow = HostRuntime::Compact32.layout();
        assert_eq!(narrow.pointer_width, Width::Four);
        assert_eq!(narrow.pointer_mask, 0xFFFF_FFFF);
        assert_eq!(narrow.conformances, FieldPath::direct(8));
        assert_eq!(narrow.composition.unwrap().trailing_offset, 12);
    }

    #[test]
    fn detect_matches_target() {
        let detected = HostRuntime::detect();
        if cfg!(target_vendor = "apple") && cfg!(target_pointer_width = "64") {
            assert!(detected.is_some());
        } else if !cfg!(target_vendor = "apple") {
            assert!(detected.is_none());
        }
    }
}
