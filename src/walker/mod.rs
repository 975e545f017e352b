//! The conformance walker.
//!
//! [`ConformanceWalker`] answers "does this object's type, or any of its ancestors, declare
//! conformance to this protocol, directly or through protocols those conformances
//! incorporate?" by reading raw metadata through a [`MemorySource`], interpreted with a
//! [`LayoutTable`].
//!
//! # Traversal
//!
//! 1. The object's type descriptor is loaded from its header.
//! 2. The superclass chain is followed from that type, at most
//!    [`WalkLimits::max_superclass_hops`] pointers deep. Cycles are detected with Brent's
//!    algorithm in constant space.
//! 3. At every type, the declared conformance list is scanned. Each record's interface is compared
//!    to the target, then the list of interfaces it incorporates is scanned the same way, depth
//!    first, on a fixed-size stack of [`NESTED_STACK_CAPACITY`] frames.
//!
//! The first match ends the query. Every read that fails, every list that is implausibly long and
//! every bound that is reached abandons only the branch it occurred in and is recorded in the
//! [`Verdict`]'s [`Anomalies`].
//!
//! # Restricted Contexts
//!
//! A query allocates nothing, takes no locks and calls nothing but
//! [`MemorySource::read_exact`]. It is safe to run from a signal handler as long as the memory
//! source is.
//!
//! # Examples
//!
//! ```rust
//! use protoscope::{
//!     config::WalkLimits, memory::SyntheticImage, ConformanceWalker, HostRuntime,
//! };
//!
//! let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
//! let equatable = image.protocol(&[])?;
//! let hashable = image.protocol(&[equatable])?;
//! let base = image.type_descriptor(None, &[hashable])?;
//! let derived = image.type_descriptor(Some(base), &[])?;
//! let object = image.object(derived)?;
//!
//! let layout = *image.layout();
//! let memory = image.into_image()?;
//! let walker = ConformanceWalker::new(&layout, &memory, WalkLimits::default());
//!
//! assert!(walker.conforms(object, hashable));
//! assert!(walker.conforms(object, equatable));
//! assert!(!walker.conforms(object, 0));
//! # Ok::<(), protoscope::Error>(())
//! ```

mod verdict;

pub use verdict::{Anomalies, Verdict};

use crate::{
    config::{WalkLimits, NESTED_STACK_CAPACITY},
    layout::{field_address, CompositionFlags, LayoutTable, MetadataKind, NestedList},
    memory::{Address, MemorySource},
};

/// Per-query bookkeeping.
struct Trace {
    anomalies: Anomalies,
    records_left: usize,
}

impl Trace {
    fn new(limits: &WalkLimits) -> Trace {
        Trace {
            anomalies: Anomalies::empty(),
            records_left: limits.max_records_visited,
        }
    }

    fn flag(&mut self, anomaly: Anomalies) {
        self.anomalies |= anomaly;
    }

    fn exhausted(&self) -> bool {
        self.anomalies.contains(Anomalies::BUDGET_EXHAUSTED)
    }

    fn finish(self, conforms: bool) -> Verdict {
        Verdict::new(conforms, self.anomalies)
    }
}

/// One conformance list being scanned.
#[derive(Clone, Copy)]
struct Frame {
    list: Address,
    next: u64,
    count: u64,
}

impl Frame {
    const EMPTY: Frame = Frame {
        list: 0,
        next: 0,
        count: 0,
    };
}

/// Walks raw runtime metadata to answer conformance queries.
///
/// A walker borrows its layout table and memory source and holds no other state; it is cheap to
/// create per query and can be shared across threads when the source can.
pub struct ConformanceWalker<'a, S: MemorySource + ?Sized> {
    layout: &'a LayoutTable,
    source: &'a S,
    limits: WalkLimits,
}

impl<'a, S: MemorySource + ?Sized> ConformanceWalker<'a, S> {
    /// Create a walker.
    ///
    /// ## Arguments
    /// * 'layout' - The validated layout table of the inspected runtime
    /// * 'source' - The validated read primitive
    /// * 'limits' - Bounds applied to every query
    pub fn new(layout: &'a LayoutTable, source: &'a S, limits: WalkLimits) -> Self {
        ConformanceWalker {
            layout,
            source,
            limits,
        }
    }

    /// The bounds applied to every query.
    pub fn limits(&self) -> &WalkLimits {
        &self.limits
    }

    /// Returns `true` if the object at `object` conforms to the protocol at `protocol`.
    pub fn conforms(&self, object: Address, protocol: Address) -> bool {
        self.verdict(object, protocol).conforms()
    }

    /// Like [`ConformanceWalker::conforms`], also reporting irregularities.
    pub fn verdict(&self, object: Address, protocol: Address) -> Verdict {
        if object == 0 || protocol == 0 {
            return Verdict::rejected(Anomalies::NULL_ADDRESS);
        }

        let mut trace = Trace::new(&self.limits);
        let Some(type_descriptor) = self.type_of(object, &mut trace) else {
            return trace.finish(false);
        };

        let found = self.search_hierarchy(type_descriptor, protocol, &mut trace);
        trace.finish(found)
    }

    /// Returns `true` if the type described at `type_descriptor` conforms to `protocol`.
    pub fn type_conforms(&self, type_descriptor: Address, protocol: Address) -> bool {
        self.type_verdict(type_descriptor, protocol).conforms()
    }

    /// Like [`ConformanceWalker::type_conforms`], also reporting irregularities.
    pub fn type_verdict(&self, type_descriptor: Address, protocol: Address) -> Verdict {
        if type_descriptor == 0 || protocol == 0 {
            return Verdict::rejected(Anomalies::NULL_ADDRESS);
        }

        let mut trace = Trace::new(&self.limits);
        let found = self.search_hierarchy(type_descriptor, protocol, &mut trace);
        trace.finish(found)
    }

    /// Returns `true` if the object at `object` satisfies every requirement of the protocol
    /// composition at `composition`.
    pub fn conforms_to_composition(&self, object: Address, composition: Address) -> bool {
        self.composition_verdict(object, composition).conforms()
    }

    /// Like [`ConformanceWalker::conforms_to_composition`], also reporting irregularities.
    ///
    /// Every protocol listed by the composition must be conformed to, and a superclass
    /// constraint, if present, must appear in the object's superclass chain. A well-formed
    /// composition requiring nothing is satisfied by every object.
    pub fn composition_verdict(&self, object: Address, composition: Address) -> Verdict {
        if object == 0 || composition == 0 {
            return Verdict::rejected(Anomalies::NULL_ADDRESS);
        }
        let Some(encoding) = self.layout.composition else {
            return Verdict::rejected(Anomalies::NOT_A_COMPOSITION);
        };

        let mut trace = Trace::new(&self.limits);
        let layout = self.layout;
        let word = layout.pointer_width.bytes();

        let Some(kind) = field_address(composition, encoding.kind_offset)
            .and_then(|address| layout.read_word(self.source, address))
        else {
            trace.flag(Anomalies::INVALID_READ);
            return trace.finish(false);
        };
        if MetadataKind::from_raw(kind) != MetadataKind::Existential {
            trace.flag(Anomalies::NOT_A_COMPOSITION);
            return trace.finish(false);
        }

        let header = field_address(composition, encoding.flags_offset)
            .and_then(|address| layout.read_u32(self.source, address))
            .zip(
                field_address(composition, encoding.count_offset)
                    .and_then(|address| layout.read_u32(self.source, address)),
            );
        let Some((flags, count)) = header else {
            trace.flag(Anomalies::INVALID_READ);
            return trace.finish(false);
        };
        let flags = CompositionFlags::from_bits_retain(flags);
        if (count as usize) > self.limits.max_list_entries {
            trace.flag(Anomalies::LIST_TOO_LONG);
            return trace.finish(false);
        }

        let has_superclass = flags.contains(CompositionFlags::HAS_SUPERCLASS);
        if count == 0 && !has_superclass {
            return trace.finish(true);
        }

        let Some(type_descriptor) = self.type_of(object, &mut trace) else {
            return trace.finish(false);
        };

        let Some(mut cursor) = field_address(composition, encoding.trailing_offset) else {
            trace.flag(Anomalies::INVALID_READ);
            return trace.finish(false);
        };
        if has_superclass {
            let Some(superclass) = layout.read_pointer(self.source, cursor) else {
                trace.flag(Anomalies::INVALID_READ);
                return trace.finish(false);
            };
            if superclass != 0 && !self.inherits_from(type_descriptor, superclass, &mut trace) {
                return trace.finish(false);
            }
            let Some(next) = field_address(cursor, word) else {
                trace.flag(Anomalies::INVALID_READ);
                return trace.finish(false);
            };
            cursor = next;
        }

        for index in 0..count as usize {
            let protocol = index
                .checked_mul(word)
                .and_then(|offset| field_address(cursor, offset))
                .and_then(|address| layout.read_pointer(self.source, address))
                .map(|reference| reference & encoding.protocol_mask);

            match protocol {
                Some(0) => {
                    trace.flag(Anomalies::NULL_ADDRESS);
                    return trace.finish(false);
                }
                Some(protocol) => {
                    if !self.search_hierarchy(type_descriptor, protocol, &mut trace) {
                        return trace.finish(false);
                    }
                }
                None => {
                    trace.flag(Anomalies::INVALID_READ);
                    return trace.finish(false);
                }
            }
        }

        trace.finish(true)
    }

    /// Loads the type descriptor of `object`.
    fn type_of(&self, object: Address, trace: &mut Trace) -> Option<Address> {
        match self
            .layout
            .follow(self.source, object, &self.layout.object_type)
        {
            Some(0) => {
                trace.flag(Anomalies::NULL_TYPE);
                None
            }
            Some(type_descriptor) => Some(type_descriptor),
            None => {
                trace.flag(Anomalies::INVALID_READ);
                None
            }
        }
    }

    /// Returns `true` if `ancestor` is `type_descriptor` or one of its superclasses.
    fn inherits_from(&self, type_descriptor: Address, ancestor: Address, trace: &mut Trace) -> bool {
        let mut chain = Ancestors::new(self, type_descriptor);
        let found = chain.any(|current| current == ancestor);
        trace.flag(chain.anomalies);
        found
    }

    /// Scans the conformance lists of `type_descriptor` and all its ancestors for `target`.
    fn search_hierarchy(&self, type_descriptor: Address, target: Address, trace: &mut Trace) -> bool {
        let mut chain = Ancestors::new(self, type_descriptor);
        let mut found = false;

        for current in chain.by_ref() {
            match self
                .layout
                .follow(self.source, current, &self.layout.conformances)
            {
                Some(0) => {}
                Some(list) => {
                    if self.scan_list(list, target, trace) {
                        found = true;
                        break;
                    }
                }
                None => trace.flag(Anomalies::INVALID_READ),
            }

            if trace.exhausted() {
                break;
            }
        }

        trace.flag(chain.anomalies);
        found
    }

    /// Reads the header of the list at `list`, refusing unreadable and implausible lists.
    fn open_list(&self, list: Address, trace: &mut Trace) -> Option<Frame> {
        let count = field_address(list, self.layout.list.count_offset)
            .and_then(|address| self.layout.read_count(self.source, address));

        match count {
            None => {
                trace.flag(Anomalies::INVALID_READ);
                None
            }
            Some(0) => None,
            Some(count) if count > self.limits.max_list_entries as u64 => {
                trace.flag(Anomalies::LIST_TOO_LONG);
                None
            }
            Some(count) => Some(Frame {
                list,
                next: 0,
                count,
            }),
        }
    }

    /// Address of record `index` of the list at `list`.
    fn record_address(&self, list: Address, index: u64) -> Option<Address> {
        let entries = field_address(list, self.layout.list.entries_offset)?;
        let offset = index.checked_mul(self.layout.record.stride as u64)?;
        entries.checked_add(offset)
    }

    /// Depth-first scan of the list at `root` and every list nested below it.
    fn scan_list(&self, root: Address, target: Address, trace: &mut Trace) -> bool {
        let max_depth = self.limits.effective_nested_depth();
        let mut stack = [Frame::EMPTY; NESTED_STACK_CAPACITY + 1];
        let mut depth = 0;

        match self.open_list(root, trace) {
            Some(frame) => {
                stack[0] = frame;
                depth = 1;
            }
            None => return false,
        }

        while depth > 0 {
            let frame = &mut stack[depth - 1];
            if frame.next >= frame.count {
                depth -= 1;
                continue;
            }
            let index = frame.next;
            frame.next += 1;
            let list = frame.list;

            if trace.records_left == 0 {
                trace.flag(Anomalies::BUDGET_EXHAUSTED);
                return false;
            }
            trace.records_left -= 1;

            let Some(record) = self.record_address(list, index) else {
                trace.flag(Anomalies::INVALID_READ);
                continue;
            };
            let interface = field_address(record, self.layout.record.interface_offset)
                .and_then(|address| self.layout.read_pointer(self.source, address));
            let interface = match interface {
                Some(interface) => interface,
                None => {
                    trace.flag(Anomalies::INVALID_READ);
                    continue;
                }
            };

            if interface == target {
                return true;
            }
            if interface == 0 {
                continue;
            }

            let nested = match self.layout.record.nested {
                NestedList::None => continue,
                NestedList::InRecord(offset) => field_address(record, offset),
                NestedList::InInterface(offset) => field_address(interface, offset),
            }
            .and_then(|address| self.layout.read_pointer(self.source, address));

            match nested {
                Some(0) => {}
                Some(nested) => {
                    if depth > max_depth {
                        trace.flag(Anomalies::DEPTH_LIMIT);
                        continue;
                    }
                    if let Some(frame) = self.open_list(nested, trace) {
                        stack[depth] = frame;
                        depth += 1;
                    }
                }
                None => trace.flag(Anomalies::INVALID_READ),
            }
        }

        false
    }
}

/// The superclass chain of a type, the type itself included.
///
/// Stops at the root, at the first unreadable superclass pointer, after
/// [`WalkLimits::max_superclass_hops`] pointers, or when a cycle is detected.
struct Ancestors<'w, 'a, S: MemorySource + ?Sized> {
    walker: &'w ConformanceWalker<'a, S>,
    next: Address,
    hops: usize,
    tortoise: Address,
    power: usize,
    lambda: usize,
    anomalies: Anomalies,
}

impl<'w, 'a, S: MemorySource + ?Sized> Ancestors<'w, 'a, S> {
    fn new(walker: &'w ConformanceWalker<'a, S>, start: Address) -> Self {
        Ancestors {
            walker,
            next: start,
            hops: 0,
            tortoise: start,
            power: 1,
            lambda: 0,
            anomalies: Anomalies::empty(),
        }
    }
}

impl<S: MemorySource + ?Sized> Iterator for Ancestors<'_, '_, S> {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        let current = self.next;
        if current == 0 {
            return None;
        }

        let layout = self.walker.layout;
        self.next = match layout.follow(self.walker.source, current, &layout.superclass) {
            None => {
                self.anomalies |= Anomalies::INVALID_READ;
                0
            }
            Some(0) => 0,
            Some(_) if self.hops >= self.walker.limits.max_superclass_hops => {
                self.anomalies |= Anomalies::HOP_LIMIT;
                0
            }
            Some(superclass) if superclass == self.tortoise => {
                self.anomalies |= Anomalies::CYCLE;
                0
            }
            Some(superclass) => {
                self.hops += 1;
                self.lambda += 1;
                if self.lambda == self.power {
                    self.tortoise = superclass;
                    self.power *= 2;
                    self.lambda = 0;
                }
                superclass
            }
        };

        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::HostRuntime,
        memory::{MemoryImage, SyntheticImage},
    };

    fn walker<'a>(layout: &'a LayoutTable, memory: &'a MemoryImage) -> ConformanceWalker<'a, MemoryImage> {
        ConformanceWalker::new(layout, memory, WalkLimits::default())
    }

    #[test]
    fn direct_conformance() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocol = image.protocol(&[]).unwrap();
        let other = image.protocol(&[]).unwrap();
        let ty = image.type_descriptor(None, &[protocol]).unwrap();
        let object = image.object(ty).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let walker = walker(&layout, &memory);
        let verdict = walker.verdict(object, protocol);
        assert!(verdict.conforms());
        assert!(verdict.is_clean());
        assert!(!walker.conforms(object, other));
        assert!(walker.type_conforms(ty, protocol));
    }

    #[test]
    fn null_addresses() {
        let layout = HostRuntime::Compact64.layout();
        let memory = MemoryImage::new();
        let walker = walker(&layout, &memory);

        assert_eq!(
            walker.verdict(0, 0x1000),
            Verdict::rejected(Anomalies::NULL_ADDRESS)
        );
        assert_eq!(
            walker.verdict(0x1000, 0),
            Verdict::rejected(Anomalies::NULL_ADDRESS)
        );
        assert!(!walker.type_conforms(0, 0x1000));
        assert!(!walker.conforms_to_composition(0, 0x1000));
    }

    #[test]
    fn unreadable_object() {
        let layout = HostRuntime::Compact64.layout();
        let memory = MemoryImage::new();
        let verdict = walker(&layout, &memory).verdict(0xDEAD_0000, 0x1000);

        assert!(!verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::INVALID_READ);
    }

    #[test]
    fn null_type_descriptor() {
        let layout = HostRuntime::Compact64.layout();
        let memory = MemoryImage::from_segment(0x1000, vec![0; 16]).unwrap();
        let verdict = walker(&layout, &memory).verdict(0x1000, 0x2000);

        assert!(!verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::NULL_TYPE);
    }

    #[test]
    fn self_cycle_is_detected() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocol = image.protocol(&[]).unwrap();
        let ty = image.type_descriptor(None, &[]).unwrap();
        image.set_superclass(ty, ty).unwrap();
        let object = image.object(ty).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let verdict = walker(&layout, &memory).verdict(object, protocol);
        assert!(!verdict.conforms());
        assert!(verdict.anomalies().contains(Anomalies::CYCLE));
        assert!(!verdict.anomalies().contains(Anomalies::HOP_LIMIT));
    }

    #[test]
    fn long_cycle_is_detected_before_hop_limit() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocol = image.protocol(&[]).unwrap();
        let root = image.type_descriptor(None, &[]).unwrap();
        let mut leaf = root;
        for _ in 0..6 {
            leaf = image.type_descriptor(Some(leaf), &[]).unwrap();
        }
        image.set_superclass(root, leaf).unwrap();
        let object = image.object(leaf).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let verdict = walker(&layout, &memory).verdict(object, protocol);
        assert!(!verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::CYCLE);
    }

    #[test]
    fn hop_limit() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocol = image.protocol(&[]).unwrap();
        let root = image.type_descriptor(None, &[protocol]).unwrap();
        let mut leaf = root;
        for _ in 0..4 {
            leaf = image.type_descriptor(Some(leaf), &[]).unwrap();
        }
        let object = image.object(leaf).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let exact = ConformanceWalker::new(
            &layout,
            &memory,
            WalkLimits::default().with_max_superclass_hops(4),
        );
        assert!(exact.verdict(object, protocol).is_clean());
        assert!(exact.conforms(object, protocol));

        let short = ConformanceWalker::new(
            &layout,
            &memory,
            WalkLimits::default().with_max_superclass_hops(3),
        );
        let verdict = short.verdict(object, protocol);
        assert!(!verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::HOP_LIMIT);
    }

    #[test]
    fn depth_limit() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let bottom = image.protocol(&[]).unwrap();
        let mut top = bottom;
        for _ in 0..3 {
            top = image.protocol(&[top]).unwrap();
        }
        let ty = image.type_descriptor(None, &[top]).unwrap();
        let object = image.object(ty).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let deep = ConformanceWalker::new(
            &layout,
            &memory,
            WalkLimits::default().with_max_nested_depth(3),
        );
        assert!(deep.conforms(object, bottom));

        let shallow = ConformanceWalker::new(
            &layout,
            &memory,
            WalkLimits::default().with_max_nested_depth(2),
        );
        let verdict = shallow.verdict(object, bottom);
        assert!(!verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::DEPTH_LIMIT);
    }

    #[test]
    fn record_budget() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocols: Vec<Address> = (0..8).map(|_| image.protocol(&[]).unwrap()).collect();
        let ty = image.type_descriptor(None, &protocols).unwrap();
        let object = image.object(ty).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let limited = ConformanceWalker::new(
            &layout,
            &memory,
            WalkLimits::default().with_max_records_visited(4),
        );
        assert!(limited.conforms(object, protocols[3]));

        let verdict = limited.verdict(object, protocols[4]);
        assert!(!verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::BUDGET_EXHAUSTED);
    }

    #[test]
    fn oversized_list_skipped_but_ancestors_scanned() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocol = image.protocol(&[]).unwrap();
        let base = image.type_descriptor(None, &[protocol]).unwrap();
        let other = image.protocol(&[]).unwrap();
        let derived = image.type_descriptor(Some(base), &[other]).unwrap();
        let object = image.object(derived).unwrap();
        let layout = *image.layout();

        // Corrupt the derived type's list count
        let list = image.conformance_list(derived).unwrap();
        let mut memory = image.into_image().unwrap();
        memory.write(list, &u32::MAX.to_ne_bytes()).unwrap();

        let verdict = walker(&layout, &memory).verdict(object, protocol);
        assert!(verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::LIST_TOO_LONG);
    }

    #[test]
    fn dangling_list_skipped_but_ancestors_scanned() {
        let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
        let protocol = image.protocol(&[]).unwrap();
        let base = image.type_descriptor(None, &[protocol]).unwrap();
        let derived = image.type_descriptor(Some(base), &[]).unwrap();
        // Point the derived type's conformance list somewhere unmapped
        image.write_pointer(derived + 16, 0xBAD0_0000).unwrap();
        let object = image.object(derived).unwrap();
        let layout = *image.layout();
        let memory = image.into_image().unwrap();

        let verdict = walker(&layout, &memory).verdict(object, protocol);
        assert!(verdict.conforms());
        assert_eq!(verdict.anomalies(), Anomalies::INVALID_READ);
    }
}
