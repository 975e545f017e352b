//! Readable address ranges of the current process.
//!
//! A [`RegionMap`] is captured once, outside of any restricted context. It can back a
//! [`crate::memory::LiveMemory`] as a pre-filter that refuses reads outside known regions before
//! the kernel is asked. After construction it is immutable; lookups are binary searches over a
//! sorted slice and never allocate.
//!
//! On Linux the map is built from `/proc/self/maps`. Regions that are not readable, and regions
//! where a read may have side effects or fault despite being listed as readable (device mappings
//! and the kernel's `[vvar]` pages), are left out. Other platforms supply their own ranges through
//! [`RegionMap::from_regions`].
//!
//! The map is a snapshot. Memory mapped after the capture is unknown to it and memory unmapped
//! after the capture is still listed, so it narrows what may be read but never proves a read safe.

use std::fmt;

use bitflags::bitflags;

use crate::{
    memory::{range_end, Address},
    Error::OutOfBounds,
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Access permissions of a mapped region
    pub struct Protection : u8 {
        /// The region can be read
        const READ = 0b0001;
        /// The region can be written
        const WRITE = 0b0010;
        /// The region can be executed
        const EXEC = 0b0100;
        /// The mapping is shared with other processes
        const SHARED = 0b1000;
    }
}

/// One mapped address range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First address of the region
    pub start: Address,
    /// One past the last address of the region
    pub end: Address,
    /// Access permissions
    pub protection: Protection,
}

impl Region {
    /// Create a new region.
    ///
    /// ## Arguments
    /// * 'start' - First address
    /// * 'end' - One past the last address
    /// * 'protection' - Access permissions
    #[must_use]
    pub fn new(start: Address, end: Address, protection: Protection) -> Region {
        Region {
            start,
            end,
            protection,
        }
    }

    /// Create a readable region covering `len` bytes starting at `start`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range wraps the address space.
    pub fn readable(start: Address, len: usize) -> Result<Region> {
        let Some(end) = range_end(start, len) else {
            return Err(OutOfBounds);
        };
        Ok(Region::new(start, end, Protection::READ))
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if the region covers no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{:016x} {}{}{}",
            self.start,
            self.end,
            if self.protection.contains(Protection::READ) { 'r' } else { '-' },
            if self.protection.contains(Protection::WRITE) { 'w' } else { '-' },
            if self.protection.contains(Protection::EXEC) { 'x' } else { '-' },
        )
    }
}

/// Sorted, coalesced set of readable address ranges.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    /// Create an empty map. Every lookup against it fails.
    #[must_use]
    pub fn empty() -> RegionMap {
        RegionMap {
            regions: Vec::new(),
        }
    }

    /// Build a map from caller-supplied regions.
    ///
    /// Regions without [`Protection::READ`] and empty regions are dropped, the rest are sorted and
    /// touching regions are coalesced.
    ///
    /// ## Arguments
    /// * 'regions' - The mapped ranges of the address space
    ///
    /// # Errors
    /// Returns a [`crate::Error::Malformed`] error if a region ends before it starts or if two
    /// regions overlap.
    pub fn from_regions(regions: Vec<Region>) -> Result<RegionMap> {
        RegionMap::build(regions, false)
    }

    fn build(regions: Vec<Region>, skip_overlaps: bool) -> Result<RegionMap> {
        let mut readable = Vec::with_capacity(regions.len());
        for region in regions {
            if region.end < region.start {
                return Err(malformed_error!("Region {} ends before it starts", region));
            }
            if region.is_empty() || !region.protection.contains(Protection::READ) {
                continue;
            }
            readable.push(region);
        }
        readable.sort_by_key(|region| region.start);

        let mut coalesced: Vec<Region> = Vec::with_capacity(readable.len());
        for region in readable {
            match coalesced.last_mut() {
                Some(last) if last.end > region.start && skip_overlaps => {
                    log::warn!("skipping region {} overlapping {}", region, last);
                }
                Some(last) if last.end > region.start => {
                    return Err(malformed_error!(
                        "Region {} overlaps region {}",
                        region,
                        last
                    ));
                }
                Some(last) if last.end == region.start => {
                    last.end = region.end;
                    last.protection &= region.protection;
                }
                _ => coalesced.push(region),
            }
        }

        Ok(RegionMap { regions: coalesced })
    }

    /// Parse the text format of `/proc/<pid>/maps`.
    ///
    /// Each line has the form `start-end perms offset dev inode [path]`, with hexadecimal
    /// addresses and a four character permission field such as `r-xp`.
    ///
    /// The file is not read atomically, so a mapping created or moved while it is read can show up
    /// overlapping an earlier line. Such a line is skipped with a warning and the earlier region
    /// is kept.
    ///
    /// ## Arguments
    /// * 'text' - Content of a maps file
    ///
    /// # Errors
    /// Returns a [`crate::Error::Malformed`] error for lines that cannot be parsed.
    pub fn parse_proc_maps(text: &str) -> Result<RegionMap> {
        let mut regions = Vec::new();

        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let mut fields = line.split_whitespace();
            let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
                return Err(malformed_error!("Invalid maps line - {}", line));
            };
            let path = fields.nth(3).unwrap_or("");

            let Some((start, end)) = range.split_once('-') else {
                return Err(malformed_error!("Invalid address range - {}", range));
            };
            let (Ok(start), Ok(end)) = (
                u64::from_str_radix(start, 16),
                u64::from_str_radix(end, 16),
            ) else {
                return Err(malformed_error!("Invalid address range - {}", range));
            };

            if is_unsafe_mapping(path) {
                log::debug!("skipping mapping {} {}", range, path);
                continue;
            }

            regions.push(Region::new(start, end, parse_protection(perms)?));
        }

        RegionMap::build(regions, true)
    }

    /// Capture the readable regions of the current process.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if `/proc/self/maps` cannot be read, a
    /// [`crate::Error::Malformed`] error if it cannot be parsed, and
    /// [`crate::Error::NotSupported`] on platforms without a maps file.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn current_process() -> Result<RegionMap> {
        let text = std::fs::read_to_string("/proc/self/maps")?;
        let map = RegionMap::parse_proc_maps(&text)?;
        log::debug!("captured {} readable regions", map.len());
        Ok(map)
    }

    /// Capture the readable regions of the current process.
    ///
    /// # Errors
    /// Always returns [`crate::Error::NotSupported`] on this platform; supply the regions through
    /// [`RegionMap::from_regions`] instead.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn current_process() -> Result<RegionMap> {
        Err(crate::Error::NotSupported)
    }

    /// Returns `true` if `address..address + len` lies entirely in one readable region.
    #[must_use]
    pub fn contains(&self, address: Address, len: usize) -> bool {
        let Some(end) = range_end(address, len) else {
            return false;
        };

        let index = self.regions.partition_point(|region| region.start <= address);
        match index.checked_sub(1) {
            Some(index) => end <= self.regions[index].end,
            None => false,
        }
    }

    /// Number of coalesced regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns `true` if no region is readable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterate over the readable regions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }
}

fn parse_protection(perms: &str) -> Result<Protection> {
    let bytes = perms.as_bytes();
    if bytes.len() != 4 {
        return Err(malformed_error!("Invalid permissions - {}", perms));
    }

    let mut protection = Protection::empty();
    protection.set(Protection::READ, bytes[0] == b'r');
    protection.set(Protection::WRITE, bytes[1] == b'w');
    protection.set(Protection::EXEC, bytes[2] == b'x');
    protection.set(Protection::SHARED, bytes[3] == b's');
    Ok(protection)
}

/// Mappings that are listed readable but can fault or trigger device side effects on access.
fn is_unsafe_mapping(path: &str) -> bool {
    path.starts_with("/dev/") || path.starts_with("[vvar") || path == "[vsyscall]"
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d0c8a00000-55d0c8a02000 r--p 00000000 fd:01 1234   /usr/bin/cat
55d0c8a02000-55d0c8a07000 r-xp 00002000 fd:01 1234   /usr/bin/cat
55d0c8a07000-55d0c8a09000 r--p 00007000 fd:01 1234   /usr/bin/cat
55d0ca1b3000-55d0ca1d4000 rw-p 00000000 00:00 0      [heap]
7f1e2c000000-7f1e2c021000 ---p 00000000 00:00 0
7ffd1a5e0000-7ffd1a601000 rw-p 00000000 00:00 0      [stack]
7ffd1a7f0000-7ffd1a7f4000 r--p 00000000 00:00 0      [vvar]
7ffd1a7f4000-7ffd1a7f6000 r-xp 00000000 00:00 0      [vdso]
7f1e2d000000-7f1e2d001000 rw-s 00000000 00:05 77     /dev/dri/card0
";

    #[test]
    fn parse_maps() {
        let map = RegionMap::parse_proc_maps(MAPS).unwrap();

        // The three cat mappings coalesce, heap, stack and vdso stay separate
        assert_eq!(map.len(), 4);
        assert!(map.contains(0x55d0_c8a0_1ff8, 16));
        assert!(map.contains(0x55d0_ca1b_3000, 0x21000));
        assert!(!map.contains(0x55d0_ca1b_3000, 0x21001));
    }

    #[test]
    fn test_unreadable_and_special_mappings_skipped() {
        let map = RegionMap::parse_proc_maps(MAPS).unwrap();

        assert!(!map.contains(0x7f1e_2c00_0000, 8));
        assert!(!map.contains(0x7ffd_1a7f_0000, 8));
        assert!(!map.contains(0x7f1e_2d00_0000, 8));
        assert!(map.contains(0x7ffd_1a7f_4000, 8));
    }

    #[test]
    fn test_coalesced_protection_is_intersection() {
        let map = RegionMap::parse_proc_maps(MAPS).unwrap();
        let first = map.iter().next().unwrap();

        assert_eq!(first.start, 0x55d0_c8a0_0000);
        assert_eq!(first.end, 0x55d0_c8a0_9000);
        assert_eq!(first.protection, Protection::READ);
    }

    #[test]
    fn test_invalid_lines() {
        assert!(RegionMap::parse_proc_maps("zzzz-0000 r--p 0 0 0").is_err());
        assert!(RegionMap::parse_proc_maps("1000 r--p 0 0 0").is_err());
        assert!(RegionMap::parse_proc_maps("1000-2000 r-p 0 0 0").is_err());
        assert!(RegionMap::parse_proc_maps("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_from_regions() {
        let map = RegionMap::from_regions(vec![
            Region::readable(0x3000, 0x1000).unwrap(),
            Region::readable(0x1000, 0x1000).unwrap(),
            Region::new(0x2000, 0x3000, Protection::WRITE),
        ])
        .unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.contains(0x1000, 0x1000));
        assert!(!map.contains(0x1FF8, 16));
        assert!(!map.contains(0x2000, 1));
        assert!(map.contains(0x3FFF, 1));
        assert!(!map.contains(0x0, 1));
        assert!(!map.contains(u64::MAX, 1));
    }

    #[test]
    fn test_overlapping_regions_rejected() {
        let result = RegionMap::from_regions(vec![
            Region::readable(0x1000, 0x1000).unwrap(),
            Region::readable(0x1800, 0x1000).unwrap(),
        ]);
        assert!(result.is_err());

        let result = RegionMap::from_regions(vec![Region::new(0x2000, 0x1000, Protection::READ)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overlapping_maps_line_skipped() {
        // A mapping grew while the file was read
        let maps = "\
55d0ca1b3000-55d0ca1d4000 rw-p 00000000 00:00 0      [heap]
55d0ca1c0000-55d0ca1f0000 rw-p 00000000 00:00 0      [heap]
7ffd1a5e0000-7ffd1a601000 rw-p 00000000 00:00 0      [stack]
";
        let map = RegionMap::parse_proc_maps(maps).unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.contains(0x55d0_ca1b_3000, 0x21000));
        assert!(!map.contains(0x55d0_ca1d_4000, 8));
        assert!(map.contains(0x7ffd_1a5e_0000, 8));
    }

    #[test]
    fn test_empty_map() {
        let map = RegionMap::empty();
        assert!(map.is_empty());
        assert!(!map.contains(0x1000, 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_process() {
        let value = Box::new(0x5A5A_u64);
        let address = &*value as *const u64 as u64;

        let map = RegionMap::current_process().unwrap();
        assert!(!map.is_empty());
        assert!(map.contains(address, 8));
    }
}
