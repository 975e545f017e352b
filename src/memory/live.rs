use crate::memory::{range_end, Address, MemorySource, RegionMap};

/// Reads the memory of the current process.
///
/// Every read is a copy performed by the kernel on behalf of the process: `process_vm_readv`
/// against the own pid on Linux and Android, `mach_vm_read_overwrite` against the own task on
/// Apple platforms. The kernel validates the source range at the time of the read and reports an
/// unmapped or inaccessible range as an error instead of raising a fault, so a dangling address
/// costs a failed branch and never a crash. Both calls are plain system calls: they do not
/// allocate or lock and are usable from signal handlers and crash hooks.
///
/// An optional [`RegionMap`] acts as a pre-filter. Ranges outside the map are refused without a
/// system call; ranges inside it are still read through the kernel, so a stale map can refuse
/// memory mapped after its capture but never lets a read fault.
///
/// Platforms without a kernel read primitive refuse every read. Consumers there supply their own
/// [`MemorySource`] through [`crate::session::initialize_with`].
///
/// # Examples
///
/// ```rust
/// use protoscope::memory::{io::read_le, LiveMemory, MemorySource};
///
/// let value = Box::new(0x1122_3344_u32);
/// let address = &*value as *const u32 as u64;
///
/// let memory = LiveMemory::new();
/// if LiveMemory::is_available() {
///     assert_eq!(read_le::<u32, _>(&memory, address), Some(u32::from_le(0x1122_3344)));
/// }
/// assert!(!memory.is_readable(0, 4));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LiveMemory {
    prefilter: Option<RegionMap>,
}

impl LiveMemory {
    /// Create a live memory source that reads through the kernel.
    #[must_use]
    pub fn new() -> LiveMemory {
        LiveMemory { prefilter: None }
    }

    /// Create a live memory source that refuses ranges outside `regions` before reading.
    ///
    /// ## Arguments
    /// * 'regions' - The address ranges worth asking the kernel about
    #[must_use]
    pub fn with_regions(regions: RegionMap) -> LiveMemory {
        LiveMemory {
            prefilter: Some(regions),
        }
    }

    /// A live memory source that refuses every read.
    #[must_use]
    pub fn unmapped() -> LiveMemory {
        LiveMemory::with_regions(RegionMap::empty())
    }

    /// The pre-filter applied before each read, if any.
    #[must_use]
    pub fn regions(&self) -> Option<&RegionMap> {
        self.prefilter.as_ref()
    }

    /// Returns `true` if the kernel read primitive works in this process.
    ///
    /// It can be missing on platforms without one, or blocked by a sandbox such as a seccomp
    /// filter. Reads through a [`LiveMemory`] are all refused in that case.
    #[must_use]
    pub fn is_available() -> bool {
        let marker = [0x5A_u8; 8];
        let mut out = [0_u8; 8];
        read_process(marker.as_ptr() as Address, &mut out).is_some() && out == marker
    }

    fn admits(&self, address: Address, len: usize) -> bool {
        match &self.prefilter {
            Some(regions) => regions.contains(address, len),
            None => range_end(address, len).is_some(),
        }
    }
}

impl MemorySource for LiveMemory {
    fn read_exact(&self, address: Address, out: &mut [u8]) -> Option<()> {
        if !self.admits(address, out.len()) {
            return None;
        }
        if out.is_empty() {
            return Some(());
        }
        read_process(address, out)
    }

    fn is_readable(&self, address: Address, len: usize) -> bool {
        if !self.admits(address, len) {
            return false;
        }

        let mut scratch = [0_u8; 256];
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(scratch.len());
            // `admits` ruled out wrapping
            let start = address + offset as u64;
            if read_process(start, &mut scratch[..chunk]).is_none() {
                return false;
            }
            offset += chunk;
        }
        true
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn read_process(address: Address, out: &mut [u8]) -> Option<()> {
    let local = libc::iovec {
        iov_base: out.as_mut_ptr().cast(),
        iov_len: out.len(),
    };
    let remote = libc::iovec {
        iov_base: usize::try_from(address).ok()? as *mut libc::c_void,
        iov_len: out.len(),
    };

    // SAFETY: `local` describes the exclusively borrowed `out`. The kernel checks `remote` and
    // fails with EFAULT if any byte of it is not readable.
    let copied = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
    (usize::try_from(copied).ok()? == out.len()).then_some(())
}

#[cfg(target_vendor = "apple")]
mod mach {
    extern "C" {
        pub static mach_task_self_: libc::c_uint;

        pub fn mach_vm_read_overwrite(
            target_task: libc::c_uint,
            address: u64,
            size: u64,
            data: u64,
            outsize: *mut u64,
        ) -> libc::c_int;
    }

    pub const KERN_SUCCESS: libc::c_int = 0;
}

#[cfg(target_vendor = "apple")]
fn read_process(address: Address, out: &mut [u8]) -> Option<()> {
    let size = u64::try_from(out.len()).ok()?;
    let mut copied = 0_u64;

    // SAFETY: `out` is exclusively borrowed and `size` bytes long. The kernel checks the source
    // range and returns an error code if any byte of it is not readable.
    let status = unsafe {
        mach::mach_vm_read_overwrite(
            mach::mach_task_self_,
            address,
            size,
            out.as_mut_ptr() as u64,
            &mut copied,
        )
    };
    (status == mach::KERN_SUCCESS && copied == size).then_some(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
fn read_process(_address: Address, _out: &mut [u8]) -> Option<()> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Region;

    #[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
    #[test]
    fn live_reads() {
        assert!(LiveMemory::is_available());

        let buffer: Box<[u8]> = (0u8..32).collect();
        let base = buffer.as_ptr() as u64;
        let memory = LiveMemory::new();

        let mut out = [0u8; 4];
        memory.read_exact(base + 8, &mut out).unwrap();
        assert_eq!(out, [8, 9, 10, 11]);
        assert!(memory.is_readable(base, 32));

        assert!(memory.read_exact(0, &mut out).is_none());
        assert!(memory.read_exact(u64::MAX - 1, &mut out).is_none());
        assert!(!memory.is_readable(0x10, 8));
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
    #[test]
    fn test_regions_narrow_reads() {
        let buffer: Box<[u8]> = (0u8..32).collect();
        let base = buffer.as_ptr() as u64;

        let regions = RegionMap::from_regions(vec![Region::readable(base, 16).unwrap()]).unwrap();
        let memory = LiveMemory::with_regions(regions);

        let mut out = [0u8; 4];
        memory.read_exact(base + 12, &mut out).unwrap();
        assert_eq!(out, [12, 13, 14, 15]);

        // Readable, but outside the pre-filter
        assert!(memory.read_exact(base + 14, &mut out).is_none());
        assert!(!memory.is_readable(base + 16, 1));
        assert!(memory.regions().is_some());
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
    #[test]
    fn test_released_mapping_is_refused() {
        let page = 4096;
        // SAFETY: a fresh private anonymous mapping, only touched through the returned pointer.
        let pointer = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                page,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        assert_ne!(pointer, libc::MAP_FAILED);
        // SAFETY: the mapping is `page` bytes long and writable.
        unsafe { std::ptr::write_bytes(pointer.cast::<u8>(), 0xC3, page) };

        let address = pointer as u64;
        let memory = LiveMemory::new();
        let mut out = [0u8; 8];
        memory.read_exact(address + 64, &mut out).unwrap();
        assert_eq!(out, [0xC3; 8]);

        // SAFETY: the mapping is not referenced by any Rust value.
        assert_eq!(unsafe { libc::mprotect(pointer, page, libc::PROT_NONE) }, 0);
        assert!(memory.read_exact(address + 64, &mut out).is_none());

        // SAFETY: as above.
        assert_eq!(unsafe { libc::munmap(pointer, page) }, 0);
        assert!(memory.read_exact(address + 64, &mut out).is_none());
        assert!(!memory.is_readable(address, 8));
    }

    #[test]
    fn test_unmapped_refuses_everything() {
        let value = 7_u64;
        let address = &value as *const u64 as u64;

        let memory = LiveMemory::unmapped();
        let mut out = [0u8; 8];
        assert!(memory.read_exact(address, &mut out).is_none());
        assert!(memory.read_exact(0, &mut out).is_none());
        assert!(!memory.is_readable(address, 8));
    }
}
