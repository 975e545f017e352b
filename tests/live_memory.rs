//! Queries against the memory of the running test process, through owned sessions.
#![cfg(all(
    any(target_os = "linux", target_os = "android", target_vendor = "apple"),
    target_pointer_width = "64"
))]

use std::mem::{offset_of, size_of};

use protoscope::{config::ConformConfig, walker::Anomalies, HostRuntime, Session};

/// A compact 64-bit hierarchy: one object, its type, one conformance and two protocols.
#[repr(C)]
struct Hierarchy {
    object: u64,
    kind: u64,
    superclass: u64,
    conformances: u64,
    count: u32,
    _pad: u32,
    record: [u64; 2],
    protocol: [u64; 4],
    unrelated: [u64; 4],
}

impl Hierarchy {
    /// Lays the hierarchy out at `base`, which must be where it ends up in memory.
    fn at(base: u64) -> Hierarchy {
        Hierarchy {
            object: base + offset_of!(Hierarchy, kind) as u64,
            kind: 0,
            superclass: 0,
            conformances: base + offset_of!(Hierarchy, count) as u64,
            count: 1,
            _pad: 0,
            record: [base + offset_of!(Hierarchy, protocol) as u64, 0],
            protocol: [0; 4],
            unrelated: [0; 4],
        }
    }

    fn object(base: u64) -> u64 {
        base
    }

    fn protocol(base: u64) -> u64 {
        base + offset_of!(Hierarchy, protocol) as u64
    }

    fn unrelated(base: u64) -> u64 {
        base + offset_of!(Hierarchy, unrelated) as u64
    }
}

fn session() -> Session {
    Session::capture(&ConformConfig::for_runtime(HostRuntime::Compact64))
}

#[test]
fn objects_allocated_after_capture() {
    let session = session();

    // A large allocation gets a mapping of its own, created after the session
    let mut arena = vec![0u64; 8 << 20];
    let base = arena.as_mut_ptr() as u64;
    // SAFETY: the arena is far larger than one hierarchy and suitably aligned.
    unsafe { std::ptr::write(arena.as_mut_ptr().cast::<Hierarchy>(), Hierarchy::at(base)) };

    let verdict = session.verdict(Hierarchy::object(base), Hierarchy::protocol(base));
    assert!(verdict.conforms());
    assert!(verdict.is_clean());
    assert!(!session.conforms(Hierarchy::object(base), Hierarchy::unrelated(base)));

    let mut boxed = Box::new(Hierarchy::at(0));
    let address = &*boxed as *const Hierarchy as u64;
    *boxed = Hierarchy::at(address);
    assert!(session.conforms(Hierarchy::object(address), Hierarchy::protocol(address)));
}

#[test]
fn released_mapping() {
    let len = size_of::<Hierarchy>().next_multiple_of(4096);
    // SAFETY: a fresh private anonymous mapping, only touched through the returned pointer.
    let pointer = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    assert_ne!(pointer, libc::MAP_FAILED);
    let base = pointer as u64;
    // SAFETY: the mapping is writable, page aligned and at least one hierarchy long.
    unsafe { std::ptr::write(pointer.cast::<Hierarchy>(), Hierarchy::at(base)) };

    let session = session();
    let object = Hierarchy::object(base);
    let protocol = Hierarchy::protocol(base);
    assert!(session.conforms(object, protocol));

    // SAFETY: nothing in this test reads the mapping directly after this point.
    assert_eq!(unsafe { libc::mprotect(pointer, len, libc::PROT_NONE) }, 0);
    let verdict = session.verdict(object, protocol);
    assert!(!verdict.conforms());
    assert_eq!(verdict.anomalies(), Anomalies::INVALID_READ);

    // SAFETY: as above.
    assert_eq!(unsafe { libc::munmap(pointer, len) }, 0);
    assert!(!session.conforms(object, protocol));
    assert!(!session.type_conforms(base + 8, protocol));
}
