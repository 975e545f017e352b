#![no_main]

use libfuzzer_sys::fuzz_target;
use protoscope::{memory::MemoryImage, ConformanceWalker, HostRuntime, WalkLimits};
use strum::IntoEnumIterator;

const BASE: u64 = 0x1_0000;

fuzz_target!(|data: &[u8]| {
    // Two leading bytes pick the object and protocol offsets, the rest is memory
    if data.len() < 3 {
        return;
    }
    let object = BASE + u64::from(data[0]) * 8;
    let protocol = BASE + u64::from(data[1]) * 8;

    let Ok(memory) = MemoryImage::from_segment(BASE, data[2..].to_vec()) else {
        return;
    };

    for runtime in HostRuntime::iter() {
        let layout = runtime.layout();
        let walker = ConformanceWalker::new(&layout, &memory, WalkLimits::default());
        let _ = walker.verdict(object, protocol);
        let _ = walker.composition_verdict(object, protocol);
    }
});
