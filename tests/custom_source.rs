//! The process-wide entry points backed by a caller-supplied memory source.
//!
//! Everything shares one process-wide session, so this file holds a single test.

use protoscope::{config::ConformConfig, memory::SyntheticImage, session, HostRuntime};

#[test]
fn initialize_with_image() {
    let mut image = SyntheticImage::new(HostRuntime::Compact32.layout());
    let iterator = image.protocol(&[]).unwrap();
    let sequence = image.protocol(&[iterator]).unwrap();
    let unrelated = image.protocol(&[]).unwrap();
    let ty = image.type_descriptor(None, &[sequence]).unwrap();
    let object = image.object(ty).unwrap();
    let memory = image.into_image().unwrap();

    assert!(!protoscope::conforms(object, iterator));

    let config = ConformConfig::for_runtime(HostRuntime::Compact32);
    let installed = session::initialize_with(&config, memory) as *const _;
    assert!(protoscope::conforms(object, iterator));
    assert!(protoscope::conforms(object, sequence));
    assert!(!protoscope::conforms(object, unrelated));

    // The first session stays in place
    protoscope::setup();
    let global = session::global().unwrap();
    assert_eq!(global as *const _, installed);
    assert_eq!(global.resolution().runtime(), Some(HostRuntime::Compact32));
    assert!(protoscope::conforms(object, sequence));
}
