//! Shared fixtures for unit tests.

use crate::{
    config::WalkLimits,
    layout::{HostRuntime, LayoutTable},
    memory::{Address, MemoryImage, SyntheticImage},
    walker::ConformanceWalker,
};

/// A two-level class hierarchy whose root declares a diamond of protocols.
///
/// ```text
///        top
///       /   \
///    left   right
///       \   /
///       bottom
///
/// base: [top]  <-  ty: []  <-  object
/// ```
pub struct Diamond {
    pub layout: LayoutTable,
    pub memory: MemoryImage,
    pub object: Address,
    pub ty: Address,
    pub base: Address,
    pub top: Address,
    pub left: Address,
    pub right: Address,
    pub bottom: Address,
    pub unrelated: Address,
}

impl Diamond {
    pub fn build(runtime: HostRuntime) -> Diamond {
        let mut image = SyntheticImage::new(runtime.layout());

        let bottom = image.protocol(&[]).unwrap();
        let left = image.protocol(&[bottom]).unwrap();
        let right = image.protocol(&[bottom]).unwrap();
        let top = image.protocol(&[left, right]).unwrap();
        let unrelated = image.protocol(&[]).unwrap();

        let base = image.type_descriptor(None, &[top]).unwrap();
        let ty = image.type_descriptor(Some(base), &[]).unwrap();
        let object = image.object(ty).unwrap();

        Diamond {
            layout: *image.layout(),
            memory: image.into_image().unwrap(),
            object,
            ty,
            base,
            top,
            left,
            right,
            bottom,
            unrelated,
        }
    }

    pub fn walker(&self) -> ConformanceWalker<'_, MemoryImage> {
        ConformanceWalker::new(&self.layout, &self.memory, WalkLimits::default())
    }
}

#[test]
fn diamond_fixture() {
    for runtime in [HostRuntime::Compact64, HostRuntime::Compact32, HostRuntime::ObjC2Arm64] {
        let diamond = Diamond::build(runtime);
        let walker = diamond.walker();

        for protocol in [diamond.top, diamond.left, diamond.right, diamond.bottom] {
            let verdict = walker.verdict(diamond.object, protocol);
            assert!(verdict.conforms(), "{runtime}");
            assert!(verdict.is_clean(), "{runtime}");
        }
        assert!(!walker.conforms(diamond.object, diamond.unrelated));
        assert!(walker.type_conforms(diamond.base, diamond.bottom));
        assert!(!walker.type_conforms(diamond.unrelated, diamond.bottom));
    }
}
