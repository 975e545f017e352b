//! # protoscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the protoscope library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all protoscope operations
pub use crate::Error;

/// The result type used throughout protoscope
pub use crate::Result;

// ================================================================================================
// Entry Points
// ================================================================================================

/// Process-wide setup and query
pub use crate::{conforms, setup};

/// Owned setup state
pub use crate::session::{GlobalSession, Session};

// ================================================================================================
// Configuration
// ================================================================================================

/// Top-level configuration and walk bounds
pub use crate::config::{ConformConfig, RuntimeSelection, WalkLimits};

// ================================================================================================
// Layout
// ================================================================================================

/// Layout tables and their building blocks
pub use crate::layout::{
    FieldHop, FieldPath, HostRuntime, LayoutTable, ListLayout, NestedList, RecordLayout, Width,
};

/// Layout resolution
pub use crate::layout::{resolve, Resolution, UnresolvedReason};

/// Metadata kind decoding
pub use crate::layout::{CompositionFlags, MetadataKind};

// ================================================================================================
// Memory
// ================================================================================================

/// Memory sources
pub use crate::memory::{
    Address, LiveMemory, MappedImage, MemoryImage, MemorySource, RegionMap, SyntheticImage,
};

// ================================================================================================
// Walker
// ================================================================================================

/// The conformance walker and its results
pub use crate::walker::{Anomalies, ConformanceWalker, Verdict};
