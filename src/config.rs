//! Configuration of layout resolution and walk limits.
//!
//! Configuration is organized into two structures:
//!
//! - [`ConformConfig`] - Top-level configuration container
//! - [`WalkLimits`] - Bounds that guarantee every query terminates quickly
//!
//! # Configuration Presets
//!
//! - [`WalkLimits::default()`] - Balanced bounds suitable for real class hierarchies
//! - [`WalkLimits::strict()`] - Tight bounds for crash handlers with little time left
//! - [`WalkLimits::thorough()`] - Generous bounds for offline inspection of dumps
//!
//! # Environment
//!
//! [`ConformConfig::from_env`] honours the following variables, read once during setup:
//!
//! - `PROTOSCOPE_RUNTIME` - Host runtime name (see [`crate::HostRuntime`]), overriding detection
//! - `PROTOSCOPE_MAX_HOPS` - Maximum superclass hops
//! - `PROTOSCOPE_MAX_DEPTH` - Maximum incorporated-interface nesting depth
//!
//! # Example
//!
//! ```rust
//! use protoscope::{config::{ConformConfig, RuntimeSelection, WalkLimits}, HostRuntime};
//!
//! let config = ConformConfig {
//!     runtime: RuntimeSelection::Fixed(HostRuntime::Compact64),
//!     limits: WalkLimits::strict().with_max_superclass_hops(16),
//! };
//! assert_eq!(config.limits.max_superclass_hops, 16);
//! ```

use crate::layout::HostRuntime;

/// Name of the environment variable overriding the host runtime.
pub const ENV_RUNTIME: &str = "PROTOSCOPE_RUNTIME";
/// Name of the environment variable overriding [`WalkLimits::max_superclass_hops`].
pub const ENV_MAX_HOPS: &str = "PROTOSCOPE_MAX_HOPS";
/// Name of the environment variable overriding [`WalkLimits::max_nested_depth`].
pub const ENV_MAX_DEPTH: &str = "PROTOSCOPE_MAX_DEPTH";

/// Capacity of the walker's fixed-size stack of nested conformance lists.
///
/// [`WalkLimits::max_nested_depth`] is clamped to this value.
pub const NESTED_STACK_CAPACITY: usize = 32;

/// How the host runtime layout is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeSelection {
    /// Use the runtime the current build targets
    #[default]
    Detect,
    /// Use this runtime regardless of the build target
    Fixed(HostRuntime),
    /// Resolve nothing; every query answers `false`
    Disabled,
}

/// Bounds applied to every conformance query.
///
/// Exceeding any bound ends the affected branch of the walk and counts as "no conformance
/// found" for it. The bounds replace timeouts, which are unavailable in restricted contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimits {
    /// Maximum number of superclass pointers followed from the object's own type.
    pub max_superclass_hops: usize,

    /// Maximum nesting depth of incorporated interface lists below a declared conformance.
    ///
    /// Clamped to [`NESTED_STACK_CAPACITY`].
    pub max_nested_depth: usize,

    /// Maximum record count a single conformance list may declare.
    ///
    /// A list declaring more records is treated as corrupt and skipped entirely.
    pub max_list_entries: usize,

    /// Maximum number of conformance records inspected by one query.
    pub max_records_visited: usize,
}

impl Default for WalkLimits {
    fn default() -> Self {
        WalkLimits {
            max_superclass_hops: 128,
            max_nested_depth: 16,
            max_list_entries: 4096,
            max_records_visited: 1 << 16,
        }
    }
}

impl WalkLimits {
    /// Create limits with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight bounds for crash handlers.
    #[must_use]
    pub fn strict() -> Self {
        WalkLimits {
            max_superclass_hops: 32,
            max_nested_depth: 8,
            max_list_entries: 512,
            max_records_visited: 4096,
        }
    }

    /// Generous bounds for offline inspection.
    #[must_use]
    pub fn thorough() -> Self {
        WalkLimits {
            max_superclass_hops: 1024,
            max_nested_depth: NESTED_STACK_CAPACITY,
            max_list_entries: 1 << 16,
            max_records_visited: 1 << 22,
        }
    }

    /// Set the maximum number of superclass hops.
    #[must_use]
    pub fn with_max_superclass_hops(mut self, hops: usize) -> Self {
        self.max_superclass_hops = hops;
        self
    }

    /// Set the maximum nesting depth, clamped to [`NESTED_STACK_CAPACITY`].
    #[must_use]
    pub fn with_max_nested_depth(mut self, depth: usize) -> Self {
        self.max_nested_depth = depth.min(NESTED_STACK_CAPACITY);
        self
    }

    /// Set the maximum record count of a single list.
    #[must_use]
    pub fn with_max_list_entries(mut self, entries: usize) -> Self {
        self.max_list_entries = entries;
        self
    }

    /// Set the maximum number of records visited per query.
    #[must_use]
    pub fn with_max_records_visited(mut self, records: usize) -> Self {
        self.max_records_visited = records;
        self
    }

    /// The nesting depth actually usable by the walker.
    #[must_use]
    pub fn effective_nested_depth(&self) -> usize {
        self.max_nested_depth.min(NESTED_STACK_CAPACITY)
    }
}

/// Top-level configuration consumed by setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConformConfig {
    /// How the host runtime layout is chosen.
    pub runtime: RuntimeSelection,

    /// Bounds applied to every query.
    pub limits: WalkLimits,
}

impl ConformConfig {
    /// Configuration for a specific runtime with default limits.
    #[must_use]
    pub fn for_runtime(runtime: HostRuntime) -> Self {
        ConformConfig {
            runtime: RuntimeSelection::Fixed(runtime),
            limits: WalkLimits::default(),
        }
    }

    /// Configuration from the process environment.
    ///
    /// Unparsable values are logged and ignored, except for an unknown runtime name, which
    /// disables resolution rather than falling back to detection.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration from an arbitrary key lookup, using the same keys as
    /// [`ConformConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ConformConfig::default();

        if let Some(name) = lookup(ENV_RUNTIME) {
            config.runtime = match HostRuntime::from_name(&name) {
                Ok(runtime) => RuntimeSelection::Fixed(runtime),
                Err(error) => {
                    log::warn!("{}: {}, disabling", ENV_RUNTIME, error);
                    RuntimeSelection::Disabled
                }
            };
        }

        if let Some(hops) = parse_usize(&lookup, ENV_MAX_HOPS) {
            config.limits = config.limits.with_max_superclass_hops(hops);
        }
        if let Some(depth) = parse_usize(&lookup, ENV_MAX_DEPTH) {
            config.limits = config.limits.with_max_nested_depth(depth);
        }

        config
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)?;
    match value.trim().parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            log::warn!("{}: ignoring '{}' - {}", key, value, error);
            None
        }
    }
}
