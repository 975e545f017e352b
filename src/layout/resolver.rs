//! Selection and validation of the layout table.
//!
//! [`resolve`] turns a [`ConformConfig`] into a [`Resolution`]: either a validated
//! [`LayoutTable`] for a known [`HostRuntime`], or [`Resolution::Unresolved`] with the reason.
//! Resolution never fails loudly; an unresolved layout simply makes every query answer `false`.
//!
//! This runs during setup, in a normal execution context, and is the only place where layout
//! problems are logged.

use std::fmt;

use crate::{
    config::{ConformConfig, RuntimeSelection},
    layout::{HostRuntime, LayoutTable},
};

/// Why no layout table could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The build target has no entry in the runtime catalogue
    UnknownRuntime,
    /// Resolution was disabled by configuration
    Disabled,
    /// The catalogue entry failed validation
    InvalidLayout,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::UnknownRuntime => write!(f, "unknown host runtime"),
            UnresolvedReason::Disabled => write!(f, "disabled by configuration"),
            UnresolvedReason::InvalidLayout => write!(f, "layout failed validation"),
        }
    }
}

/// Outcome of layout resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A validated layout for a known runtime
    Resolved {
        /// The runtime the table belongs to
        runtime: HostRuntime,
        /// The validated layout table
        table: LayoutTable,
    },
    /// No usable layout; queries answer `false`
    Unresolved(UnresolvedReason),
}

impl Resolution {
    /// The layout table, if resolution succeeded.
    #[must_use]
    pub fn table(&self) -> Option<&LayoutTable> {
        match self {
            Resolution::Resolved { table, .. } => Some(table),
            Resolution::Unresolved(_) => None,
        }
    }

    /// The resolved runtime, if resolution succeeded.
    #[must_use]
    pub fn runtime(&self) -> Option<HostRuntime> {
        match self {
            Resolution::Resolved { runtime, .. } => Some(*runtime),
            Resolution::Unresolved(_) => None,
        }
    }

    /// Returns `true` if a layout table is available.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// Resolve the layout table described by `config`.
///
/// ## Arguments
/// * 'config' - Runtime selection to honour
#[must_use]
pub fn resolve(config: &ConformConfig) -> Resolution {
    let runtime = match config.runtime {
        RuntimeSelection::Fixed(runtime) => runtime,
        RuntimeSelection::Detect => match HostRuntime::detect() {
            Some(runtime) => runtime,
            None => {
                log::info!("no metadata layout known for this target; conformance queries disabled");
                return Resolution::Unresolved(UnresolvedReason::UnknownRuntime);
            }
        },
        RuntimeSelection::Disabled => {
            log::info!("layout resolution disabled; conformance queries disabled");
            return Resolution::Unresolved(UnresolvedReason::Disabled);
        }
    };

    resolve_runtime(runtime)
}

/// Resolve the compiled-in layout table of `runtime`.
#[must_use]
pub fn resolve_runtime(runtime: HostRuntime) -> Resolution {
    let table = runtime.layout();
    if let Err(error) = table.validate() {
        log::warn!("layout for {} rejected: {}", runtime, error);
        return Resolution::Unresolved(UnresolvedReason::InvalidLayout);
    }

    log::debug!("resolved metadata layout for {}", runtime);
    Resolution::Resolved { runtime, table }
}
