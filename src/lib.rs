// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'memory/live.rs' asks the kernel to copy bytes out of the current process
// - 'memory/mapped.rs' uses mmap to map a dump file into memory

//! # protoscope
//!
//! Answers one question about a live object without asking its runtime: does the object's type,
//! or any of its ancestors, declare conformance to a given protocol?
//!
//! The answer is computed by walking raw metadata in memory: the object header leads to a type
//! descriptor, the descriptor to its superclass and its conformance list, and every conformance
//! record to the protocol it names and the protocols that protocol incorporates. No dispatch
//! machinery is invoked, nothing is allocated, no lock is taken, and every read is validated
//! first. This makes the query usable where the runtime's own API is not: signal handlers,
//! crash reporters, instrumentation hooks and offline inspection of memory dumps.
//!
//! ## Features
//!
//! - **Signal-safe queries** - No allocation, locking, logging or unbounded loops in the query path
//! - **Validated reads** - Every access goes through a [`memory::MemorySource`]
//! - **Bounded work** - Hop, depth, list size and record budgets with cycle detection
//! - **Versioned layouts** - An explicit catalogue of host runtimes; unknown ones fail safe
//! - **Diagnostics** - [`Verdict`]s report every irregularity met on the way
//!
//! ## Quick Start
//!
//! Call [`setup`] once, at a safe point, then query from anywhere:
//!
//! ```rust,no_run
//! let object: u64 = 0x6000_0123_4560;
//! let protocol: u64 = 0x1_0000_8F20;
//!
//! protoscope::setup();
//! if protoscope::conforms(object, protocol) {
//!     println!("object conforms");
//! }
//! ```
//!
//! ### Explicit Sessions
//!
//! The two entry points share one process-wide [`Session`]. The same walk is available on owned
//! values, against any memory source:
//!
//! ```rust
//! use protoscope::prelude::*;
//!
//! let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
//! let sequence = image.protocol(&[])?;
//! let collection = image.protocol(&[sequence])?;
//! let array = image.type_descriptor(None, &[collection])?;
//! let object = image.object(array)?;
//!
//! let layout = *image.layout();
//! let memory = image.into_image()?;
//! let walker = ConformanceWalker::new(&layout, &memory, WalkLimits::strict());
//!
//! let verdict = walker.verdict(object, sequence);
//! assert!(verdict.conforms());
//! assert!(verdict.is_clean());
//! # Ok::<(), protoscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`layout`] - Layout tables, the runtime catalogue and resolution
//! - [`walker`] - The conformance walker and its verdicts
//! - [`memory`] - Validated memory sources: live process, snapshots, dump files, fixtures
//! - [`config`] - Walk limits and runtime selection
//! - [`Session`] - Owned setup state behind the process-wide entry points
//! - [`Error`] and [`Result`] - Errors of setup-time operations
//!
//! ## Error Handling
//!
//! Queries never fail: an unresolved layout, an unreadable address or an exceeded bound all
//! answer `false`. Only setup-time operations return [`Result`]:
//!
//! ```rust
//! use protoscope::{memory::MappedImage, Error};
//!
//! match MappedImage::new("/nonexistent/core.bin", 0x1000) {
//!     Ok(image) => println!("mapped {} bytes", image.len()),
//!     Err(Error::FileError(error)) => println!("cannot open dump: {}", error),
//!     Err(error) => println!("error: {}", error),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//!
//! # Fuzz the walker with arbitrary memory contents
//! cargo +nightly fuzz run conforms --release
//! ```
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Walk limits and runtime selection.
pub mod config;

/// Layout tables describing host runtime metadata.
pub mod layout;

/// Validated access to inspected memory.
pub mod memory;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use protoscope::prelude::*;
///
/// let config = ConformConfig::for_runtime(HostRuntime::Compact32);
/// assert!(resolve(&config).is_resolved());
/// ```
pub mod prelude;

/// Owned setup state and the process-wide session.
pub mod session;

/// The conformance walker.
pub mod walker;

/// `protoscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `protoscope` Error type
///
/// The error type of every setup-time operation. Queries never return it.
pub use error::Error;

pub use config::{ConformConfig, WalkLimits};
pub use layout::{HostRuntime, LayoutTable};
pub use session::{GlobalSession, Session};
pub use walker::{ConformanceWalker, Verdict};

/// Prepare the process-wide session.
///
/// Reads the configuration from the environment (see [`ConformConfig::from_env`]), resolves the
/// layout table and installs a [`memory::LiveMemory`] source for the current process. Must run in
/// a normal execution context before the first [`conforms`] call. Later calls do nothing.
///
/// Platforms without a kernel read primitive install their own source with
/// [`session::initialize_with`] instead.
pub fn setup() {
    session::initialize(&ConformConfig::from_env());
}

/// Returns `true` if the object at address `object` conforms to the protocol descriptor at
/// address `protocol`.
///
/// Answers `false` before [`setup`], when the host runtime is unknown, when either address is
/// zero, and whenever the walk cannot prove conformance. Safe to call from signal handlers.
///
/// ## Arguments
/// * 'object' - Address of the object instance
/// * 'protocol' - Address of the protocol descriptor
pub fn conforms(object: u64, protocol: u64) -> bool {
    session::conforms(object, protocol)
}
