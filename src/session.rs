//! Owned setup state and the process-wide entry points built on it.
//!
//! A [`Session`] bundles everything a query needs: the [`Resolution`] of the layout table, the
//! memory source and the walk limits. It is produced once, in a normal execution context, and
//! only read afterwards. Queries through a session never allocate, lock or log.
//!
//! The no-argument [`crate::setup`] and two-argument [`crate::conforms`] entry points are backed
//! by a single process-wide [`GlobalSession`] stored in a [`OnceLock`]. [`initialize`] installs
//! one reading live memory, [`initialize_with`] one reading a caller-supplied source. Consumers
//! that can carry state should prefer an explicit session.
//!
//! # Examples
//!
//! ```rust
//! use protoscope::{
//!     config::ConformConfig, layout::resolve, memory::SyntheticImage, HostRuntime, Session,
//! };
//!
//! let config = ConformConfig::for_runtime(HostRuntime::Compact64);
//! let mut image = SyntheticImage::new(HostRuntime::Compact64.layout());
//! let protocol = image.protocol(&[])?;
//! let ty = image.type_descriptor(None, &[protocol])?;
//! let object = image.object(ty)?;
//!
//! let session = Session::new(resolve(&config), image.into_image()?, config.limits);
//! assert!(session.conforms(object, protocol));
//! # Ok::<(), protoscope::Error>(())
//! ```

use std::sync::OnceLock;

use crate::{
    config::{ConformConfig, WalkLimits},
    layout::{resolve, Resolution},
    memory::{Address, LiveMemory, MemorySource},
    walker::{Anomalies, ConformanceWalker, Verdict},
};

/// The process-wide session, reading whichever source it was initialized with.
pub type GlobalSession = Session<Box<dyn MemorySource>>;

static SESSION: OnceLock<GlobalSession> = OnceLock::new();

/// Everything a conformance query needs, captured once.
#[derive(Debug, Clone)]
pub struct Session<S: MemorySource = LiveMemory> {
    resolution: Resolution,
    source: S,
    limits: WalkLimits,
}

impl Session<LiveMemory> {
    /// Capture a session for the current process.
    ///
    /// Resolves the layout table described by `config` and reads the process through a
    /// [`LiveMemory`]. If the kernel read primitive is unavailable, every live read is refused
    /// and all queries answer `false`.
    ///
    /// ## Arguments
    /// * 'config' - Runtime selection and walk limits
    #[must_use]
    pub fn capture(config: &ConformConfig) -> Session<LiveMemory> {
        let resolution = resolve(config);

        if !LiveMemory::is_available() {
            log::warn!("the kernel refuses reads of this process, live queries answer false");
        }

        Session::new(resolution, LiveMemory::new(), config.limits)
    }
}

impl<S: MemorySource + 'static> Session<S> {
    /// The same session behind a boxed memory source.
    #[must_use]
    pub fn into_global(self) -> GlobalSession {
        Session {
            resolution: self.resolution,
            source: Box::new(self.source),
            limits: self.limits,
        }
    }
}

impl<S: MemorySource> Session<S> {
    /// Create a session from its parts.
    ///
    /// ## Arguments
    /// * 'resolution' - The layout resolution, possibly unresolved
    /// * 'source' - The memory every query reads
    /// * 'limits' - Bounds applied to every query
    pub fn new(resolution: Resolution, source: S, limits: WalkLimits) -> Session<S> {
        Session {
            resolution,
            source,
            limits,
        }
    }

    /// A walker over this session's memory, if the layout is resolved.
    pub fn walker(&self) -> Option<ConformanceWalker<'_, S>> {
        self.resolution
            .table()
            .map(|table| ConformanceWalker::new(table, &self.source, self.limits))
    }

    /// Returns `true` if the object at `object` conforms to the protocol at `protocol`.
    ///
    /// Always `false` while the layout is unresolved.
    pub fn conforms(&self, object: Address, protocol: Address) -> bool {
        self.walker()
            .is_some_and(|walker| walker.conforms(object, protocol))
    }

    /// Like [`Session::conforms`], also reporting irregularities.
    pub fn verdict(&self, object: Address, protocol: Address) -> Verdict {
        match self.walker() {
            Some(walker) => walker.verdict(object, protocol),
            None => Verdict::rejected(Anomalies::UNRESOLVED),
        }
    }

    /// Returns `true` if the type described at `type_descriptor` conforms to `protocol`.
    pub fn type_conforms(&self, type_descriptor: Address, protocol: Address) -> bool {
        self.walker()
            .is_some_and(|walker| walker.type_conforms(type_descriptor, protocol))
    }

    /// Returns `true` if the object at `object` satisfies the protocol composition at
    /// `composition`.
    pub fn conforms_to_composition(&self, object: Address, composition: Address) -> bool {
        self.walker()
            .is_some_and(|walker| walker.conforms_to_composition(object, composition))
    }

    /// The layout resolution this session answers with.
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// The memory source this session reads.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Bounds applied to every query.
    pub fn limits(&self) -> &WalkLimits {
        &self.limits
    }
}

/// Capture the process-wide session from `config`, unless one exists already.
///
/// Only the first call to this function or [`initialize_with`] installs anything; later calls
/// return the existing session unchanged, whatever they pass.
pub fn initialize(config: &ConformConfig) -> &'static GlobalSession {
    install(|| Session::capture(config).into_global())
}

/// Install a process-wide session reading `source`, unless one exists already.
///
/// For platforms where [`LiveMemory`] has no kernel read primitive, and for consumers with their
/// own validated read. When a session exists already, `source` is dropped.
///
/// ## Arguments
/// * 'config' - Runtime selection and walk limits
/// * 'source' - The memory every process-wide query reads
pub fn initialize_with<S: MemorySource + 'static>(
    config: &ConformConfig,
    source: S,
) -> &'static GlobalSession {
    install(|| Session::new(resolve(config), source, config.limits).into_global())
}

fn install(capture: impl FnOnce() -> GlobalSession) -> &'static GlobalSession {
    SESSION.get_or_init(|| {
        let session = capture();
        log::info!(
            "conformance session ready: {}",
            match session.resolution().runtime() {
                Some(runtime) => runtime.name(),
                None => "unresolved",
            }
        );
        session
    })
}

/// The process-wide session, if [`initialize`] or [`initialize_with`] has run.
pub fn global() -> Option<&'static GlobalSession> {
    SESSION.get()
}

pub(crate) fn conforms(object: Address, protocol: Address) -> bool {
    SESSION
        .get()
        .is_some_and(|session| session.conforms(object, protocol))
}
