use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors only ever surface from setup-time and construction-time operations: resolving a
/// [`crate::layout::LayoutTable`], capturing a [`crate::memory::RegionMap`], opening a
/// [`crate::memory::MappedImage`] or parsing configuration. The conformance queries themselves
/// never return an error; every anomaly they encounter degrades to a `false` answer.
///
/// # Error Categories
///
/// ## Layout Errors
/// - [`Error::Malformed`] - A layout table or memory description is inconsistent
/// - [`Error::NotSupported`] - The host runtime has no known layout
/// - [`Error::UnknownRuntime`] - A runtime name could not be parsed
///
/// ## Memory Errors
/// - [`Error::OutOfBounds`] - A range does not fit the addressable space
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust
/// use protoscope::{Error, HostRuntime};
///
/// match "objc2-ppc".parse::<HostRuntime>() {
///     Ok(runtime) => println!("runtime {}", runtime),
///     Err(error) => println!("{}", Error::UnknownRuntime(error.to_string())),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A structure description is inconsistent and could not be used.
    ///
    /// The error includes the source location where the problem was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A range would wrap around or exceed the addressable space.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The host runtime of this process has no known metadata layout.
    #[error("The host runtime is not supported")]
    NotSupported,

    /// A host runtime name could not be recognised.
    #[error("Unknown host runtime - {0}")]
    UnknownRuntime(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised while reading `/proc/self/maps` or mapping dump files.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
