use thiserror::Error;

use crate::instruction::Architecture;

macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structural {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Unresolved lookups are *not* errors anywhere in this crate: a key-function slot that
/// cannot be located stays at its zero sentinel, and a field or call target that cannot
/// be resolved degrades to a placeholder in the output. The variants below cover the
/// cases where analysis genuinely cannot continue.
///
/// # Error Categories
///
/// - [`Error::Decode`] - the instruction stream ended unexpectedly or produced garbage;
///   caught at the smallest enclosing operation (a thunk probe, a single method)
/// - [`Error::Structural`] - a structural assumption about the binary layout was violated;
///   propagates to the per-method or per-binary boundary
/// - [`Error::UnsupportedArchitecture`] - no strategy exists for this instruction set
/// - [`Error::OutOfBounds`] / [`Error::Empty`] - invalid reads and empty inputs
#[derive(Error, Debug)]
pub enum Error {
    /// The instruction stream could not be decoded at the given address.
    ///
    /// This is an expected failure mode during thunk probing and method analysis;
    /// callers convert it to "unresolved" or "analysis failed for this method"
    /// and continue with sibling work.
    #[error("Decode fault at {address:#x}: {message}")]
    Decode {
        /// Virtual address at which decoding failed
        address: u64,
        /// Description of the decode failure
        message: String,
    },

    /// A structural assumption about the binary layout was violated.
    ///
    /// Unlike heuristic gaps, this indicates a misunderstood binary (a non-class
    /// attribute type where only class types exist, an array size beyond any sane
    /// bound). The error carries the source location where the violation was
    /// detected for debugging purposes.
    #[error("Structural - {file}:{line}: {message}")]
    Structural {
        /// Description of the violated assumption
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// No resolver or lifter strategy exists for this instruction set.
    ///
    /// Consumers must treat the whole key-function table as empty for such
    /// binaries; method analysis is skipped.
    #[error("Unsupported instruction set: {0}")]
    UnsupportedArchitecture(Architecture),

    /// An out of bound access was attempted while reading the binary.
    #[error("Out of bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for
    /// wrapping collaborator failures with additional context.
    #[error("{0}")]
    Error(String),
}
