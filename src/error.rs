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
/// Detection itself never fails through this type: a detector that finds nothing simply reports
/// not-detected. Errors surface only at the edges - reading a module's raw image from disk,
/// executing a located method through the host, or data so damaged it cannot be interpreted
/// at all.
#[derive(Error, Debug)]
pub enum Error {
    /// The data is damaged and could not be interpreted.
    ///
    /// Includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading raw data.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading a module's
    /// raw on-disk image.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    ///
    /// The goblin crate is used for low-level PE format parsing when
    /// mapping RVAs to file offsets.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Host-side invocation of a located method failed.
    ///
    /// Returned when the host's execution capability cannot invoke the
    /// requested method, or returns a value of an unexpected shape.
    #[error("Method invocation failed - {0}")]
    Invoke(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
