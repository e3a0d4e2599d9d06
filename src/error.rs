/// Error handling module for Server Warden.
///
/// This module defines the error types used throughout the library.
/// Every fallible operation returns a tagged [`Error`] whose [`ErrorKind`]
/// tells the caller how to react: state-machine violations are always
/// recoverable, security rejections guarantee that nothing was written, and
/// I/O failures carry the underlying OS cause.
///
/// # Example
///
/// ```
/// use server_warden::error::{Error, ErrorKind, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::NotRunning) => println!("Start the server first"),
///         Err(e) if e.kind() == ErrorKind::Security => println!("Rejected: {}", e),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the server-warden library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration file cannot be read
    /// - The JSON or YAML is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains values that cannot work.
    ///
    /// This error occurs when:
    /// - The launch command is empty
    /// - A capacity, retention or timeout is zero
    /// - The default memory size is malformed
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The server is already running.
    ///
    /// This error occurs when:
    /// - `start` is called while the supervisor is not in the `Stopped` state
    #[error("Server is already running")]
    AlreadyRunning,

    /// The server is not running.
    ///
    /// This error occurs when:
    /// - `stop` is called while the supervisor is not in the `Running` state
    /// - A command is sent while no child process is live
    #[error("Server is not running")]
    NotRunning,

    /// The server binary has not been uploaded yet.
    #[error("No server binary found at {}. Please upload a server binary first.", path.display())]
    MissingBinary {
        /// Where the binary was expected
        path: PathBuf,
    },

    /// An archive tried to write outside of its extraction root.
    ///
    /// The whole operation is aborted before any filesystem mutation.
    #[error("Security violation: {0}")]
    Security(String),

    /// A disk or permission failure.
    ///
    /// This error occurs when:
    /// - A snapshot source directory does not exist
    /// - Extraction, config writes or backup rotation hit an OS error
    /// - Writing to the child's input stream fails
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The child process could not be spawned.
    #[error("Failed to start server process `{command}`: {source}")]
    Spawn {
        /// Program that failed to launch
        command: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Caller input was rejected before reaching the child process or disk.
    ///
    /// This error occurs when:
    /// - A console command contains a line terminator or is empty
    /// - Properties content is not plain text
    /// - A world, backup or memory name is malformed
    /// - An uploaded archive is not a valid zip file
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// `start` while not stopped
    AlreadyRunning,
    /// operation requires a running server
    NotRunning,
    /// the server binary is absent
    MissingBinary,
    /// archive path traversal
    Security,
    /// disk, permission or process spawn failure
    Io,
    /// rejected caller input
    InvalidInput,
    /// bad crate configuration
    Config,
}

impl Error {
    /// Wraps an I/O error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigParse(_) | Error::ConfigInvalid(_) => ErrorKind::Config,
            Error::AlreadyRunning => ErrorKind::AlreadyRunning,
            Error::NotRunning => ErrorKind::NotRunning,
            Error::MissingBinary { .. } => ErrorKind::MissingBinary,
            Error::Security(_) => ErrorKind::Security,
            Error::Io { .. } | Error::Spawn { .. } => ErrorKind::Io,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(source) => Error::io("Archive I/O failed", source),
            other => Error::InvalidInput(format!("Not a valid zip archive: {}", other)),
        }
    }
}

/// Result type for server-warden operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;
