/*!
 * Error Types
 * Setup-path errors; the operation path reports plain `Errno` values
 */

use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

/// Failures creating or signalling a thread's alert
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum AlertError {
    #[error("Failed to create alert pipe: {0}")]
    #[diagnostic(
        code(alert::pipe),
        help("The process may have run out of file descriptors.")
    )]
    Pipe(Errno),

    #[error("Failed to signal alert: {0}")]
    #[diagnostic(code(alert::signal))]
    Signal(Errno),
}

impl AlertError {
    /// Native error code carried by this failure
    pub fn errno(&self) -> Errno {
        match self {
            Self::Pipe(e) | Self::Signal(e) => *e,
        }
    }
}

/// Invalid configuration input
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    #[diagnostic(
        code(config::invalid_value),
        help("Check the accepted values documented on IoConfig.")
    )]
    InvalidValue { key: &'static str, value: String },

    #[error("Malformed configuration: {0}")]
    #[diagnostic(code(config::json))]
    Json(#[from] serde_json::Error),
}

/// Convert a std I/O error into the native error code
pub(crate) fn io_errno(error: &std::io::Error) -> Errno {
    error
        .raw_os_error()
        .map(Errno::from_raw)
        .unwrap_or(Errno::EIO)
}
