/*!
 * Core Module
 * Fundamental socket-call types, error handling and descriptor primitives
 */

pub mod errors;
pub mod guard;
pub mod sys;
pub mod types;

// Re-export for convenience
pub use errors::{AlertError, ConfigError};
pub use guard::NonBlockingGuard;
pub use sys::is_nonblocking;
pub use types::*;
