/*!
 * Monitoring
 * Tracing setup and per-call spans
 */

mod tracer;

pub use tracer::{init_tracing, CallSpan};
