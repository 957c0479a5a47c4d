/*!
 * Tracing
 * Structured logging for alertable socket calls using the tracing crate
 *
 * Features:
 * - Compact human-readable or JSON output
 * - One span per blocking call with duration and result fields
 * - Slow-call reporting against a configurable threshold
 */

use crate::config::IoConfig;
use crate::core::types::SockResult;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - ALERTABLE_TRACE_JSON: Enable JSON output (default: false), also
///   settable through `IoConfig::trace_json`
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing(config: &IoConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.trace_json {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized with JSON output");
        }
    } else {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized");
        }
    }
}

/// Span around one blocking socket call
///
/// Records the outcome while alive and the duration when dropped. Blocking
/// calls are expected to take time, so slow calls are reported at debug
/// level with `slow = true` rather than as warnings.
pub struct CallSpan {
    span: tracing::Span,
    start: Instant,
    op: &'static str,
    fd: i32,
    slow_threshold: Duration,
}

impl CallSpan {
    pub fn new(op: &'static str, fd: i32, slow_threshold: Duration) -> Self {
        let span = span!(
            Level::DEBUG,
            "alertable_call",
            op = op,
            fd = fd,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        span.in_scope(|| debug!(op, fd, "performing blocking call"));

        Self {
            span,
            start: Instant::now(),
            op,
            fd,
            slow_threshold,
        }
    }

    /// Record the call's result and native error code
    pub fn record_result<T>(&self, result: &SockResult<T>) {
        match result {
            Ok(_) => {
                self.span.record("result", "success");
            }
            Err(errno) => {
                self.span.record("result", "error");
                self.span.record("error", *errno as i32);
            }
        }
    }

    /// Elapsed time since the call started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Drop for CallSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);

        let _entered = self.span.enter();
        if duration > self.slow_threshold {
            debug!(
                op = self.op,
                fd = self.fd,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "finished blocking call"
            );
        } else {
            debug!(
                op = self.op,
                fd = self.fd,
                duration_us = duration.as_micros() as u64,
                "finished blocking call"
            );
        }
    }
}
