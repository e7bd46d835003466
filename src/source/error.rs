//! Source error taxonomy.

use thiserror::Error;

/// Errors a positioning source can report.
///
/// Errors are delivered as events (never panics or `Err` returns across the
/// public contract) and latched as a queryable last-error value. Backend
/// construction failures are reported via `None` returns instead, so they
/// never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The platform denied access to positioning (missing permission or
    /// capability). Terminal until permission is granted externally.
    #[error("access to the positioning service was denied")]
    AccessDenied,

    /// The positioning service is disabled (for example switched off by the
    /// user). Updates resume automatically once it is re-enabled.
    #[error("the positioning service is closed")]
    Closed,

    /// No usable backend or positioning methods are configured.
    /// Recoverable by reconfiguration.
    #[error("no usable positioning source is configured")]
    UnknownSource,

    /// A single request or the regular-updates watchdog elapsed without a
    /// fix. Latched until the next successful update.
    #[error("the position could not be retrieved within the timeout")]
    UpdateTimeout,
}
