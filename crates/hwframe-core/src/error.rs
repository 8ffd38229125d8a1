//! Error types for buffer release and surface synchronization.

/// Errors surfaced by the release protocol and the render handshake.
///
/// Two outcomes are deliberately *not* errors and never appear here:
/// a bounded frame wait that times out (degraded but valid, reported as
/// `Ok(false)` by the handshake) and a release superseded by a decoder
/// flush (silent no-op, the buffer's lifecycle ended with the flush).
#[derive(Debug, Clone)]
pub enum SurfaceError {
    /// A platform call failed. The message carries the failing operation
    /// and its context (buffer index, timestamp, JNI error text).
    External(String),
    /// The underlying execution environment cannot be reached (e.g. no
    /// JavaVM for the current process). The surface should be treated as
    /// unusable rather than retried synchronously.
    Unavailable(String),
    /// A texture-image update was requested while no GL texture is bound.
    /// Updating an unbound target is undefined at the platform level, so
    /// the handshake refuses it instead.
    TextureDetached,
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External(msg) => write!(f, "Platform call failed: {msg}"),
            Self::Unavailable(msg) => write!(f, "Execution environment unavailable: {msg}"),
            Self::TextureDetached => write!(f, "No GL texture attached to surface"),
        }
    }
}

impl std::error::Error for SurfaceError {}
