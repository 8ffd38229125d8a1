//! hwframe-core: hand-off of decoded hardware video buffers to a render surface.
//!
//! Hardware decoders own their output buffers; rendering one means releasing
//! it back to the codec with a render request and then waiting for the
//! platform to texture it — a notification that arrives on a thread this
//! subsystem does not control, and sometimes never arrives at all. This crate
//! provides the synchronization core of that exchange:
//!
//! - [`codec`] — generation-fenced, at-most-once buffer release
//!   ([`DecoderContext`], [`PendingBuffer`])
//! - [`surface`] — the bounded clear→release→wait→pull render handshake
//!   ([`VideoSurface`]) and the GL texture attachment state machine
//!
//! The platform itself (MediaCodec, SurfaceTexture) sits behind two traits,
//! [`CodecHandle`] and [`SurfaceTextureOps`], so the whole protocol runs and
//! tests on the host. The JNI implementations live in `hwframe-android`.
//!
//! # Guarantees
//!
//! - A buffer is released to the codec at most once, no matter how many
//!   threads race the release.
//! - A buffer issued before a decoder flush is never released against the
//!   post-flush codec state (unless delay-flush mode opts into it).
//! - A renderer waiting for a textured frame is never blocked past a fixed,
//!   tunable bound; a missing notification degrades to a stale frame, not a
//!   hang.

pub mod codec;
pub mod error;
pub mod surface;

pub use codec::{CodecHandle, DecoderContext, PendingBuffer};
pub use error::SurfaceError;
pub use surface::{
    SurfaceTextureOps, TextureBinding, VideoSurface, DEFAULT_FRAME_WAIT_TIMEOUT,
};
