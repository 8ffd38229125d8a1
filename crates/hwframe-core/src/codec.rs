//! Decoder-side buffer bookkeeping: generation fencing and at-most-once release.
//!
//! A hardware decoder hands out output buffers by index. Each surfaced buffer
//! becomes a [`PendingBuffer`] that must eventually be released back to the
//! codec — exactly once, and only if the decoder state it was issued against
//! is still current. Flushing the decoder advances a generation counter; a
//! buffer tagged with an older generation refers to a slot the codec may have
//! already reused, so its release is dropped on the floor instead of being
//! forwarded.
//!
//! Releases can race: the render path, the frame queue and `Drop` may all try
//! to return the same buffer from different threads. The `released` counter's
//! first-transition-wins semantics gives a total order over those attempts
//! without a lock.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SurfaceError;

/// Seam to the underlying hardware codec.
///
/// The one operation the release protocol needs: return an output buffer,
/// optionally rendering it to the codec's output surface on the way out.
/// Implementations must be callable from any thread and must not block
/// beyond the platform call itself.
pub trait CodecHandle: Send + Sync {
    /// Releases the output buffer slot `index` back to the codec.
    ///
    /// `render` requests that the buffer contents be queued to the codec's
    /// output surface before the slot is recycled.
    fn release_output_buffer(&self, index: usize, render: bool) -> Result<(), SurfaceError>;
}

/// Shared decoding-session state read by every outstanding buffer.
///
/// The generation counter is bumped by the flush path only; the outstanding
/// buffer count is updated by concurrent release calls. Both are atomics so
/// releases of unrelated buffers never serialize on a lock.
pub struct DecoderContext {
    codec: Arc<dyn CodecHandle>,
    /// Decoder state epoch. Buffers snapshot this at issue time.
    generation: AtomicU64,
    /// Number of output buffers currently held outside the codec.
    hw_buffer_count: AtomicI64,
    /// When set, releases are honored even after a generation change.
    /// The caller has opted into deferred-release semantics where buffers
    /// survive a flush.
    delay_flush: bool,
}

impl DecoderContext {
    pub fn new(codec: Arc<dyn CodecHandle>, delay_flush: bool) -> Arc<Self> {
        Arc::new(Self {
            codec,
            generation: AtomicU64::new(0),
            hw_buffer_count: AtomicI64::new(0),
            delay_flush,
        })
    }

    /// Current decoder state epoch.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Advances the generation counter. Called by the flush/reset path,
    /// which is the only mutator; buffers issued before this call become
    /// stale and their releases are no-ops (unless delay-flush is set).
    pub fn advance_generation(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "Decoder flushed, generation now {} [{} buffers outstanding]",
            next,
            self.outstanding_buffers()
        );
        next
    }

    /// Number of output buffers currently held outside the codec.
    pub fn outstanding_buffers(&self) -> i64 {
        self.hw_buffer_count.load(Ordering::Acquire)
    }

    pub fn delay_flush(&self) -> bool {
        self.delay_flush
    }
}

/// One decoder output buffer awaiting release.
///
/// Exactly one logical release takes effect no matter how many times
/// [`release`](Self::release) is invoked or from how many threads; if the
/// buffer is still unreleased when dropped it is returned to the codec
/// without rendering.
pub struct PendingBuffer {
    index: usize,
    pts: i64,
    generation: u64,
    /// 0 until the first release call; the first transition wins.
    released: AtomicU32,
    ctx: Arc<DecoderContext>,
}

impl PendingBuffer {
    /// Wraps a freshly surfaced output buffer, tagging it with the context's
    /// current generation and counting it as outstanding.
    pub fn new(ctx: &Arc<DecoderContext>, index: usize, pts: i64) -> Self {
        ctx.hw_buffer_count.fetch_add(1, Ordering::AcqRel);
        Self {
            index,
            pts,
            generation: ctx.current_generation(),
            released: AtomicU32::new(0),
            ctx: Arc::clone(ctx),
        }
    }

    /// Opaque buffer slot index assigned by the codec.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Presentation timestamp in microseconds.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Generation snapshot taken when the buffer was surfaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Releases the buffer back to the codec, at most once.
    ///
    /// The first call performs the release; every later call returns `Ok`
    /// with no side effect. If the decoder has been flushed since this
    /// buffer was surfaced (and delay-flush is off) the release is
    /// superseded: no codec call is made and the outstanding count is left
    /// alone — the flush already reclaimed the slot. This function never
    /// blocks.
    pub fn release(&self, render: bool) -> Result<(), SurfaceError> {
        if self.released.fetch_add(1, Ordering::AcqRel) != 0 {
            return Ok(());
        }

        if !self.ctx.delay_flush() && self.generation != self.ctx.current_generation() {
            debug!(
                "Skipping release of output buffer {} ts={}: generation {} superseded by {}",
                self.index,
                self.pts,
                self.generation,
                self.ctx.current_generation()
            );
            return Ok(());
        }

        let remaining = self.ctx.hw_buffer_count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(
            "Releasing output buffer {} ts={} with render={} [{} pending]",
            self.index, self.pts, render, remaining
        );

        self.ctx
            .codec
            .release_output_buffer(self.index, render)
            .map_err(|e| {
                SurfaceError::External(format!(
                    "release of output buffer {} ts={} failed: {e}",
                    self.index, self.pts
                ))
            })
    }
}

impl Drop for PendingBuffer {
    fn drop(&mut self) {
        // A buffer that was never rendered still has to go back to the codec.
        if let Err(e) = self.release(false) {
            warn!("Failed to return output buffer {} on drop: {e}", self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Codec stub that counts release calls and records the last render flag.
    struct CountingCodec {
        releases: AtomicUsize,
        last_render: parking_lot::Mutex<Option<(usize, bool)>>,
        fail: bool,
    }

    impl CountingCodec {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                releases: AtomicUsize::new(0),
                last_render: parking_lot::Mutex::new(None),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                releases: AtomicUsize::new(0),
                last_render: parking_lot::Mutex::new(None),
                fail: true,
            })
        }

        fn release_count(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl CodecHandle for CountingCodec {
        fn release_output_buffer(&self, index: usize, render: bool) -> Result<(), SurfaceError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            *self.last_render.lock() = Some((index, render));
            if self.fail {
                Err(SurfaceError::External("codec rejected release".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_release_forwards_to_codec() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);

        let buffer = PendingBuffer::new(&ctx, 3, 40_000);
        assert_eq!(ctx.outstanding_buffers(), 1);

        buffer.release(true).unwrap();
        assert_eq!(codec.release_count(), 1);
        assert_eq!(*codec.last_render.lock(), Some((3, true)));
        assert_eq!(ctx.outstanding_buffers(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);

        let buffer = PendingBuffer::new(&ctx, 0, 0);
        buffer.release(true).unwrap();
        buffer.release(true).unwrap();
        buffer.release(false).unwrap();

        assert_eq!(codec.release_count(), 1);
        assert_eq!(ctx.outstanding_buffers(), 0);
    }

    #[test]
    fn test_concurrent_release_is_at_most_once() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);
        let buffer = Arc::new(PendingBuffer::new(&ctx, 7, 1_000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || buffer.release(true).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(codec.release_count(), 1);
        assert_eq!(ctx.outstanding_buffers(), 0);
    }

    #[test]
    fn test_generation_fencing_skips_stale_release() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);

        // handle{index=3, generation=0}, then the context advances past it
        let buffer = PendingBuffer::new(&ctx, 3, 40_000);
        ctx.advance_generation();

        buffer.release(true).unwrap();
        assert_eq!(codec.release_count(), 0);
        // Superseded release leaves the count alone
        assert_eq!(ctx.outstanding_buffers(), 1);

        // Repeated calls after the skip stay no-ops, including the drop path
        buffer.release(true).unwrap();
        drop(buffer);
        assert_eq!(codec.release_count(), 0);
        assert_eq!(ctx.outstanding_buffers(), 1);
    }

    #[test]
    fn test_delay_flush_bypasses_fencing() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), true);

        let buffer = PendingBuffer::new(&ctx, 3, 40_000);
        ctx.advance_generation();

        buffer.release(true).unwrap();
        assert_eq!(codec.release_count(), 1);
        assert_eq!(*codec.last_render.lock(), Some((3, true)));
        assert_eq!(ctx.outstanding_buffers(), 0);
    }

    #[test]
    fn test_current_generation_matches_after_flushes() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);

        ctx.advance_generation();
        ctx.advance_generation();
        let buffer = PendingBuffer::new(&ctx, 1, 0);
        assert_eq!(buffer.generation(), 2);

        buffer.release(false).unwrap();
        assert_eq!(codec.release_count(), 1);
    }

    #[test]
    fn test_codec_failure_is_propagated_with_context() {
        let codec = CountingCodec::failing();
        let ctx = DecoderContext::new(codec.clone(), false);

        let buffer = PendingBuffer::new(&ctx, 5, 123);
        let err = buffer.release(true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('5'), "missing buffer index: {msg}");
        assert!(msg.contains("123"), "missing timestamp: {msg}");

        // The release flag transitioned, so the drop path won't retry
        buffer.release(true).unwrap();
        assert_eq!(codec.release_count(), 1);
    }

    #[test]
    fn test_drop_returns_unreleased_buffer_without_render() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);

        {
            let _buffer = PendingBuffer::new(&ctx, 2, 0);
        }
        assert_eq!(codec.release_count(), 1);
        assert_eq!(*codec.last_render.lock(), Some((2, false)));
        assert_eq!(ctx.outstanding_buffers(), 0);
    }

    #[test]
    fn test_drop_after_release_does_not_double_release() {
        let codec = CountingCodec::new();
        let ctx = DecoderContext::new(codec.clone(), false);

        {
            let buffer = PendingBuffer::new(&ctx, 2, 0);
            buffer.release(true).unwrap();
        }
        assert_eq!(codec.release_count(), 1);
        assert_eq!(ctx.outstanding_buffers(), 0);
    }
}
