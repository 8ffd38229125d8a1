//! Surface-side frame synchronization: the clear→release→wait→pull handshake.
//!
//! Rendering a hardware buffer to a texture is a two-party exchange. The
//! decode thread releases the buffer with a render request, then the platform
//! textures it and notifies "frame available" from a thread this subsystem
//! does not control. [`VideoSurface`] mediates between the two: a one-shot
//! flag under a mutex, a condition variable, and a bounded wait so a missing
//! notification can never stall the decode pipeline.
//!
//! The wait bound deliberately favors forward progress over freshness: when
//! the platform is slow to notify, presenting the previous texture for one
//! frame beats blocking decode indefinitely.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::codec::PendingBuffer;
use crate::error::SurfaceError;

/// How long the handshake waits for the frame-available notification before
/// proceeding with whatever the texture currently holds.
pub const DEFAULT_FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(30);

/// Seam to the platform surface-texture object.
///
/// Implementations perform the actual platform calls (JNI on Android) and
/// must be callable from any thread. Each method maps to exactly one
/// platform operation; none of them block beyond that call.
pub trait SurfaceTextureOps: Send + Sync {
    /// Binds the surface texture to the given GL texture id.
    fn attach_to_gl_context(&self, tex_id: u32) -> Result<(), SurfaceError>;

    /// Detaches the surface texture from its current GL texture.
    fn detach_from_gl_context(&self) -> Result<(), SurfaceError>;

    /// Updates the bound texture with the most recent frame queued to the
    /// surface. Idempotent pull of latest content.
    fn update_tex_image(&self) -> Result<(), SurfaceError>;

    /// Returns the 4x4 column-major matrix describing how to sample the
    /// updated texture.
    fn transform_matrix(&self) -> Result<[f32; 16], SurfaceError>;
}

/// GL attachment state of the surface texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureBinding {
    Detached,
    Attached(u32),
}

/// Flag and attachment state, guarded together by the surface mutex.
struct SurfaceState {
    /// Latched frame-available notification. Cleared at the start of each
    /// handshake so a stale signal from a previous cycle cannot be consumed
    /// by the current one.
    on_frame_available: bool,
    binding: TextureBinding,
}

/// A rendering surface paired with its frame-availability synchronization.
///
/// Owns the handshake mutex, so at most one [`render_buffer`] call is in
/// flight per surface; releases of unrelated buffers are not serialized
/// here. [`signal`] is the sole entry point for the platform notification
/// thread.
///
/// [`render_buffer`]: Self::render_buffer
/// [`signal`]: Self::signal
pub struct VideoSurface<T: SurfaceTextureOps> {
    texture: T,
    state: Mutex<SurfaceState>,
    frame_available: Condvar,
    /// Whether a frame-available listener is registered with the platform.
    /// Without one, no notification will ever arrive and waiting would only
    /// add latency, so the handshake skips the wait entirely.
    has_listener: bool,
    frame_wait_timeout: Duration,
}

impl<T: SurfaceTextureOps> VideoSurface<T> {
    pub fn new(texture: T, has_listener: bool) -> Self {
        Self {
            texture,
            state: Mutex::new(SurfaceState {
                on_frame_available: false,
                binding: TextureBinding::Detached,
            }),
            frame_available: Condvar::new(),
            has_listener,
            frame_wait_timeout: DEFAULT_FRAME_WAIT_TIMEOUT,
        }
    }

    /// Overrides the bounded wait used by the handshake.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_wait_timeout = timeout;
        self
    }

    /// Access to the underlying platform surface texture.
    pub fn texture(&self) -> &T {
        &self.texture
    }

    /// Marks a frame as available and wakes one waiting handshake.
    ///
    /// Entry point for the platform notification thread; callable from any
    /// thread, safe with no waiter present (the flag is latched until the
    /// next handshake clears it). Nothing here blocks or allocates beyond
    /// the lock and the wakeup.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.on_frame_available = true;
        self.frame_available.notify_one();
    }

    /// Current GL attachment state.
    pub fn binding(&self) -> TextureBinding {
        self.state.lock().binding
    }

    /// Records a binding established out-of-band, without a platform call.
    /// Used when the platform object was constructed already bound to a GL
    /// texture.
    pub fn note_initial_binding(&self, tex_id: u32) {
        self.state.lock().binding = TextureBinding::Attached(tex_id);
    }

    /// Binds the surface texture to `tex_id`.
    ///
    /// Attaching the already-bound id is a no-op. Attaching a different id
    /// first detaches the current one, so the platform never sees a double
    /// bind.
    pub fn attach(&self, tex_id: u32) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        match state.binding {
            TextureBinding::Attached(bound) if bound == tex_id => return Ok(()),
            TextureBinding::Attached(_) => {
                self.texture.detach_from_gl_context()?;
                state.binding = TextureBinding::Detached;
            }
            TextureBinding::Detached => {}
        }
        self.texture.attach_to_gl_context(tex_id)?;
        state.binding = TextureBinding::Attached(tex_id);
        Ok(())
    }

    /// Detaches the surface texture from its GL texture, if bound.
    pub fn detach(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        if state.binding == TextureBinding::Detached {
            return Ok(());
        }
        self.texture.detach_from_gl_context()?;
        state.binding = TextureBinding::Detached;
        Ok(())
    }

    /// Releases `buffer` with a render request and pulls the textured result.
    ///
    /// The sequence: clear the availability flag, release the buffer to the
    /// codec, wait (bounded) for the platform's frame-available signal, then
    /// update the bound texture and copy the sampling transform into
    /// `matrix`. The surface mutex is held for the whole sequence, so
    /// concurrent [`attach`]/[`detach`] calls serialize against the
    /// handshake and cannot unbind the texture mid-update.
    ///
    /// [`attach`]: Self::attach
    /// [`detach`]: Self::detach
    ///
    /// Returns `Ok(true)` if a fresh frame was signalled before the
    /// deadline, `Ok(false)` if the wait timed out — the texture is still
    /// updated and `matrix` still filled, but the content may be a previous
    /// frame. A timed-out wait is a degraded path, not a failure; any
    /// platform failure is. On error `matrix` is left untouched.
    pub fn render_buffer(
        &self,
        buffer: &PendingBuffer,
        matrix: &mut [f32; 16],
    ) -> Result<bool, SurfaceError> {
        let mut state = self.state.lock();
        state.on_frame_available = false;

        // Release never blocks; the lock orders clear, release, wait.
        buffer.release(true)?;

        if self.has_listener && !state.on_frame_available {
            let deadline = Instant::now() + self.frame_wait_timeout;
            while !state.on_frame_available {
                if self
                    .frame_available
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break;
                }
            }
        }

        let available = state.on_frame_available;

        if self.has_listener && !available {
            warn!(
                "No frame available for output buffer {} ts={} after {:?}",
                buffer.index(),
                buffer.pts(),
                self.frame_wait_timeout
            );
        }

        // The lock stays held through the texture pull: a concurrent
        // detach() must not unbind the target between this check and the
        // platform call.
        if state.binding == TextureBinding::Detached {
            return Err(SurfaceError::TextureDetached);
        }

        self.texture.update_tex_image().map_err(|e| {
            SurfaceError::External(format!(
                "texture update for buffer {} ts={} failed: {e}",
                buffer.index(),
                buffer.pts()
            ))
        })?;

        // Only a fully retrieved matrix reaches the caller.
        *matrix = self.texture.transform_matrix()?;

        Ok(available)
    }
}
