//! JNI-backed SurfaceTexture and the frame-available callback plumbing.
//!
//! This is the platform side of the render handshake: a
//! `android.graphics.SurfaceTexture` bound to the caller's GL texture,
//! wrapped in a `android.view.Surface` for `MediaCodec#configure`, with an
//! optional Java listener whose `onFrameAvailable` callback reaches
//! [`VideoSurface::signal`] through a native handle.
//!
//! The native handle is an `Arc`-derived raw pointer handed to Java via
//! `setNativePtr(long)`. Java owns one reference count; releasing the
//! surface from Java must call `nativeReleaseHandle` to drop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jni::objects::{GlobalRef, JClass, JObject, JValue};
use jni::sys::{jint, jlong};
use jni::{JNIEnv, JavaVM};
use tracing::{debug, warn};

use hwframe_core::{SurfaceError, SurfaceTextureOps, VideoSurface};

/// A [`VideoSurface`] driven by the JNI surface texture below.
pub type AndroidVideoSurface = VideoSurface<JniSurfaceTexture>;

/// Gets the Java VM from the Android context.
///
/// ndk_context must have been initialized by the activity glue before any
/// call lands here; without it there is no execution environment and every
/// surface operation fails with [`SurfaceError::Unavailable`].
fn get_jvm() -> Result<JavaVM, SurfaceError> {
    // Safety: ndk_context::android_context() returns a valid pointer when
    // called from an Android app initialized by the activity glue.
    unsafe { JavaVM::from_raw(ndk_context::android_context().vm().cast()) }
        .map_err(|e| SurfaceError::Unavailable(format!("Failed to get JavaVM: {e}")))
}

/// Owns the `SurfaceTexture` and `Surface` global references and performs
/// the platform calls of the render handshake.
pub struct JniSurfaceTexture {
    surface_texture: GlobalRef,
    surface: GlobalRef,
    listener: parking_lot::Mutex<Option<GlobalRef>>,
    released: AtomicBool,
}

impl JniSurfaceTexture {
    /// Creates a `SurfaceTexture` bound to `tex_id` and wraps it in a
    /// `Surface` suitable for handing to `MediaCodec#configure`.
    pub fn new(tex_id: u32) -> Result<Self, SurfaceError> {
        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        let surface_texture = env
            .new_object(
                "android/graphics/SurfaceTexture",
                "(I)V",
                &[JValue::Int(tex_id as jint)],
            )
            .map_err(|e| SurfaceError::External(format!("SurfaceTexture({tex_id}) failed: {e}")))?;
        let surface_texture = env
            .new_global_ref(surface_texture)
            .map_err(|e| SurfaceError::External(format!("Failed to create global ref: {e}")))?;

        let surface = env
            .new_object(
                "android/view/Surface",
                "(Landroid/graphics/SurfaceTexture;)V",
                &[JValue::Object(surface_texture.as_obj())],
            )
            .map_err(|e| SurfaceError::External(format!("Surface(SurfaceTexture) failed: {e}")))?;
        let surface = env
            .new_global_ref(surface)
            .map_err(|e| SurfaceError::External(format!("Failed to create global ref: {e}")))?;

        debug!("Created SurfaceTexture bound to GL texture {tex_id}");

        Ok(Self {
            surface_texture,
            surface,
            listener: parking_lot::Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// The `android.view.Surface` to pass to `MediaCodec#configure`.
    pub fn surface(&self) -> &GlobalRef {
        &self.surface
    }

    /// Registers a Java `OnFrameAvailableListener` on the surface texture
    /// and stores a global reference to it.
    fn set_frame_listener(&self, env: &mut JNIEnv, listener: &JObject) -> Result<(), SurfaceError> {
        env.call_method(
            &self.surface_texture,
            "setOnFrameAvailableListener",
            "(Landroid/graphics/SurfaceTexture$OnFrameAvailableListener;)V",
            &[JValue::Object(listener)],
        )
        .map_err(|e| SurfaceError::External(format!("setOnFrameAvailableListener failed: {e}")))?;

        let listener_ref = env
            .new_global_ref(listener)
            .map_err(|e| SurfaceError::External(format!("Failed to create global ref: {e}")))?;
        *self.listener.lock() = Some(listener_ref);
        Ok(())
    }

    /// Releases the Java-side `Surface` and `SurfaceTexture`. Idempotent;
    /// also run best-effort from `Drop`.
    pub fn release_resources(&self) -> Result<(), SurfaceError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        env.call_method(&self.surface, "release", "()V", &[])
            .map_err(|e| SurfaceError::External(format!("Surface.release failed: {e}")))?;
        env.call_method(&self.surface_texture, "release", "()V", &[])
            .map_err(|e| SurfaceError::External(format!("SurfaceTexture.release failed: {e}")))?;

        debug!("Released Surface and SurfaceTexture");
        Ok(())
    }
}

impl Drop for JniSurfaceTexture {
    fn drop(&mut self) {
        if let Err(e) = self.release_resources() {
            warn!("Failed to release surface resources on drop: {e}");
        }
    }
}

impl SurfaceTextureOps for JniSurfaceTexture {
    fn attach_to_gl_context(&self, tex_id: u32) -> Result<(), SurfaceError> {
        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        env.call_method(
            &self.surface_texture,
            "attachToGLContext",
            "(I)V",
            &[JValue::Int(tex_id as jint)],
        )
        .map_err(|e| SurfaceError::External(format!("attachToGLContext({tex_id}) failed: {e}")))?;
        Ok(())
    }

    fn detach_from_gl_context(&self) -> Result<(), SurfaceError> {
        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        env.call_method(&self.surface_texture, "detachFromGLContext", "()V", &[])
            .map_err(|e| SurfaceError::External(format!("detachFromGLContext failed: {e}")))?;
        Ok(())
    }

    fn update_tex_image(&self) -> Result<(), SurfaceError> {
        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        env.call_method(&self.surface_texture, "updateTexImage", "()V", &[])
            .map_err(|e| SurfaceError::External(format!("updateTexImage failed: {e}")))?;
        Ok(())
    }

    fn transform_matrix(&self) -> Result<[f32; 16], SurfaceError> {
        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        let array = env
            .new_float_array(16)
            .map_err(|e| SurfaceError::External(format!("Failed to allocate matrix array: {e}")))?;
        env.call_method(
            &self.surface_texture,
            "getTransformMatrix",
            "([F)V",
            &[JValue::Object(&array)],
        )
        .map_err(|e| SurfaceError::External(format!("getTransformMatrix failed: {e}")))?;

        let mut matrix = [0.0f32; 16];
        env.get_float_array_region(&array, 0, &mut matrix)
            .map_err(|e| SurfaceError::External(format!("Failed to copy matrix: {e}")))?;
        Ok(matrix)
    }
}

/// Creates the surface texture, wraps it in an [`AndroidVideoSurface`] and,
/// if `listener` is given, wires the Java callback to the surface's signal
/// entry point.
///
/// The listener object must implement
/// `SurfaceTexture.OnFrameAvailableListener`, expose `setNativePtr(long)`,
/// and forward `onFrameAvailable` to `nativeOnFrameAvailable(ptr)`.
pub fn create_surface(
    tex_id: u32,
    listener: Option<&JObject>,
) -> Result<Arc<AndroidVideoSurface>, SurfaceError> {
    let texture = JniSurfaceTexture::new(tex_id)?;
    let surface = Arc::new(VideoSurface::new(texture, listener.is_some()));
    // The texture was constructed already bound to tex_id; record that in
    // the attachment state without a second platform call.
    surface.note_initial_binding(tex_id);

    if let Some(listener) = listener {
        let vm = get_jvm()?;
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| SurfaceError::Unavailable(format!("Failed to attach JNI thread: {e}")))?;

        surface.texture().set_frame_listener(&mut env, listener)?;

        let handle = surface_handle_from_arc(Arc::clone(&surface));
        if let Err(e) = env.call_method(listener, "setNativePtr", "(J)V", &[JValue::Long(handle)])
        {
            release_surface_handle::<JniSurfaceTexture>(handle);
            return Err(SurfaceError::External(format!("setNativePtr failed: {e}")));
        }
    }

    Ok(surface)
}

/// Converts a surface Arc into a raw pointer handle for Java. The Arc's
/// reference count is incremented; the holder must call
/// [`release_surface_handle`] (or the JNI release entry point) exactly
/// once, instantiated with the same surface texture type.
pub fn surface_handle_from_arc<T: SurfaceTextureOps>(surface: Arc<VideoSurface<T>>) -> i64 {
    Arc::into_raw(surface) as i64
}

/// Releases a native handle, decrementing the Arc's reference count.
///
/// The handle must have been created by [`surface_handle_from_arc`] with
/// the same `T` and not released before.
pub fn release_surface_handle<T: SurfaceTextureOps>(handle: i64) {
    if handle == 0 {
        return;
    }
    let ptr = handle as *const VideoSurface<T>;
    unsafe {
        let _ = Arc::from_raw(ptr);
    }
}

/// Gets a clone of the surface Arc from a native handle. Returns None for a
/// null (0) handle.
///
/// The handle must be valid: created by [`surface_handle_from_arc`] with
/// the same `T` and not yet released.
fn get_native_surface<T: SurfaceTextureOps>(handle: i64) -> Option<Arc<VideoSurface<T>>> {
    if handle == 0 {
        return None;
    }
    let ptr = handle as *const VideoSurface<T>;
    // Reconstruct the Arc, clone it, then forget the original to avoid
    // dropping Java's reference count.
    let arc = unsafe { Arc::from_raw(ptr) };
    let cloned = Arc::clone(&arc);
    std::mem::forget(arc);
    Some(cloned)
}

// JNI callback entry points, called from com.hwframe.bridge.FrameListener.

/// Frame-available notification from the platform.
///
/// Runs on whatever thread the platform delivers the callback on; the only
/// work done here is the lock-set-wake of the surface's signal path.
#[no_mangle]
pub extern "C" fn Java_com_hwframe_bridge_FrameListener_nativeOnFrameAvailable(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    if let Some(surface) = get_native_surface::<JniSurfaceTexture>(handle) {
        surface.signal();
    }
}

/// Drops Java's reference to the surface. Called from the listener's
/// release path; the handle is invalid afterwards.
#[no_mangle]
pub extern "C" fn Java_com_hwframe_bridge_FrameListener_nativeReleaseHandle(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    release_surface_handle::<JniSurfaceTexture>(handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The JNI paths require a JVM and an Android SurfaceTexture; the
    // protocol they drive is covered by the hwframe-core tests against
    // mock collaborators. The handle round-trip is host-testable.

    struct NullTexture;

    impl SurfaceTextureOps for NullTexture {
        fn attach_to_gl_context(&self, _tex_id: u32) -> Result<(), SurfaceError> {
            Ok(())
        }

        fn detach_from_gl_context(&self) -> Result<(), SurfaceError> {
            Ok(())
        }

        fn update_tex_image(&self) -> Result<(), SurfaceError> {
            Ok(())
        }

        fn transform_matrix(&self) -> Result<[f32; 16], SurfaceError> {
            Ok([0.0; 16])
        }
    }

    #[test]
    fn test_handle_round_trip_keeps_surface_alive() {
        let surface = Arc::new(VideoSurface::new(NullTexture, true));
        let weak = Arc::downgrade(&surface);

        let handle = surface_handle_from_arc(Arc::clone(&surface));
        drop(surface);

        // Java's reference count keeps the surface alive on its own
        assert!(weak.upgrade().is_some());

        let resolved = get_native_surface::<NullTexture>(handle).unwrap();
        resolved.signal();
        drop(resolved);
        assert!(weak.upgrade().is_some());

        release_surface_handle::<NullTexture>(handle);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_release_drops_exactly_one_reference() {
        let surface = Arc::new(VideoSurface::new(NullTexture, false));

        let handle = surface_handle_from_arc(Arc::clone(&surface));
        assert_eq!(Arc::strong_count(&surface), 2);

        // Resolving clones without consuming Java's reference
        let resolved = get_native_surface::<NullTexture>(handle).unwrap();
        assert_eq!(Arc::strong_count(&surface), 3);
        drop(resolved);

        release_surface_handle::<NullTexture>(handle);
        assert_eq!(Arc::strong_count(&surface), 1);
    }

    #[test]
    fn test_null_handle_is_a_noop() {
        assert!(get_native_surface::<NullTexture>(0).is_none());
        release_surface_handle::<NullTexture>(0);
    }
}
