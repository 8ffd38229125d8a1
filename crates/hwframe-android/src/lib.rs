//! hwframe-android: JNI platform surface for hwframe-core.
//!
//! Implements the two collaborator seams of `hwframe-core` against the
//! Android platform:
//!
//! - [`surface_texture`] — `SurfaceTexture`/`Surface` construction, the
//!   `SurfaceTextureOps` JNI implementation, frame-available listener
//!   wiring, and the `nativeOnFrameAvailable` entry point
//! - [`app_context`] — the process-wide application context slot
//!
//! The Java side is a small `com.hwframe.bridge.FrameListener` class that
//! implements `SurfaceTexture.OnFrameAvailableListener`, stores the native
//! handle passed via `setNativePtr(long)`, and forwards each callback to
//! `nativeOnFrameAvailable(ptr)`.

pub mod app_context;
pub mod surface_texture;

pub use app_context::{app_context, set_app_context};
pub use surface_texture::{
    create_surface, release_surface_handle, surface_handle_from_arc, AndroidVideoSurface,
    JniSurfaceTexture,
};
