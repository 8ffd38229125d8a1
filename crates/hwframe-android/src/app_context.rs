//! Process-wide Android application context slot.
//!
//! Collaborators that need platform access (content resolvers, class
//! loaders) read the application context from here. The slot is set once at
//! startup from the embedding activity and guarded by its own mutex; no
//! ordering between set and get is promised beyond mutual exclusion, so
//! readers must handle the not-yet-set case.

use jni::objects::GlobalRef;
use parking_lot::Mutex;

static APP_CONTEXT: Mutex<Option<GlobalRef>> = Mutex::new(None);

/// Stores the application context reference for the rest of the process.
pub fn set_app_context(ctx: GlobalRef) {
    *APP_CONTEXT.lock() = Some(ctx);
}

/// Returns the application context, if one has been stored.
pub fn app_context() -> Option<GlobalRef> {
    APP_CONTEXT.lock().clone()
}
