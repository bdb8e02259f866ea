//! Panic boundary for user callbacks
//!
//! Subscription callbacks and event listeners run inline on the reader task.
//! A panicking callback must not take the connection down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `f`, logging instead of propagating a panic
///
/// Returns `false` when `f` panicked.
pub(crate) fn call_guarded<F: FnOnce()>(context: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());

            tracing::error!(context = %context, panic = %message, "Callback panicked");
            false
        }
    }
}
