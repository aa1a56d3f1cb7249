//! Error reporting policy.
//!
//! Failures that cannot be returned to a caller (background writes, getters
//! that fall back to a default, per-key load failures, listener panics) are
//! handed to an [`ErrorHandler`] together with the key or operation they
//! concern.

use tracing::{error, warn};

use crate::error::{ErrorCategory, PrefsError};

/// Receives every error the store absorbs.
///
/// Called from the caller's thread for reads and edits, and from the write
/// executor's worker for persistence failures. Must not block for long.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &PrefsError, context: &str);
}

impl<F> ErrorHandler for F
where
    F: Fn(&PrefsError, &str) + Send + Sync,
{
    fn handle(&self, error: &PrefsError, context: &str) {
        self(error, context)
    }
}

/// Default handler: logs through `tracing`.
///
/// Kind mismatches, configuration problems and listener panics are caller
/// bugs and go out at `error`; environmental failures at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, err: &PrefsError, context: &str) {
        match err.category() {
            ErrorCategory::KindMismatch
            | ErrorCategory::Configuration
            | ErrorCategory::Listener => {
                error!(context, category = ?err.category(), "{}", err);
            }
            _ => {
                warn!(context, category = ?err.category(), "{}", err);
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {
    fn handle(&self, _err: &PrefsError, _context: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_handler_receives_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |err: &PrefsError, ctx: &str| {
            sink.lock().push((err.category(), ctx.to_string()));
        };

        handler.handle(&PrefsError::UnknownFlag { flag: 3 }, "volume");
        assert_eq!(*seen.lock(), vec![(ErrorCategory::Decode, "volume".to_string())]);
    }

    #[test]
    fn test_builtin_handlers_do_not_panic() {
        let err = PrefsError::Closed;
        LogErrorHandler.handle(&err, "shutdown");
        NoopErrorHandler.handle(&err, "shutdown");
    }
}
