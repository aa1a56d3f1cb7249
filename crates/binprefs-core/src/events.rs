//! Change notification.
//!
//! Listeners are registered with the store and called once per changed key
//! after an editor's terminal call, on the thread that made that call. A
//! panicking listener is caught and reported; the remaining listeners and
//! keys are still delivered.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::PrefsError;
use crate::handler::ErrorHandler;

/// Callback for key changes: `(store name, key)`.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, store: &str, key: &str);
}

impl<F> ChangeListener for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn on_change(&self, store: &str, key: &str) {
        self(store, key)
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry for one store.
pub struct EventBridge {
    store_name: String,
    listeners: RwLock<HashMap<ListenerId, Arc<dyn ChangeListener>>>,
    next_id: AtomicU64,
}

impl EventBridge {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, listener);
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver every key to every listener.
    ///
    /// Works on a snapshot of the registry so listeners may register or
    /// unregister from inside a callback.
    pub fn notify(&self, keys: &[String], handler: &dyn ErrorHandler) {
        if keys.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn ChangeListener>> =
            self.listeners.read().values().cloned().collect();

        for key in keys {
            for listener in &listeners {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.on_change(&self.store_name, key)
                }));
                if let Err(payload) = outcome {
                    let err = PrefsError::Listener {
                        key: key.clone(),
                        message: panic_message(payload.as_ref()),
                    };
                    handler.handle(&err, key);
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("store_name", &self.store_name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoopErrorHandler;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<dyn ChangeListener>, Arc<Mutex<Vec<(String, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = move |store: &str, key: &str| {
            sink.lock().push((store.to_string(), key.to_string()));
        };
        (Arc::new(listener), seen)
    }

    #[test]
    fn test_notify_all_listeners() {
        let bridge = EventBridge::new("prefs");
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        bridge.register(a);
        bridge.register(b);

        bridge.notify(&["x".to_string(), "y".to_string()], &NoopErrorHandler);

        let expected = vec![
            ("prefs".to_string(), "x".to_string()),
            ("prefs".to_string(), "y".to_string()),
        ];
        assert_eq!(*seen_a.lock(), expected);
        assert_eq!(*seen_b.lock(), expected);
    }

    #[test]
    fn test_unregister() {
        let bridge = EventBridge::new("prefs");
        let (a, seen) = recorder();
        let id = bridge.register(a);
        assert_eq!(bridge.listener_count(), 1);

        assert!(bridge.unregister(id));
        assert!(!bridge.unregister(id));
        bridge.notify(&["x".to_string()], &NoopErrorHandler);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bridge = EventBridge::new("prefs");
        bridge.register(Arc::new(|_: &str, key: &str| {
            if key == "boom" {
                panic!("listener exploded");
            }
        }));
        let (survivor, seen) = recorder();
        bridge.register(survivor);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let handler = move |err: &PrefsError, ctx: &str| {
            sink.lock().push((err.clone(), ctx.to_string()));
        };

        bridge.notify(&["boom".to_string(), "calm".to_string()], &handler);

        assert_eq!(seen.lock().len(), 2);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0].0,
            PrefsError::Listener { key, message } if key == "boom" && message == "listener exploded"
        ));
    }
}
