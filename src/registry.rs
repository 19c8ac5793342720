//! Ordered callback registry.
//!
//! Timing subscribers, router observers and system event listeners all live in
//! a [`Registry`]. Callbacks run in registration order against a snapshot of
//! the entries, so a callback may register or unregister others without
//! deadlocking. A callback that returns an error or panics is logged and
//! skipped; the remaining callbacks still run.

use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Error type callbacks may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;
pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Handle returned by `register`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry<F: ?Sized> {
    id: SubscriptionId,
    name: String,
    callback: Arc<F>,
}

pub struct Registry<F: ?Sized> {
    kind: &'static str,
    entries: Mutex<Vec<Entry<F>>>,
    next_id: AtomicU64,
}

impl<F: ?Sized> Registry<F> {
    /// `kind` names the callbacks in log output ("subscriber", "observer").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn register(&self, name: impl Into<String>, callback: Arc<F>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                name: name.into(),
                callback,
            });
        id
    }

    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Invokes `call` once per callback. Returns the number of callbacks that
    /// failed.
    pub fn dispatch(&self, mut call: impl FnMut(&F) -> CallbackResult) -> usize {
        let snapshot: Vec<(String, Arc<F>)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| (entry.name.clone(), Arc::clone(&entry.callback)))
            .collect();

        let mut failures = 0;
        for (name, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| call(&*callback))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!("{} '{}' failed: {}", self.kind, name, e);
                }
                Err(payload) => {
                    failures += 1;
                    error!(
                        "{} '{}' panicked: {}",
                        self.kind,
                        name,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Callback = dyn Fn(u32) -> CallbackResult + Send + Sync;

    #[test]
    fn test_dispatch_runs_in_registration_order() {
        let registry: Registry<Callback> = Registry::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = order.clone();
            registry.register(tag, Arc::new(move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            }));
        }

        assert_eq!(registry.dispatch(|cb| cb(1)), 0);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failing_callbacks_are_isolated() {
        let registry: Registry<Callback> = Registry::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register("errors", Arc::new(|_| Err("boom".into())));
        registry.register("panics", Arc::new(|_| panic!("callback exploded")));
        let counter = calls.clone();
        registry.register("healthy", Arc::new(move |value| {
            counter.fetch_add(value as usize, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(registry.dispatch(|cb| cb(3)), 2);
        assert_eq!(registry.dispatch(|cb| cb(3)), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unregister() {
        let registry: Registry<Callback> = Registry::new("test");
        let first = registry.register("first", Arc::new(|_| Ok(())));
        registry.register("second", Arc::new(|_| Ok(())));

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        assert_eq!(registry.names(), vec!["second".to_string()]);
    }
}
