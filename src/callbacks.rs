//! Listener bookkeeping shared by surfaces, the focus tracker and the manager.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Run a consumer callback, containing any panic it raises.
///
/// Returns `false` when the callback panicked.
pub(crate) fn invoke_guarded(label: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(callback = label, %message, "Callback panicked");
            false
        }
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle that releases a subscription.
///
/// Disposing is idempotent. Dropping the handle disposes it.
#[must_use = "dropping a Disposer immediately cancels its subscription"]
pub struct Disposer {
    teardown: Mutex<Option<Teardown>>,
}

impl Disposer {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A disposer with nothing to release.
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    pub fn dispose(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Entries<A> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<A>)>,
}

/// Ordered set of listeners for one kind of announcement.
pub(crate) struct CallbackList<A> {
    entries: Arc<Mutex<Entries<A>>>,
}

impl<A: 'static> CallbackList<A> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, callback: impl Fn(&A) + Send + Sync + 'static) -> Disposer {
        let callback: Callback<A> = Arc::new(callback);
        let id = {
            let mut entries = self.entries.lock();
            entries.next_id += 1;
            let id = entries.next_id;
            entries.callbacks.push((id, callback));
            id
        };
        let entries: Weak<Mutex<Entries<A>>> = Arc::downgrade(&self.entries);
        Disposer::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().callbacks.retain(|(i, _)| *i != id);
            }
        })
    }

    /// Call every listener registered at the time of the call. A panicking
    /// listener does not stop the others.
    pub(crate) fn emit(&self, label: &str, arg: &A) {
        let snapshot: Vec<Callback<A>> = self
            .entries
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            invoke_guarded(label, || callback(arg));
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().callbacks.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().callbacks.len()
    }
}

impl<A> fmt::Debug for CallbackList<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.entries.lock().callbacks.len())
            .finish()
    }
}
