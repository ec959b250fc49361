//! Lifecycle-managed facade over discovery, focus tracking, and per-surface
//! change subscriptions.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::callbacks::{CallbackList, Disposer};
use crate::discovery::{ScanResult, Scanner, SurfaceRegistry};
use crate::dom::{Dom, MutationBatch, NavigationEvent, Subscription};
use crate::focus::{FocusState, FocusTracker};
use crate::settings::TrackerConfig;
use crate::surface::{ChangeOptions, Surface, SurfaceId, TextSelection};

/// The single change subscription held for one surface.
struct Watcher {
    generation: u64,
    disposer: Disposer,
}

struct ManagerInner {
    dom: Dom,
    config: TrackerConfig,
    scanner: Scanner,
    focus: FocusTracker,
    added: CallbackList<Arc<Surface>>,
    removed: CallbackList<Arc<Surface>>,
    watchers: DashMap<SurfaceId, Watcher>,
    next_watch: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl ManagerInner {
    /// Announce a scan: removals first, each after its watcher is released,
    /// then additions.
    fn apply(&self, result: &ScanResult) {
        for surface in &result.removed {
            if let Some((_, watcher)) = self.watchers.remove(&surface.id()) {
                watcher.disposer.dispose();
            }
            self.focus.handle_removed(surface);
            self.removed.emit("surface remove", surface);
        }
        for surface in &result.added {
            self.added.emit("surface add", surface);
        }
        if !result.added.is_empty() {
            self.focus.handle_added(&result.added);
        }
    }

    fn release_watchers(&self) {
        let ids: Vec<SurfaceId> = self.watchers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, watcher)) = self.watchers.remove(&id) {
                watcher.disposer.dispose();
            }
        }
    }
}

/// Tracks every surface in a content model.
///
/// Dropping the manager disposes it.
pub struct SurfaceManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for SurfaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceManager")
            .field("initialized", &self.inner.initialized.load(Ordering::SeqCst))
            .field("surfaces", &self.inner.scanner.registry().len())
            .field("watchers", &self.inner.watchers.len())
            .field("focus", &self.inner.focus.state())
            .finish()
    }
}

impl SurfaceManager {
    pub fn new(dom: Dom, config: TrackerConfig) -> Self {
        let scanner = Scanner::new(dom.clone(), config.eligibility.clone());
        let focus = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        Self {
            inner: Arc::new(ManagerInner {
                dom,
                config,
                scanner,
                focus,
                added: CallbackList::new(),
                removed: CallbackList::new(),
                watchers: DashMap::new(),
                next_watch: AtomicU64::new(1),
                tasks: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        self.inner.scanner.registry()
    }

    /// Run the first scan and start following mutations, navigation and
    /// focus. Calling it again before [`dispose`](Self::dispose) does nothing.
    pub fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let dom = &self.inner.dom;
        // Subscribe before scanning so nothing between the two is missed.
        let mutations = dom.observe(dom.document());
        let navigation = dom.on_navigation();

        let result = self.inner.scanner.rescan();
        self.inner.apply(&result);
        self.inner.focus.start();

        match Handle::try_current() {
            Ok(runtime) => {
                let weak = Arc::downgrade(&self.inner);
                let settle_delay = self.inner.config.settle_delay;
                let mut tasks = self.inner.tasks.lock();
                tasks.push(runtime.spawn(observe_mutations(weak.clone(), mutations)));
                tasks.push(runtime.spawn(settle_after_navigation(
                    weak,
                    navigation,
                    settle_delay,
                )));
            }
            Err(_) => tracing::warn!("No runtime, live surface updates are disabled"),
        }
        tracing::debug!(surfaces = result.surfaces.len(), "Surface tracking started");
    }

    /// Tracked surfaces ordered by id.
    pub fn surfaces(&self) -> Vec<Arc<Surface>> {
        self.inner.scanner.registry().surfaces()
    }

    pub fn focused_surface(&self) -> Option<Arc<Surface>> {
        self.inner.focus.current()
    }

    pub fn focus_state(&self) -> FocusState {
        self.inner.focus.state()
    }

    /// `callback(current, previous)` on every focus transition.
    pub fn on_focus_change<F>(&self, callback: F) -> Disposer
    where
        F: Fn(Option<&Arc<Surface>>, Option<&Arc<Surface>>) + Send + Sync + 'static,
    {
        self.inner
            .focus
            .on_change(move |change| callback(change.current.as_ref(), change.previous.as_ref()))
    }

    pub fn on_surface_add(
        &self,
        callback: impl Fn(&Arc<Surface>) + Send + Sync + 'static,
    ) -> Disposer {
        self.inner.added.add(callback)
    }

    pub fn on_surface_remove(
        &self,
        callback: impl Fn(&Arc<Surface>) + Send + Sync + 'static,
    ) -> Disposer {
        self.inner.removed.add(callback)
    }

    /// Subscribe to debounced changes of `surface`, replacing any earlier
    /// subscription for the same surface. The subscription also ends when the
    /// surface is removed.
    pub fn watch_surface<F>(&self, surface: &Surface, callback: F) -> Disposer
    where
        F: Fn(&str, TextSelection) + Send + Sync + 'static,
    {
        let id = surface.id();
        let generation = self.inner.next_watch.fetch_add(1, Ordering::Relaxed);
        let options = ChangeOptions {
            debounce: self.inner.config.debounce,
        };
        let disposer = surface.on_change(callback, options);
        let replaced = self.inner.watchers.insert(
            id,
            Watcher {
                generation,
                disposer,
            },
        );
        if let Some(previous) = replaced {
            tracing::debug!(surface = %id, "Replaced surface watcher");
            previous.disposer.dispose();
        }

        let manager = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            let Some(inner) = manager.upgrade() else {
                return;
            };
            let released = inner
                .watchers
                .remove_if(&id, |_, watcher| watcher.generation == generation);
            if let Some((_, watcher)) = released {
                watcher.disposer.dispose();
            }
        })
    }

    /// Whether `surface` currently has a change subscription.
    pub fn is_watched(&self, surface: &Surface) -> bool {
        self.inner.watchers.contains_key(&surface.id())
    }

    /// Scan now and announce the differences.
    pub fn rescan(&self) -> ScanResult {
        let result = self.inner.scanner.rescan();
        self.inner.apply(&result);
        result
    }

    /// Stop all background work and release every subscription. Safe to call
    /// repeatedly and before [`init`](Self::init).
    pub fn dispose(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.inner.focus.stop();
        self.inner.focus.reset();
        self.inner.release_watchers();
        self.inner.added.clear();
        self.inner.removed.clear();
        self.inner.focus.clear_listeners();
        if self.inner.initialized.swap(false, Ordering::SeqCst) {
            tracing::debug!("Surface tracking stopped");
        }
    }
}

impl Drop for SurfaceManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn observe_mutations(
    manager: Weak<ManagerInner>,
    mut mutations: Subscription<MutationBatch>,
) {
    while let Some(mut batch) = mutations.recv().await {
        // Fold in whatever queued up meanwhile.
        while let Some(later) = mutations.try_recv() {
            batch.extend(later);
        }
        let Some(inner) = manager.upgrade() else {
            break;
        };
        if let Some(result) = inner.scanner.handle_mutations(&batch) {
            inner.apply(&result);
        }
    }
}

async fn settle_after_navigation(
    manager: Weak<ManagerInner>,
    mut navigation: Subscription<NavigationEvent>,
    delay: Duration,
) {
    while let Some(event) = navigation.recv().await {
        tracing::debug!(url = %event.url, "Navigation, waiting for content to settle");
        loop {
            tokio::select! {
                next = navigation.recv() => match next {
                    Some(event) => tracing::trace!(url = %event.url, "Settle delay restarted"),
                    None => return,
                },
                _ = tokio::time::sleep(delay) => break,
            }
        }
        let Some(inner) = manager.upgrade() else {
            break;
        };
        let result = inner.scanner.rescan();
        inner.apply(&result);
    }
}
