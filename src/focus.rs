//! Tracks which surface, if any, holds input focus.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::callbacks::{CallbackList, Disposer};
use crate::discovery::SurfaceRegistry;
use crate::dom::{Dom, FocusEvent, NodeId};
use crate::surface::{Surface, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    Unfocused,
    Focused(SurfaceId),
}

/// One focus transition.
#[derive(Debug, Clone)]
pub struct FocusChange {
    pub current: Option<Arc<Surface>>,
    pub previous: Option<Arc<Surface>>,
}

struct FocusInner {
    dom: Dom,
    registry: Arc<SurfaceRegistry>,
    current: Mutex<Option<Arc<Surface>>>,
    listeners: CallbackList<FocusChange>,
    events: Mutex<Option<JoinHandle<()>>>,
    pending_check: Mutex<Option<JoinHandle<()>>>,
}

/// Focus state machine over the surfaces in a registry.
///
/// Moving focus straight from one surface to another produces a single
/// announcement. Losing focus is confirmed on the next scheduler tick so the
/// out/in pair of a direct move never shows an intermediate `Unfocused`.
#[derive(Clone)]
pub struct FocusTracker {
    inner: Arc<FocusInner>,
}

impl fmt::Debug for FocusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusTracker")
            .field("state", &self.state())
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}

impl FocusTracker {
    pub fn new(dom: Dom, registry: Arc<SurfaceRegistry>) -> Self {
        Self {
            inner: Arc::new(FocusInner {
                dom,
                registry,
                current: Mutex::new(None),
                listeners: CallbackList::new(),
                events: Mutex::new(None),
                pending_check: Mutex::new(None),
            }),
        }
    }

    fn from_weak(inner: &Weak<FocusInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Begin following focus events. The initial state is read from the
    /// active element without an announcement.
    pub fn start(&self) {
        self.stop();
        let mut events = self.inner.dom.on_focus();
        self.sync_with_active_element();

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No runtime, focus events will not be followed");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(tracker) = FocusTracker::from_weak(&weak) else {
                    break;
                };
                tracker.handle_event(event);
            }
        });
        *self.inner.events.lock() = Some(task);
    }

    /// Stop following focus events. The current state is kept.
    pub fn stop(&self) {
        if let Some(task) = self.inner.events.lock().take() {
            task.abort();
        }
        if let Some(task) = self.inner.pending_check.lock().take() {
            task.abort();
        }
    }

    pub fn state(&self) -> FocusState {
        match &*self.inner.current.lock() {
            Some(surface) => FocusState::Focused(surface.id()),
            None => FocusState::Unfocused,
        }
    }

    pub fn current(&self) -> Option<Arc<Surface>> {
        self.inner.current.lock().clone()
    }

    pub fn on_change(&self, callback: impl Fn(&FocusChange) + Send + Sync + 'static) -> Disposer {
        self.inner.listeners.add(callback)
    }

    pub(crate) fn clear_listeners(&self) {
        self.inner.listeners.clear();
    }

    fn surface_for(&self, node: NodeId) -> Option<Arc<Surface>> {
        let tree = self.inner.dom.read();
        self.inner.registry.surface_for_node(&tree, node)
    }

    fn sync_with_active_element(&self) {
        let active = self.inner.dom.active_element();
        let surface = active.and_then(|node| self.surface_for(node));
        *self.inner.current.lock() = surface;
    }

    pub fn handle_event(&self, event: FocusEvent) {
        match event {
            FocusEvent::In { target, .. } => {
                if let Some(surface) = self.surface_for(target) {
                    self.transition(Some(surface));
                }
            }
            FocusEvent::Out { related, .. } => {
                // focus is moving into another surface; its focus-in follows
                if related.is_some_and(|node| self.surface_for(node).is_some()) {
                    return;
                }
                if let Some(previous) = self.current() {
                    self.schedule_focus_check(previous.id());
                }
            }
        }
    }

    /// Forget `surface` if it is the focused one.
    pub fn handle_removed(&self, surface: &Surface) {
        if self.state() == FocusState::Focused(surface.id()) {
            self.transition(None);
        }
    }

    /// Pick up focus that landed on a root before it became a surface.
    pub fn handle_added(&self, added: &[Arc<Surface>]) {
        if self.state() != FocusState::Unfocused {
            return;
        }
        let Some(active) = self.inner.dom.active_element() else {
            return;
        };
        let Some(surface) = self.surface_for(active) else {
            return;
        };
        if added.iter().any(|s| s.id() == surface.id()) {
            self.transition(Some(surface));
        }
    }

    /// Drop the current state without an announcement.
    pub(crate) fn reset(&self) {
        *self.inner.current.lock() = None;
    }

    fn schedule_focus_check(&self, previous: SurfaceId) {
        let Ok(runtime) = Handle::try_current() else {
            self.confirm_focus_loss(previous);
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            tokio::task::yield_now().await;
            if let Some(tracker) = FocusTracker::from_weak(&weak) {
                tracker.confirm_focus_loss(previous);
            }
        });
        if let Some(stale) = self.inner.pending_check.lock().replace(task) {
            stale.abort();
        }
    }

    fn confirm_focus_loss(&self, previous: SurfaceId) {
        let Some(current) = self.current() else {
            return;
        };
        if current.id() == previous && !current.is_focused() {
            self.transition(None);
        }
    }

    fn transition(&self, next: Option<Arc<Surface>>) {
        let change = {
            let mut current = self.inner.current.lock();
            let unchanged = current.as_ref().map(|s| s.id()) == next.as_ref().map(|s| s.id());
            if unchanged {
                return;
            }
            let previous = std::mem::replace(&mut *current, next.clone());
            FocusChange {
                current: next,
                previous,
            }
        };
        tracing::debug!(
            current = ?change.current.as_ref().map(|s| s.id()),
            previous = ?change.previous.as_ref().map(|s| s.id()),
            "Focus changed"
        );
        self.inner.listeners.emit("focus change", &change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Eligibility, Scanner};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<(Option<String>, Option<String>)>>>;

    fn setup() -> (Dom, Scanner, NodeId, NodeId) {
        let dom = Dom::new("https://example.com");
        let a = dom.append_element(dom.document(), "textarea");
        let b = dom.append_element(dom.document(), "div");
        dom.set_attribute(b, "contenteditable", "true");
        let scanner = Scanner::new(dom.clone(), Eligibility::default());
        scanner.rescan();
        (dom, scanner, a, b)
    }

    fn record(tracker: &FocusTracker) -> (Log, Disposer) {
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        let disposer = tracker.on_change(move |change| {
            let id = |s: &Option<Arc<Surface>>| s.as_ref().map(|s| s.id().to_string());
            sink.lock().push((id(&change.current), id(&change.previous)));
        });
        (log, disposer)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn some(id: &str) -> Option<String> {
        Some(id.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn initial_state_is_silent() {
        let (dom, scanner, a, _) = setup();
        dom.focus(a);
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        let (log, _d) = record(&tracker);
        tracker.start();
        settle().await;
        assert_eq!(tracker.state(), FocusState::Focused(SurfaceId::new(1)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_move_is_one_announcement() {
        let (dom, scanner, a, b) = setup();
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        let (log, _d) = record(&tracker);

        dom.focus(a);
        settle().await;
        dom.focus(b);
        settle().await;

        assert_eq!(
            *log.lock(),
            vec![
                (some("surface-1"), None),
                (some("surface-2"), some("surface-1")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blur_unfocuses_after_a_tick() {
        let (dom, scanner, a, _) = setup();
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        dom.focus(a);
        settle().await;

        let (log, _d) = record(&tracker);
        dom.blur();
        assert_eq!(tracker.state(), FocusState::Focused(SurfaceId::new(1)));
        settle().await;
        assert_eq!(tracker.state(), FocusState::Unfocused);
        assert_eq!(*log.lock(), vec![(None, some("surface-1"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_on_plain_node_unfocuses() {
        let (dom, scanner, a, _) = setup();
        let button = dom.append_element(dom.document(), "button");
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        dom.focus(a);
        settle().await;

        dom.focus(button);
        settle().await;
        assert_eq!(tracker.state(), FocusState::Unfocused);
    }

    #[tokio::test(start_paused = true)]
    async fn moving_inside_one_surface_is_silent() {
        let (dom, scanner, _, b) = setup();
        let first = dom.append_element(b, "p");
        let second = dom.append_element(b, "p");
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        dom.focus(first);
        settle().await;

        let (log, _d) = record(&tracker);
        dom.focus(second);
        settle().await;
        assert!(log.lock().is_empty());
        assert_eq!(tracker.state(), FocusState::Focused(SurfaceId::new(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn removal_of_focused_surface_unfocuses() {
        let (dom, scanner, a, _) = setup();
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        dom.focus(a);
        settle().await;

        let surface = tracker.current().unwrap();
        tracker.handle_removed(&surface);
        assert_eq!(tracker.state(), FocusState::Unfocused);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_that_lands_before_discovery_is_picked_up() {
        let dom = Dom::new("https://example.com");
        let scanner = Scanner::new(dom.clone(), Eligibility::default());
        scanner.rescan();
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        let (log, _d) = record(&tracker);

        let field = dom.append_element(dom.document(), "textarea");
        dom.focus(field);
        settle().await;
        assert_eq!(tracker.state(), FocusState::Unfocused);

        let result = scanner.rescan();
        tracker.handle_added(&result.added);
        assert_eq!(tracker.state(), FocusState::Focused(SurfaceId::new(1)));
        assert_eq!(*log.lock(), vec![(some("surface-1"), None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_additions_keep_focus() {
        let (dom, scanner, a, _) = setup();
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        dom.focus(a);
        settle().await;

        let (log, _d) = record(&tracker);
        dom.append_element(dom.document(), "textarea");
        let result = scanner.rescan();
        tracker.handle_added(&result.added);
        assert_eq!(tracker.state(), FocusState::Focused(SurfaceId::new(1)));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn reset_is_silent() {
        let (dom, scanner, a, _) = setup();
        dom.focus(a);
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        let (log, _d) = record(&tracker);
        tracker.reset();
        assert_eq!(tracker.current().map(|s| s.id()), None);
        assert!(log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_tracker_ignores_events() {
        let (dom, scanner, a, _) = setup();
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        tracker.stop();
        dom.focus(a);
        settle().await;
        assert_eq!(tracker.state(), FocusState::Unfocused);
    }

    #[test]
    fn without_runtime_loss_is_confirmed_immediately() {
        let (dom, scanner, a, _) = setup();
        dom.focus(a);
        let tracker = FocusTracker::new(dom.clone(), Arc::clone(scanner.registry()));
        tracker.start();
        dom.blur();
        tracker.handle_event(FocusEvent::Out {
            target: a,
            related: None,
        });
        assert_eq!(tracker.state(), FocusState::Unfocused);
    }
}
