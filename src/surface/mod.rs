//! Uniform text surfaces over editable regions.
//!
//! A [`Surface`] exposes one capability set regardless of what backs it:
//! - a flat-value form control (`input`, `textarea`), see [`FlatValueSurface`]
//! - a tree of structured content (an editing host), see [`StructuredSurface`]
//!
//! All offsets are plain-text offsets counted in `char`s.

mod flat;
pub mod offsets;
mod structured;

pub use flat::FlatValueSurface;
pub use structured::StructuredSurface;

use std::fmt;
use std::time::Duration;

use crate::callbacks::{invoke_guarded, Disposer};
use crate::dom::{Dom, InputEvent, MutationBatch, NodeId, Subscription};

/// Debounce window applied when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Stable identifier assigned at discovery. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    FlatValue,
    StructuredContent,
}

/// A selection as plain-text offsets. `end` is exclusive and never before
/// `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextSelection {
    pub start: usize,
    pub end: usize,
}

impl TextSelection {
    /// Build a selection, ordering the endpoints.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn collapsed(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Clamp both endpoints into `[0, len]`.
    pub fn clamp(self, len: usize) -> Self {
        Self::new(self.start.min(len), self.end.min(len))
    }
}

impl fmt::Display for TextSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Options for [`Surface::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeOptions {
    /// Quiet period after the last signal before the callback runs.
    pub debounce: Duration,
}

impl Default for ChangeOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone)]
enum Adapter {
    Flat(FlatValueSurface),
    Structured(StructuredSurface),
}

impl Adapter {
    fn text(&self) -> String {
        match self {
            Adapter::Flat(s) => s.text(),
            Adapter::Structured(s) => s.text(),
        }
    }

    fn selection(&self) -> TextSelection {
        match self {
            Adapter::Flat(s) => s.selection(),
            Adapter::Structured(s) => s.selection(),
        }
    }
}

/// An editable region discovered in the content model.
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    adapter: Adapter,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId, kind: SurfaceKind, dom: Dom, root: NodeId) -> Self {
        let adapter = match kind {
            SurfaceKind::FlatValue => Adapter::Flat(FlatValueSurface::new(dom, root)),
            SurfaceKind::StructuredContent => {
                Adapter::Structured(StructuredSurface::new(dom, root))
            }
        };
        Self { id, adapter }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn kind(&self) -> SurfaceKind {
        match self.adapter {
            Adapter::Flat(_) => SurfaceKind::FlatValue,
            Adapter::Structured(_) => SurfaceKind::StructuredContent,
        }
    }

    /// Root container in the content model.
    pub fn root(&self) -> NodeId {
        match &self.adapter {
            Adapter::Flat(s) => s.root(),
            Adapter::Structured(s) => s.root(),
        }
    }

    fn dom(&self) -> &Dom {
        match &self.adapter {
            Adapter::Flat(s) => s.dom(),
            Adapter::Structured(s) => s.dom(),
        }
    }

    pub fn text(&self) -> String {
        self.adapter.text()
    }

    pub fn selection(&self) -> TextSelection {
        self.adapter.selection()
    }

    pub fn set_selection(&self, start: usize, end: usize) {
        match &self.adapter {
            Adapter::Flat(s) => s.set_selection(start, end),
            Adapter::Structured(s) => s.set_selection(start, end),
        }
    }

    /// Replace `[start, end)` with `text`, leave the caret after the inserted
    /// text, and fire an input signal on the root.
    pub fn replace(&self, start: usize, end: usize, text: &str) {
        match &self.adapter {
            Adapter::Flat(s) => s.replace(start, end, text),
            Adapter::Structured(s) => s.replace(start, end, text),
        }
    }

    /// Root still attached to the top-level document.
    pub fn is_valid(&self) -> bool {
        self.dom().read().is_connected(self.root())
    }

    pub fn focus(&self) {
        self.dom().focus(self.root());
    }

    pub fn is_focused(&self) -> bool {
        match &self.adapter {
            Adapter::Flat(s) => s.is_focused(),
            Adapter::Structured(s) => s.is_focused(),
        }
    }

    /// Call `callback(text, selection)` once `options.debounce` has passed
    /// without a new input signal (or, for structured content, a mutation
    /// batch).
    ///
    /// Needs a Tokio runtime; without one the subscription is inert.
    pub fn on_change<F>(&self, callback: F, options: ChangeOptions) -> Disposer
    where
        F: Fn(&str, TextSelection) + Send + Sync + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(surface = %self.id, "No runtime, change subscription is inert");
            return Disposer::noop();
        };

        let dom = self.dom();
        let mut input = dom.on_input(self.root());
        let mut mutations = match self.adapter {
            Adapter::Structured(_) => Some(dom.observe(self.root())),
            Adapter::Flat(_) => None,
        };
        let adapter = self.adapter.clone();
        let id = self.id;

        let task = runtime.spawn(async move {
            while next_signal(&mut input, mutations.as_mut()).await {
                loop {
                    tokio::select! {
                        alive = next_signal(&mut input, mutations.as_mut()) => {
                            if !alive {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(options.debounce) => break,
                    }
                }
                let text = adapter.text();
                let selection = adapter.selection();
                tracing::trace!(surface = %id, %selection, "Surface changed");
                invoke_guarded("surface change", || callback(&text, selection));
            }
        });
        Disposer::new(move || task.abort())
    }
}

/// Wait for the next change signal. `false` once the content model is gone.
async fn next_signal(
    input: &mut Subscription<InputEvent>,
    mutations: Option<&mut Subscription<MutationBatch>>,
) -> bool {
    match mutations {
        Some(mutations) => tokio::select! {
            event = input.recv() => event.is_some(),
            batch = mutations.recv() => batch.is_some(),
        },
        None => input.recv().await.is_some(),
    }
}

/// Replace the chars `[start, end)` of `text` with `insert`.
pub(crate) fn splice_chars(text: &str, start: usize, end: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.extend(text.chars().take(start));
    out.push_str(insert);
    out.extend(text.chars().skip(end));
    out
}
