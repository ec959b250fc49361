//! Notification plumbing for the content model.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{NodeId, Tree};

/// One structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Nodes inserted into or removed from `target`.
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attribute {
        target: NodeId,
        name: String,
    },
    CharacterData {
        target: NodeId,
    },
}

impl Mutation {
    pub fn target(&self) -> NodeId {
        match self {
            Mutation::ChildList { target, .. }
            | Mutation::Attribute { target, .. }
            | Mutation::CharacterData { target } => *target,
        }
    }
}

/// Records delivered to one observer in a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub records: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new(records: Vec<Mutation>) -> Self {
        Self { records }
    }

    /// Append the records of a later batch.
    pub fn extend(&mut self, later: MutationBatch) {
        self.records.extend(later.records);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Focus movement. `related` is the node losing (for `In`) or gaining (for
/// `Out`) focus, when there is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEvent {
    In {
        target: NodeId,
        related: Option<NodeId>,
    },
    Out {
        target: NodeId,
        related: Option<NodeId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub target: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Channel {
    Mutations,
    Input,
    Focus,
    Navigation,
}

struct Listener<T> {
    id: u64,
    scope: Option<NodeId>,
    tx: UnboundedSender<T>,
}

/// Registered listeners, one list per channel.
#[derive(Default)]
pub(super) struct Hub {
    next_id: u64,
    mutations: Vec<Listener<MutationBatch>>,
    input: Vec<Listener<InputEvent>>,
    focus: Vec<Listener<FocusEvent>>,
    navigation: Vec<Listener<NavigationEvent>>,
}

fn add<T>(
    listeners: &mut Vec<Listener<T>>,
    id: u64,
    scope: Option<NodeId>,
) -> UnboundedReceiver<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    listeners.push(Listener { id, scope, tx });
    rx
}

impl Hub {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(super) fn observe(
        &mut self,
        root: NodeId,
    ) -> (u64, Channel, UnboundedReceiver<MutationBatch>) {
        let id = self.allocate();
        (id, Channel::Mutations, add(&mut self.mutations, id, Some(root)))
    }

    pub(super) fn listen_input(
        &mut self,
        scope: NodeId,
    ) -> (u64, Channel, UnboundedReceiver<InputEvent>) {
        let id = self.allocate();
        (id, Channel::Input, add(&mut self.input, id, Some(scope)))
    }

    pub(super) fn listen_focus(&mut self) -> (u64, Channel, UnboundedReceiver<FocusEvent>) {
        let id = self.allocate();
        (id, Channel::Focus, add(&mut self.focus, id, None))
    }

    pub(super) fn listen_navigation(
        &mut self,
    ) -> (u64, Channel, UnboundedReceiver<NavigationEvent>) {
        let id = self.allocate();
        (id, Channel::Navigation, add(&mut self.navigation, id, None))
    }

    fn remove(&mut self, channel: Channel, id: u64) {
        match channel {
            Channel::Mutations => self.mutations.retain(|l| l.id != id),
            Channel::Input => self.input.retain(|l| l.id != id),
            Channel::Focus => self.focus.retain(|l| l.id != id),
            Channel::Navigation => self.navigation.retain(|l| l.id != id),
        }
    }

    /// Deliver each observer the records whose target lies inside its root.
    pub(super) fn notify_mutations(&mut self, tree: &Tree, records: Vec<Mutation>) {
        self.mutations.retain(|listener| {
            let scoped: Vec<Mutation> = records
                .iter()
                .filter(|record| {
                    listener
                        .scope
                        .map_or(true, |root| tree.composed_contains(root, record.target()))
                })
                .cloned()
                .collect();
            scoped.is_empty() || listener.tx.send(MutationBatch::new(scoped)).is_ok()
        });
    }

    pub(super) fn notify_input(&mut self, tree: &Tree, event: InputEvent) {
        self.input.retain(|listener| {
            let in_scope = listener
                .scope
                .map_or(true, |scope| tree.composed_contains(scope, event.target));
            !in_scope || listener.tx.send(event).is_ok()
        });
    }

    pub(super) fn notify_focus(&mut self, event: FocusEvent) {
        self.focus.retain(|listener| listener.tx.send(event).is_ok());
    }

    pub(super) fn notify_navigation(&mut self, event: NavigationEvent) {
        self.navigation
            .retain(|listener| listener.tx.send(event.clone()).is_ok());
    }
}

/// Receiving end of a content-model subscription. Dropping it unregisters
/// the listener.
pub struct Subscription<T> {
    rx: UnboundedReceiver<T>,
    hub: Weak<Mutex<Hub>>,
    channel: Channel,
    id: u64,
}

impl<T> Subscription<T> {
    pub(super) fn new(
        (id, channel, rx): (u64, Channel, UnboundedReceiver<T>),
        hub: &Arc<Mutex<Hub>>,
    ) -> Self {
        Self {
            rx,
            hub: Arc::downgrade(hub),
            channel,
            id,
        }
    }

    /// Wait for the next message. `None` once the content model is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an already queued message without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().remove(self.channel, self.id);
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}
