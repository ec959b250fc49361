use std::sync::Arc;

use dashmap::DashMap;

use crate::dom::{NodeId, Tree};
use crate::surface::{Surface, SurfaceId};

/// Tracked surfaces keyed by root node.
///
/// Only the scanner adds or removes entries; everything else reads.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: DashMap<NodeId, Arc<Surface>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn insert(&self, surface: Arc<Surface>) {
        self.surfaces.insert(surface.root(), surface);
    }

    pub(super) fn remove(&self, root: NodeId) -> Option<Arc<Surface>> {
        self.surfaces.remove(&root).map(|(_, surface)| surface)
    }

    /// Surface rooted at `root`.
    pub fn get(&self, root: NodeId) -> Option<Arc<Surface>> {
        self.surfaces.get(&root).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_by_id(&self, id: SurfaceId) -> Option<Arc<Surface>> {
        self.surfaces
            .iter()
            .find(|entry| entry.value().id() == id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, root: NodeId) -> bool {
        self.surfaces.contains_key(&root)
    }

    /// All surfaces ordered by id.
    pub fn surfaces(&self) -> Vec<Arc<Surface>> {
        let mut surfaces: Vec<Arc<Surface>> = self
            .surfaces
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        surfaces.sort_by_key(|s| s.id());
        surfaces
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.surfaces.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Surface owning `node`: the nearest tracked root among `node` and its
    /// composed ancestors.
    pub fn surface_for_node(&self, tree: &Tree, node: NodeId) -> Option<Arc<Surface>> {
        tree.composed_ancestors(node).find_map(|n| self.get(n))
    }
}
