use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dom::{Dom, Mutation, MutationBatch, NodeData, NodeId, Tree};
use crate::surface::{Surface, SurfaceId, SurfaceKind};

use super::{DiscoveryError, Eligibility, ScanResult, SurfaceRegistry};

/// Walks the content model and keeps the registry in sync with it.
#[derive(Debug)]
pub struct Scanner {
    dom: Dom,
    eligibility: Eligibility,
    registry: Arc<SurfaceRegistry>,
    next_id: AtomicU64,
    scan_lock: Mutex<()>,
}

impl Scanner {
    pub fn new(dom: Dom, eligibility: Eligibility) -> Self {
        Self {
            dom,
            eligibility,
            registry: Arc::new(SurfaceRegistry::new()),
            next_id: AtomicU64::new(1),
            scan_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        &self.registry
    }

    pub fn eligibility(&self) -> &Eligibility {
        &self.eligibility
    }

    /// Eligible roots in discovery order: each sub-tree's own candidates,
    /// then its open shadow roots, then its same-origin frames.
    fn collect(&self, tree: &Tree) -> Vec<(NodeId, SurfaceKind)> {
        let top = tree.document();
        let origin = tree.origin(top).unwrap_or_default();
        let mut visited = HashSet::new();
        let mut found = Vec::new();
        self.collect_in(tree, top, origin, &mut visited, &mut found);
        found
    }

    fn collect_in(
        &self,
        tree: &Tree,
        root: NodeId,
        origin: &str,
        visited: &mut HashSet<NodeId>,
        found: &mut Vec<(NodeId, SurfaceKind)>,
    ) {
        if !visited.insert(root) {
            return;
        }
        let nodes = tree.descendants(root);

        for &node in &nodes {
            match self.eligibility.classify(tree, node) {
                Ok(Some(kind)) => found.push((node, kind)),
                Ok(None) => {}
                Err(error) => tracing::debug!(%node, %error, "Skipped candidate"),
            }
        }

        for &node in &nodes {
            if let Some(shadow) = tree.open_shadow_root(node) {
                self.collect_in(tree, shadow, origin, visited, found);
            }
        }

        for &node in &nodes {
            if !tree.element(node).is_some_and(|e| e.is_frame()) {
                continue;
            }
            match same_origin_document(tree, node, origin) {
                Ok(document) => self.collect_in(tree, document, origin, visited, found),
                Err(error) => tracing::debug!(frame = %node, %error, "Skipped frame"),
            }
        }
    }

    /// Scan the whole content model and reconcile the registry.
    ///
    /// Surviving surfaces keep their identity. Roots that are gone, no
    /// longer eligible, or changed kind are removed.
    pub fn rescan(&self) -> ScanResult {
        let _guard = self.scan_lock.lock();
        let found = {
            let tree = self.dom.read();
            self.collect(&tree)
        };
        let kinds: HashMap<NodeId, SurfaceKind> = found.iter().copied().collect();

        let mut removed: Vec<Arc<Surface>> = self
            .registry
            .surfaces()
            .into_iter()
            .filter(|surface| kinds.get(&surface.root()) != Some(&surface.kind()))
            .collect();
        for surface in &removed {
            self.registry.remove(surface.root());
        }
        removed.sort_by_key(|s| s.id());

        let mut surfaces = Vec::with_capacity(found.len());
        let mut added = Vec::new();
        for (root, kind) in found {
            if let Some(existing) = self.registry.get(root) {
                surfaces.push(existing);
                continue;
            }
            let id = SurfaceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            let surface = Arc::new(Surface::new(id, kind, self.dom.clone(), root));
            tracing::debug!(surface = %id, %root, ?kind, "Surface discovered");
            self.registry.insert(Arc::clone(&surface));
            surfaces.push(Arc::clone(&surface));
            added.push(surface);
        }
        for surface in &removed {
            tracing::debug!(surface = %surface.id(), root = %surface.root(), "Surface removed");
        }

        ScanResult {
            surfaces,
            added,
            removed,
        }
    }

    /// Whether `batch` can change the set of surfaces.
    pub fn is_relevant(&self, batch: &MutationBatch) -> bool {
        let tree = self.dom.read();
        batch.records.iter().any(|record| match record {
            Mutation::ChildList { added, removed, .. } => {
                added.iter().any(|&node| self.introduces_surfaces(&tree, node))
                    || (!removed.is_empty()
                        && self
                            .registry
                            .roots()
                            .iter()
                            .any(|&root| !tree.is_connected(root)))
            }
            Mutation::Attribute { target, name } => {
                // Visibility and opt-outs are inherited, so the change can
                // admit candidates anywhere under `target`.
                self.eligibility.watches_attribute(name)
                    && (self.registry.contains(*target)
                        || self.introduces_surfaces(&tree, *target)
                        || self
                            .registry
                            .roots()
                            .iter()
                            .any(|&root| tree.composed_contains(*target, root)))
            }
            Mutation::CharacterData { .. } => false,
        })
    }

    /// `node` or something under it is a candidate, a shadow host, a frame,
    /// or a freshly attached shadow root or frame document.
    fn introduces_surfaces(&self, tree: &Tree, node: NodeId) -> bool {
        if matches!(
            tree.data(node),
            Some(NodeData::ShadowRoot { .. } | NodeData::Document { .. })
        ) {
            return true;
        }
        std::iter::once(node)
            .chain(tree.descendants(node))
            .any(|n| match tree.element(n) {
                Some(element) => {
                    element.is_frame()
                        || element.shadow_root.is_some()
                        || matches!(self.eligibility.classify(tree, n), Ok(Some(_)))
                }
                None => false,
            })
    }

    /// Rescan when `batch` is relevant.
    pub fn handle_mutations(&self, batch: &MutationBatch) -> Option<ScanResult> {
        if !self.is_relevant(batch) {
            tracing::trace!(records = batch.records.len(), "Ignored mutation batch");
            return None;
        }
        Some(self.rescan())
    }
}

fn same_origin_document(
    tree: &Tree,
    frame: NodeId,
    origin: &str,
) -> Result<NodeId, DiscoveryError> {
    let document = tree
        .frame_document(frame)
        .ok_or(DiscoveryError::FrameNotLoaded(frame))?;
    let frame_origin = tree.origin(document).unwrap_or_default();
    if frame_origin != origin {
        return Err(DiscoveryError::CrossOrigin {
            frame,
            origin: frame_origin.to_string(),
        });
    }
    Ok(document)
}
