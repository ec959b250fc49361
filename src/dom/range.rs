//! Boundary points, ranges, and range editing.

use std::cmp::Ordering;

use super::{Mutation, NodeData, NodeId, Tree};

/// A point in the tree: a char offset inside a text node, or a child index
/// inside any other node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomRange {
    pub start: Boundary,
    pub end: Boundary,
}

impl DomRange {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        Self { start, end }
    }

    pub fn collapsed(at: Boundary) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// Byte index of the `chars`-th char of `text`.
fn byte_index(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

impl Tree {
    /// Child indices leading from `root` down to `node`. `None` when `node` is
    /// not in the light tree of `root`.
    pub fn path_from(&self, root: NodeId, node: NodeId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = node;
        while current != root {
            path.push(self.index_in_parent(current)?);
            current = self.parent(current)?;
        }
        path.reverse();
        Some(path)
    }

    /// Tree-order key of a boundary relative to `root`. Keys compare
    /// lexicographically in document order: a point before child `i` sorts
    /// before every point inside child `i`.
    pub fn boundary_key(&self, root: NodeId, boundary: Boundary) -> Option<Vec<usize>> {
        let mut key = self.path_from(root, boundary.node)?;
        key.push(boundary.offset.min(self.node_length(boundary.node)));
        Some(key)
    }

    /// Outermost light-tree ancestor of `node`.
    fn light_root(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    fn clamp(&self, boundary: Boundary) -> Boundary {
        Boundary::new(
            boundary.node,
            boundary.offset.min(self.node_length(boundary.node)),
        )
    }

    fn splice_text(&mut self, node: NodeId, from: usize, to: usize, insert: &str) {
        if let Some(NodeData::Text(text)) = self.node_mut(node).map(|n| &mut n.data) {
            let start = byte_index(text, from);
            let end = byte_index(text, to);
            text.replace_range(start..end, insert);
        }
    }

    fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let mut chain = vec![a];
        while let Some(parent) = self.parent(chain[chain.len() - 1]) {
            chain.push(parent);
        }
        let mut current = Some(b);
        while let Some(node) = current {
            if chain.contains(&node) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Nearest block element at or above `node`, strictly below `limit`.
    fn block_below(&self, node: NodeId, limit: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == limit {
                return None;
            }
            if self.element(id).is_some_and(|e| e.is_block()) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }

    /// Ancestor of `node` (or `node` itself) whose parent is `ancestor`.
    fn child_toward(&self, ancestor: NodeId, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            let parent = self.parent(current)?;
            if parent == ancestor {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Join the block holding `end` onto the content holding `start`, so the
    /// line break between them goes with the deleted content.
    fn merge_blocks(&mut self, start: NodeId, end: NodeId, records: &mut Vec<Mutation>) {
        let Some(common) = self.common_ancestor(start, end) else {
            return;
        };
        let Some(end_block) = self.block_below(end, common) else {
            return;
        };
        let Some(end_parent) = self.parent(end_block) else {
            return;
        };
        let (target, mut index) = match self.block_below(start, common) {
            Some(start_block) => (start_block, self.children(start_block).len()),
            None => {
                let Some(branch) = self.child_toward(common, end) else {
                    return;
                };
                let Some(index) = self.index_in_parent(branch) else {
                    return;
                };
                (common, index)
            }
        };

        let moved = self.children(end_block).to_vec();
        for &child in &moved {
            self.detach(child);
            self.insert_child(target, child, index);
            index += 1;
        }
        self.detach(end_block);
        records.push(Mutation::ChildList {
            target: end_parent,
            added: Vec::new(),
            removed: vec![end_block],
        });
        if !moved.is_empty() {
            records.push(Mutation::ChildList {
                target,
                added: moved,
                removed: Vec::new(),
            });
        }
    }

    /// Remove the content of `range` and insert `text` at its start.
    ///
    /// Nodes wholly inside the range are detached and partially covered text
    /// nodes are trimmed. When the range ends in a different block than it
    /// starts, that block's remaining content joins the start side.
    /// Returns the caret after the insertion plus the mutation records.
    pub(super) fn replace_range(
        &mut self,
        range: DomRange,
        text: &str,
    ) -> Option<(Boundary, Vec<Mutation>)> {
        let root = self.light_root(range.start.node);
        if self.light_root(range.end.node) != root {
            return None;
        }
        let (mut start, mut end) = (self.clamp(range.start), self.clamp(range.end));
        let mut start_key = self.boundary_key(root, start)?;
        let mut end_key = self.boundary_key(root, end)?;
        if start_key.cmp(&end_key) == Ordering::Greater {
            std::mem::swap(&mut start, &mut end);
            std::mem::swap(&mut start_key, &mut end_key);
        }

        let mut records = Vec::new();

        // Topmost nodes lying entirely inside the range.
        let mut doomed = Vec::new();
        let mut stack = vec![(root, Vec::new())];
        while let Some((node, path)) = stack.pop() {
            for (index, &child) in self.children(node).iter().enumerate().rev() {
                let mut child_start = path.clone();
                child_start.push(index);
                let mut child_end = path.clone();
                child_end.push(index + 1);
                if child_start >= start_key && child_end <= end_key {
                    doomed.push(child);
                } else if child_end > start_key && child_start < end_key {
                    stack.push((child, child_start));
                }
            }
        }

        if start.node == end.node && self.is_text(start.node) {
            if start.offset != end.offset {
                self.splice_text(start.node, start.offset, end.offset, "");
                records.push(Mutation::CharacterData { target: start.node });
            }
        } else {
            if self.is_text(start.node) {
                let len = self.node_length(start.node);
                if start.offset < len {
                    self.splice_text(start.node, start.offset, len, "");
                    records.push(Mutation::CharacterData { target: start.node });
                }
            }
            if self.is_text(end.node) && end.offset > 0 {
                self.splice_text(end.node, 0, end.offset, "");
                records.push(Mutation::CharacterData { target: end.node });
            }
        }

        for node in doomed {
            if let Some(parent) = self.detach(node) {
                records.push(Mutation::ChildList {
                    target: parent,
                    added: Vec::new(),
                    removed: vec![node],
                });
            }
        }

        if start_key != end_key {
            self.merge_blocks(start.node, end.node, &mut records);
        }

        // Removed siblings all sat after `start`, so it is still valid.
        let inserted = text.chars().count();
        let caret = if inserted == 0 {
            start
        } else if self.is_text(start.node) {
            self.splice_text(start.node, start.offset, start.offset, text);
            records.push(Mutation::CharacterData { target: start.node });
            Boundary::new(start.node, start.offset + inserted)
        } else {
            let previous = start
                .offset
                .checked_sub(1)
                .and_then(|i| self.children(start.node).get(i).copied())
                .filter(|&sibling| self.is_text(sibling));
            match previous {
                Some(sibling) => {
                    let len = self.node_length(sibling);
                    self.splice_text(sibling, len, len, text);
                    records.push(Mutation::CharacterData { target: sibling });
                    Boundary::new(sibling, len + inserted)
                }
                None => {
                    let node = self.push(NodeData::Text(text.to_string()));
                    self.insert_child(start.node, node, start.offset);
                    records.push(Mutation::ChildList {
                        target: start.node,
                        added: vec![node],
                        removed: Vec::new(),
                    });
                    Boundary::new(node, inserted)
                }
            }
        };

        self.selection = Some(DomRange::collapsed(caret));
        Some((caret, records))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Dom;
    use super::*;

    fn paragraph(dom: &Dom, parent: NodeId, text: &str) -> (NodeId, NodeId) {
        let p = dom.append_element(parent, "p");
        let t = dom.append_text(p, text);
        (p, t)
    }

    #[test]
    fn boundary_keys_follow_document_order() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        let (p1, t1) = paragraph(&dom, root, "Hello");
        let (_p2, t2) = paragraph(&dom, root, "World");
        let tree = dom.read();

        let before_p1_end = tree.boundary_key(root, Boundary::new(t1, 5)).unwrap();
        let p1_end = tree.boundary_key(root, Boundary::new(p1, 1)).unwrap();
        let between = tree.boundary_key(root, Boundary::new(root, 1)).unwrap();
        let world = tree.boundary_key(root, Boundary::new(t2, 0)).unwrap();
        assert!(before_p1_end < p1_end);
        assert!(p1_end < between);
        assert!(between < world);
    }

    #[test]
    fn path_outside_root_is_none() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        let other = dom.append_element(dom.document(), "div");
        assert_eq!(dom.read().path_from(root, other), None);
    }

    #[test]
    fn replace_within_one_text_node() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        let text = dom.append_text(root, "Hello world");

        let caret = dom
            .replace_range(
                DomRange::new(Boundary::new(text, 0), Boundary::new(text, 5)),
                "Hi",
            )
            .unwrap();
        assert_eq!(caret, Boundary::new(text, 2));
        assert_eq!(dom.read().text(text), Some("Hi world"));
    }

    #[test]
    fn replace_across_paragraphs_trims_and_detaches() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        let (_, t1) = paragraph(&dom, root, "One");
        let (p2, _) = paragraph(&dom, root, "Two");
        let (_, t3) = paragraph(&dom, root, "Three");

        dom.replace_range(
            DomRange::new(Boundary::new(t1, 1), Boundary::new(t3, 2)),
            "",
        )
        .unwrap();
        let tree = dom.read();
        assert_eq!(tree.text(t1), Some("O"));
        assert_eq!(tree.text(t3), Some("ree"));
        assert_eq!(tree.parent(p2), None);
        assert_eq!(tree.parent(t3), tree.parent(t1));
        assert_eq!(tree.children(root).len(), 1);
    }

    #[test]
    fn replace_into_inline_text_unwraps_end_block() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        let lead = dom.append_text(root, "abc");
        let (p, t) = paragraph(&dom, root, "def");

        dom.replace_range(
            DomRange::new(Boundary::new(lead, 3), Boundary::new(t, 1)),
            "",
        )
        .unwrap();
        let tree = dom.read();
        assert_eq!(tree.parent(p), None);
        assert_eq!(tree.children(root), &[lead, t]);
        assert_eq!(tree.text(t), Some("ef"));
    }

    #[test]
    fn break_inside_one_block_is_not_merged() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        let p = dom.append_element(root, "p");
        let a = dom.append_text(p, "a");
        dom.append_element(p, "br");
        let b = dom.append_text(p, "b");

        dom.replace_range(DomRange::new(Boundary::new(a, 1), Boundary::new(b, 0)), "")
            .unwrap();
        let tree = dom.read();
        assert_eq!(tree.children(p), &[a, b]);
        assert_eq!(tree.parent(p), Some(root));
    }

    #[test]
    fn insert_at_element_boundary_creates_text() {
        let dom = Dom::new("https://example.com");
        let root = dom.append_element(dom.document(), "div");
        dom.append_element(root, "br");

        let caret = dom
            .replace_range(DomRange::collapsed(Boundary::new(root, 0)), "abc")
            .unwrap();
        let tree = dom.read();
        assert_eq!(tree.children(root).len(), 2);
        assert_eq!(tree.text(caret.node), Some("abc"));
        assert_eq!(caret.offset, 3);
    }
}
