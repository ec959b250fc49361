//! Plain-text offsets <-> tree positions for structured content.
//!
//! The content of a root is flattened into text runs interleaved with line
//! breaks. A `br` always yields one `\n`. A block boundary yields one `\n`
//! only when something has been emitted and the last emitted item is not
//! already a break; it is held back until the next run or `br`, so content
//! never ends with a fabricated break. Every conversion goes through the same
//! [`TextLayout`], which keeps both directions in agreement.

use crate::dom::{Boundary, DomRange, NodeData, NodeId, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Run {
        node: NodeId,
        start: usize,
        len: usize,
        /// Key of the point just after the run.
        end_key: Vec<usize>,
    },
    Break {
        start: usize,
        /// Positions at or after this key lie after the break.
        key: Vec<usize>,
        /// Point just before the break.
        before: Boundary,
        /// Point just after the break.
        after: Boundary,
    },
}

/// Flattened view of one structured-content root.
#[derive(Debug, Clone)]
pub struct TextLayout {
    root: NodeId,
    segments: Vec<Segment>,
    text: String,
    len: usize,
}

struct LayoutBuilder<'a> {
    tree: &'a Tree,
    segments: Vec<Segment>,
    text: String,
    len: usize,
    /// Block boundary waiting for the next run or `br`.
    pending: Option<(Vec<usize>, Boundary)>,
}

impl LayoutBuilder<'_> {
    fn walk(&mut self, node: NodeId, path: &mut Vec<usize>) {
        let tree = self.tree;
        for (index, &child) in tree.children(node).iter().enumerate() {
            path.push(index);
            match tree.data(child) {
                Some(NodeData::Text(text)) => self.push_run(child, text, path),
                Some(NodeData::Element(element)) if element.tag == "br" => {
                    self.push_line_break(node, index, path)
                }
                Some(NodeData::Element(element)) if element.is_unrendered() => {}
                Some(NodeData::Element(element)) if element.is_block() => {
                    self.mark_block_boundary(path.clone(), Boundary::new(node, index));
                    self.walk(child, path);
                    let mut after = path.clone();
                    if let Some(last) = after.last_mut() {
                        *last += 1;
                    }
                    self.mark_block_boundary(after, Boundary::new(node, index + 1));
                }
                Some(NodeData::Element(_)) => self.walk(child, path),
                _ => {}
            }
            path.pop();
        }
    }

    fn ends_with_run(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Run { .. }))
    }

    fn last_run_end(&self) -> Option<Boundary> {
        match self.segments.last() {
            Some(Segment::Run { node, len, .. }) => Some(Boundary::new(*node, *len)),
            _ => None,
        }
    }

    fn mark_block_boundary(&mut self, key: Vec<usize>, at: Boundary) {
        if self.ends_with_run() {
            self.pending = Some((key, at));
        }
    }

    fn flush_pending(&mut self) {
        let Some((key, after)) = self.pending.take() else {
            return;
        };
        let Some(before) = self.last_run_end() else {
            return;
        };
        self.segments.push(Segment::Break {
            start: self.len,
            key,
            before,
            after,
        });
        self.text.push('\n');
        self.len += 1;
    }

    fn push_run(&mut self, node: NodeId, text: &str, path: &[usize]) {
        let len = text.chars().count();
        if len == 0 {
            return;
        }
        self.flush_pending();
        let mut end_key = path.to_vec();
        end_key.push(len);
        self.segments.push(Segment::Run {
            node,
            start: self.len,
            len,
            end_key,
        });
        self.text.push_str(text);
        self.len += len;
    }

    fn push_line_break(&mut self, parent: NodeId, index: usize, path: &[usize]) {
        self.flush_pending();
        let mut key = path.to_vec();
        if let Some(last) = key.last_mut() {
            *last += 1;
        }
        self.segments.push(Segment::Break {
            start: self.len,
            key,
            before: Boundary::new(parent, index),
            after: Boundary::new(parent, index + 1),
        });
        self.text.push('\n');
        self.len += 1;
    }
}

impl TextLayout {
    /// Flatten the light tree under `root`.
    pub fn build(tree: &Tree, root: NodeId) -> Self {
        let mut builder = LayoutBuilder {
            tree,
            segments: Vec::new(),
            text: String::new(),
            len: 0,
            pending: None,
        };
        builder.walk(root, &mut Vec::new());
        Self {
            root,
            segments: builder.segments,
            text: builder.text,
            len: builder.len,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Plain-text offset of `position`, or `None` when it is outside the root.
    pub fn position_to_offset(&self, tree: &Tree, position: Boundary) -> Option<usize> {
        let target = tree.boundary_key(self.root, position)?;
        let mut offset = 0;
        for segment in &self.segments {
            match segment {
                Segment::Run {
                    node,
                    start,
                    len,
                    end_key,
                } => {
                    if *node == position.node {
                        return Some(start + position.offset.min(*len));
                    }
                    if *end_key > target {
                        break;
                    }
                    offset = start + len;
                }
                Segment::Break { start, key, .. } => {
                    if *key > target {
                        break;
                    }
                    offset = start + 1;
                }
            }
        }
        Some(offset)
    }

    /// Tree position of a plain-text offset, or `None` when the offset is
    /// past the end or the root has no content.
    pub fn offset_to_position(&self, offset: usize) -> Option<Boundary> {
        if offset > self.len {
            return None;
        }
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Run {
                    node, start, len, ..
                } => {
                    if *start <= offset && offset <= start + len {
                        return Some(Boundary::new(*node, offset - start));
                    }
                }
                Segment::Break {
                    start,
                    before,
                    after,
                    ..
                } => {
                    if offset == *start {
                        return Some(*before);
                    }
                    if offset == start + 1 {
                        // A run starting right here owns the position.
                        let run_follows = matches!(
                            self.segments.get(index + 1),
                            Some(Segment::Run { start: next, .. }) if *next == offset
                        );
                        if !run_follows {
                            return Some(*after);
                        }
                    }
                }
            }
        }
        None
    }

    pub fn offset_to_range(&self, start: usize, end: usize) -> Option<DomRange> {
        let (start, end) = (start.min(end), start.max(end));
        let start_point = self.offset_to_position(start)?;
        let end_point = if end == start {
            start_point
        } else {
            self.offset_to_position(end)?
        };
        Some(DomRange::new(start_point, end_point))
    }
}

/// Plain text of a structured-content root.
pub fn extract_text(tree: &Tree, root: NodeId) -> String {
    TextLayout::build(tree, root).into_text()
}

/// Plain-text offset of a tree position inside `root`.
pub fn position_to_offset(tree: &Tree, root: NodeId, position: Boundary) -> Option<usize> {
    TextLayout::build(tree, root).position_to_offset(tree, position)
}

/// Range inside `root` spanning the plain-text offsets `start..end`. `None`
/// means the offsets are stale and should be skipped.
pub fn offset_to_range(tree: &Tree, root: NodeId, start: usize, end: usize) -> Option<DomRange> {
    TextLayout::build(tree, root).offset_to_range(start, end)
}
