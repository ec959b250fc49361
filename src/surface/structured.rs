use crate::dom::{Boundary, Dom, DomRange, NodeId};

use super::offsets::TextLayout;
use super::TextSelection;

/// Surface over a tree of editable content.
///
/// Every read rebuilds the [`TextLayout`] so offsets always reflect the
/// current tree.
#[derive(Debug, Clone)]
pub struct StructuredSurface {
    dom: Dom,
    root: NodeId,
}

impl StructuredSurface {
    pub fn new(dom: Dom, root: NodeId) -> Self {
        Self { dom, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(super) fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn text(&self) -> String {
        TextLayout::build(&self.dom.read(), self.root).into_text()
    }

    /// Document selection mapped into this root. Falls back to `{0, 0}` when
    /// either endpoint lies outside the root.
    pub fn selection(&self) -> TextSelection {
        let tree = self.dom.read();
        let Some(range) = tree.selection() else {
            return TextSelection::default();
        };
        let layout = TextLayout::build(&tree, self.root);
        match (
            layout.position_to_offset(&tree, range.start),
            layout.position_to_offset(&tree, range.end),
        ) {
            (Some(start), Some(end)) => TextSelection::new(start, end),
            _ => TextSelection::default(),
        }
    }

    /// Install a document selection covering `[start, end)`. Stale offsets
    /// leave the selection untouched.
    pub fn set_selection(&self, start: usize, end: usize) {
        let range = {
            let tree = self.dom.read();
            TextLayout::build(&tree, self.root).offset_to_range(start, end)
        };
        match range {
            Some(range) => self.dom.set_selection(Some(range)),
            None => tracing::debug!(root = %self.root, start, end, "Skipped stale selection"),
        }
    }

    pub fn replace(&self, start: usize, end: usize, text: &str) {
        let selection = TextSelection::new(start, end);
        let range = {
            let tree = self.dom.read();
            let layout = TextLayout::build(&tree, self.root);
            if layout.is_empty() && selection.end == 0 {
                // Nothing to anchor on yet; insert at the start of the root.
                Some(DomRange::collapsed(Boundary::new(self.root, 0)))
            } else {
                layout.offset_to_range(selection.start, selection.end)
            }
        };
        let Some(range) = range else {
            tracing::debug!(root = %self.root, start, end, "Skipped stale replacement");
            return;
        };
        if self.dom.replace_range(range, text).is_none() {
            return;
        }

        let caret = selection.start + text.chars().count();
        let caret_range = {
            let tree = self.dom.read();
            TextLayout::build(&tree, self.root).offset_to_range(caret, caret)
        };
        if let Some(range) = caret_range {
            self.dom.set_selection(Some(range));
        }
        self.dom.dispatch_input(self.root);
    }

    /// Focus is on the root or anything inside it.
    pub fn is_focused(&self) -> bool {
        let tree = self.dom.read();
        tree.active_element()
            .is_some_and(|active| tree.composed_contains(self.root, active))
    }
}
