use crate::dom::{Dom, NodeId};

use super::{splice_chars, TextSelection};

/// Surface over a form control whose content is a single value string.
#[derive(Debug, Clone)]
pub struct FlatValueSurface {
    dom: Dom,
    root: NodeId,
}

impl FlatValueSurface {
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
        self.dom.value(self.root).unwrap_or_default()
    }

    pub fn selection(&self) -> TextSelection {
        let tree = self.dom.read();
        let Some(element) = tree.element(self.root) else {
            return TextSelection::default();
        };
        let (start, end) = element.value_selection;
        TextSelection::new(start, end).clamp(element.value.chars().count())
    }

    pub fn set_selection(&self, start: usize, end: usize) {
        let selection = TextSelection::new(start, end);
        self.dom
            .set_value_selection(self.root, selection.start, selection.end);
    }

    pub fn replace(&self, start: usize, end: usize, text: &str) {
        let current = self.text();
        let range = TextSelection::new(start, end).clamp(current.chars().count());
        let updated = splice_chars(&current, range.start, range.end, text);
        let caret = range.start + text.chars().count();

        self.dom.set_value(self.root, &updated);
        self.dom.set_value_selection(self.root, caret, caret);
        self.dom.dispatch_input(self.root);
    }

    pub fn is_focused(&self) -> bool {
        self.dom.active_element() == Some(self.root)
    }
}
