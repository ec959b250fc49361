//! Which elements qualify as surfaces.

use regex::Regex;

use crate::dom::{Element, NodeId, Tree};
use crate::surface::SurfaceKind;

use super::DiscoveryError;

/// Attributes whose change can alter the outcome of [`Eligibility::classify`].
/// Configured opt-out attributes are checked in addition.
pub const ELIGIBILITY_ATTRIBUTES: &[&str] = &[
    "autocomplete",
    "class",
    "contenteditable",
    "disabled",
    "hidden",
    "readonly",
    "role",
    "style",
    "type",
];

pub(crate) const DEFAULT_CODE_EDITOR_MARKERS: &[&str] = &[
    "CodeMirror(-.*)?",
    "cm-editor",
    "cm-content",
    "monaco-editor",
    "ace_editor",
];

pub(crate) const DEFAULT_OPT_OUT_ATTRIBUTES: &[&str] = &["data-surface-ignore", "data-gramm=false"];

pub(crate) const DEFAULT_SENSITIVE_AUTOCOMPLETE: &[&str] = &[
    "cc-number",
    "cc-csc",
    "one-time-code",
    "current-password",
    "new-password",
];

pub(crate) const DEFAULT_TEXT_INPUT_TYPES: &[&str] = &["text", "search", "email", "url"];

/// An opt-out marker: `name` matches any value, `name=value` only that value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptOut {
    pub name: String,
    pub value: Option<String>,
}

impl OptOut {
    pub fn parse(entry: &str) -> Self {
        match entry.split_once('=') {
            Some((name, value)) => Self {
                name: name.trim().to_ascii_lowercase(),
                value: Some(value.trim().to_string()),
            },
            None => Self {
                name: entry.trim().to_ascii_lowercase(),
                value: None,
            },
        }
    }

    fn matches(&self, element: &Element) -> bool {
        match (element.attribute(&self.name), &self.value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual.eq_ignore_ascii_case(expected),
            (None, _) => false,
        }
    }
}

/// Compiled eligibility rules.
#[derive(Debug, Clone)]
pub struct Eligibility {
    code_editor: Regex,
    opt_out: Vec<OptOut>,
    sensitive_autocomplete: Vec<String>,
    text_input_types: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Eligibility {
    fn default() -> Self {
        Self::new(
            &owned(DEFAULT_CODE_EDITOR_MARKERS),
            &owned(DEFAULT_OPT_OUT_ATTRIBUTES),
            &owned(DEFAULT_SENSITIVE_AUTOCOMPLETE),
            &owned(DEFAULT_TEXT_INPUT_TYPES),
        )
        .expect("default code editor markers are valid patterns")
    }
}

impl Eligibility {
    /// Compile the rules. Each code editor marker is a regex matched against
    /// whole class tokens.
    pub fn new(
        code_editor_markers: &[String],
        opt_out_attributes: &[String],
        sensitive_autocomplete: &[String],
        text_input_types: &[String],
    ) -> Result<Self, regex::Error> {
        let pattern = if code_editor_markers.is_empty() {
            // matches no class token
            "^$".to_string()
        } else {
            format!("^(?:{})$", code_editor_markers.join("|"))
        };
        Ok(Self {
            code_editor: Regex::new(&pattern)?,
            opt_out: opt_out_attributes.iter().map(|e| OptOut::parse(e)).collect(),
            sensitive_autocomplete: sensitive_autocomplete
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            text_input_types: text_input_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        })
    }

    pub fn opt_out(&self) -> &[OptOut] {
        &self.opt_out
    }

    /// Whether a change to attribute `name` can affect eligibility.
    pub fn watches_attribute(&self, name: &str) -> bool {
        ELIGIBILITY_ATTRIBUTES.contains(&name) || self.opt_out.iter().any(|o| o.name == name)
    }

    /// The kind `node` would have based on its shape alone.
    pub fn candidate_kind(&self, tree: &Tree, node: NodeId) -> Option<SurfaceKind> {
        let element = tree.element(node)?;
        match element.tag.as_str() {
            "textarea" => return Some(SurfaceKind::FlatValue),
            "input" => {
                let kind = element.attribute("type").unwrap_or("text").to_ascii_lowercase();
                return self
                    .text_input_types
                    .contains(&kind)
                    .then_some(SurfaceKind::FlatValue);
            }
            _ => {}
        }
        if tree.is_editing_host(node) {
            return Some(SurfaceKind::StructuredContent);
        }
        let role = element.attribute("role").map(str::to_ascii_lowercase);
        let is_textbox = matches!(role.as_deref(), Some("textbox" | "searchbox"));
        let parent_editable = tree.parent(node).is_some_and(|p| tree.is_editable(p));
        (is_textbox && !parent_editable).then_some(SurfaceKind::StructuredContent)
    }

    /// Decide whether `node` is a surface and of which kind.
    pub fn classify(
        &self,
        tree: &Tree,
        node: NodeId,
    ) -> Result<Option<SurfaceKind>, DiscoveryError> {
        if !tree.is_connected(node) {
            return Err(DiscoveryError::Detached(node));
        }
        let Some(kind) = self.candidate_kind(tree, node) else {
            return Ok(None);
        };
        let Some(element) = tree.element(node) else {
            return Ok(None);
        };
        if !tree.is_rendered(node)
            || self.is_sensitive(element)
            || element.has_attribute("disabled")
            || element.has_attribute("readonly")
            || self.is_excluded_by_ancestry(tree, node)
        {
            return Ok(None);
        }
        Ok(Some(kind))
    }

    fn is_sensitive(&self, element: &Element) -> bool {
        if element.tag == "input"
            && element
                .attribute("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("password"))
        {
            return true;
        }
        element.attribute("autocomplete").is_some_and(|value| {
            value.split_whitespace().any(|token| {
                self.sensitive_autocomplete
                    .contains(&token.to_ascii_lowercase())
            })
        })
    }

    fn is_code_editor(&self, element: &Element) -> bool {
        element
            .attribute("class")
            .is_some_and(|class| class.split_whitespace().any(|t| self.code_editor.is_match(t)))
    }

    /// Code editor, opt-out, or non-editable island on `node` or above it.
    fn is_excluded_by_ancestry(&self, tree: &Tree, node: NodeId) -> bool {
        tree.composed_ancestors(node).any(|ancestor| {
            let Some(element) = tree.element(ancestor) else {
                return false;
            };
            if self.is_code_editor(element) || self.opt_out.iter().any(|o| o.matches(element)) {
                return true;
            }
            ancestor != node
                && element
                    .attribute("contenteditable")
                    .is_some_and(|v| v.eq_ignore_ascii_case("false"))
        })
    }
}
