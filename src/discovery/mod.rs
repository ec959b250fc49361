//! Discovery of editable regions.
//!
//! This module provides:
//! - `Eligibility`, the rules deciding which elements become surfaces
//! - `SurfaceRegistry`, the identity-stable map from root node to surface
//! - `Scanner`, which walks the content model (open shadow roots and
//!   same-origin frames included) and keeps the registry current

pub(crate) mod eligibility;
mod registry;
mod scanner;

pub use eligibility::{Eligibility, OptOut, ELIGIBILITY_ATTRIBUTES};
pub use registry::SurfaceRegistry;
pub use scanner::Scanner;

use std::sync::Arc;

use thiserror::Error;

use crate::dom::NodeId;
use crate::surface::Surface;

/// Why a node or sub-tree was skipped during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("node {0} is not connected to the document")]
    Detached(NodeId),

    #[error("frame {frame} is cross-origin ({origin})")]
    CrossOrigin { frame: NodeId, origin: String },

    #[error("frame {0} has no loaded document")]
    FrameNotLoaded(NodeId),
}

/// Outcome of one scan: the full snapshot plus what changed.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Every tracked surface, in discovery order.
    pub surfaces: Vec<Arc<Surface>>,
    pub added: Vec<Arc<Surface>>,
    pub removed: Vec<Arc<Surface>>,
}

impl ScanResult {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
