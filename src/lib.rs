//! Uniform text surfaces over the editable regions of a live content tree.
//!
//! A [`SurfaceManager`] discovers every editable region reachable from the
//! top-level document (through open shadow roots and same-origin frames),
//! keeps their identities stable while the content mutates, and tracks which
//! one holds focus. Each region is exposed as a [`Surface`] that reads and
//! writes plain text with `char` offsets, whether it is a form control or a
//! tree of structured content.

mod callbacks;
pub mod discovery;
pub mod dom;
mod focus;
mod manager;
pub mod settings;
pub mod surface;

pub use callbacks::Disposer;
pub use discovery::{DiscoveryError, ScanResult, SurfaceRegistry};
pub use focus::{FocusChange, FocusState, FocusTracker};
pub use manager::SurfaceManager;
pub use settings::{discover_settings, load_settings, Settings, SettingsError, TrackerConfig};
pub use surface::{ChangeOptions, Surface, SurfaceId, SurfaceKind, TextSelection};
