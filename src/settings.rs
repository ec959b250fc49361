//! Settings infrastructure for surface-tracker.
//!
//! This module provides support for loading and parsing `surfaces.toml` files
//! to tune change debouncing, navigation settling, and eligibility rules.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::discovery::eligibility::{
    DEFAULT_CODE_EDITOR_MARKERS, DEFAULT_OPT_OUT_ATTRIBUTES, DEFAULT_SENSITIVE_AUTOCOMPLETE,
    DEFAULT_TEXT_INPUT_TYPES,
};
use crate::discovery::Eligibility;
use crate::surface::DEFAULT_DEBOUNCE;

/// Name of the settings file looked up by [`discover_settings`].
pub const SETTINGS_FILE: &str = "surfaces.toml";

/// Delay before rescanning after an in-page navigation.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Root settings structure loaded from surfaces.toml.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Change and navigation timing.
    pub tracking: Option<TrackingSettings>,

    /// Which elements become surfaces.
    pub eligibility: Option<EligibilitySettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingSettings {
    /// Quiet period before a change callback runs (default: 300).
    pub debounce_ms: Option<u64>,

    /// Delay before rescanning after navigation (default: 500).
    pub settle_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EligibilitySettings {
    /// Class-token patterns marking code editors, e.g. `"CodeMirror(-.*)?"`.
    pub code_editor_markers: Option<Vec<String>>,

    /// Attributes that opt a subtree out: `"name"` or `"name=value"`.
    pub opt_out_attributes: Option<Vec<String>>,

    /// `autocomplete` tokens that mark a field as secret.
    pub sensitive_autocomplete: Option<Vec<String>>,

    /// `input` types treated as text fields.
    pub text_input_types: Option<Vec<String>>,
}

/// Errors raised while loading or resolving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid code editor marker: {0}")]
    InvalidMarker(#[from] regex::Error),
}

/// Resolved configuration consumed by the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub debounce: Duration,
    pub settle_delay: Duration,
    pub eligibility: Eligibility,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            eligibility: Eligibility::default(),
        }
    }
}

fn or_defaults(configured: &Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    match configured {
        Some(values) => values.clone(),
        None => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

impl Settings {
    /// Fill in defaults and compile the eligibility rules.
    pub fn resolve(&self) -> Result<TrackerConfig, SettingsError> {
        let tracking = self.tracking.as_ref();
        let debounce = tracking
            .and_then(|t| t.debounce_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE);
        let settle_delay = tracking
            .and_then(|t| t.settle_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SETTLE_DELAY);

        let eligibility = match &self.eligibility {
            None => Eligibility::default(),
            Some(e) => Eligibility::new(
                &or_defaults(&e.code_editor_markers, DEFAULT_CODE_EDITOR_MARKERS),
                &or_defaults(&e.opt_out_attributes, DEFAULT_OPT_OUT_ATTRIBUTES),
                &or_defaults(&e.sensitive_autocomplete, DEFAULT_SENSITIVE_AUTOCOMPLETE),
                &or_defaults(&e.text_input_types, DEFAULT_TEXT_INPUT_TYPES),
            )?,
        };

        Ok(TrackerConfig {
            debounce,
            settle_delay,
            eligibility,
        })
    }
}

/// Read and parse a settings file.
pub fn try_load_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load settings from a surfaces.toml file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    match try_load_settings(path) {
        Ok(settings) => settings,
        Err(SettingsError::Read { .. }) => Settings::default(),
        Err(error) => {
            tracing::warn!(%error, "Falling back to default settings");
            Settings::default()
        }
    }
}

/// Discover surfaces.toml by searching up the directory tree, then direct children.
///
/// Search order:
/// 1. Walk up from `start_dir` to filesystem root
/// 2. If not found, check immediate child directories of `start_dir`
///
/// Returns `(settings, settings_dir)` where `settings_dir` is the directory
/// containing the found file. If not found, returns
/// `(Settings::default(), start_dir)`.
pub fn discover_settings(start_dir: &Path) -> (Settings, PathBuf) {
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return (load_settings(&candidate), dir.to_path_buf());
        }
        current = dir.parent();
    }

    if let Ok(entries) = std::fs::read_dir(start_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                let candidate = entry.path().join(SETTINGS_FILE);
                if candidate.is_file() {
                    return (load_settings(&candidate), entry.path());
                }
            }
        }
    }

    (Settings::default(), start_dir.to_path_buf())
}
