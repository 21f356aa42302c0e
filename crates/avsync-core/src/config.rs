//! Module configuration
//!
//! The engine reads exactly one option at load time: whether the video
//! monitor enumeration should advertise itself in the host's source picker.
//! It lives in a named section of a host-provided JSON config file; a
//! missing file, section or key all mean the default.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Config file section the module reads
pub const CONFIG_SECTION: &str = "AudioVideoSyncDock";

/// Module-level options, read once at load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Advertise the monitor source in the host's source picker
    #[serde(default)]
    pub list_monitor_sources: bool,
}

impl ModuleConfig {
    /// Extract the module section from an already-parsed config document.
    ///
    /// An absent or malformed section yields the default configuration;
    /// the host owns the file and other modules' sections are none of our
    /// business.
    pub fn from_section(document: &serde_json::Value, section: &str) -> Self {
        document
            .get(section)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }

    /// Read the module section from a JSON config file on disk.
    ///
    /// A missing file is the default configuration; an unreadable or
    /// unparsable file is an error worth surfacing to the host.
    pub fn load_section(path: &Path, section: &str) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let document: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(Self::from_section(&document, section))
    }
}
