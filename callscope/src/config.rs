//! Monitor configuration.
//!
//! Read from a camelCase JSON document; every field is optional:
//!
//! ```json
//! {
//!   "capabilities": { "eval": { "enabled": true, "visible": false } },
//!   "bypass": ["5d41402abc4b2a76b9719d911017c592"],
//!   "fidelity": "reduced",
//!   "origin": "https://app.example.com",
//!   "hardwareConcurrency": 8
//! }
//! ```

use callscope_common::TraceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::classification::{OriginRules, DEFAULT_PACKAGE_SCHEME};
use crate::domain::{Capability, ConfigError, Fidelity};
use crate::tracer::{TracerConfig, DEFAULT_SELF_SIGNATURE};

/// Per-capability switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySettings {
    /// Install the wrapper
    pub enabled: bool,
    /// Include its collections in snapshots
    pub visible: bool,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self { enabled: true, visible: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Capabilities missing from the map use [`CapabilitySettings::default`]
    pub capabilities: BTreeMap<Capability, CapabilitySettings>,
    pub bypass: BTreeSet<TraceId>,
    pub debug: BTreeSet<TraceId>,
    pub fidelity: Fidelity,
    pub origin: Option<String>,
    pub package_scheme: String,
    pub self_signature: String,
    /// Replaces the host's hint for worker `MAX_ONLINE`
    pub hardware_concurrency: Option<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capabilities: BTreeMap::new(),
            bypass: BTreeSet::new(),
            debug: BTreeSet::new(),
            fidelity: Fidelity::Full,
            origin: None,
            package_scheme: DEFAULT_PACKAGE_SCHEME.to_owned(),
            self_signature: DEFAULT_SELF_SIGNATURE.to_owned(),
            hardware_concurrency: None,
        }
    }
}

impl MonitorConfig {
    /// Load a config file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or is not a valid config document.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_json_str(&text)
    }

    /// # Errors
    /// Fails on malformed JSON or unknown enum values.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn settings(&self, capability: Capability) -> CapabilitySettings {
        self.capabilities.get(&capability).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.settings(capability).enabled
    }

    #[must_use]
    pub fn is_visible(&self, capability: Capability) -> bool {
        self.settings(capability).visible
    }

    pub fn set(&mut self, capability: Capability, settings: CapabilitySettings) {
        self.capabilities.insert(capability, settings);
    }

    #[must_use]
    pub fn tracer_config(&self) -> TracerConfig {
        TracerConfig {
            fidelity: self.fidelity,
            rules: OriginRules {
                origin: self.origin.clone(),
                package_scheme: self.package_scheme.clone(),
            },
            self_signature: self.self_signature.clone(),
            bypass: self.bypass.iter().cloned().collect(),
            debug: self.debug.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_enables_everything() {
        let config = MonitorConfig::default();
        for capability in Capability::ALL {
            assert!(config.is_enabled(capability));
            assert!(config.is_visible(capability));
        }
        assert_eq!(config.fidelity, Fidelity::Full);
    }

    #[test]
    fn test_partial_document() {
        let config = MonitorConfig::from_json_str(
            r#"{
                "capabilities": { "eval": { "visible": false }, "worker": { "enabled": false } },
                "bypass": ["aa", "bb"],
                "fidelity": "reduced",
                "hardwareConcurrency": 2
            }"#,
        )
        .unwrap();

        assert!(config.is_enabled(Capability::Eval));
        assert!(!config.is_visible(Capability::Eval));
        assert!(!config.is_enabled(Capability::Worker));
        assert!(config.is_visible(Capability::Timers));
        assert_eq!(config.hardware_concurrency, Some(2));

        let tracer = config.tracer_config();
        assert_eq!(tracer.fidelity, Fidelity::Reduced);
        assert!(tracer.bypass.contains(&TraceId::from("bb")));
        assert_eq!(tracer.rules.package_scheme, DEFAULT_PACKAGE_SCHEME);
    }

    #[test]
    fn test_unknown_capability_is_rejected() {
        let err = MonitorConfig::from_json_str(r#"{ "capabilities": { "gpu": {} } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "origin": "https://app.test" }}"#).unwrap();

        let config = MonitorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.origin.as_deref(), Some("https://app.test"));

        let missing = MonitorConfig::from_file(Path::new("/nonexistent/callscope.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
