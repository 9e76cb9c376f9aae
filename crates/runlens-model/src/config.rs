//! Engine configuration loaded from `runlens.toml`.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

pub(crate) const CONFIG_FILES: &[&str] = &["runlens.toml", ".runlens.toml"];

/// Model configuration. Missing or unparsable files fall back to defaults.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Include skipped tests in the `"{pass}/{total} passed"` total.
    pub count_skipped_tests: bool,
    /// How many sessions' id-index entries each suite retains.
    pub retained_sessions: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            count_skipped_tests: false,
            retained_sessions: 8,
        }
    }
}

impl ModelConfig {
    /// Load configuration for a workspace root.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        let Some(path) = CONFIG_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
        else {
            return Self::default();
        };
        let Ok(contents) = std::fs::read_to_string(&path) else {
            warn!("Failed to read runlens config at {}", path.display());
            return Self::default();
        };
        Self::from_contents(&contents)
    }

    /// Parse configuration from file contents.
    #[must_use]
    pub fn from_contents(contents: &str) -> Self {
        let parsed: ConfigFile = match toml::from_str(contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Failed to parse runlens config: {err}");
                return Self::default();
            }
        };
        let defaults = Self::default();
        Self {
            count_skipped_tests: parsed
                .model
                .count_skipped_tests
                .unwrap_or(defaults.count_skipped_tests),
            retained_sessions: parsed
                .model
                .retained_sessions
                .unwrap_or(defaults.retained_sessions)
                .max(1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    model: ModelSection,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSection {
    count_skipped_tests: Option<bool>,
    retained_sessions: Option<usize>,
}
