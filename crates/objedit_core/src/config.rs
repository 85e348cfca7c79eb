//! Engine configuration.
//!
//! # Responsibility
//! - Hold validation limits applied before a save is compiled.
//!
//! # Invariants
//! - `EditorConfig::default()` matches the documented constants.
//! - Missing JSON fields fall back to the same defaults.

use serde::Deserialize;

/// Default maximum object name length, in characters.
pub const DEFAULT_MAX_NAME_CHARS: usize = 255;
/// Default maximum object description length, in characters.
pub const DEFAULT_MAX_DESCRIPTION_CHARS: usize = 65_535;

/// Validation limits and accepted link schemes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub max_name_chars: usize,
    pub max_description_chars: usize,
    /// Lowercase URL schemes accepted for link objects.
    pub allowed_url_schemes: Vec<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_name_chars: DEFAULT_MAX_NAME_CHARS,
            max_description_chars: DEFAULT_MAX_DESCRIPTION_CHARS,
            allowed_url_schemes: vec!["http".to_string(), "https".to_string()],
        }
    }
}

impl EditorConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(value: &str) -> Result<Self, String> {
        serde_json::from_str(value).map_err(|err| format!("invalid editor config: {err}"))
    }

    pub(crate) fn allows_scheme(&self, scheme: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        self.allowed_url_schemes
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&scheme))
    }
}
