//! Word-count suppression for dictation and voice-input sources.
//!
//! Keystrokes synthesised by dictation tools still count as keystrokes, but
//! they say nothing about typing, so they are kept out of word counts and
//! active-time accounting.

use crate::config::SuppressionConfig;

/// Case-insensitive matcher over application identity.
#[derive(Debug, Clone, Default)]
pub struct SuppressionRules {
    bundle_id_suffixes: Vec<String>,
    bundle_id_fragments: Vec<String>,
    app_name_fragments: Vec<String>,
}

impl SuppressionRules {
    pub fn new(config: &SuppressionConfig) -> Self {
        fn lowered(values: &[String]) -> Vec<String> {
            values
                .iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect()
        }

        Self {
            bundle_id_suffixes: lowered(&config.bundle_id_suffixes),
            bundle_id_fragments: lowered(&config.bundle_id_fragments),
            app_name_fragments: lowered(&config.app_name_fragments),
        }
    }

    /// Rules that suppress nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, app_bundle_id: Option<&str>, app_name: Option<&str>) -> bool {
        if let Some(bundle) = app_bundle_id {
            let bundle = bundle.to_lowercase();
            if self.bundle_id_suffixes.iter().any(|s| bundle.ends_with(s.as_str()))
                || self.bundle_id_fragments.iter().any(|f| bundle.contains(f.as_str()))
            {
                return true;
            }
        }
        if let Some(name) = app_name {
            let name = name.to_lowercase();
            if self.app_name_fragments.iter().any(|f| name.contains(f.as_str())) {
                return true;
            }
        }
        false
    }
}
