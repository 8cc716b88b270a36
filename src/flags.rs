//! Feature-flag client seam. Grounded in the upstream project's Unleash
//! integration (a named boolean toggle), kept narrow since the real
//! network client is out of scope for this crate.
use std::collections::HashSet;

pub trait FeatureFlags: Send + Sync {
    fn enabled(&self, name: &str) -> bool;
}

/// Always-on/always-off toggle set, for process wiring and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    enabled: HashSet<String>,
}

impl StaticFlags {
    pub fn new(enabled: impl IntoIterator<Item = String>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl FeatureFlags for StaticFlags {
    fn enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }
}
