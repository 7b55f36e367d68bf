//! Backend selection configuration.

use super::BackendKind;

/// Environment variable holding a comma separated preference list,
/// e.g. `NDGRAD_BACKEND=generic` or `NDGRAD_BACKEND=faer,generic`.
pub const BACKEND_ENV_VAR: &str = "NDGRAD_BACKEND";

/// Ordered list of providers to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    preference: Vec<BackendKind>,
}

impl BackendConfig {
    /// Create a config with an explicit preference order.
    pub fn new(preference: Vec<BackendKind>) -> Self {
        Self { preference }
    }

    /// Config that only accepts `kind`.
    pub fn only(kind: BackendKind) -> Self {
        Self::new(vec![kind])
    }

    /// Preference order, most preferred first.
    pub fn preference(&self) -> &[BackendKind] {
        &self.preference
    }

    /// Read [`BACKEND_ENV_VAR`], falling back to the default order when the
    /// variable is unset. Unknown names are skipped with a warning.
    pub fn from_env() -> Self {
        match std::env::var(BACKEND_ENV_VAR) {
            Ok(value) => Self::parse_list(&value),
            Err(_) => Self::default(),
        }
    }

    /// Parse a comma separated preference list.
    ///
    /// An empty list (after dropping unknown names) yields the default order.
    pub fn parse_list(value: &str) -> Self {
        let mut preference = Vec::new();
        for name in value.split(',').filter(|s| !s.trim().is_empty()) {
            match name.parse::<BackendKind>() {
                Ok(kind) if !preference.contains(&kind) => preference.push(kind),
                Ok(_) => {}
                Err(err) => log::warn!("ignoring {BACKEND_ENV_VAR} entry: {err}"),
            }
        }

        if preference.is_empty() {
            Self::default()
        } else {
            Self::new(preference)
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(BackendKind::ALL.to_vec())
    }
}
