//! Static provider registry
//!
//! Providers are declared in configuration and indexed here at init; there
//! is no dynamic loading. The statistics provider is the one kind the
//! client itself consumes.

use coracle_core::ProviderConfig;
use std::collections::HashMap;

/// Provider kind consumed by the statistics subsystem
pub const PROVIDER_KIND_STATISTICS: &str = "statistics";

/// Providers indexed by kind, in declaration order
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    by_kind: HashMap<String, Vec<ProviderConfig>>,
}

impl ProviderRegistry {
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut by_kind: HashMap<String, Vec<ProviderConfig>> = HashMap::new();
        for config in configs {
            by_kind
                .entry(config.kind.clone())
                .or_default()
                .push(config.clone());
        }
        Self { by_kind }
    }

    pub fn of_kind(&self, kind: &str) -> &[ProviderConfig] {
        self.by_kind.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the statistics provider: the preferred name when present,
    /// otherwise the first declared one
    pub fn statistics_provider(&self, preferred: Option<&str>) -> Option<&ProviderConfig> {
        let candidates = self.of_kind(PROVIDER_KIND_STATISTICS);
        match preferred {
            Some(name) => candidates.iter().find(|p| p.name == name),
            None => candidates.first(),
        }
    }
}
