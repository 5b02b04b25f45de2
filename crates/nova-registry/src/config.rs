//! Ambient configuration (`spec.md` §6, `SPEC_FULL.md` §K).
//!
//! These four flags are the registry's only configuration surface; the
//! crate never reads environment variables or CLI flags itself, matching
//! `spec.md`'s framing of configuration as host-supplied ambient input.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Bypass the binary cache entirely; always rebuild from source namespaces.
    pub no_registry_cache: bool,
    /// Force full fault-in of every cold row on `init`, instead of lazy
    /// per-access materialization.
    pub no_lazy_cache_loading: bool,
    /// Compute and validate the cache stamp. When `false`, a stamp of `0`
    /// is used, which matches any on-disk stamp (`spec.md` §6).
    pub check_config: bool,
    /// Install a listener that logs every delta at `debug!`, per §6's
    /// "debug toggle that subscribes a printing listener".
    pub debug_listener: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            no_registry_cache: false,
            no_lazy_cache_loading: false,
            check_config: true,
            debug_listener: false,
        }
    }
}

#[cfg(feature = "toml-config")]
impl RegistryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_cache_and_stamp_check() {
        let cfg = RegistryConfig::default();
        assert!(!cfg.no_registry_cache);
        assert!(cfg.check_config);
    }
}
