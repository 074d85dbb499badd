use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::EngineResult;

/// Default lifetime of a global cache entry, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default number of reads sent in one pipelined round trip.
pub const MAX_BULK_ENTRIES_IN_PIPELINE: usize = 50;

/// Validator settings, usually read from `cfgval.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Global cache TTL; 0 keeps entries until invalidated.
    pub cache_ttl_secs: u64,
    pub pipeline_batch: usize,
    /// Accept every batch without looking at it.
    pub skip_validation: bool,
    /// Stop after syntax validation.
    pub skip_semantic_validation: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            pipeline_batch: MAX_BULK_ENTRIES_IN_PIPELINE,
            skip_validation: false,
            skip_semantic_validation: false,
        }
    }
}

impl ValidatorConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn batch_size(&self) -> usize {
        self.pipeline_batch.max(1)
    }

    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Read settings from disk; a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ValidatorConfig::from_toml("cache_ttl_secs = 0\nskip_semantic_validation = true\n")
            .expect("parse config");
        assert_eq!(config.cache_ttl(), Duration::ZERO);
        assert!(config.skip_semantic_validation);
        assert_eq!(config.batch_size(), MAX_BULK_ENTRIES_IN_PIPELINE);
    }

    #[test]
    fn zero_batch_is_clamped() {
        let config = ValidatorConfig {
            pipeline_batch: 0,
            ..ValidatorConfig::default()
        };
        assert_eq!(config.batch_size(), 1);
    }
}
