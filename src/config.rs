//! Configuration for sigma-shrink

use crate::error::CompressError;
use crate::incremental::DEFAULT_BATCH_WIDTH;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub max_input_size: usize,
    /// Images processed concurrently per batch.
    pub batch_width: usize,
    /// Highest escalation tier a job may reach (1..=3).
    pub max_escalation_tier: u32,
    /// Measure each structural method on its own after the main result.
    pub measure_methods: bool,
    pub use_object_streams: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_input_size: 100 * 1024 * 1024, // 100 MB
            batch_width: DEFAULT_BATCH_WIDTH,
            max_escalation_tier: 3,
            measure_methods: true,
            use_object_streams: true,
        }
    }
}

impl CompressionConfig {
    pub fn from_json(json: &str) -> Result<Self, CompressError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn escalation_limit(&self) -> u32 {
        self.max_escalation_tier.clamp(1, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CompressionConfig::from_json(r#"{"batch_width": 8}"#).unwrap();
        assert_eq!(config.batch_width, 8);
        assert_eq!(config.max_input_size, CompressionConfig::default().max_input_size);
        assert!(config.measure_methods);
    }

    #[test]
    fn test_escalation_limit_clamped() {
        let config = CompressionConfig {
            max_escalation_tier: 9,
            ..CompressionConfig::default()
        };
        assert_eq!(config.escalation_limit(), 3);
        let config = CompressionConfig {
            max_escalation_tier: 0,
            ..CompressionConfig::default()
        };
        assert_eq!(config.escalation_limit(), 1);
    }

    #[test]
    fn test_bad_json() {
        let err = CompressionConfig::from_json("{").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Serialization);
    }
}
