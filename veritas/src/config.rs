use std::fmt;
use serde::{Deserialize, Serialize};

use crate::codec::ErrorKind;
use crate::constants::COMMITMENT_FINALITY_INTERVAL;

/// Verifier settings.
///
/// `dev_mode` disables finality checks. It exists for test and staging
/// networks only; a production verifier must leave it off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VeritasConfig {
    pub dev_mode: bool,
    /// Blocks a height must trail the newest anchor before it is final.
    pub finality_depth: u32,
}

impl Default for VeritasConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            finality_depth: COMMITMENT_FINALITY_INTERVAL,
        }
    }
}

impl VeritasConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::Malformed { reason: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.finality_depth == 0 {
            return Err(ConfigError::ZeroFinalityDepth);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Malformed { reason: String },
    ZeroFinalityDepth,
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed config: {}", reason),
            Self::ZeroFinalityDepth => write!(f, "finality depth must be at least one block"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = VeritasConfig::from_json(r#"{"dev_mode": true}"#).unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.finality_depth, COMMITMENT_FINALITY_INTERVAL);
        assert_eq!(VeritasConfig::from_json("{}").unwrap(), VeritasConfig::default());
    }

    #[test]
    fn rejects_zero_depth_and_unknown_fields() {
        assert_eq!(
            VeritasConfig::from_json(r#"{"finality_depth": 0}"#),
            Err(ConfigError::ZeroFinalityDepth)
        );
        assert!(matches!(
            VeritasConfig::from_json(r#"{"finality": 6}"#),
            Err(ConfigError::Malformed { .. })
        ));
    }
}
