//! Capture session configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BUFFER_TIME_MS, DEFAULT_PORT};
use crate::error::{Error, Result};

/// Configuration for a single capture session
///
/// Immutable once the session starts. Loadable from a TOML profile for
/// the CLI, or assembled programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// UDP port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Abort threshold: soft-stop once `loss_rate` exceeds this
    pub max_loss_rate: Option<f64>,

    /// Jitter buffer window in milliseconds
    pub buffer_time_ms: u64,

    /// Auto-stop after this many milliseconds of capture
    pub target_duration_ms: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_loss_rate: None,
            buffer_time_ms: DEFAULT_BUFFER_TIME_MS,
            target_duration_ms: None,
        }
    }
}

impl CaptureConfig {
    /// Load a capture profile from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("invalid capture profile: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that could never describe a usable session
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.max_loss_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!(
                    "max_loss_rate must be within [0, 1], got {rate}"
                )));
            }
        }
        if self.target_duration_ms == Some(0) {
            return Err(Error::Config(
                "target_duration_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }
}
