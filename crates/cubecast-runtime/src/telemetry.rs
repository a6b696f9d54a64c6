//! Log output setup

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use cubecast_core::{CubecastError, CubecastResult};

/// Telemetry configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is unset, e.g. "info,cubecast_decode=debug"
    pub filter: String,
    /// Emit one JSON object per event
    pub json: bool,
    /// Colored output (plain text only)
    pub ansi: bool,
    /// Include the event target
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            filter: "info".into(),
            json: false,
            ansi: false,
            with_target: false,
        }
    }
}

impl TelemetryConfig {
    /// Build the filter: `RUST_LOG` first, then the configured directives
    pub fn env_filter(&self) -> CubecastResult<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .map_err(|e| CubecastError::InvalidConfig(format!("log filter: {}", e)))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> CubecastResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_target(config.with_target)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.with_ansi(config.ansi).try_init()
    };
    result.map_err(|e| CubecastError::InvalidConfig(format!("tracing already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: TelemetryConfig = serde_json::from_str(r#"{"json":true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.filter, "info");
    }
}
