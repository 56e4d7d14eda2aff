//! Gateway configuration: defaults, optional file, then `CALLGATE__*` environment.

use crate::error::{GatewayError, GatewayResult};
use callgate_voice::SessionConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use serde::Deserialize;

/// Which placeholder collaborator answers utterances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderKind {
    /// Play the caller's utterance back
    #[default]
    Echo,
    /// Log utterances, never reply
    Silent,
}

/// Tuning for the echo responder
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Pause before the reply starts, standing in for recognition + generation latency
    pub reply_delay_ms: u64,
    /// Size of each reply chunk pushed to the call
    pub chunk_ms: u32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: 300,
            chunk_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub responder: ResponderKind,

    #[serde(default)]
    pub echo: EchoConfig,

    /// Per-call turn-taking settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Capacity of the transport → call actor channel
    pub inbound_queue: usize,

    /// Capacity of the call actor → transport channel
    pub outbound_queue: usize,
}

impl GatewayConfig {
    /// Load config from file and environment. Precedence: env `CALLGATE__*` >
    /// file at `CALLGATE_CONFIG` (default `config/gateway.{toml,...}`) > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CALLGATE_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());

        Self::defaults()?
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("CALLGATE").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080_i64)?
            .set_default("responder", "echo")?
            .set_default("inbound_queue", 64_i64)?
            .set_default("outbound_queue", 64_i64)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        self.session.validate()?;
        if self.inbound_queue == 0 || self.outbound_queue == 0 {
            return Err(GatewayError::InvalidConfig(
                "channel capacities must be positive".into(),
            ));
        }
        if self.echo.chunk_ms == 0 {
            return Err(GatewayError::InvalidConfig("echo.chunk_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
