use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    env::ObservationMode,
    reconciler::ReconcilerSettings,
    reward::{EpisodeLimits, RewardPolicy},
    transport::tcp_endpoint,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub episode: EpisodeLimits,
    #[serde(default)]
    pub reward: RewardPolicy,
    #[serde(default)]
    pub observation: ObservationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_action_port() -> u16 {
    10002
}

fn default_state_port() -> u16 {
    10001
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_image_side() -> usize {
    128
}

fn default_silence_timeout_ms() -> u64 {
    25_000
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_action_port")]
    pub action_port: u16,
    #[serde(default = "default_state_port")]
    pub state_port: u16,
    /// Receive timeout for both sockets.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Topic prefix passed to the subscription; empty receives everything.
    #[serde(default)]
    pub topic_filter: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub sync_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            action_port: default_action_port(),
            state_port: default_state_port(),
            timeout_ms: default_timeout_ms(),
            topic_filter: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            sync_timeout_ms: default_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn action_endpoint(&self) -> String {
        tcp_endpoint(&self.host, self.action_port)
    }

    pub fn state_endpoint(&self) -> String {
        tcp_endpoint(&self.host, self.state_port)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservationConfig {
    #[serde(default)]
    pub mode: ObservationMode,
    #[serde(default = "default_image_side")]
    pub image_side: usize,
    /// Directory holding `manifest.json` and the encoder weights.
    #[serde(default)]
    pub encoder_artifact: Option<PathBuf>,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            mode: ObservationMode::default(),
            image_side: default_image_side(),
            encoder_artifact: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    /// The listener stops after this long without a broadcast.
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
        }
    }
}

impl ListenerConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;

        if let Some(artifact) = &config.observation.encoder_artifact
            && !artifact.is_absolute()
        {
            config.observation.encoder_artifact = Some(config_base.join(artifact));
        }
        if !config.logging.dir.is_absolute() {
            config.logging.dir = config_base.join(&config.logging.dir);
        }

        Ok(config)
    }

    /// Loads `config_path` when given, otherwise `./polyomino.jsonc` if present,
    /// otherwise built-in defaults.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load(path);
        }
        let local = Path::new("polyomino.jsonc");
        if local.exists() {
            return Self::load(local);
        }
        Ok(Self::default())
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join("polyomino.schema.json");
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or polyomino.schema.json next to it"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}
