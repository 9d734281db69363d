use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::DEFAULT_MAX_CHAIN_TICKS;
use crate::engine::DEFAULT_ENTITY_VERSION;
use crate::inference::CANNED_ANSWER;
use crate::workflow::Placeholders;

pub const CONFIG_FILE_NAME: &str = "entity-flow.toml";
pub const ENV_PREFIX: &str = "ENTITY_FLOW";

/// Main configuration structure for the workflow engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub definitions: DefinitionsConfig,
    pub engine: RuntimeConfig,
    pub scheduler: SchedulerConfig,
    pub observability: ObservabilityConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefinitionsConfig {
    /// Root directory holding one `<entity_type>/workflow.json` per type
    pub dir: PathBuf,
    /// Substituted for `ENTITY_VERSION_VAR`
    pub entity_version: String,
    /// Substituted for `CHAT_ID_VAR`
    pub chat_id: String,
    /// Processor names allowed to be absent from the registry
    #[serde(default)]
    pub unresolved: Vec<String>,
    /// Accept every unregistered processor name
    pub allow_unresolved: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    pub processor_timeout_ms: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Ticks drained from one trigger before the chain is cut off
    pub max_chain_ticks: usize,
    /// Passed to processors and the entity store as the auth token
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    pub default_interval_secs: u64,
    /// Per entity type override, in seconds
    #[serde(default)]
    pub intervals: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// Emit JSON log lines instead of the pretty format
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferenceConfig {
    /// Use the canned client instead of a real backend
    pub mock: bool,
    pub canned_answer: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            definitions: DefinitionsConfig {
                dir: PathBuf::from("workflows"),
                entity_version: DEFAULT_ENTITY_VERSION.to_string(),
                chat_id: String::new(),
                unresolved: Vec::new(),
                allow_unresolved: false,
            },
            engine: RuntimeConfig {
                processor_timeout_ms: 30_000,
                worker_count: 4,
                queue_capacity: 256,
                max_chain_ticks: DEFAULT_MAX_CHAIN_TICKS,
                token: None,
            },
            scheduler: SchedulerConfig {
                default_interval_secs: 60,
                intervals: HashMap::new(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
            inference: InferenceConfig {
                mock: true,
                canned_answer: CANNED_ANSWER.to_string(),
            },
        }
    }
}

impl RuntimeConfig {
    pub fn processor_timeout(&self) -> Duration {
        Duration::from_millis(self.processor_timeout_ms)
    }
}

impl DefinitionsConfig {
    pub fn placeholders(&self) -> Placeholders {
        Placeholders {
            entity_version: self.entity_version.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. `entity-flow.toml` in the working directory
    /// 3. Environment variables (`ENTITY_FLOW__ENGINE__WORKER_COUNT=8`)
    pub fn load() -> Result<Self> {
        let default_file = Path::new(CONFIG_FILE_NAME);
        Self::load_from(default_file.exists().then_some(default_file))
    }

    /// Same layering as [`EngineConfig::load`] with an explicit file
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("definitions.unresolved"),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<EngineConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = EngineConfig::load_env_file();
        EngineConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static EngineConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.engine.worker_count, 4);
        assert_eq!(parsed.definitions.entity_version, "1000");
        assert_eq!(parsed.engine.processor_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_defaults_load_without_file() {
        let config = EngineConfig::load_from(None).unwrap();
        assert!(config.definitions.unresolved.is_empty());
        assert!(config.scheduler.intervals.is_empty());
        assert!(config.engine.token.is_none());
        assert_eq!(config.engine.worker_count, 4);
        assert_eq!(config.scheduler.default_interval_secs, 60);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\nworker_count = 9\n\n[scheduler]\ndefault_interval_secs = 5\n\n[scheduler.intervals]\nreport = 120\n"
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.engine.worker_count, 9);
        assert_eq!(config.engine.queue_capacity, 256);
        assert_eq!(config.scheduler.default_interval_secs, 5);
        assert_eq!(config.scheduler.intervals.get("report"), Some(&120));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[observability]\nlog_level = \"warn\"\n").unwrap();

        std::env::set_var("ENTITY_FLOW__OBSERVABILITY__LOG_LEVEL", "trace");
        let config = EngineConfig::load_from(Some(file.path()));
        std::env::remove_var("ENTITY_FLOW__OBSERVABILITY__LOG_LEVEL");

        assert_eq!(config.unwrap().observability.log_level, "trace");
    }

    #[test]
    fn test_save_to_file_writes_loadable_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = EngineConfig::default();
        config.definitions.chat_id = "chat-7".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.definitions.chat_id, "chat-7");
    }
}
