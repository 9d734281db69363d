use anyhow::Result;

use crate::cli::commands::Command;
use crate::config::EngineConfig;

pub struct ConfigCommand {
    config: EngineConfig,
}

impl ConfigCommand {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        print!("{}", self.config.to_toml()?);
        Ok(())
    }
}
