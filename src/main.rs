use anyhow::Result;
use clap::Parser;

use entity_flow::cli::commands::config::ConfigCommand;
use entity_flow::cli::commands::export::ExportCommand;
use entity_flow::cli::commands::graph::GraphCommand;
use entity_flow::cli::commands::simulate::SimulateCommand;
use entity_flow::cli::commands::validate::ValidateCommand;
use entity_flow::cli::commands::{load_config, Command, DefinitionSource};
use entity_flow::cli::{Cli, Commands};
use entity_flow::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_telemetry(&config.observability.log_level, config.observability.json)?;

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        // Default behavior: no subcommand - validate the configured definitions
        None => {
            let source = DefinitionSource::from_config(&config, None);
            runtime.block_on(async { ValidateCommand::new(config, source).execute().await })
        }
        Some(Commands::Validate {
            dir,
            unresolved,
            allow_unresolved,
        }) => {
            let source = DefinitionSource::from_config(&config, dir)
                .with_unresolved(unresolved)
                .allow_unresolved(allow_unresolved);
            runtime.block_on(async { ValidateCommand::new(config, source).execute().await })
        }
        Some(Commands::Graph { dir }) => {
            let source = DefinitionSource::from_config(&config, dir);
            runtime.block_on(async { GraphCommand::new(config, source).execute().await })
        }
        Some(Commands::Export { entity, dir }) => {
            let source = DefinitionSource::from_config(&config, dir);
            runtime.block_on(async { ExportCommand::new(config, source, entity).execute().await })
        }
        Some(Commands::Simulate { dir, seconds }) => {
            let source = DefinitionSource::from_config(&config, dir);
            runtime.block_on(async {
                SimulateCommand::new(config, source, seconds)
                    .execute()
                    .await
            })
        }
        Some(Commands::Config) => {
            runtime.block_on(async { ConfigCommand::new(config).execute().await })
        }
    }
}
