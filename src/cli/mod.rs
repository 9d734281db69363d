use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "entity-flow")]
#[command(about = "Declarative entity workflow engine")]
#[command(long_about = "Entity Flow loads per-entity-type workflow definitions, resolves the \
                       dependencies between entity types and drives records through their \
                       transitions. Start with 'entity-flow validate' on your definitions directory.")]
pub struct Cli {
    /// Configuration file (defaults to ./entity-flow.toml when present)
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate every workflow definition and the dependency graph
    Validate {
        /// Definitions root (one directory per entity type)
        #[arg(long, help = "Definitions root; overrides definitions.dir")]
        dir: Option<PathBuf>,
        /// Processor names allowed to have no registered handler
        #[arg(long = "unresolved", value_name = "NAME", help = "Accept this unregistered processor name (repeatable)")]
        unresolved: Vec<String>,
        /// Accept every processor name without a handler
        #[arg(long, help = "Skip the registered-processor check entirely")]
        allow_unresolved: bool,
    },
    /// Show the dependency order and the gating edges between entity types
    Graph {
        #[arg(long, help = "Definitions root; overrides definitions.dir")]
        dir: Option<PathBuf>,
    },
    /// Print the normalised workflow document of one entity type
    Export {
        /// Entity type to export
        #[arg(long, help = "Entity type whose workflow is printed")]
        entity: String,
        #[arg(long, help = "Definitions root; overrides definitions.dir")]
        dir: Option<PathBuf>,
    },
    /// Run the scheduler against an in-memory store with no-op processors
    Simulate {
        #[arg(long, help = "Definitions root; overrides definitions.dir")]
        dir: Option<PathBuf>,
        /// How long to run before shutting down
        #[arg(long, default_value = "10", help = "Seconds to run before a graceful shutdown")]
        seconds: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}
