use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lagoon")]
#[command(version, about = "Command line tool for interacting with a Lagoon instance")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// The Lagoon instance to interact with (becomes the current one)
    #[arg(short, long, global = true)]
    pub lagoon: Option<String>,

    /// Path to the config file (defaults to ~/.lagoon.yml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Private key to log in with; disables the SSH agent
    #[arg(short = 'i', long, global = true, value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub output_json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure Lagoon CLI
    #[command(alias = "c")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Log into a Lagoon instance, replacing any cached token
    #[command(alias = "l")]
    Login,

    /// Print a valid token for the selected Lagoon, logging in if needed
    Token,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Set the default Lagoon to use
    #[command(visible_alias = "set-default")]
    Default {
        /// Name of the Lagoon instance
        name: String,
    },

    /// View all configured Lagoon instances
    #[command(visible_alias = "list-profiles")]
    List,

    /// Add or update a Lagoon instance
    #[command(visible_alias = "add-profile")]
    Add(AddArgs),

    /// Delete a Lagoon instance configuration
    #[command(visible_alias = "delete-profile")]
    Delete {
        /// Name of the Lagoon instance
        name: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Display the current Lagoon that commands would be executed against
    #[command(visible_alias = "get-current", alias = "cur")]
    Current,

    /// Enable or disable CLI features
    Feature(FeatureArgs),
}

#[derive(Args)]
pub struct AddArgs {
    /// Name of the Lagoon instance
    pub name: String,

    /// Lagoon SSH hostname
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,

    /// Lagoon SSH port
    #[arg(short = 'P', long)]
    pub port: Option<String>,

    /// Lagoon GraphQL endpoint
    #[arg(short = 'e', long, alias = "graphql")]
    pub endpoint: Option<String>,

    /// Lagoon UI location (https://ui-lagoon-master.ch.amazee.io)
    #[arg(short = 'u', long)]
    pub ui: Option<String>,

    /// Lagoon log viewer URL (https://logs-db-ui-lagoon-master.ch.amazee.io)
    #[arg(short = 'k', long, alias = "kibana")]
    pub logs: Option<String>,

    /// Lagoon GraphQL token
    #[arg(short = 't', long)]
    pub token: Option<String>,
}

#[derive(Args)]
pub struct FeatureArgs {
    /// Enable or disable checking of updates (true/false)
    #[arg(long, value_name = "BOOL")]
    pub disable_update_check: Option<bool>,

    /// Enable or disable checking of local directory for lagoon project (true/false)
    #[arg(long, value_name = "BOOL")]
    pub disable_project_directory_check: Option<bool>,
}
