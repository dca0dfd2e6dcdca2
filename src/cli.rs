use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lian-winget")]
#[command(about = "A winget frontend with concurrent install/uninstall/upgrade tasks")]
#[command(version)]
pub struct Cli {
    /// Config file (default: <config dir>/lian-winget/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results and task events as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search available packages
    Search {
        /// Search query
        query: String,
    },

    /// List installed packages
    List,

    /// Show package details
    Show {
        /// Package id
        id: String,
    },

    /// List packages with available upgrades
    Upgrades,

    /// Install packages (one task per id, run concurrently)
    Install {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Uninstall packages
    Uninstall {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Upgrade packages
    Upgrade {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Manage package sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
}

#[derive(Subcommand)]
pub enum SourceAction {
    /// List configured sources
    List,

    /// Add a source
    Add {
        /// Source name
        name: String,

        /// Source argument (URL or path)
        arg: String,

        /// Source type (e.g. Microsoft.Rest)
        #[arg(short, long = "type")]
        source_type: Option<String>,
    },

    /// Remove a source
    Remove {
        /// Source name
        name: String,
    },
}
