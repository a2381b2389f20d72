// src/cli.rs

// Command-line definitions. Kept free of crate imports and inner doc
// comments so `build.rs` can include it to render the man pages.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Isolated package environments with planned, locked and audited transactions", long_about = None)]
pub struct Cli {
    /// Show progress information on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install packages into an existing environment
    Install(InstallArgs),
    /// Update installed packages to their newest versions
    Update(InstallArgs),
    /// Create a new environment
    Create(InstallArgs),
    /// List the packages linked into an environment
    List {
        #[command(flatten)]
        target: TargetArgs,

        /// Show the revision history instead
        #[arg(long)]
        revisions: bool,

        /// Report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which environment to operate on
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Environment name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Full path to the environment prefix
    #[arg(short, long, value_name = "PATH")]
    pub prefix: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Package specs (name, name=1.0, "name >=1.0"), package archives, or a .tar bundle
    pub packages: Vec<String>,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Read package specs from a file, one per line
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Reinstall every linked package (update only)
    #[arg(long)]
    pub all: bool,

    /// Reinstall the named packages without their dependencies
    #[arg(long)]
    pub force: bool,

    /// Do not install dependencies
    #[arg(long)]
    pub no_deps: bool,

    /// Only show what would be done
    #[arg(long)]
    pub dry_run: bool,

    /// Report as JSON
    #[arg(long)]
    pub json: bool,

    /// Create the environment as a copy of another (create only)
    #[arg(long, value_name = "ENV")]
    pub clone: Option<String>,

    /// Return to a history revision (install only)
    #[arg(long, value_name = "N")]
    pub revision: Option<String>,

    /// Use only channels that need no network access
    #[arg(long)]
    pub offline: bool,

    /// Use packages from the local build output
    #[arg(long)]
    pub use_local: bool,

    /// Create the prefix if it does not exist (install/update)
    #[arg(long)]
    pub mkdir: bool,

    /// Ignore create_default_packages from the configuration
    #[arg(long)]
    pub no_default_packages: bool,

    /// Ignore the environment's pinned specs
    #[arg(long)]
    pub no_pin: bool,

    /// Prefer keeping what is already linked
    #[arg(long)]
    pub alt_hint: bool,

    /// Additional channel to search, before the configured ones
    #[arg(short = 'c', long = "channel", value_name = "CHANNEL")]
    pub channels: Vec<String>,

    /// Search only the channels given with -c
    #[arg(long)]
    pub override_channels: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Do not display the plan
    #[arg(short, long)]
    pub quiet: bool,
}
