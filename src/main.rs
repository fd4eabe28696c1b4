//! fleck - resolve flake references and pin them into lock files.
//!
//! Resolves aliases through a stack of registries, fetches sources over
//! GitHub tarballs or git, reads their declarative metadata, and writes the
//! resolved dependency closure to flake.lock.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use fleck::cli;
use fleck::cli::common::GlobalOpts;

/// fleck - resolve flake references and pin them into lock files
#[derive(Parser)]
#[command(name = "fleck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Forbid mutable references outside the top-level flake
    #[arg(long, global = true)]
    pure: bool,

    /// Redirect a reference for this invocation (repeatable)
    #[arg(long = "override-flake", global = true, value_name = "FROM=TO")]
    override_flake: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a local flake's dependencies and write flake.lock
    Lock(cli::lock::LockArgs),

    /// Show a flake's resolved metadata
    Metadata(cli::metadata::MetadataArgs),

    /// Resolve a reference through the registries without fetching
    Resolve(cli::resolve::ResolveArgs),

    /// Resolve a flake and evaluate its provided outputs
    Eval(cli::eval::EvalArgs),

    /// Manage flake registries
    Registry(cli::registry::RegistryArgs),

    /// Generate shell completion script
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    // Default to INFO unless verbose is set (then DEBUG), or RUST_LOG overrides it.
    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false) // cleaner output for simple CLI tools
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("Error: {:#}", e); // Use {:#} for alternate view (causal chain)
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let globals = GlobalOpts {
        pure: cli.pure,
        override_flake: cli.override_flake,
    };

    match cli.command {
        Commands::Lock(args) => cli::lock::run(args, &globals),

        Commands::Metadata(args) => cli::metadata::run(args, &globals),

        Commands::Resolve(args) => cli::resolve::run(args, &globals),

        Commands::Eval(args) => cli::eval::run(args, &globals),

        Commands::Registry(args) => cli::registry::run(args, &globals),

        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "fleck", &mut std::io::stdout());
            Ok(())
        }
    }
}
