//! `fleck registry` - user registry maintenance.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;

use super::common::{parse_reference, GlobalOpts};
use crate::config::Config;
use crate::flake_ref::FlakeRef;
use crate::registry::{user_registry_path, Registries, Registry};

#[derive(Args)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub command: RegistryCommands,
}

#[derive(Subcommand)]
pub enum RegistryCommands {
    /// List entries from every registry in the stack
    List,
    /// Add or replace an entry in the user registry
    Add {
        /// Reference to redirect, usually an alias
        name: String,
        /// Redirection target
        target: String,
    },
    /// Remove an entry from the user registry
    Remove {
        /// Reference to remove
        name: String,
    },
}

pub fn run(args: RegistryArgs, globals: &GlobalOpts) -> Result<()> {
    match args.command {
        RegistryCommands::List => cmd_list(globals),
        RegistryCommands::Add { name, target } => cmd_add(&name, &target),
        RegistryCommands::Remove { name } => cmd_remove(&name),
    }
}

fn cmd_list(globals: &GlobalOpts) -> Result<()> {
    let config = Config::from_env();
    let flag = super::common::flag_registry(&globals.override_flake)?;
    let registries = Registries::load(&config, globals.pure, flag)?;

    let sections = [
        ("global", &registries.global),
        ("user", &registries.user),
        ("local", &registries.local),
        ("flag", &registries.flag),
    ];
    for (source, registry) in sections {
        let mut entries: Vec<_> = registry.iter().collect();
        entries.sort_by_key(|(from, _)| from.to_string());
        for (from, to) in entries {
            println!("{} {} -> {}", source.bold(), from, to);
        }
    }
    Ok(())
}

fn cmd_add(name: &str, target: &str) -> Result<()> {
    let from = parse_reference(name)?;
    let to = canonical_target(target)?;

    let path = user_registry_path();
    let mut registry = Registry::read(&path)?;
    registry.set(from.clone(), to.clone());
    registry
        .write(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("added {} -> {}", from, to);
    Ok(())
}

fn cmd_remove(name: &str) -> Result<()> {
    let from = parse_reference(name)?;

    let path = user_registry_path();
    let mut registry = Registry::read(&path)?;
    if !registry.remove(&from) {
        anyhow::bail!("no registry entry for '{}'", from);
    }
    registry
        .write(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("removed {}", from);
    Ok(())
}

/// Targets pointing at local directories are stored canonicalized, so the
/// entry keeps working from any working directory.
fn canonical_target(target: &str) -> Result<FlakeRef> {
    let mut reference = parse_reference(target)?;
    if let FlakeRef::Path { ref mut path, .. } = reference {
        if let Ok(canonical) = std::fs::canonicalize(&path) {
            *path = canonical.display().to_string();
        }
    }
    Ok(reference)
}
