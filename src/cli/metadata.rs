//! `fleck metadata` - show a flake's resolved metadata.

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::Args;
use owo_colors::OwoColorize;

use super::common::{parse_reference, Context, GlobalOpts};

#[derive(Args)]
pub struct MetadataArgs {
    /// Flake reference to inspect.
    #[arg(default_value = ".")]
    pub uri: String,
}

pub fn run(args: MetadataArgs, globals: &GlobalOpts) -> Result<()> {
    let context = Context::new(globals)?;
    let resolver = context.resolver();

    let reference = parse_reference(&args.uri)?;
    let flake = resolver.get_flake(&reference, true)?;

    println!("{} {}", "ID:".bold(), flake.id);
    if let Some(ref description) = flake.description {
        println!("{} {}", "Description:".bold(), description);
    }
    println!("{} {}", "URI:".bold(), flake.flake_ref);
    println!("{} {}", "Path:".bold(), flake.path.display());
    if let Some(rev) = flake.flake_ref.rev() {
        println!("{} {}", "Revision:".bold(), rev);
    }
    if let Some(rev_count) = flake.rev_count {
        println!("{} {}", "Revisions:".bold(), rev_count);
    }
    if let Some(last_modified) = flake.last_modified {
        let formatted = DateTime::from_timestamp(last_modified, 0)
            .map(|dt| {
                dt.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "unknown".to_string());
        println!("{} {}", "Last modified:".bold(), formatted);
    }

    if !flake.requires.is_empty() {
        println!("{}", "Requires:".bold());
        for dep in &flake.requires {
            println!("  {}", dep);
        }
    }
    if !flake.non_flake_requires.is_empty() {
        println!("{}", "Non-flake requires:".bold());
        for (alias, dep) in &flake.non_flake_requires {
            println!("  {}: {}", alias, dep);
        }
    }

    Ok(())
}
