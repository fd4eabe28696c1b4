//! `fleck lock` - pin a local flake's dependencies.

use anyhow::{Context as _, Result};
use clap::Args;

use super::common::{Context, GlobalOpts};
use crate::lock::update_lock_file;

#[derive(Args)]
pub struct LockArgs {
    /// Flake directory to lock.
    #[arg(default_value = ".")]
    pub path: String,
}

pub fn run(args: LockArgs, globals: &GlobalOpts) -> Result<()> {
    let context = Context::new(globals)?;
    let resolver = context.resolver();

    let expanded = shellexpand::tilde(&args.path).to_string();
    let lock_path = update_lock_file(&resolver, &expanded)
        .with_context(|| format!("failed to lock '{}'", args.path))?;

    println!("wrote {}", lock_path.display());
    Ok(())
}
