//! `fleck resolve` - registry resolution without fetching.

use anyhow::Result;
use clap::Args;

use super::common::{parse_reference, Context, GlobalOpts};

#[derive(Args)]
pub struct ResolveArgs {
    /// Reference to resolve.
    pub uri: String,
}

pub fn run(args: ResolveArgs, globals: &GlobalOpts) -> Result<()> {
    let context = Context::new(globals)?;
    let resolver = context.resolver();

    let reference = parse_reference(&args.uri)?;
    let resolved = resolver.resolve_ref(&reference)?;

    println!("{}", resolved);
    Ok(())
}
