//! `fleck eval` - resolve a flake and evaluate its provided outputs.
//!
//! The closure attrset is built from the resolved dependency tree and the
//! root flake's `provides` is applied to it, matching what an evaluator's
//! `getFlake` primitive returns.

use anyhow::Result;
use clap::Args;

use super::common::{parse_reference, Context, GlobalOpts};
use crate::eval::Evaluator;
use crate::value::root_provides_expr;

#[derive(Args)]
pub struct EvalArgs {
    /// Flake reference to evaluate.
    #[arg(default_value = ".")]
    pub uri: String,
}

pub fn run(args: EvalArgs, globals: &GlobalOpts) -> Result<()> {
    let context = Context::new(globals)?;
    let resolver = context.resolver();

    let reference = parse_reference(&args.uri)?;
    let deps = resolver.resolve_flake(&reference, true)?;

    let expr = root_provides_expr(&deps);
    let value = resolver
        .evaluator
        .eval_expr(&expr, &deps.flake.provides.flake_nix)?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
