//! Closure attribute-set construction.
//!
//! Bridges a resolved `Dependencies` tree back into the evaluator: one
//! attribute set keyed by flake id, where each entry exposes `description`,
//! `outPath`, `revCount` (when known) and `provides` applied to the whole
//! closure set. This is an adapter over the evaluator's value world, not
//! resolver core; the expression is meant to be handed to
//! `Evaluator::eval_expr` or spliced into a larger expression.

use std::collections::HashSet;

use crate::eval::nix_str;
use crate::flake::{Dependencies, Flake};

/// Build the closure expression for a resolved tree.
///
/// Diamond dependencies appear multiple times in the tree but an attribute
/// set cannot hold duplicate keys; the first occurrence of an id wins.
pub fn closure_expr(deps: &Dependencies) -> String {
    let mut flakes = Vec::new();
    let mut seen = HashSet::new();
    collect(deps, &mut flakes, &mut seen);

    let mut expr = String::from("let flakes = {\n");
    for flake in flakes {
        expr.push_str(&format!("  {} = {{\n", nix_str(&flake.id)));
        if let Some(ref description) = flake.description {
            expr.push_str(&format!("    description = {};\n", nix_str(description)));
        }
        expr.push_str(&format!(
            "    outPath = {};\n",
            nix_str(&flake.path.display().to_string())
        ));
        if let Some(rev_count) = flake.rev_count {
            expr.push_str(&format!("    revCount = {};\n", rev_count));
        }
        expr.push_str(&format!(
            "    provides = (import {}).provides flakes;\n",
            nix_str(&flake.provides.flake_nix.display().to_string())
        ));
        expr.push_str("  };\n");
    }
    expr.push_str("}; in flakes");
    expr
}

/// The expression a `getFlake` primitive evaluates: the root flake's
/// `provides` attrset, computed over the full closure.
pub fn root_provides_expr(deps: &Dependencies) -> String {
    format!(
        "({}).{}.provides",
        closure_expr(deps),
        nix_str(&deps.flake.id)
    )
}

fn collect<'a>(deps: &'a Dependencies, out: &mut Vec<&'a Flake>, seen: &mut HashSet<&'a str>) {
    if seen.insert(&deps.flake.id) {
        out.push(&deps.flake);
    }
    for sub in &deps.flake_deps {
        collect(sub, out, seen);
    }
}
