//! Nix expression evaluation.
//!
//! The resolver never interprets Nix itself; it hands expressions to an
//! `Evaluator` and reads back JSON. The production implementation shells out
//! to `nix-instantiate --eval --strict --json`. Because a flake's `provides`
//! is a function and functions do not survive the JSON boundary, flake
//! metadata is read through a projection expression that extracts the plain
//! attributes and only a witness that `provides` is present and callable;
//! the function itself is re-applied later by generating an expression over
//! the stored `flake.nix` (see the `value` module).

use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tracing::{instrument, trace};

use crate::error::{Error, Result};

pub trait Evaluator {
    /// Evaluate an expression to JSON. `context` names the file on whose
    /// behalf the evaluation runs, for error messages.
    fn eval_expr(&self, expr: &str, context: &Path) -> Result<Value>;
}

/// Shells out to `nix-instantiate`.
pub struct NixEvaluator {
    program: String,
}

impl Default for NixEvaluator {
    fn default() -> Self {
        NixEvaluator {
            program: "nix-instantiate".to_string(),
        }
    }
}

impl Evaluator for NixEvaluator {
    #[instrument(level = "trace", skip(self, expr), fields(context = %context.display()))]
    fn eval_expr(&self, expr: &str, context: &Path) -> Result<Value> {
        trace!(bytes = expr.len(), "evaluating expression");
        let output = Command::new(&self.program)
            .args(["--eval", "--strict", "--json", "--expr", expr])
            .output()
            .map_err(|e| Error::Eval {
                path: context.to_path_buf(),
                reason: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(Error::Eval {
                path: context.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| Error::Eval {
            path: context.to_path_buf(),
            reason: format!("evaluator produced invalid JSON: {}", e),
        })
    }
}

/// Escape a string for inclusion in a Nix expression.
pub fn nix_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// The attributes read out of a `flake.nix`.
#[derive(Debug, Clone, Default)]
pub struct FlakeMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub requires: Vec<String>,
    pub non_flake_requires: Vec<(String, String)>,
    pub has_provides: bool,
}

fn projection_expr(flake_nix: &Path) -> String {
    format!(
        concat!(
            "let flake = import {}; in {{ ",
            "name = flake.name or null; ",
            "description = flake.description or null; ",
            "requires = flake.requires or []; ",
            "nonFlakeRequires = flake.nonFlakeRequires or {{}}; ",
            "providesIsFunction = flake ? provides && builtins.isFunction flake.provides; ",
            "}}"
        ),
        nix_str(&flake_nix.display().to_string())
    )
}

fn metadata_from_value(flake_nix: &Path, value: &Value) -> Result<FlakeMetadata> {
    let eval_err = |reason: String| Error::Eval {
        path: flake_nix.to_path_buf(),
        reason,
    };

    let obj = value
        .as_object()
        .ok_or_else(|| eval_err("flake metadata is not an attribute set".into()))?;

    let name = obj.get("name").and_then(Value::as_str).map(str::to_string);
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut requires = Vec::new();
    if let Some(list) = obj.get("requires") {
        let list = list
            .as_array()
            .ok_or_else(|| eval_err("'requires' is not a list".into()))?;
        for item in list {
            let item = item
                .as_str()
                .ok_or_else(|| eval_err("'requires' entries must be strings".into()))?;
            requires.push(item.to_string());
        }
    }

    let mut non_flake_requires = Vec::new();
    if let Some(map) = obj.get("nonFlakeRequires") {
        let map = map
            .as_object()
            .ok_or_else(|| eval_err("'nonFlakeRequires' is not an attribute set".into()))?;
        for (alias, target) in map {
            let target = target.as_str().ok_or_else(|| {
                eval_err("'nonFlakeRequires' entries must be strings".into())
            })?;
            non_flake_requires.push((alias.clone(), target.to_string()));
        }
    }

    let has_provides = obj
        .get("providesIsFunction")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(FlakeMetadata {
        name,
        description,
        requires,
        non_flake_requires,
        has_provides,
    })
}

/// Evaluate a `flake.nix` and extract its metadata attributes.
pub fn read_flake_metadata(
    evaluator: &dyn Evaluator,
    flake_nix: &Path,
) -> Result<FlakeMetadata> {
    let value = evaluator.eval_expr(&projection_expr(flake_nix), flake_nix)?;
    metadata_from_value(flake_nix, &value)
}
