//! Integration tests for registry-driven resolution and lock-file guards.
//!
//! Everything here resolves through the registries only; no network access
//! and no evaluator are needed.

use std::path::Path;
use std::process::Command;

fn fleck_bin() -> String {
    std::env::var("CARGO_BIN_EXE_fleck").unwrap_or_else(|_| "target/debug/fleck".to_string())
}

fn fleck_with_home(home: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new(fleck_bin())
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("FLECK_DATA_DIR", home.join("share"))
        .env("FLECK_CACHE_DIR", home.join("cache"))
        .args(args)
        .output()
        .map_err(|e| format!("failed to run fleck: {}", e))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).to_string());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[test]
fn resolve_alias_through_user_registry() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(
        home.path(),
        &["registry", "add", "nixpkgs", "github:NixOS/nixpkgs"],
    )
    .unwrap();

    let resolved = fleck_with_home(home.path(), &["resolve", "nixpkgs"]).unwrap();
    assert_eq!(resolved, "github:NixOS/nixpkgs");
}

#[test]
fn resolve_alias_with_ref_refinement() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(
        home.path(),
        &["registry", "add", "nixpkgs", "github:NixOS/nixpkgs"],
    )
    .unwrap();

    let resolved =
        fleck_with_home(home.path(), &["resolve", "nixpkgs/release-23.11"]).unwrap();
    assert_eq!(resolved, "github:NixOS/nixpkgs/release-23.11");
}

#[test]
fn resolve_direct_reference_passes_through() {
    let home = tempfile::TempDir::new().unwrap();

    let resolved =
        fleck_with_home(home.path(), &["resolve", "github:alice/proj/main"]).unwrap();
    assert_eq!(resolved, "github:alice/proj/main");
}

#[test]
fn resolve_unknown_alias_fails() {
    let home = tempfile::TempDir::new().unwrap();

    let err = fleck_with_home(home.path(), &["resolve", "no-such-flake"]).unwrap_err();
    assert!(err.contains("no-such-flake"), "stderr: {}", err);
}

#[test]
fn resolve_registry_cycle_reports_trail() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(home.path(), &["registry", "add", "a", "b"]).unwrap();
    fleck_with_home(home.path(), &["registry", "add", "b", "a"]).unwrap();

    let err = fleck_with_home(home.path(), &["resolve", "a"]).unwrap_err();
    assert!(err.contains("cycle"), "stderr: {}", err);
    assert!(
        err.contains("b -> a -> b") || err.contains("a -> b -> a"),
        "stderr should list the trail: {}",
        err
    );
}

#[test]
fn pure_mode_ignores_the_user_registry() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(
        home.path(),
        &["registry", "add", "nixpkgs", "github:NixOS/nixpkgs"],
    )
    .unwrap();

    // Without the flag registry the alias no longer resolves...
    let err = fleck_with_home(home.path(), &["--pure", "resolve", "nixpkgs"]).unwrap_err();
    assert!(err.contains("nixpkgs"), "stderr: {}", err);

    // ...but an explicit override still does.
    let resolved = fleck_with_home(
        home.path(),
        &[
            "--pure",
            "--override-flake",
            "nixpkgs=github:NixOS/nixpkgs",
            "resolve",
            "nixpkgs",
        ],
    )
    .unwrap();
    assert_eq!(resolved, "github:NixOS/nixpkgs");
}

#[test]
fn override_flake_requires_from_to_syntax() {
    let home = tempfile::TempDir::new().unwrap();

    let err = fleck_with_home(
        home.path(),
        &["--override-flake", "broken-pair", "resolve", "x"],
    )
    .unwrap_err();
    assert!(err.contains("FROM=TO"), "stderr: {}", err);
}

#[test]
fn lock_rejects_non_local_roots() {
    let home = tempfile::TempDir::new().unwrap();

    for uri in ["github:alice/proj", "git+https://example.com/repo"] {
        let err = fleck_with_home(home.path(), &["lock", uri]).unwrap_err();
        assert!(err.contains("non-local"), "uri {}: stderr {}", uri, err);
    }
}
