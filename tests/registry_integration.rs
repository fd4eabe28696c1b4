//! Integration tests for `fleck registry` commands.
//!
//! These tests use a temporary HOME and XDG_CONFIG_HOME to avoid touching
//! the real user registry, and point FLECK_DATA_DIR / FLECK_CACHE_DIR below
//! the same temporary directory.

use std::fs;
use std::path::Path;
use std::process::Command;

/// Get the path to the fleck binary.
fn fleck_bin() -> String {
    std::env::var("CARGO_BIN_EXE_fleck").unwrap_or_else(|_| "target/debug/fleck".to_string())
}

/// Run fleck with its environment rooted below `home`.
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
fn registry_list_empty() {
    let home = tempfile::TempDir::new().unwrap();

    let result = fleck_with_home(home.path(), &["registry", "list"]);
    assert!(result.is_ok(), "registry list failed: {:?}", result);
}

#[test]
fn registry_add_and_list() {
    let home = tempfile::TempDir::new().unwrap();

    let add = fleck_with_home(
        home.path(),
        &["registry", "add", "test-flake", "github:NixOS/nixpkgs"],
    );
    assert!(add.is_ok(), "registry add failed: {:?}", add);

    let list = fleck_with_home(home.path(), &["registry", "list"]).unwrap();
    assert!(
        list.contains("test-flake") && list.contains("github:NixOS/nixpkgs"),
        "registry list should contain test-flake: {}",
        list
    );
}

#[test]
fn registry_remove() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(
        home.path(),
        &["registry", "add", "to-remove", "github:NixOS/nixpkgs"],
    )
    .unwrap();
    fleck_with_home(home.path(), &["registry", "remove", "to-remove"]).unwrap();

    let list = fleck_with_home(home.path(), &["registry", "list"]).unwrap();
    assert!(
        !list.contains("to-remove"),
        "registry list should not contain to-remove after removal: {}",
        list
    );
}

#[test]
fn registry_remove_missing_entry_fails() {
    let home = tempfile::TempDir::new().unwrap();

    let result = fleck_with_home(home.path(), &["registry", "remove", "never-added"]);
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("never-added"));
}

#[test]
fn registry_file_format() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(
        home.path(),
        &["registry", "add", "test-entry", "github:owner/repo"],
    )
    .unwrap();

    let registry_path = home.path().join(".config/nix/registry.json");
    let content = fs::read_to_string(&registry_path).unwrap();
    let registry: serde_json::Value = serde_json::from_str(&content).unwrap();

    assert_eq!(registry["version"], 1);
    assert_eq!(registry["flakes"]["test-entry"]["uri"], "github:owner/repo");

    // 4-space indented with a trailing newline.
    assert!(content.contains("\n    \"flakes\""));
    assert!(content.ends_with("\n"));
}

#[test]
fn registry_add_replaces_existing_entry() {
    let home = tempfile::TempDir::new().unwrap();

    fleck_with_home(
        home.path(),
        &["registry", "add", "pkg", "github:owner/old"],
    )
    .unwrap();
    fleck_with_home(
        home.path(),
        &["registry", "add", "pkg", "github:owner/new"],
    )
    .unwrap();

    let list = fleck_with_home(home.path(), &["registry", "list"]).unwrap();
    assert!(list.contains("github:owner/new"), "{}", list);
    assert!(!list.contains("github:owner/old"), "{}", list);
}
