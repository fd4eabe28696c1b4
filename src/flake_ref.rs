//! Flake reference parsing and printing.
//!
//! Parses references like:
//! - `nixpkgs` or `nixpkgs/release-23.11` (alias, resolved through registries)
//! - `github:owner/repo`, `github:owner/repo/branch`,
//!   `github:owner/repo?rev=<sha1>`
//! - `git://example.com/repo`, `git+https://example.com/repo?ref=main`
//! - `/absolute/path`, `./relative`, `path:./relative`, `file:///absolute`
//!
//! Every variant carries two optional refinements: `ref` (a branch or tag)
//! and `rev` (a 40-hex commit hash). A reference with `rev` set is immutable;
//! every variant except `Alias` is direct. `Display` is the inverse of
//! `FromStr`, so `parse(r.to_string()) == r`.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

static ALIAS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z][a-zA-Z0-9_-]*$").expect("valid regex"));

static REV_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new("^[0-9a-f]{40}$").expect("valid regex"));

/// A reference to a flake or non-flake source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlakeRef {
    /// An indirect name like `nixpkgs`, resolved through the registry stack.
    Alias {
        id: String,
        git_ref: Option<String>,
        rev: Option<String>,
    },
    /// github:owner/repo, fetched as a tarball archive.
    GitHub {
        owner: String,
        repo: String,
        git_ref: Option<String>,
        rev: Option<String>,
    },
    /// An arbitrary git URL, fetched by cloning.
    Git {
        url: String,
        git_ref: Option<String>,
        rev: Option<String>,
    },
    /// A local directory containing a git checkout.
    Path {
        path: String,
        git_ref: Option<String>,
        rev: Option<String>,
    },
}

/// Check that a string is a 40-character lowercase hex commit hash.
pub fn is_commit_hash(s: &str) -> bool {
    REV_REGEX.is_match(s)
}

fn bad(reference: &str, reason: impl Into<String>) -> Error {
    Error::BadFlakeRef {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

/// Split `?ref=...&rev=...` refinements off a reference string.
///
/// Unknown query parameters are rejected so typos do not silently drop a
/// pin. Returns (base, ref, rev).
fn split_refinements(input: &str) -> Result<(&str, Option<String>, Option<String>), Error> {
    let Some((base, query)) = input.split_once('?') else {
        return Ok((input, None, None));
    };

    let mut git_ref = None;
    let mut rev = None;
    for part in query.split('&') {
        match part.split_once('=') {
            Some(("ref", value)) if !value.is_empty() => git_ref = Some(value.to_string()),
            Some(("rev", value)) => {
                if !is_commit_hash(value) {
                    return Err(bad(input, format!("'{}' is not a commit hash", value)));
                }
                rev = Some(value.to_string());
            }
            _ => return Err(bad(input, format!("unsupported query parameter '{}'", part))),
        }
    }
    Ok((base, git_ref, rev))
}

/// Interpret a trailing path segment as either a `rev` pin or a `ref` name.
fn ref_or_rev(segment: &str) -> (Option<String>, Option<String>) {
    if is_commit_hash(segment) {
        (None, Some(segment.to_string()))
    } else {
        (Some(segment.to_string()), None)
    }
}

impl FromStr for FlakeRef {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Error> {
        if input.is_empty() {
            return Err(bad(input, "empty reference"));
        }

        if let Some(rest) = input.strip_prefix("github:") {
            return parse_github(input, rest);
        }
        if input.starts_with("git://") || input.starts_with("git+") {
            return parse_git(input);
        }
        if let Some(rest) = input.strip_prefix("file://") {
            return parse_path(input, rest);
        }
        if let Some(rest) = input.strip_prefix("path:") {
            return parse_path(input, rest);
        }
        if input == "."
            || input.starts_with("./")
            || input.starts_with("../")
            || input.starts_with('/')
        {
            return parse_path(input, input);
        }

        parse_alias(input)
    }
}

fn parse_github(input: &str, rest: &str) -> Result<FlakeRef, Error> {
    let (base, query_ref, query_rev) = split_refinements(rest)?;

    let parts: Vec<&str> = base.split('/').collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(bad(input, "expected github:owner/repo"));
    }

    // Branches may themselves contain slashes, so everything after the
    // repo belongs to one ref (or rev) segment.
    let (mut git_ref, mut rev) = if parts.len() > 2 {
        ref_or_rev(&parts[2..].join("/"))
    } else {
        (None, None)
    };
    if query_ref.is_some() {
        git_ref = query_ref;
    }
    if query_rev.is_some() {
        rev = query_rev;
    }

    Ok(FlakeRef::GitHub {
        owner: parts[0].to_string(),
        repo: parts[1].to_string(),
        git_ref,
        rev,
    })
}

fn parse_git(input: &str) -> Result<FlakeRef, Error> {
    let url_part = input.strip_prefix("git+").unwrap_or(input);
    let (url, git_ref, rev) = split_refinements(url_part)?;

    if !url.contains("://") {
        return Err(bad(input, "git reference requires a URL scheme"));
    }

    Ok(FlakeRef::Git {
        url: url.to_string(),
        git_ref,
        rev,
    })
}

fn parse_path(input: &str, rest: &str) -> Result<FlakeRef, Error> {
    let (path, git_ref, rev) = split_refinements(rest)?;
    if path.is_empty() {
        return Err(bad(input, "empty path"));
    }

    Ok(FlakeRef::Path {
        path: path.to_string(),
        git_ref,
        rev,
    })
}

fn parse_alias(input: &str) -> Result<FlakeRef, Error> {
    let (base, query_ref, query_rev) = split_refinements(input)?;

    let (id, mut git_ref, mut rev) = match base.split_once('/') {
        None => (base, None, None),
        Some((id, rest)) => {
            let (r, v) = ref_or_rev(rest);
            (id, r, v)
        }
    };
    if query_ref.is_some() {
        git_ref = query_ref;
    }
    if query_rev.is_some() {
        rev = query_rev;
    }

    if !ALIAS_REGEX.is_match(id) {
        return Err(bad(input, format!("'{}' is not a flake alias", id)));
    }

    Ok(FlakeRef::Alias {
        id: id.to_string(),
        git_ref,
        rev,
    })
}

impl fmt::Display for FlakeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlakeRef::Alias { id, git_ref, rev } => {
                write!(f, "{}", id)?;
                write_segment_refinements(f, git_ref, rev)
            }
            FlakeRef::GitHub {
                owner,
                repo,
                git_ref,
                rev,
            } => {
                write!(f, "github:{}/{}", owner, repo)?;
                write_segment_refinements(f, git_ref, rev)
            }
            FlakeRef::Git { url, git_ref, rev } => {
                if url.starts_with("git://") {
                    write!(f, "{}", url)?;
                } else {
                    write!(f, "git+{}", url)?;
                }
                write_query_refinements(f, git_ref, rev)
            }
            FlakeRef::Path { path, git_ref, rev } => {
                write!(f, "{}", path)?;
                write_query_refinements(f, git_ref, rev)
            }
        }
    }
}

/// `ref` prints as a path segment; `rev` does too when it stands alone,
/// matching the way a pinned reference is usually written out.
fn write_segment_refinements(
    f: &mut fmt::Formatter<'_>,
    git_ref: &Option<String>,
    rev: &Option<String>,
) -> fmt::Result {
    match (git_ref, rev) {
        (None, None) => Ok(()),
        (Some(r), None) => write!(f, "/{}", r),
        (None, Some(v)) => write!(f, "/{}", v),
        (Some(r), Some(v)) => write!(f, "/{}?rev={}", r, v),
    }
}

fn write_query_refinements(
    f: &mut fmt::Formatter<'_>,
    git_ref: &Option<String>,
    rev: &Option<String>,
) -> fmt::Result {
    match (git_ref, rev) {
        (None, None) => Ok(()),
        (Some(r), None) => write!(f, "?ref={}", r),
        (None, Some(v)) => write!(f, "?rev={}", v),
        (Some(r), Some(v)) => write!(f, "?ref={}&rev={}", r, v),
    }
}

impl FlakeRef {
    /// An immutable reference pins an exact commit; fetching it is
    /// reproducible.
    pub fn is_immutable(&self) -> bool {
        self.rev().is_some()
    }

    /// Every variant except `Alias` can be fetched without registry lookup.
    pub fn is_direct(&self) -> bool {
        !matches!(self, FlakeRef::Alias { .. })
    }

    /// The reference with `ref` and `rev` cleared.
    pub fn base_ref(&self) -> FlakeRef {
        let mut base = self.clone();
        base.set_git_ref(None);
        base.set_rev(None);
        base
    }

    pub fn git_ref(&self) -> Option<&str> {
        match self {
            FlakeRef::Alias { git_ref, .. }
            | FlakeRef::GitHub { git_ref, .. }
            | FlakeRef::Git { git_ref, .. }
            | FlakeRef::Path { git_ref, .. } => git_ref.as_deref(),
        }
    }

    pub fn rev(&self) -> Option<&str> {
        match self {
            FlakeRef::Alias { rev, .. }
            | FlakeRef::GitHub { rev, .. }
            | FlakeRef::Git { rev, .. }
            | FlakeRef::Path { rev, .. } => rev.as_deref(),
        }
    }

    pub fn set_git_ref(&mut self, value: Option<String>) {
        match self {
            FlakeRef::Alias { git_ref, .. }
            | FlakeRef::GitHub { git_ref, .. }
            | FlakeRef::Git { git_ref, .. }
            | FlakeRef::Path { git_ref, .. } => *git_ref = value,
        }
    }

    pub fn set_rev(&mut self, value: Option<String>) {
        match self {
            FlakeRef::Alias { rev, .. }
            | FlakeRef::GitHub { rev, .. }
            | FlakeRef::Git { rev, .. }
            | FlakeRef::Path { rev, .. } => *rev = value,
        }
    }

    /// The reference re-pinned to an exact commit.
    pub fn with_rev(&self, rev: impl Into<String>) -> FlakeRef {
        let mut pinned = self.clone();
        pinned.set_rev(Some(rev.into()));
        pinned
    }

    /// A short name for store paths and diagnostics.
    pub fn source_name(&self) -> String {
        match self {
            FlakeRef::Alias { id, .. } => id.clone(),
            FlakeRef::GitHub { repo, .. } => repo.clone(),
            FlakeRef::Git { url, .. } => url
                .rsplit('/')
                .next()
                .map(|n| n.trim_end_matches(".git"))
                .filter(|n| !n.is_empty())
                .unwrap_or("source")
                .to_string(),
            FlakeRef::Path { path, .. } => std::path::Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("source")
                .to_string(),
        }
    }
}

impl Serialize for FlakeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FlakeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
