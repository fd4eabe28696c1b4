//! Registry resolution.
//!
//! Rewrites a flake reference through the registry stack until it is direct.
//! Each rewrite step records its target in a trail; revisiting a target is a
//! terminal error that reports the whole trail.

use tracing::{debug, instrument, trace};

use crate::error::{Error, Result};
use crate::flake_ref::FlakeRef;
use crate::registry::Registries;

/// Resolve a reference through the registry stack.
///
/// Refinements on an alias win over the registry target: looking up
/// `nixpkgs/release-23.11` through an entry for `nixpkgs` yields the target
/// with `ref` forced to `release-23.11`, and likewise for a pinned `rev`.
#[instrument(level = "debug", skip(registries), fields(reference = %reference))]
pub fn lookup_flake(reference: &FlakeRef, registries: &Registries) -> Result<FlakeRef> {
    let mut trail = Vec::new();
    lookup_step(reference, registries, &mut trail)
}

fn lookup_step(
    reference: &FlakeRef,
    registries: &Registries,
    trail: &mut Vec<FlakeRef>,
) -> Result<FlakeRef> {
    for registry in registries.stack() {
        // A refined alias is looked up under its base form as well, so that
        // `nixpkgs/branch` still matches an entry for `nixpkgs`.
        let hit = registry.get(reference).or_else(|| {
            if reference.is_direct() {
                None
            } else {
                registry.get(&reference.base_ref())
            }
        });

        let Some(target) = hit else { continue };
        let mut target = target.clone();

        if let FlakeRef::Alias { git_ref, rev, .. } = reference {
            if git_ref.is_some() {
                target.set_git_ref(git_ref.clone());
            }
            if rev.is_some() {
                target.set_rev(rev.clone());
            }
        }

        if trail.contains(&target) {
            trail.push(target);
            return Err(Error::CycleInRegistry {
                trail: trail.iter().map(|r| r.to_string()).collect(),
            });
        }

        trace!(target = %target, "registry rewrote reference");
        trail.push(target.clone());
        return lookup_step(&target, registries, trail);
    }

    if reference.is_direct() {
        debug!(resolved = %reference, "reference is direct");
        return Ok(reference.clone());
    }

    // An alias that survives the whole stack never became fetchable.
    Err(Error::UnresolvedAlias {
        reference: reference.to_string(),
    })
}
