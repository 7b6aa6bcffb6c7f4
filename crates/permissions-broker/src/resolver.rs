//! Overwrite resolution.
//!
//! Only one overwrite entry is ever consulted: the one addressed to the principal itself,
//! falling back to the entry for the root (default) principal. Within that entry a deny bit
//! always beats the matching allow bit, and a bit present in neither mask is not granted.

use chatgate_core_types::{Overwrite, Permissions, PrincipalId};

/// Entry that applies to `principal`, if any.
pub fn overwrite_context(
    principal: PrincipalId,
    root: PrincipalId,
    overwrites: &[Overwrite],
) -> Option<&Overwrite> {
    overwrites
        .iter()
        .find(|entry| entry.id == principal)
        .or_else(|| overwrites.iter().find(|entry| entry.id == root))
}

/// Bits of `required` that the matched entry does not grant.
pub fn resolve_missing(
    principal: PrincipalId,
    root: PrincipalId,
    overwrites: &[Overwrite],
    required: Permissions,
) -> Permissions {
    match overwrite_context(principal, root, overwrites) {
        Some(entry) => required - (entry.allow - entry.deny),
        None => required,
    }
}

/// True when every bit in `required` resolves to granted.
pub fn resolve(
    principal: PrincipalId,
    root: PrincipalId,
    overwrites: &[Overwrite],
    required: Permissions,
) -> bool {
    resolve_missing(principal, root, overwrites, required).is_empty()
}

/// Predicate form exposed to callers, root id first.
pub fn has_overwrite_permission(
    root: PrincipalId,
    principal: PrincipalId,
    overwrites: &[Overwrite],
    required: Permissions,
) -> bool {
    resolve(principal, root, overwrites, required)
}
