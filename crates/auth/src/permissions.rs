//! Permission aggregation: resolving an actor's groups into one capability mask.
//!
//! Resolution is an explicit two-pass fold:
//!
//! 1. OR together the masks of every [`GroupMode::Add`] group, starting from zero.
//! 2. Clear the masks of every [`GroupMode::Remove`] group from that result.
//!
//! Removal therefore always wins over any grant, and the relative order of groups
//! within each partition never matters. The effective mask is never persisted;
//! it is recomputed from the actor's current group references on every request.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use helpdesk_core::GroupId;

use crate::{Capabilities, Group, GroupMode};

/// Failure to load the groups an actor references.
///
/// Any failure is fatal to the whole resolution: a mask is never computed from
/// a partial group list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupResolutionError {
    #[error("referenced groups not found: {0:?}")]
    Missing(Vec<GroupId>),

    #[error("group source unavailable: {0}")]
    Unavailable(String),
}

/// Source of group definitions (usually the backing store).
pub trait GroupSource: Send + Sync {
    /// Load the groups with the given ids.
    ///
    /// Ids that do not exist are simply absent from the result; the caller
    /// decides whether that is fatal.
    fn load_groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, GroupResolutionError>;
}

impl<S> GroupSource for Arc<S>
where
    S: GroupSource + ?Sized,
{
    fn load_groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, GroupResolutionError> {
        (**self).load_groups(ids)
    }
}

/// Resolve the effective mask of a list of groups.
pub fn resolve(groups: &[Group]) -> Capabilities {
    let granted = groups
        .iter()
        .filter(|g| g.mode == GroupMode::Add)
        .fold(Capabilities::empty(), |acc, g| acc | g.permissions);

    groups
        .iter()
        .filter(|g| g.mode == GroupMode::Remove)
        .fold(granted, |acc, g| acc & !g.permissions)
}

/// Load every referenced group, failing closed if any reference is stale.
pub fn load_referenced<S>(source: &S, refs: &[GroupId]) -> Result<Vec<Group>, GroupResolutionError>
where
    S: GroupSource + ?Sized,
{
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    let groups = source.load_groups(refs)?;
    let loaded: BTreeSet<GroupId> = groups.iter().map(|g| g.id).collect();
    let missing: Vec<GroupId> = refs
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|id| !loaded.contains(id))
        .collect();

    if !missing.is_empty() {
        return Err(GroupResolutionError::Missing(missing));
    }

    Ok(groups)
}

/// Resolve the effective mask for a set of group references.
pub fn resolve_refs<S>(source: &S, refs: &[GroupId]) -> Result<Capabilities, GroupResolutionError>
where
    S: GroupSource + ?Sized,
{
    let groups = load_referenced(source, refs)?;
    Ok(resolve(&groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Capability;
    use proptest::prelude::*;

    struct FixedGroups(Vec<Group>);

    impl GroupSource for FixedGroups {
        fn load_groups(&self, ids: &[GroupId]) -> Result<Vec<Group>, GroupResolutionError> {
            Ok(self
                .0
                .iter()
                .filter(|g| ids.contains(&g.id))
                .cloned()
                .collect())
        }
    }

    struct Offline;

    impl GroupSource for Offline {
        fn load_groups(&self, _ids: &[GroupId]) -> Result<Vec<Group>, GroupResolutionError> {
            Err(GroupResolutionError::Unavailable("connection refused".to_string()))
        }
    }

    fn mask(bits: u128) -> Capabilities {
        Capabilities::from_bits_retain(bits)
    }

    #[test]
    fn empty_group_list_resolves_to_nothing() {
        assert_eq!(resolve(&[]), Capabilities::empty());
    }

    #[test]
    fn remove_applies_after_add_regardless_of_order() {
        let add = Group::new("support", GroupMode::Add, mask(0b0110));
        let remove = Group::new("restricted", GroupMode::Remove, mask(0b0010));

        assert_eq!(resolve(&[add.clone(), remove.clone()]).bits(), 0b0100);
        assert_eq!(resolve(&[remove, add]).bits(), 0b0100);
    }

    #[test]
    fn duplicate_references_are_idempotent() {
        let add = Group::granting("user", Capability::CREATE_TICKET | Capability::VIEW_TICKET);
        let remove = Group::revoking("muted-ish", Capability::CREATE_TICKET);
        let once = resolve(&[add.clone(), remove.clone()]);
        let twice = resolve(&[add.clone(), add, remove.clone(), remove]);
        assert_eq!(once, twice);
        assert_eq!(once, Capability::VIEW_TICKET.mask());
    }

    #[test]
    fn stale_reference_fails_closed() {
        let known = Group::granting("user", Capability::VIEW_TICKET);
        let stale = GroupId::new();
        let source = FixedGroups(vec![known.clone()]);

        let err = resolve_refs(&source, &[known.id, stale]).unwrap_err();
        assert_eq!(err, GroupResolutionError::Missing(vec![stale]));
    }

    #[test]
    fn unavailable_source_is_an_error_not_an_empty_mask() {
        let err = resolve_refs(&Offline, &[GroupId::new()]).unwrap_err();
        assert!(matches!(err, GroupResolutionError::Unavailable(_)));
    }

    #[test]
    fn no_references_skips_the_source() {
        assert_eq!(resolve_refs(&Offline, &[]).unwrap(), Capabilities::empty());
    }

    fn arb_groups() -> impl Strategy<Value = Vec<Group>> {
        prop::collection::vec((any::<bool>(), any::<u64>()), 0..12).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (is_remove, bits))| {
                    let mode = if is_remove { GroupMode::Remove } else { GroupMode::Add };
                    Group::new(format!("g{i}"), mode, mask(u128::from(bits) << 1))
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Reordering within the add partition or within the remove partition
        /// never changes the result.
        #[test]
        fn resolution_commutes_within_partitions(groups in arb_groups(), seed in any::<u64>()) {
            let (mut adds, mut removes): (Vec<Group>, Vec<Group>) =
                groups.iter().cloned().partition(|g| g.mode == GroupMode::Add);
            let expected = resolve(&groups);

            let rot_a = if adds.is_empty() { 0 } else { (seed as usize) % adds.len() };
            let rot_r = if removes.is_empty() { 0 } else { (seed as usize / 7) % removes.len() };
            adds.rotate_left(rot_a);
            adds.reverse();
            removes.rotate_left(rot_r);

            let mut shuffled = removes.clone();
            shuffled.extend(adds);
            prop_assert_eq!(resolve(&shuffled), expected);
        }

        /// A bit set by any remove group is clear in the result.
        #[test]
        fn removal_always_wins(groups in arb_groups()) {
            let resolved = resolve(&groups);
            for g in groups.iter().filter(|g| g.mode == GroupMode::Remove) {
                prop_assert!(!resolved.intersects(g.permissions));
            }
        }

        /// Every resolved bit was granted by some add group.
        #[test]
        fn nothing_is_granted_from_nowhere(groups in arb_groups()) {
            let granted = groups
                .iter()
                .filter(|g| g.mode == GroupMode::Add)
                .fold(Capabilities::empty(), |acc, g| acc | g.permissions);
            prop_assert!(granted.contains_all(resolve(&groups)));
        }
    }
}
