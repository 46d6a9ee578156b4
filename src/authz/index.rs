use std::collections::HashMap;
use std::sync::Arc;

use crate::authz::actions::ActionSet;
use crate::authz::types::{MappingRef, PolicyEffect, PolicySet, ResourceHierarchy, RoleRef};

/// One binding resolved against its role, ready for evaluation.
#[derive(Debug, Clone)]
pub struct IndexedGrant {
    pub binding: MappingRef,
    pub role: RoleRef,
    pub effect: PolicyEffect,
    pub hierarchy: ResourceHierarchy,
    pub actions: Arc<ActionSet>,
}

/// Immutable lookup structure: claim -> value -> candidate grants.
/// Role actions are pre-expanded so evaluation never consults the role set.
#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    by_entitlement: HashMap<String, HashMap<String, Vec<IndexedGrant>>>,
    dangling: usize,
}

impl PolicyIndex {
    pub fn build(set: &PolicySet) -> Self {
        let actions: HashMap<&RoleRef, Arc<ActionSet>> = set
            .roles
            .iter()
            .map(|(r, role)| (r, Arc::new(ActionSet::from_actions(&role.actions))))
            .collect();

        let mut index = PolicyIndex::default();
        // BTreeMap iteration keeps candidate order stable across rebuilds.
        for (binding_ref, mapping) in &set.mappings {
            let Some(role_actions) = actions.get(&mapping.role_ref) else {
                tracing::warn!(
                    binding = %binding_ref,
                    role = %mapping.role_ref,
                    "binding references a missing role; it grants nothing"
                );
                index.dangling += 1;
                continue;
            };
            index
                .by_entitlement
                .entry(mapping.entitlement.claim.clone())
                .or_default()
                .entry(mapping.entitlement.value.clone())
                .or_default()
                .push(IndexedGrant {
                    binding: binding_ref.clone(),
                    role: mapping.role_ref.clone(),
                    effect: mapping.effect,
                    hierarchy: mapping.hierarchy.clone(),
                    actions: Arc::clone(role_actions),
                });
        }
        index
    }

    pub fn grants_for(&self, claim: &str, value: &str) -> &[IndexedGrant] {
        self.by_entitlement
            .get(claim)
            .and_then(|values| values.get(value))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn grant_count(&self) -> usize {
        self.by_entitlement
            .values()
            .flat_map(|values| values.values())
            .map(|v| v.len())
            .sum()
    }

    pub fn dangling_count(&self) -> usize {
        self.dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::{Entitlement, Role, RoleEntitlementMapping};

    fn make_set() -> PolicySet {
        let mut set = PolicySet::new();
        let viewer = Role {
            name: "viewer".into(),
            actions: vec!["component.read".into()],
            ..Default::default()
        };
        set.roles.insert(viewer.role_ref(), viewer);
        for (name, value, role) in [
            ("b1", "eng", "viewer"),
            ("b2", "eng", "viewer"),
            ("b3", "ops", "ghost"),
        ] {
            let m = RoleEntitlementMapping {
                name: name.into(),
                role_ref: RoleRef::cluster(role),
                entitlement: Entitlement {
                    claim: "groups".into(),
                    value: value.into(),
                },
                hierarchy: ResourceHierarchy::cluster(),
                effect: PolicyEffect::Allow,
                system: false,
            };
            set.mappings.insert(m.mapping_ref(), m);
        }
        set
    }

    #[test]
    fn test_build_groups_by_entitlement() {
        let index = PolicyIndex::build(&make_set());
        let grants = index.grants_for("groups", "eng");
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].binding.name, "b1");
        assert!(grants[0].actions.permits("component.read"));
        assert!(index.grants_for("groups", "nobody").is_empty());
        assert!(index.grants_for("sub", "eng").is_empty());
    }

    #[test]
    fn test_dangling_role_grants_nothing() {
        let index = PolicyIndex::build(&make_set());
        assert!(index.grants_for("groups", "ops").is_empty());
        assert_eq!(index.dangling_count(), 1);
        assert_eq!(index.grant_count(), 2);
    }

    #[test]
    fn test_same_value_under_another_claim_is_separate() {
        let mut set = make_set();
        let mut by_role = set.mappings[&MappingRef::cluster("b1")].clone();
        by_role.name = "b4".into();
        by_role.entitlement.claim = "roles".into();
        set.mappings.insert(by_role.mapping_ref(), by_role);

        let index = PolicyIndex::build(&set);
        assert_eq!(index.grants_for("groups", "eng").len(), 2);
        let grants = index.grants_for("roles", "eng");
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].binding.name, "b4");
        assert_eq!(index.grant_count(), 3);
    }

    #[test]
    fn test_role_actions_shared_between_grants() {
        let index = PolicyIndex::build(&make_set());
        let grants = index.grants_for("groups", "eng");
        assert!(Arc::ptr_eq(&grants[0].actions, &grants[1].actions));
    }
}
