use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::authz::actions::validate_role_action;
use crate::authz::errors::AuthzError;
use crate::authz::index::PolicyIndex;
use crate::authz::types::{
    MappingRef, PolicySet, Role, RoleEntitlementMapping, RoleMappingFilter, RoleRef,
};

/// A published, immutable view of the policy set and its index.
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    pub version: u64,
    pub policies: PolicySet,
    pub index: PolicyIndex,
}

/// Owns the authoritative role/binding set.
///
/// Readers clone the current `Arc<PolicySnapshot>` under a read lock held
/// only for the pointer copy. Writers are serialized by `writer`, apply
/// their change to a private copy of the set, rebuild the index and swap
/// the pointer, so a reader sees either the old snapshot or the new one.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
    writer: Mutex<()>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_set(set: PolicySet) -> Self {
        let store = Self::new();
        store.replace_all(set);
        store
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the whole set, as delivered by the policy repository.
    pub fn replace_all(&self, set: PolicySet) {
        let _guard = self.writer.lock();
        let version = self.current.read().version + 1;
        let snapshot = self.publish(set, version);
        tracing::info!(
            version,
            roles = snapshot.policies.roles.len(),
            mappings = snapshot.policies.mappings.len(),
            dangling = snapshot.index.dangling_count(),
            "Loaded authorization policy set"
        );
    }

    fn publish(&self, set: PolicySet, version: u64) -> Arc<PolicySnapshot> {
        let index = PolicyIndex::build(&set);
        let snapshot = Arc::new(PolicySnapshot {
            version,
            policies: set,
            index,
        });
        *self.current.write() = Arc::clone(&snapshot);
        snapshot
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut PolicySet) -> Result<T, AuthzError>,
    ) -> Result<T, AuthzError> {
        let _guard = self.writer.lock();
        let base = self.snapshot();
        let mut next = base.policies.clone();
        let out = apply(&mut next)?;
        self.publish(next, base.version + 1);
        Ok(out)
    }

    // ---------- roles ----------

    pub fn add_role(&self, role: Role) -> Result<(), AuthzError> {
        validate_role(&role)?;
        let key = role.role_ref();
        self.mutate(|set| {
            if set.roles.contains_key(&key) {
                return Err(AuthzError::RoleAlreadyExists);
            }
            set.roles.insert(key.clone(), role);
            Ok(())
        })?;
        tracing::info!(role = %key, "Added role");
        Ok(())
    }

    /// Replaces actions and description of an existing role.
    pub fn update_role(&self, role: Role) -> Result<(), AuthzError> {
        validate_role(&role)?;
        let key = role.role_ref();
        self.mutate(|set| {
            let existing = set.roles.get_mut(&key).ok_or(AuthzError::RoleNotFound)?;
            existing.actions = role.actions;
            existing.description = role.description;
            Ok(())
        })?;
        tracing::info!(role = %key, "Updated role");
        Ok(())
    }

    pub fn remove_role(&self, role: &RoleRef) -> Result<(), AuthzError> {
        self.mutate(|set| {
            if !set.roles.contains_key(role) {
                return Err(AuthzError::RoleNotFound);
            }
            let in_use = set.references(role).count();
            if in_use > 0 {
                tracing::debug!(
                    role = %role,
                    mappings = in_use,
                    "cannot delete role: role is in use"
                );
                return Err(AuthzError::RoleInUse);
            }
            set.roles.remove(role);
            Ok(())
        })?;
        tracing::info!(role = %role, "Removed role");
        Ok(())
    }

    /// Removes a role together with every binding that references it.
    /// Returns the number of bindings removed.
    pub fn force_remove_role(&self, role: &RoleRef) -> Result<usize, AuthzError> {
        let removed = self.mutate(|set| {
            if !set.roles.contains_key(role) {
                return Err(AuthzError::RoleNotFound);
            }
            let referencing: Vec<&RoleEntitlementMapping> = set.references(role).collect();
            if referencing.iter().any(|m| m.system) {
                return Err(AuthzError::CannotDeleteSystemMapping);
            }
            let keys: Vec<MappingRef> = referencing.iter().map(|m| m.mapping_ref()).collect();
            for key in &keys {
                set.mappings.remove(key);
            }
            set.roles.remove(role);
            Ok(keys.len())
        })?;
        tracing::info!(role = %role, mappings = removed, "Force removed role");
        Ok(removed)
    }

    pub fn get_role(&self, role: &RoleRef) -> Result<Role, AuthzError> {
        self.snapshot()
            .policies
            .roles
            .get(role)
            .cloned()
            .ok_or(AuthzError::RoleNotFound)
    }

    pub fn list_cluster_roles(&self) -> Vec<Role> {
        self.list_roles_in("")
    }

    pub fn list_namespace_roles(&self, namespace: &str) -> Vec<Role> {
        self.list_roles_in(namespace)
    }

    fn list_roles_in(&self, namespace: &str) -> Vec<Role> {
        self.snapshot()
            .policies
            .roles
            .values()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect()
    }

    // ---------- role entitlement mappings ----------

    pub fn add_role_mapping(&self, mapping: RoleEntitlementMapping) -> Result<(), AuthzError> {
        validate_mapping(&mapping)?;
        let key = mapping.mapping_ref();
        self.mutate(|set| {
            if set.mappings.contains_key(&key) {
                return Err(AuthzError::RoleMappingAlreadyExists);
            }
            if !set.roles.contains_key(&mapping.role_ref) {
                return Err(AuthzError::RoleNotFound);
            }
            set.mappings.insert(key.clone(), mapping);
            Ok(())
        })?;
        tracing::info!(mapping = %key, "Added role mapping");
        Ok(())
    }

    /// Replaces role, entitlement, hierarchy and effect of an existing
    /// binding. System bindings reject the update outright.
    pub fn update_role_mapping(&self, mapping: RoleEntitlementMapping) -> Result<(), AuthzError> {
        validate_mapping(&mapping)?;
        let key = mapping.mapping_ref();
        self.mutate(|set| {
            let system = match set.mappings.get(&key) {
                None => return Err(AuthzError::RoleMappingNotFound),
                Some(existing) => existing.system,
            };
            if system {
                return Err(AuthzError::CannotModifySystemMapping);
            }
            if !set.roles.contains_key(&mapping.role_ref) {
                return Err(AuthzError::RoleNotFound);
            }
            set.mappings.insert(
                key.clone(),
                RoleEntitlementMapping {
                    system: false,
                    ..mapping
                },
            );
            Ok(())
        })?;
        tracing::info!(mapping = %key, "Updated role mapping");
        Ok(())
    }

    pub fn remove_role_mapping(&self, mapping: &MappingRef) -> Result<(), AuthzError> {
        self.mutate(|set| {
            match set.mappings.get(mapping) {
                None => return Err(AuthzError::RoleMappingNotFound),
                Some(existing) if existing.system => {
                    return Err(AuthzError::CannotDeleteSystemMapping)
                }
                Some(_) => {}
            }
            set.mappings.remove(mapping);
            Ok(())
        })?;
        tracing::info!(mapping = %mapping, "Removed role mapping");
        Ok(())
    }

    pub fn get_role_mapping(
        &self,
        mapping: &MappingRef,
    ) -> Result<RoleEntitlementMapping, AuthzError> {
        self.snapshot()
            .policies
            .mappings
            .get(mapping)
            .cloned()
            .ok_or(AuthzError::RoleMappingNotFound)
    }

    pub fn list_cluster_role_mappings(
        &self,
        filter: &RoleMappingFilter,
    ) -> Vec<RoleEntitlementMapping> {
        self.list_mappings_in("", filter)
    }

    pub fn list_namespaced_role_mappings(
        &self,
        namespace: &str,
        filter: &RoleMappingFilter,
    ) -> Vec<RoleEntitlementMapping> {
        self.list_mappings_in(namespace, filter)
    }

    fn list_mappings_in(
        &self,
        namespace: &str,
        filter: &RoleMappingFilter,
    ) -> Vec<RoleEntitlementMapping> {
        self.snapshot()
            .policies
            .mappings
            .values()
            .filter(|m| m.hierarchy.namespace == namespace && filter.matches(m))
            .cloned()
            .collect()
    }
}

pub(crate) fn validate_role(role: &Role) -> Result<(), AuthzError> {
    if role.name.is_empty() {
        return Err(AuthzError::InvalidRequest("role name is required".into()));
    }
    if role.actions.is_empty() {
        return Err(AuthzError::InvalidRequest(
            "role must have at least one action".into(),
        ));
    }
    role.actions.iter().try_for_each(|a| validate_role_action(a))
}

pub(crate) fn validate_mapping(mapping: &RoleEntitlementMapping) -> Result<(), AuthzError> {
    if mapping.name.is_empty() {
        return Err(AuthzError::InvalidRequest("mapping name is required".into()));
    }
    if mapping.role_ref.name.is_empty() {
        return Err(AuthzError::InvalidRequest("role name is required".into()));
    }
    if mapping.entitlement.claim.is_empty() || mapping.entitlement.value.is_empty() {
        return Err(AuthzError::InvalidRequest(
            "entitlement claim and value are required".into(),
        ));
    }
    mapping.hierarchy.validate_scope()?;
    if !mapping.role_ref.is_cluster_scoped()
        && mapping.role_ref.namespace != mapping.hierarchy.namespace
    {
        return Err(AuthzError::InvalidRequest(format!(
            "role `{}` is scoped to namespace `{}` and cannot be bound outside it",
            mapping.role_ref.name, mapping.role_ref.namespace
        )));
    }
    Ok(())
}
