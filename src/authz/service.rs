use std::sync::Arc;

use crate::authz::actions::known_actions;
use crate::authz::batch;
use crate::authz::engine;
use crate::authz::errors::AuthzError;
use crate::authz::profile;
use crate::authz::store::PolicyStore;
use crate::authz::types::{
    BatchEvaluateRequest, BatchEvaluateResponse, BatchMember, Decision, EvaluateRequest,
    MappingRef, ProfileRequest, Resource, ResourceHierarchy, Role, RoleEntitlementMapping,
    RoleMappingFilter, RoleRef, SubjectContext, UserCapabilitiesResponse,
};

pub const DEFAULT_PARALLEL_BATCH_THRESHOLD: usize = 16;

/// Entry point used by the HTTP layer. Decisions go straight to the current
/// snapshot; management calls first check that the caller itself holds the
/// matching `role.*` / `rolemapping.*` action at the affected scope.
#[derive(Debug, Clone)]
pub struct Authorizer {
    store: Arc<PolicyStore>,
    enabled: bool,
    parallel_batch_threshold: usize,
}

impl Authorizer {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self {
            store,
            enabled: true,
            parallel_batch_threshold: DEFAULT_PARALLEL_BATCH_THRESHOLD,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_parallel_batch_threshold(mut self, threshold: usize) -> Self {
        self.parallel_batch_threshold = threshold;
        self
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn parallel_batch_threshold(&self) -> usize {
        self.parallel_batch_threshold
    }

    fn ensure_enabled(&self) -> Result<(), AuthzError> {
        if self.enabled {
            Ok(())
        } else {
            Err(AuthzError::AuthzDisabled)
        }
    }

    /// Management guard. A missing claim on the caller is a transport-level
    /// identity problem and is reported as `Forbidden`, never `InvalidRequest`.
    fn authorize_caller(
        &self,
        caller: &SubjectContext,
        action: &str,
        scope: ResourceHierarchy,
    ) -> Result<(), AuthzError> {
        self.ensure_enabled()?;
        let kind = action.split('.').next().unwrap_or_default();
        let request = EvaluateRequest {
            subject_context: Some(caller.clone()),
            resource: Resource {
                resource_type: kind.to_string(),
                id: String::new(),
                hierarchy: scope,
            },
            action: action.to_string(),
        };
        let decision = match engine::evaluate(&self.store.snapshot().index, &request) {
            Ok(decision) => decision,
            Err(AuthzError::InvalidRequest(msg)) => return Err(AuthzError::Forbidden(msg)),
            Err(e) => return Err(e),
        };
        if decision.decision {
            Ok(())
        } else {
            tracing::debug!(action, reason = %decision.reason(), "management call rejected");
            Err(AuthzError::Forbidden(format!(
                "{action} not permitted: {}",
                decision.reason()
            )))
        }
    }

    // ---------- decisions ----------

    pub fn list_actions(&self, caller: &SubjectContext) -> Result<Vec<String>, AuthzError> {
        self.authorize_caller(caller, "role.read", ResourceHierarchy::cluster())?;
        Ok(known_actions())
    }

    pub fn evaluate(&self, request: &EvaluateRequest) -> Result<Decision, AuthzError> {
        self.ensure_enabled()?;
        engine::evaluate(&self.store.snapshot().index, request)
    }

    pub fn batch_evaluate(
        &self,
        request: &BatchEvaluateRequest,
    ) -> Result<BatchEvaluateResponse, AuthzError> {
        self.ensure_enabled()?;
        let snapshot = self.store.snapshot();
        batch::batch_evaluate(&snapshot.index, request, self.parallel_batch_threshold)
    }

    pub fn batch_evaluate_decoded(
        &self,
        members: &[BatchMember],
    ) -> Result<BatchEvaluateResponse, AuthzError> {
        self.ensure_enabled()?;
        let snapshot = self.store.snapshot();
        batch::batch_evaluate_decoded(&snapshot.index, members, self.parallel_batch_threshold)
    }

    pub fn subject_profile(
        &self,
        request: &ProfileRequest,
    ) -> Result<UserCapabilitiesResponse, AuthzError> {
        self.ensure_enabled()?;
        profile::build_profile(&self.store.snapshot().index, request)
    }

    // ---------- roles ----------

    pub fn list_cluster_roles(&self, caller: &SubjectContext) -> Result<Vec<Role>, AuthzError> {
        self.authorize_caller(caller, "role.read", ResourceHierarchy::cluster())?;
        Ok(self.store.list_cluster_roles())
    }

    pub fn list_namespace_roles(
        &self,
        caller: &SubjectContext,
        namespace: &str,
    ) -> Result<Vec<Role>, AuthzError> {
        self.authorize_caller(caller, "role.read", ResourceHierarchy::namespace(namespace))?;
        Ok(self.store.list_namespace_roles(namespace))
    }

    pub fn get_role(&self, caller: &SubjectContext, role: &RoleRef) -> Result<Role, AuthzError> {
        self.authorize_caller(caller, "role.read", role_scope(role))?;
        self.store.get_role(role)
    }

    pub fn add_role(&self, caller: &SubjectContext, role: Role) -> Result<(), AuthzError> {
        self.authorize_caller(caller, "role.create", role_scope(&role.role_ref()))?;
        self.store.add_role(role)
    }

    pub fn update_role(&self, caller: &SubjectContext, role: Role) -> Result<(), AuthzError> {
        self.authorize_caller(caller, "role.update", role_scope(&role.role_ref()))?;
        self.store.update_role(role)
    }

    pub fn remove_role(&self, caller: &SubjectContext, role: &RoleRef) -> Result<(), AuthzError> {
        self.authorize_caller(caller, "role.delete", role_scope(role))?;
        self.store.remove_role(role)
    }

    /// Also needs `rolemapping.delete`, since referencing bindings go too.
    pub fn force_remove_role(
        &self,
        caller: &SubjectContext,
        role: &RoleRef,
    ) -> Result<usize, AuthzError> {
        self.authorize_caller(caller, "role.delete", role_scope(role))?;
        self.authorize_caller(caller, "rolemapping.delete", role_scope(role))?;
        self.store.force_remove_role(role)
    }

    // ---------- role entitlement mappings ----------

    pub fn list_cluster_role_mappings(
        &self,
        caller: &SubjectContext,
        filter: &RoleMappingFilter,
    ) -> Result<Vec<RoleEntitlementMapping>, AuthzError> {
        self.authorize_caller(caller, "rolemapping.read", ResourceHierarchy::cluster())?;
        Ok(self.store.list_cluster_role_mappings(filter))
    }

    pub fn list_namespaced_role_mappings(
        &self,
        caller: &SubjectContext,
        namespace: &str,
        filter: &RoleMappingFilter,
    ) -> Result<Vec<RoleEntitlementMapping>, AuthzError> {
        self.authorize_caller(caller, "rolemapping.read", ResourceHierarchy::namespace(namespace))?;
        Ok(self.store.list_namespaced_role_mappings(namespace, filter))
    }

    pub fn get_role_mapping(
        &self,
        caller: &SubjectContext,
        mapping: &MappingRef,
    ) -> Result<RoleEntitlementMapping, AuthzError> {
        self.authorize_caller(caller, "rolemapping.read", mapping_scope(mapping))?;
        self.store.get_role_mapping(mapping)
    }

    /// Tenant-created bindings are never system bindings.
    pub fn add_role_mapping(
        &self,
        caller: &SubjectContext,
        mapping: RoleEntitlementMapping,
    ) -> Result<(), AuthzError> {
        self.authorize_caller(caller, "rolemapping.create", mapping_scope(&mapping.mapping_ref()))?;
        self.store.add_role_mapping(RoleEntitlementMapping {
            system: false,
            ..mapping
        })
    }

    pub fn update_role_mapping(
        &self,
        caller: &SubjectContext,
        mapping: RoleEntitlementMapping,
    ) -> Result<(), AuthzError> {
        self.authorize_caller(caller, "rolemapping.update", mapping_scope(&mapping.mapping_ref()))?;
        self.store.update_role_mapping(mapping)
    }

    pub fn remove_role_mapping(
        &self,
        caller: &SubjectContext,
        mapping: &MappingRef,
    ) -> Result<(), AuthzError> {
        self.authorize_caller(caller, "rolemapping.delete", mapping_scope(mapping))?;
        self.store.remove_role_mapping(mapping)
    }
}

fn role_scope(role: &RoleRef) -> ResourceHierarchy {
    ResourceHierarchy::namespace(role.namespace.as_str())
}

fn mapping_scope(mapping: &MappingRef) -> ResourceHierarchy {
    ResourceHierarchy::namespace(mapping.namespace.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::*;

    /// Cluster admins (groups=admins) and acme admins (groups=acme-admins).
    fn authorizer() -> Authorizer {
        let mut set = PolicySet::new();
        for (name, actions) in [
            ("admin", vec!["*"]),
            ("role-manager", vec!["role.*", "rolemapping.*"]),
            ("viewer", vec!["component.read"]),
        ] {
            let role = Role {
                name: name.into(),
                actions: actions.into_iter().map(String::from).collect(),
                ..Default::default()
            };
            set.roles.insert(role.role_ref(), role);
        }
        for (name, role, value, hierarchy, system) in [
            ("platform-admins", "admin", "admins", ResourceHierarchy::cluster(), true),
            (
                "acme-admins",
                "role-manager",
                "acme-admins",
                ResourceHierarchy::namespace("acme"),
                false,
            ),
        ] {
            let m = RoleEntitlementMapping {
                name: name.into(),
                role_ref: RoleRef::cluster(role),
                entitlement: Entitlement {
                    claim: "groups".into(),
                    value: value.into(),
                },
                hierarchy,
                effect: PolicyEffect::Allow,
                system,
            };
            set.mappings.insert(m.mapping_ref(), m);
        }
        Authorizer::new(Arc::new(PolicyStore::from_set(set)))
    }

    fn admin() -> SubjectContext {
        SubjectContext::new("groups", &["admins"])
    }

    fn acme_admin() -> SubjectContext {
        SubjectContext::new("groups", &["acme-admins"])
    }

    #[test]
    fn test_disabled_rejects_everything() {
        let authz = authorizer().with_enabled(false);
        let req = EvaluateRequest {
            subject_context: Some(admin()),
            action: "component.read".into(),
            ..Default::default()
        };
        assert!(matches!(authz.evaluate(&req), Err(AuthzError::AuthzDisabled)));
        assert!(matches!(
            authz.batch_evaluate(&BatchEvaluateRequest { requests: vec![req] }),
            Err(AuthzError::AuthzDisabled)
        ));
        assert!(matches!(authz.list_actions(&admin()), Err(AuthzError::AuthzDisabled)));
        assert!(matches!(
            authz.list_cluster_roles(&admin()),
            Err(AuthzError::AuthzDisabled)
        ));
    }

    #[test]
    fn test_list_actions_requires_role_read() {
        let authz = authorizer();
        assert!(!authz.list_actions(&admin()).unwrap().is_empty());
        assert!(matches!(
            authz.list_actions(&SubjectContext::new("groups", &["nobody"])),
            Err(AuthzError::Forbidden(_))
        ));
        assert!(matches!(
            authz.list_actions(&SubjectContext::new("", &[])),
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[test]
    fn test_namespace_admin_is_confined_to_namespace() {
        let authz = authorizer();
        let role = Role {
            name: "dev".into(),
            namespace: "acme".into(),
            actions: vec!["component.*".into()],
            description: String::new(),
        };
        authz.add_role(&acme_admin(), role.clone()).unwrap();
        assert_eq!(authz.list_namespace_roles(&acme_admin(), "acme").unwrap().len(), 1);

        let mut elsewhere = role;
        elsewhere.namespace = "globex".into();
        assert!(matches!(
            authz.add_role(&acme_admin(), elsewhere),
            Err(AuthzError::Forbidden(_))
        ));
        assert!(matches!(
            authz.list_cluster_roles(&acme_admin()),
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[test]
    fn test_tenant_cannot_touch_system_binding() {
        let authz = authorizer();
        assert!(matches!(
            authz.remove_role_mapping(&admin(), &MappingRef::cluster("platform-admins")),
            Err(AuthzError::CannotDeleteSystemMapping)
        ));
    }

    #[test]
    fn test_added_mapping_is_never_system() {
        let authz = authorizer();
        let mapping = RoleEntitlementMapping {
            name: "acme-viewers".into(),
            role_ref: RoleRef::cluster("viewer"),
            entitlement: Entitlement {
                claim: "groups".into(),
                value: "viewers".into(),
            },
            hierarchy: ResourceHierarchy::namespace("acme"),
            effect: PolicyEffect::Allow,
            system: true,
        };
        authz.add_role_mapping(&acme_admin(), mapping).unwrap();
        let stored = authz
            .get_role_mapping(&acme_admin(), &MappingRef::namespaced("acme", "acme-viewers"))
            .unwrap();
        assert!(!stored.system);
        authz
            .remove_role_mapping(&acme_admin(), &MappingRef::namespaced("acme", "acme-viewers"))
            .unwrap();
    }

    #[test]
    fn test_force_remove_needs_mapping_delete() {
        let authz = authorizer();
        let viewer = RoleRef::cluster("viewer");
        assert!(matches!(
            authz.force_remove_role(&acme_admin(), &viewer),
            Err(AuthzError::Forbidden(_))
        ));
        assert_eq!(authz.force_remove_role(&admin(), &viewer).unwrap(), 0);
    }
}
