use authzd::authz::types::{
    Entitlement, EvaluateRequest, PolicyEffect, Resource, ResourceHierarchy, Role,
    RoleEntitlementMapping, RoleRef, SubjectContext,
};
use authzd::authz::PolicyStore;

/// Builder for test roles
pub struct RoleBuilder {
    name: String,
    namespace: String,
    actions: Vec<String>,
    description: String,
}

impl RoleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: String::new(),
            actions: Vec::new(),
            description: String::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.actions.push(action.to_string());
        self
    }

    pub fn build(self) -> Role {
        Role {
            name: self.name,
            namespace: self.namespace,
            actions: self.actions,
            description: self.description,
        }
    }

    pub fn create(self, store: &PolicyStore) -> Role {
        let role = self.build();
        store.add_role(role.clone()).expect("Failed to create test role");
        role
    }
}

/// Builder for test bindings. Defaults to an allow on `groups=<value>` at
/// cluster scope.
pub struct MappingBuilder {
    name: String,
    role: RoleRef,
    claim: String,
    value: String,
    hierarchy: ResourceHierarchy,
    effect: PolicyEffect,
}

impl MappingBuilder {
    pub fn new(name: &str, role: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            role: RoleRef::cluster(role),
            claim: "groups".to_string(),
            value: value.to_string(),
            hierarchy: ResourceHierarchy::cluster(),
            effect: PolicyEffect::Allow,
        }
    }

    pub fn claim(mut self, claim: &str) -> Self {
        self.claim = claim.to_string();
        self
    }

    pub fn role_namespace(mut self, namespace: &str) -> Self {
        self.role.namespace = namespace.to_string();
        self
    }

    pub fn at(mut self, hierarchy: ResourceHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn deny(mut self) -> Self {
        self.effect = PolicyEffect::Deny;
        self
    }

    pub fn build(self) -> RoleEntitlementMapping {
        RoleEntitlementMapping {
            name: self.name,
            role_ref: self.role,
            entitlement: Entitlement {
                claim: self.claim,
                value: self.value,
            },
            hierarchy: self.hierarchy,
            effect: self.effect,
            system: false,
        }
    }

    pub fn create(self, store: &PolicyStore) -> RoleEntitlementMapping {
        let mapping = self.build();
        store
            .add_role_mapping(mapping.clone())
            .expect("Failed to create test mapping");
        mapping
    }
}

pub fn subject(claim: &str, values: &[&str]) -> SubjectContext {
    SubjectContext::new(claim, values)
}

pub fn eval(
    subject: SubjectContext,
    action: &str,
    hierarchy: ResourceHierarchy,
) -> EvaluateRequest {
    EvaluateRequest {
        subject_context: Some(subject),
        resource: Resource {
            resource_type: action.split('.').next().unwrap_or_default().to_string(),
            id: String::new(),
            hierarchy,
        },
        action: action.to_string(),
    }
}
