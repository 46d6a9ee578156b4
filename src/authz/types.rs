use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of a resource in the namespace -> project -> component tree.
/// An empty field means "unscoped at this level".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHierarchy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub component: String,
}

impl ResourceHierarchy {
    pub fn cluster() -> Self {
        Self::default()
    }

    pub fn namespace(ns: impl Into<String>) -> Self {
        Self {
            namespace: ns.into(),
            ..Default::default()
        }
    }

    pub fn project(ns: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            namespace: ns.into(),
            project: project.into(),
            component: String::new(),
        }
    }

    pub fn component(
        ns: impl Into<String>,
        project: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            namespace: ns.into(),
            project: project.into(),
            component: component.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.project.is_empty() && self.component.is_empty()
    }
}

/// The concrete object an action targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub hierarchy: ResourceHierarchy,
}

/// Who is asking, expressed as the entitlement claim/values carried by the
/// caller's token rather than an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectContext {
    #[serde(rename = "type", default)]
    pub subject_type: String,
    #[serde(default)]
    pub entitlement_claim: String,
    #[serde(default)]
    pub entitlement_values: Vec<String>,
}

impl SubjectContext {
    pub fn new(claim: impl Into<String>, values: &[&str]) -> Self {
        Self {
            subject_type: "user".into(),
            entitlement_claim: claim.into(),
            entitlement_values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl std::fmt::Display for PolicyEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a role. Empty `namespace` is the cluster scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl RoleRef {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl std::fmt::Display for RoleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub actions: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Role {
    pub fn role_ref(&self) -> RoleRef {
        RoleRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// A claim/value pair asserted about a subject, e.g. `groups=platform-admins`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entitlement {
    pub claim: String,
    pub value: String,
}

impl std::fmt::Display for Entitlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.claim, self.value)
    }
}

/// Identifies a binding. Cluster bindings have an empty `namespace`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl MappingRef {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for MappingRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Binding of a role to an entitlement at a hierarchy scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntitlementMapping {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "role")]
    pub role_ref: RoleRef,
    pub entitlement: Entitlement,
    #[serde(default)]
    pub hierarchy: ResourceHierarchy,
    pub effect: PolicyEffect,
    /// Platform-seeded bindings. Never accepted from request bodies.
    #[serde(default, skip_deserializing)]
    pub system: bool,
}

impl Default for PolicyEffect {
    fn default() -> Self {
        Self::Allow
    }
}

impl RoleEntitlementMapping {
    pub fn mapping_ref(&self) -> MappingRef {
        MappingRef {
            name: self.name.clone(),
            namespace: self.hierarchy.namespace.clone(),
        }
    }
}

/// Filters for binding listings. Empty strings and `None` mean "no
/// constraint"; supplied filters are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleMappingFilter {
    #[serde(default, rename = "role")]
    pub role_name: String,
    #[serde(default)]
    pub role_namespace: Option<String>,
    #[serde(default)]
    pub claim: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub effect: Option<PolicyEffect>,
}

impl RoleMappingFilter {
    pub fn matches(&self, mapping: &RoleEntitlementMapping) -> bool {
        (self.role_name.is_empty() || mapping.role_ref.name == self.role_name)
            && self
                .role_namespace
                .as_ref()
                .map_or(true, |ns| mapping.role_ref.namespace == *ns)
            && (self.claim.is_empty() || mapping.entitlement.claim == self.claim)
            && (self.value.is_empty() || mapping.entitlement.value == self.value)
            && self.effect.map_or(true, |e| mapping.effect == e)
    }
}

/// The authoritative role/binding set at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    pub roles: BTreeMap<RoleRef, Role>,
    pub mappings: BTreeMap<MappingRef, RoleEntitlementMapping>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn references(&self, role: &RoleRef) -> impl Iterator<Item = &RoleEntitlementMapping> {
        let role = role.clone();
        self.mappings.values().filter(move |m| m.role_ref == role)
    }
}

/// Intermediate result from parsing a single policy file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub roles: Vec<Role>,
    pub mappings: Vec<RoleEntitlementMapping>,
}

// ---------- API request/response types ----------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub subject_context: Option<SubjectContext>,
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: bool,
    pub context: DecisionContext,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: true,
            context: DecisionContext {
                reason: reason.into(),
            },
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: false,
            context: DecisionContext {
                reason: reason.into(),
            },
        }
    }

    pub fn reason(&self) -> &str {
        &self.context.reason
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEvaluateRequest {
    #[serde(default)]
    pub requests: Vec<EvaluateRequest>,
}

/// A batch member that failed to decode carries the decoder's message.
pub type BatchMember = Result<EvaluateRequest, String>;

/// Batch body as it arrives on the wire. Members are decoded one at a
/// time so a malformed member only spoils its own slot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBatchEvaluateRequest {
    #[serde(default)]
    pub requests: Vec<serde_json::Value>,
}

impl RawBatchEvaluateRequest {
    pub fn decode(self) -> Vec<BatchMember> {
        self.requests
            .into_iter()
            .map(|member| serde_json::from_value(member).map_err(|e| e.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvaluateResponse {
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub subject_context: Option<SubjectContext>,
    /// Upper bound of the profile, e.g. "what can I do inside project P".
    #[serde(default)]
    pub scope: ResourceHierarchy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityResource {
    /// e.g. "namespace/acme/project/shop"
    pub path: String,
    pub constraints: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCapability {
    pub allowed: Vec<CapabilityResource>,
    pub denied: Vec<CapabilityResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCapabilitiesResponse {
    pub user: SubjectContext,
    pub capabilities: BTreeMap<String, ActionCapability>,
    #[serde(rename = "evaluatedAt")]
    pub generated_at: DateTime<Utc>,
}
