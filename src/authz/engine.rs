use crate::authz::errors::AuthzError;
use crate::authz::index::{IndexedGrant, PolicyIndex};
use crate::authz::types::{Decision, EvaluateRequest, PolicyEffect, SubjectContext};

/// Reason on every implicit (default) deny.
pub const NO_MATCHING_POLICY: &str = "no matching policy";

/// Decide whether the subject in `request` may perform its action on its
/// resource. Any matching deny grant wins over every matching allow grant,
/// whatever their relative hierarchy depth.
pub fn evaluate(index: &PolicyIndex, request: &EvaluateRequest) -> Result<Decision, AuthzError> {
    let subject = validate_request(request)?;
    let target = &request.resource.hierarchy;

    let mut first_allow: Option<(&str, &IndexedGrant)> = None;
    for value in &subject.entitlement_values {
        for grant in index.grants_for(&subject.entitlement_claim, value) {
            if !grant.hierarchy.covers(target) || !grant.actions.permits(&request.action) {
                continue;
            }
            match grant.effect {
                PolicyEffect::Deny => {
                    tracing::debug!(
                        action = %request.action,
                        binding = %grant.binding,
                        "evaluate: explicit deny"
                    );
                    return Ok(Decision::deny(format!(
                        "explicit deny by binding `{}` (role `{}`) for {}={}",
                        grant.binding, grant.role, subject.entitlement_claim, value
                    )));
                }
                PolicyEffect::Allow => {
                    first_allow.get_or_insert((value.as_str(), grant));
                }
            }
        }
    }

    let decision = match first_allow {
        Some((value, grant)) => Decision::allow(format!(
            "allowed by binding `{}` (role `{}`) for {}={} on {} at {}{}",
            grant.binding,
            grant.role,
            subject.entitlement_claim,
            value,
            request.action,
            target.to_path(),
            if request.resource.id.is_empty() {
                String::new()
            } else {
                format!(" ({})", request.resource.id)
            }
        )),
        None => Decision::deny(NO_MATCHING_POLICY),
    };
    tracing::debug!(
        action = %request.action,
        resource = %target.to_path(),
        allowed = decision.decision,
        "evaluate"
    );
    Ok(decision)
}

/// An evaluation needs an action and a subject carrying an entitlement
/// claim. An empty value list is valid and simply matches nothing.
pub fn validate_request(request: &EvaluateRequest) -> Result<&SubjectContext, AuthzError> {
    if request.action.is_empty() {
        return Err(AuthzError::InvalidRequest("action is required".into()));
    }
    validate_subject(request.subject_context.as_ref())
}

pub fn validate_subject(subject: Option<&SubjectContext>) -> Result<&SubjectContext, AuthzError> {
    let subject = subject
        .ok_or_else(|| AuthzError::InvalidRequest("subject_context is required".into()))?;
    if subject.entitlement_claim.is_empty() {
        return Err(AuthzError::InvalidRequest(
            "subject_context.entitlement_claim is required".into(),
        ));
    }
    Ok(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::*;

    fn grant_set(bindings: &[(&str, &str, ResourceHierarchy, PolicyEffect)]) -> PolicyIndex {
        let mut set = PolicySet::new();
        for (name, actions) in [
            ("viewer", vec!["component.read"]),
            ("deployer", vec!["component.*"]),
            ("root", vec!["*"]),
        ] {
            let role = Role {
                name: name.into(),
                actions: actions.into_iter().map(String::from).collect(),
                ..Default::default()
            };
            set.roles.insert(role.role_ref(), role);
        }
        for (name, role, hierarchy, effect) in bindings {
            let m = RoleEntitlementMapping {
                name: name.to_string(),
                role_ref: RoleRef::cluster(*role),
                entitlement: Entitlement {
                    claim: "groups".into(),
                    value: "eng".into(),
                },
                hierarchy: hierarchy.clone(),
                effect: *effect,
                system: false,
            };
            set.mappings.insert(m.mapping_ref(), m);
        }
        PolicyIndex::build(&set)
    }

    fn cluster_viewer() -> PolicyIndex {
        grant_set(&[(
            "b1",
            "viewer",
            ResourceHierarchy::cluster(),
            PolicyEffect::Allow,
        )])
    }

    fn allowed(index: &PolicyIndex, action: &str, hierarchy: ResourceHierarchy) -> bool {
        evaluate(index, &request(action, hierarchy)).unwrap().decision
    }

    fn request(action: &str, hierarchy: ResourceHierarchy) -> EvaluateRequest {
        EvaluateRequest {
            subject_context: Some(SubjectContext::new("groups", &["eng"])),
            resource: Resource {
                resource_type: "component".into(),
                id: "checkout".into(),
                hierarchy,
            },
            action: action.into(),
        }
    }

    #[test]
    fn test_cluster_allow() {
        let index = cluster_viewer();
        let d = evaluate(
            &index,
            &request("component.read", ResourceHierarchy::namespace("ns1")),
        )
        .unwrap();
        assert!(d.decision);
        assert!(d.reason().contains("b1"));
        assert!(d.reason().contains("viewer"));
    }

    #[test]
    fn test_action_not_in_role() {
        let index = cluster_viewer();
        let d = evaluate(
            &index,
            &request("component.delete", ResourceHierarchy::cluster()),
        )
        .unwrap();
        assert!(!d.decision);
        assert_eq!(d.reason(), NO_MATCHING_POLICY);
    }

    #[test]
    fn test_wildcard_actions() {
        let index = grant_set(&[
            ("b1", "deployer", ResourceHierarchy::namespace("ns1"), PolicyEffect::Allow),
            ("b2", "root", ResourceHierarchy::namespace("ops"), PolicyEffect::Allow),
        ]);
        assert!(allowed(&index, "component.deploy", ResourceHierarchy::namespace("ns1")));
        assert!(!allowed(&index, "project.read", ResourceHierarchy::namespace("ns1")));
        assert!(allowed(&index, "project.read", ResourceHierarchy::namespace("ops")));
    }

    #[test]
    fn test_scope_does_not_cover_shallower_target() {
        let index = grant_set(&[(
            "b1",
            "viewer",
            ResourceHierarchy::project("ns1", "shop"),
            PolicyEffect::Allow,
        )]);
        assert!(!allowed(&index, "component.read", ResourceHierarchy::namespace("ns1")));
        assert!(allowed(
            &index,
            "component.read",
            ResourceHierarchy::component("ns1", "shop", "cart")
        ));
    }

    #[test]
    fn test_broad_deny_beats_specific_allow() {
        let index = grant_set(&[
            (
                "allow-deep",
                "viewer",
                ResourceHierarchy::component("ns1", "shop", "cart"),
                PolicyEffect::Allow,
            ),
            ("deny-ns", "viewer", ResourceHierarchy::namespace("ns1"), PolicyEffect::Deny),
        ]);
        let d = evaluate(
            &index,
            &request("component.read", ResourceHierarchy::component("ns1", "shop", "cart")),
        )
        .unwrap();
        assert!(!d.decision);
        assert!(d.reason().starts_with("explicit deny"));
        assert!(d.reason().contains("deny-ns"));
    }

    #[test]
    fn test_any_value_matches() {
        let index = cluster_viewer();
        let mut req = request("component.read", ResourceHierarchy::cluster());
        req.subject_context = Some(SubjectContext::new("groups", &["sales", "eng"]));
        let d = evaluate(&index, &req).unwrap();
        assert!(d.decision);
        assert!(d.reason().contains("groups=eng"));
    }

    #[test]
    fn test_claim_must_match() {
        let index = cluster_viewer();
        let mut req = request("component.read", ResourceHierarchy::cluster());
        req.subject_context = Some(SubjectContext::new("roles", &["eng"]));
        assert!(!evaluate(&index, &req).unwrap().decision);
    }

    #[test]
    fn test_empty_values_is_default_deny() {
        let index = cluster_viewer();
        let mut req = request("component.read", ResourceHierarchy::cluster());
        req.subject_context = Some(SubjectContext::new("groups", &[]));
        let d = evaluate(&index, &req).unwrap();
        assert!(!d.decision);
        assert_eq!(d.reason(), NO_MATCHING_POLICY);
    }

    #[test]
    fn test_invalid_requests() {
        let index = PolicyIndex::default();

        let no_action = request("", ResourceHierarchy::cluster());
        assert!(matches!(evaluate(&index, &no_action), Err(AuthzError::InvalidRequest(_))));

        let mut no_subject = request("component.read", ResourceHierarchy::cluster());
        no_subject.subject_context = None;
        assert!(matches!(evaluate(&index, &no_subject), Err(AuthzError::InvalidRequest(_))));

        let mut no_claim = request("component.read", ResourceHierarchy::cluster());
        no_claim.subject_context = Some(SubjectContext::new("", &["eng"]));
        assert!(matches!(evaluate(&index, &no_claim), Err(AuthzError::InvalidRequest(_))));
    }
}
