//! Capability profile: what a subject can do under a scope, per action.
//!
//! This is a reporting view for UIs. Callers still evaluate an individual
//! action/resource pair before acting on it.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::authz::actions::known_actions;
use crate::authz::engine::validate_subject;
use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::narrower;
use crate::authz::index::{IndexedGrant, PolicyIndex};
use crate::authz::types::{
    ActionCapability, CapabilityResource, PolicyEffect, ProfileRequest, ResourceHierarchy,
    UserCapabilitiesResponse,
};

struct Candidate<'a> {
    grant: &'a IndexedGrant,
    /// Binding hierarchy clamped to the requested scope.
    reach: ResourceHierarchy,
}

pub fn build_profile(
    index: &PolicyIndex,
    request: &ProfileRequest,
) -> Result<UserCapabilitiesResponse, AuthzError> {
    let subject = validate_subject(request.subject_context.as_ref())?;
    request.scope.validate_scope()?;

    // Grants above the scope reach into it; grants below it are reachable
    // from it. Disjoint grants are irrelevant.
    let candidates: Vec<Candidate<'_>> = subject
        .entitlement_values
        .iter()
        .flat_map(|value| index.grants_for(&subject.entitlement_claim, value))
        .filter_map(|grant| {
            narrower(&grant.hierarchy, &request.scope).map(|reach| Candidate {
                grant,
                reach: reach.clone(),
            })
        })
        .collect();

    let mut capabilities = BTreeMap::new();
    for action in known_actions() {
        let mut allowed: Vec<(&ResourceHierarchy, CapabilityResource)> = Vec::new();
        let mut denied: Vec<(&ResourceHierarchy, CapabilityResource)> = Vec::new();

        for candidate in candidates.iter().filter(|c| c.grant.actions.permits(&action)) {
            let bucket = match candidate.grant.effect {
                PolicyEffect::Allow => &mut allowed,
                PolicyEffect::Deny => &mut denied,
            };
            let path = candidate.reach.to_path();
            if bucket.iter().any(|(_, r)| r.path == path) {
                continue;
            }
            bucket.push((&candidate.reach, capability(candidate.grant, path)));
        }

        allowed.retain(|(reach, _)| !denied.iter().any(|(deny, _)| deny.covers(reach)));
        if allowed.is_empty() && denied.is_empty() {
            continue;
        }
        capabilities.insert(
            action,
            ActionCapability {
                allowed: sorted(allowed),
                denied: sorted(denied),
            },
        );
    }

    tracing::debug!(
        claim = %subject.entitlement_claim,
        scope = %request.scope.to_path(),
        actions = capabilities.len(),
        "built capability profile"
    );
    Ok(UserCapabilitiesResponse {
        user: subject.clone(),
        capabilities,
        generated_at: Utc::now(),
    })
}

fn capability(grant: &IndexedGrant, path: String) -> CapabilityResource {
    let constraints = BTreeMap::from([
        ("level".to_string(), grant.hierarchy.level().as_str().to_string()),
        ("binding".to_string(), grant.binding.to_string()),
        ("role".to_string(), grant.role.to_string()),
    ]);
    CapabilityResource {
        path,
        constraints: Some(constraints),
    }
}

fn sorted(entries: Vec<(&ResourceHierarchy, CapabilityResource)>) -> Vec<CapabilityResource> {
    let mut out: Vec<CapabilityResource> = entries.into_iter().map(|(_, r)| r).collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}
