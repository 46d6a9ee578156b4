use rayon::prelude::*;

use crate::authz::engine;
use crate::authz::errors::AuthzError;
use crate::authz::index::PolicyIndex;
use crate::authz::types::{
    BatchEvaluateRequest, BatchEvaluateResponse, BatchMember, Decision, EvaluateRequest,
};

/// Whether a batch of `len` requests is spread over the rayon pool.
/// A threshold of zero keeps every batch sequential.
pub fn runs_parallel(len: usize, parallel_threshold: usize) -> bool {
    parallel_threshold > 0 && len >= parallel_threshold
}

/// Evaluate every request against the one `index` the caller captured.
///
/// Decisions come back in input order. A request that fails validation
/// yields a deny for its slot; any other failure fails the whole batch.
/// Batches of at least `parallel_threshold` requests are spread over the
/// rayon pool.
pub fn batch_evaluate(
    index: &PolicyIndex,
    batch: &BatchEvaluateRequest,
    parallel_threshold: usize,
) -> Result<BatchEvaluateResponse, AuthzError> {
    let members: Vec<Result<&EvaluateRequest, &str>> = batch.requests.iter().map(Ok).collect();
    evaluate_members(index, &members, parallel_threshold)
}

/// Same as [`batch_evaluate`] for members decoded one by one off the wire.
/// A member that failed to decode is denied like any other invalid request.
pub fn batch_evaluate_decoded(
    index: &PolicyIndex,
    members: &[BatchMember],
    parallel_threshold: usize,
) -> Result<BatchEvaluateResponse, AuthzError> {
    let members: Vec<Result<&EvaluateRequest, &str>> = members
        .iter()
        .map(|m| m.as_ref().map_err(String::as_str))
        .collect();
    evaluate_members(index, &members, parallel_threshold)
}

fn evaluate_members(
    index: &PolicyIndex,
    members: &[Result<&EvaluateRequest, &str>],
    parallel_threshold: usize,
) -> Result<BatchEvaluateResponse, AuthzError> {
    if members.is_empty() {
        return Err(AuthzError::InvalidRequest(
            "batch must contain at least one request".into(),
        ));
    }

    let parallel = runs_parallel(members.len(), parallel_threshold);
    let decisions = if parallel {
        members
            .par_iter()
            .map(|member| decide(index, member))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        members
            .iter()
            .map(|member| decide(index, member))
            .collect::<Result<Vec<_>, _>>()?
    };

    tracing::debug!(
        requests = members.len(),
        parallel,
        allowed = decisions.iter().filter(|d| d.decision).count(),
        "batch evaluate"
    );
    Ok(BatchEvaluateResponse { decisions })
}

fn decide(
    index: &PolicyIndex,
    member: &Result<&EvaluateRequest, &str>,
) -> Result<Decision, AuthzError> {
    let result = match member {
        Ok(request) => engine::evaluate(index, request),
        Err(msg) => Err(AuthzError::InvalidRequest((*msg).to_string())),
    };
    match result {
        Err(AuthzError::InvalidRequest(msg)) => {
            Ok(Decision::deny(format!("invalid request: {msg}")))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::*;

    fn index() -> PolicyIndex {
        let mut set = PolicySet::new();
        let role = Role {
            name: "viewer".into(),
            actions: vec!["component.read".into()],
            ..Default::default()
        };
        set.roles.insert(role.role_ref(), role);
        let m = RoleEntitlementMapping {
            name: "b1".into(),
            role_ref: RoleRef::cluster("viewer"),
            entitlement: Entitlement {
                claim: "groups".into(),
                value: "eng".into(),
            },
            hierarchy: ResourceHierarchy::namespace("ns1"),
            effect: PolicyEffect::Allow,
            system: false,
        };
        set.mappings.insert(m.mapping_ref(), m);
        PolicyIndex::build(&set)
    }

    fn req(action: &str, ns: &str) -> EvaluateRequest {
        EvaluateRequest {
            subject_context: Some(SubjectContext::new("groups", &["eng"])),
            resource: Resource {
                resource_type: "component".into(),
                id: String::new(),
                hierarchy: ResourceHierarchy::namespace(ns),
            },
            action: action.into(),
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        let result = batch_evaluate(&index(), &BatchEvaluateRequest::default(), 16);
        assert!(matches!(result, Err(AuthzError::InvalidRequest(_))));
    }

    #[test]
    fn test_invalid_member_becomes_deny() {
        let batch = BatchEvaluateRequest {
            requests: vec![
                req("component.read", "ns1"),
                req("", "ns1"),
                req("component.read", "ns2"),
            ],
        };
        let out = batch_evaluate(&index(), &batch, 16).unwrap();
        let verdicts: Vec<bool> = out.decisions.iter().map(|d| d.decision).collect();
        assert_eq!(verdicts, vec![true, false, false]);
        assert!(out.decisions[1].reason().starts_with("invalid request:"));
        assert_eq!(out.decisions[2].reason(), engine::NO_MATCHING_POLICY);
    }

    #[test]
    fn test_undecodable_member_becomes_deny() {
        let members: Vec<BatchMember> = vec![
            Ok(req("component.read", "ns1")),
            Err("missing field `action`".into()),
        ];
        let out = batch_evaluate_decoded(&index(), &members, 16).unwrap();
        assert!(out.decisions[0].decision);
        assert!(!out.decisions[1].decision);
        assert_eq!(
            out.decisions[1].reason(),
            "invalid request: missing field `action`"
        );
    }

    #[test]
    fn test_runs_parallel_threshold() {
        assert!(!runs_parallel(100, 0));
        assert!(!runs_parallel(15, 16));
        assert!(runs_parallel(16, 16));
    }

    #[test]
    fn test_parallel_preserves_order() {
        let requests: Vec<EvaluateRequest> = (0..200)
            .map(|i| req("component.read", if i % 3 == 0 { "ns1" } else { "ns2" }))
            .collect();
        let batch = BatchEvaluateRequest { requests };
        let parallel = batch_evaluate(&index(), &batch, 1).unwrap();
        let sequential = batch_evaluate(&index(), &batch, 0).unwrap();
        assert_eq!(parallel.decisions, sequential.decisions);
        for (i, d) in parallel.decisions.iter().enumerate() {
            assert_eq!(d.decision, i % 3 == 0, "slot {i}");
        }
    }
}
