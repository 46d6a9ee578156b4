use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::authz::batch;
use crate::authz::errors::AuthzError;
use crate::authz::service::Authorizer;
use crate::authz::types::{
    BatchEvaluateResponse, Decision, EvaluateRequest, MappingRef, ProfileRequest,
    RawBatchEvaluateRequest, Role, RoleEntitlementMapping, RoleMappingFilter, RoleRef,
    SubjectContext, UserCapabilitiesResponse,
};

pub const CLAIM_HEADER: &str = "x-entitlement-claim";
pub const VALUES_HEADER: &str = "x-entitlement-values";

type AppState = Arc<Authorizer>;

pub fn router(authorizer: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/actions", get(list_actions))
        .route("/v1/evaluate", post(evaluate))
        .route("/v1/batch-evaluate", post(batch_evaluate))
        .route("/v1/profile", post(profile))
        .route(
            "/v1/clusterroles",
            get(list_cluster_roles).post(create_cluster_role),
        )
        .route(
            "/v1/clusterroles/{name}",
            get(get_cluster_role)
                .put(update_cluster_role)
                .delete(delete_cluster_role),
        )
        .route(
            "/v1/namespaces/{ns}/roles",
            get(list_namespace_roles).post(create_namespace_role),
        )
        .route(
            "/v1/namespaces/{ns}/roles/{name}",
            get(get_namespace_role)
                .put(update_namespace_role)
                .delete(delete_namespace_role),
        )
        .route(
            "/v1/clusterrolebindings",
            get(list_cluster_bindings).post(create_cluster_binding),
        )
        .route(
            "/v1/clusterrolebindings/{name}",
            get(get_cluster_binding)
                .put(update_cluster_binding)
                .delete(delete_cluster_binding),
        )
        .route(
            "/v1/namespaces/{ns}/rolebindings",
            get(list_namespace_bindings).post(create_namespace_binding),
        )
        .route(
            "/v1/namespaces/{ns}/rolebindings/{name}",
            get(get_namespace_binding)
                .put(update_namespace_binding)
                .delete(delete_namespace_binding),
        )
        .with_state(authorizer)
}

/// The management caller, as asserted by the gateway in front of us.
/// Missing headers produce a caller without a claim, which every
/// management check rejects.
pub struct Caller(pub SubjectContext);

impl Caller {
    fn from_headers(headers: &HeaderMap) -> Self {
        let values = header_str(headers, VALUES_HEADER)
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();
        Caller(SubjectContext {
            subject_type: "user".into(),
            entitlement_claim: header_str(headers, CLAIM_HEADER).to_string(),
            entitlement_values: values,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller::from_headers(&parts.headers))
    }
}

/// JSON request body whose rejections render through [`AuthzError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AuthzError))]
pub struct JsonBody<T>(pub T);

#[derive(Debug, Default, Deserialize)]
struct DeleteParams {
    #[serde(default)]
    force: bool,
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn list_actions(
    State(authz): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<String>>, AuthzError> {
    authz.list_actions(&caller).map(Json)
}

async fn evaluate(
    State(authz): State<AppState>,
    JsonBody(req): JsonBody<EvaluateRequest>,
) -> Result<Json<Decision>, AuthzError> {
    authz.evaluate(&req).map(Json)
}

async fn batch_evaluate(
    State(authz): State<AppState>,
    JsonBody(raw): JsonBody<RawBatchEvaluateRequest>,
) -> Result<Json<BatchEvaluateResponse>, AuthzError> {
    let members = raw.decode();
    if !batch::runs_parallel(members.len(), authz.parallel_batch_threshold()) {
        return authz.batch_evaluate_decoded(&members).map(Json);
    }
    // The rayon fan-out blocks until every member is decided.
    tokio::task::spawn_blocking(move || authz.batch_evaluate_decoded(&members))
        .await
        .map_err(|e| AuthzError::Internal(format!("batch evaluation task failed: {e}")))?
        .map(Json)
}

async fn profile(
    State(authz): State<AppState>,
    JsonBody(req): JsonBody<ProfileRequest>,
) -> Result<Json<UserCapabilitiesResponse>, AuthzError> {
    authz.subject_profile(&req).map(Json)
}

// ---------- roles ----------

async fn list_cluster_roles(
    State(authz): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<Role>>, AuthzError> {
    authz.list_cluster_roles(&caller).map(Json)
}

async fn create_cluster_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    JsonBody(role): JsonBody<Role>,
) -> Result<Response, AuthzError> {
    create_role(
        &authz,
        &caller,
        Role {
            namespace: String::new(),
            ..role
        },
    )
}

async fn get_cluster_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<Json<Role>, AuthzError> {
    authz.get_role(&caller, &RoleRef::cluster(name)).map(Json)
}

async fn update_cluster_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    JsonBody(role): JsonBody<Role>,
) -> Result<Json<Role>, AuthzError> {
    update_role(
        &authz,
        &caller,
        Role {
            name,
            namespace: String::new(),
            ..role
        },
    )
}

async fn delete_cluster_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Response, AuthzError> {
    delete_role(&authz, &caller, &RoleRef::cluster(name), params.force)
}

async fn list_namespace_roles(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(ns): Path<String>,
) -> Result<Json<Vec<Role>>, AuthzError> {
    authz.list_namespace_roles(&caller, &ns).map(Json)
}

async fn create_namespace_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(ns): Path<String>,
    JsonBody(role): JsonBody<Role>,
) -> Result<Response, AuthzError> {
    create_role(
        &authz,
        &caller,
        Role {
            namespace: ns,
            ..role
        },
    )
}

async fn get_namespace_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Json<Role>, AuthzError> {
    authz.get_role(&caller, &RoleRef::namespaced(ns, name)).map(Json)
}

async fn update_namespace_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path((ns, name)): Path<(String, String)>,
    JsonBody(role): JsonBody<Role>,
) -> Result<Json<Role>, AuthzError> {
    update_role(
        &authz,
        &caller,
        Role {
            name,
            namespace: ns,
            ..role
        },
    )
}

async fn delete_namespace_role(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path((ns, name)): Path<(String, String)>,
    Query(params): Query<DeleteParams>,
) -> Result<Response, AuthzError> {
    delete_role(&authz, &caller, &RoleRef::namespaced(ns, name), params.force)
}

fn create_role(
    authz: &Authorizer,
    caller: &SubjectContext,
    role: Role,
) -> Result<Response, AuthzError> {
    authz.add_role(caller, role.clone())?;
    Ok((StatusCode::CREATED, Json(role)).into_response())
}

fn update_role(
    authz: &Authorizer,
    caller: &SubjectContext,
    role: Role,
) -> Result<Json<Role>, AuthzError> {
    authz.update_role(caller, role.clone())?;
    Ok(Json(role))
}

fn delete_role(
    authz: &Authorizer,
    caller: &SubjectContext,
    role: &RoleRef,
    force: bool,
) -> Result<Response, AuthzError> {
    if force {
        let removed = authz.force_remove_role(caller, role)?;
        Ok(Json(json!({ "deleted_mappings": removed })).into_response())
    } else {
        authz.remove_role(caller, role)?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

// ---------- role entitlement mappings ----------

async fn list_cluster_bindings(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Query(filter): Query<RoleMappingFilter>,
) -> Result<Json<Vec<RoleEntitlementMapping>>, AuthzError> {
    authz.list_cluster_role_mappings(&caller, &filter).map(Json)
}

async fn create_cluster_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    JsonBody(mapping): JsonBody<RoleEntitlementMapping>,
) -> Result<Response, AuthzError> {
    create_binding(&authz, &caller, in_namespace(mapping, String::new()))
}

async fn get_cluster_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<Json<RoleEntitlementMapping>, AuthzError> {
    authz.get_role_mapping(&caller, &MappingRef::cluster(name)).map(Json)
}

async fn update_cluster_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    JsonBody(mapping): JsonBody<RoleEntitlementMapping>,
) -> Result<Json<RoleEntitlementMapping>, AuthzError> {
    let mapping = in_namespace(RoleEntitlementMapping { name, ..mapping }, String::new());
    update_binding(&authz, &caller, mapping)
}

async fn delete_cluster_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<StatusCode, AuthzError> {
    authz.remove_role_mapping(&caller, &MappingRef::cluster(name))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_namespace_bindings(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(ns): Path<String>,
    Query(filter): Query<RoleMappingFilter>,
) -> Result<Json<Vec<RoleEntitlementMapping>>, AuthzError> {
    authz.list_namespaced_role_mappings(&caller, &ns, &filter).map(Json)
}

async fn create_namespace_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path(ns): Path<String>,
    JsonBody(mapping): JsonBody<RoleEntitlementMapping>,
) -> Result<Response, AuthzError> {
    create_binding(&authz, &caller, in_namespace(mapping, ns))
}

async fn get_namespace_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Json<RoleEntitlementMapping>, AuthzError> {
    authz
        .get_role_mapping(&caller, &MappingRef::namespaced(ns, name))
        .map(Json)
}

async fn update_namespace_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path((ns, name)): Path<(String, String)>,
    JsonBody(mapping): JsonBody<RoleEntitlementMapping>,
) -> Result<Json<RoleEntitlementMapping>, AuthzError> {
    let mapping = in_namespace(RoleEntitlementMapping { name, ..mapping }, ns);
    update_binding(&authz, &caller, mapping)
}

async fn delete_namespace_binding(
    State(authz): State<AppState>,
    Caller(caller): Caller,
    Path((ns, name)): Path<(String, String)>,
) -> Result<StatusCode, AuthzError> {
    authz.remove_role_mapping(&caller, &MappingRef::namespaced(ns, name))?;
    Ok(StatusCode::NO_CONTENT)
}

/// The URL decides which scope a binding lives in, not the body.
fn in_namespace(
    mut mapping: RoleEntitlementMapping,
    namespace: String,
) -> RoleEntitlementMapping {
    mapping.hierarchy.namespace = namespace;
    mapping
}

fn create_binding(
    authz: &Authorizer,
    caller: &SubjectContext,
    mapping: RoleEntitlementMapping,
) -> Result<Response, AuthzError> {
    authz.add_role_mapping(caller, mapping.clone())?;
    Ok((StatusCode::CREATED, Json(mapping)).into_response())
}

fn update_binding(
    authz: &Authorizer,
    caller: &SubjectContext,
    mapping: RoleEntitlementMapping,
) -> Result<Json<RoleEntitlementMapping>, AuthzError> {
    authz.update_role_mapping(caller, mapping.clone())?;
    Ok(Json(mapping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CLAIM_HEADER, HeaderValue::from_static("groups"));
        headers.insert(VALUES_HEADER, HeaderValue::from_static(" admins, ,eng "));
        let Caller(subject) = Caller::from_headers(&headers);
        assert_eq!(subject.entitlement_claim, "groups");
        assert_eq!(subject.entitlement_values, vec!["admins", "eng"]);
    }

    #[test]
    fn test_caller_without_headers_has_no_claim() {
        let Caller(subject) = Caller::from_headers(&HeaderMap::new());
        assert!(subject.entitlement_claim.is_empty());
        assert!(subject.entitlement_values.is_empty());
    }

    #[test]
    fn test_binding_namespace_follows_url() {
        let mapping = RoleEntitlementMapping {
            name: "b".into(),
            ..Default::default()
        };
        let placed = in_namespace(mapping, "acme".into());
        assert_eq!(placed.mapping_ref(), MappingRef::namespaced("acme", "b"));
    }
}
