use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Invalid request: {0}")]
    #[diagnostic(
        code(authzd::authz::invalid_request),
        help("Evaluation requests need a non-empty action, a subject_context and an entitlement_claim")
    )]
    InvalidRequest(String),

    #[error("Authorization is disabled - policy decisions and management are not available")]
    #[diagnostic(
        code(authzd::authz::disabled),
        help("Set authz.enabled = true (or AUTHZD__AUTHZ__ENABLED=true) to serve decisions")
    )]
    AuthzDisabled,

    #[error("Forbidden: {0}")]
    #[diagnostic(code(authzd::authz::forbidden))]
    Forbidden(String),

    #[error("Role not found")]
    #[diagnostic(code(authzd::authz::role_not_found))]
    RoleNotFound,

    #[error("Role already exists")]
    #[diagnostic(code(authzd::authz::role_exists))]
    RoleAlreadyExists,

    #[error("Role is in use and cannot be deleted")]
    #[diagnostic(
        code(authzd::authz::role_in_use),
        help("Remove the role mappings that reference this role first, or delete with force")
    )]
    RoleInUse,

    #[error("Role mapping not found")]
    #[diagnostic(code(authzd::authz::mapping_not_found))]
    RoleMappingNotFound,

    #[error("Role mapping already exists")]
    #[diagnostic(code(authzd::authz::mapping_exists))]
    RoleMappingAlreadyExists,

    #[error("Cannot modify system mapping")]
    #[diagnostic(
        code(authzd::authz::system_mapping_update),
        help("System mappings are seeded by the platform policy files and are read-only through the API")
    )]
    CannotModifySystemMapping,

    #[error("Cannot delete system mapping")]
    #[diagnostic(
        code(authzd::authz::system_mapping_delete),
        help("System mappings are seeded by the platform policy files and are read-only through the API")
    )]
    CannotDeleteSystemMapping,

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(authzd::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(authzd::authz::invalid_policy),
        help("Each policy file must contain valid `role` or `binding` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(authzd::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(authzd::authz::io))]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(authzd::authz::internal))]
    Internal(String),
}

impl AuthzError {
    /// Transport status for each error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthzError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthzError::AuthzDisabled
            | AuthzError::Forbidden(_)
            | AuthzError::CannotModifySystemMapping
            | AuthzError::CannotDeleteSystemMapping => StatusCode::FORBIDDEN,
            AuthzError::RoleNotFound | AuthzError::RoleMappingNotFound => StatusCode::NOT_FOUND,
            AuthzError::RoleAlreadyExists
            | AuthzError::RoleMappingAlreadyExists
            | AuthzError::RoleInUse => StatusCode::CONFLICT,
            AuthzError::PolicyLoadError { .. }
            | AuthzError::InvalidPolicy(_)
            | AuthzError::KdlParse(_)
            | AuthzError::Io(_)
            | AuthzError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code rendered next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::InvalidRequest(_) => "INVALID_REQUEST",
            AuthzError::AuthzDisabled => "AUTHZ_DISABLED",
            AuthzError::Forbidden(_) => "FORBIDDEN",
            AuthzError::RoleNotFound => "ROLE_NOT_FOUND",
            AuthzError::RoleAlreadyExists => "ROLE_ALREADY_EXISTS",
            AuthzError::RoleInUse => "ROLE_IN_USE",
            AuthzError::RoleMappingNotFound => "ROLE_MAPPING_NOT_FOUND",
            AuthzError::RoleMappingAlreadyExists => "ROLE_MAPPING_ALREADY_EXISTS",
            AuthzError::CannotModifySystemMapping => "CANNOT_MODIFY_SYSTEM_MAPPING",
            AuthzError::CannotDeleteSystemMapping => "CANNOT_DELETE_SYSTEM_MAPPING",
            AuthzError::PolicyLoadError { .. }
            | AuthzError::InvalidPolicy(_)
            | AuthzError::KdlParse(_)
            | AuthzError::Io(_)
            | AuthzError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Bodies that are not JSON or do not fit the request type are client
/// errors like any other invalid request.
impl From<JsonRejection> for AuthzError {
    fn from(rejection: JsonRejection) -> Self {
        AuthzError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "authorization request failed");
        }
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}
