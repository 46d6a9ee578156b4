use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::policy::parse_kdl_document;
use crate::authz::store::{validate_mapping, validate_role};
use crate::authz::types::*;

/// Load all `.kdl` policy files from the given directory and merge them
/// into a single `PolicySet`. Files are read in path order.
pub fn load_policies(dir: &Path) -> Result<PolicySet, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents).map_err(|e| match e {
            AuthzError::KdlParse(msg) => AuthzError::KdlParse(format!("{}: {msg}", path.display())),
            AuthzError::InvalidPolicy(msg) => {
                AuthzError::InvalidPolicy(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        all_parsed.push(parsed);
        file_count += 1;
    }

    let set = compile_policies(all_parsed)?;

    tracing::info!(
        files = file_count,
        roles = set.roles.len(),
        mappings = set.mappings.len(),
        system = set.mappings.values().filter(|m| m.system).count(),
        "Loaded authorization policies"
    );

    Ok(set)
}

/// Merge parsed policies. Roles and bindings must be unique per
/// (name, namespace) across every file.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<PolicySet, AuthzError> {
    let mut set = PolicySet::new();

    for p in parsed {
        for role in p.roles {
            validate_role(&role)
                .map_err(|e| invalid_policy(format!("role `{}`", role.role_ref()), e))?;
            let key = role.role_ref();
            if set.roles.insert(key.clone(), role).is_some() {
                return Err(AuthzError::InvalidPolicy(format!(
                    "role `{key}` is defined more than once"
                )));
            }
        }
        for mapping in p.mappings {
            validate_mapping(&mapping)
                .map_err(|e| invalid_policy(format!("binding `{}`", mapping.mapping_ref()), e))?;
            let key = mapping.mapping_ref();
            if set.mappings.insert(key.clone(), mapping).is_some() {
                return Err(AuthzError::InvalidPolicy(format!(
                    "binding `{key}` is defined more than once"
                )));
            }
        }
    }

    // Dangling role references are tolerated; they grant nothing.
    for mapping in set.mappings.values() {
        if !set.roles.contains_key(&mapping.role_ref) {
            tracing::warn!(
                binding = %mapping.mapping_ref(),
                role = %mapping.role_ref,
                "binding references an undefined role"
            );
        }
    }

    Ok(set)
}

/// Rewrap a validation failure as a policy error naming its entry.
fn invalid_policy(subject: String, err: AuthzError) -> AuthzError {
    match err {
        AuthzError::InvalidRequest(msg) => AuthzError::InvalidPolicy(format!("{subject}: {msg}")),
        other => other,
    }
}
