use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use kdl::{KdlDocument, KdlNode};

/// Parse a KDL document string into roles and bindings.
///
/// ```kdl
/// role "viewer" description="Read-only" {
///     actions {
///         - "component.read"
///     }
/// }
/// binding "acme-devs" role="dev" role-namespace="acme" claim="groups" value="devs" effect="allow" {
///     hierarchy namespace="acme" project="shop"
/// }
/// ```
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "role" => policy.roles.push(parse_role(node)?),
            "binding" => policy.mappings.push(parse_binding(node)?),
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

fn parse_role(node: &KdlNode) -> Result<Role, AuthzError> {
    let name = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(
            "role node requires a string argument (e.g. role \"viewer\")".into(),
        )
    })?;

    let mut actions = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => {
                    actions = dash_list(child);
                }
                other => {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "unexpected child `{other}` in role `{name}` (expected `actions`)"
                    )));
                }
            }
        }
    }

    Ok(Role {
        namespace: string_prop(node, "namespace").unwrap_or_default(),
        description: string_prop(node, "description").unwrap_or_default(),
        name,
        actions,
    })
}

fn parse_binding(node: &KdlNode) -> Result<RoleEntitlementMapping, AuthzError> {
    let name = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(
            "binding node requires a string argument (e.g. binding \"eng-viewers\" role=\"viewer\" claim=\"groups\" value=\"eng\")"
                .into(),
        )
    })?;

    let required = |key: &str| {
        string_prop(node, key).ok_or_else(|| {
            AuthzError::InvalidPolicy(format!("binding `{name}` missing `{key}` property"))
        })
    };
    let role = required("role")?;
    let claim = required("claim")?;
    let value = required("value")?;

    let effect = match string_prop(node, "effect") {
        None => PolicyEffect::Allow,
        Some(raw) => PolicyEffect::parse(&raw).ok_or_else(|| {
            AuthzError::InvalidPolicy(format!(
                "binding `{name}` has invalid effect `{raw}` (expected \"allow\" or \"deny\")"
            ))
        })?,
    };

    let system = node
        .get("system")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut hierarchy = ResourceHierarchy::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "hierarchy" => {
                    hierarchy = ResourceHierarchy {
                        namespace: string_prop(child, "namespace").unwrap_or_default(),
                        project: string_prop(child, "project").unwrap_or_default(),
                        component: string_prop(child, "component").unwrap_or_default(),
                    };
                }
                other => {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "unexpected child `{other}` in binding `{name}` (expected `hierarchy`)"
                    )));
                }
            }
        }
    }

    Ok(RoleEntitlementMapping {
        role_ref: RoleRef {
            name: role,
            namespace: string_prop(node, "role-namespace").unwrap_or_default(),
        },
        entitlement: Entitlement { claim, value },
        hierarchy,
        effect,
        system,
        name,
    })
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Children named "-" whose first argument is a string.
fn dash_list(node: &KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
