//! Registry of known actions and the resolved action sets roles grant.

use std::collections::HashSet;

use crate::authz::errors::AuthzError;

/// Matches every action.
pub const WILDCARD_ACTION: &str = "*";

const CRUD: &[&str] = &["read", "create", "update", "delete"];

const KINDS: &[&str] = &[
    "namespace",
    "project",
    "component",
    "componentrelease",
    "releasebinding",
    "workload",
    "environment",
    "deploymentpipeline",
    "componenttype",
    "trait",
    "dataplane",
    "buildplane",
    "observabilityplane",
    "workflow",
    "workflowrun",
    "role",
    "rolemapping",
];

const EXTRA: &[&str] = &["component.deploy", "workflow.run"];

/// Sorted catalogue of every public action, `<kind>.<verb>`.
pub fn known_actions() -> Vec<String> {
    let mut actions: Vec<String> = KINDS
        .iter()
        .flat_map(|kind| CRUD.iter().map(move |verb| format!("{kind}.{verb}")))
        .chain(EXTRA.iter().map(|a| a.to_string()))
        .collect();
    actions.sort();
    actions
}

pub fn is_known_action(action: &str) -> bool {
    match action.split_once('.') {
        Some((kind, verb)) => {
            KINDS.contains(&kind) && (CRUD.contains(&verb) || EXTRA.contains(&action))
        }
        None => false,
    }
}

/// Accepts catalogue actions, `*`, and `<kind>.*` for a known kind.
pub fn validate_role_action(action: &str) -> Result<(), AuthzError> {
    if action == WILDCARD_ACTION || is_known_action(action) {
        return Ok(());
    }
    if let Some(kind) = action.strip_suffix(".*") {
        if KINDS.contains(&kind) {
            return Ok(());
        }
    }
    Err(AuthzError::InvalidRequest(format!(
        "unknown action `{action}` (expected `<kind>.<verb>`, `<kind>.*` or `*`)"
    )))
}

/// A role's actions resolved once at index build time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    all: bool,
    exact: HashSet<String>,
    kinds: HashSet<String>,
}

impl ActionSet {
    pub fn from_actions<S: AsRef<str>>(actions: &[S]) -> Self {
        let mut set = ActionSet::default();
        for action in actions {
            let action = action.as_ref();
            if action == WILDCARD_ACTION {
                set.all = true;
            } else if let Some(kind) = action.strip_suffix(".*") {
                set.kinds.insert(kind.to_string());
            } else {
                set.exact.insert(action.to_string());
            }
        }
        set
    }

    pub fn permits(&self, action: &str) -> bool {
        if self.all || self.exact.contains(action) {
            return true;
        }
        match action.split_once('.') {
            Some((kind, verb)) => !verb.is_empty() && self.kinds.contains(kind),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.exact.is_empty() && self.kinds.is_empty()
    }
}
