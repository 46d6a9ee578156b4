//! Hierarchy matching for the namespace -> project -> component tree.

use crate::authz::errors::AuthzError;
use crate::authz::types::ResourceHierarchy;

/// Path rendering of the empty hierarchy.
pub const WILDCARD_PATH: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HierarchyLevel {
    Cluster,
    Namespace,
    Project,
    Component,
}

impl HierarchyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyLevel::Cluster => "cluster",
            HierarchyLevel::Namespace => "namespace",
            HierarchyLevel::Project => "project",
            HierarchyLevel::Component => "component",
        }
    }
}

/// True iff every non-empty field of `scope` equals the same field of
/// `target`. Empty fields of `scope` are wildcards.
pub fn covers(scope: &ResourceHierarchy, target: &ResourceHierarchy) -> bool {
    field_covers(&scope.namespace, &target.namespace)
        && field_covers(&scope.project, &target.project)
        && field_covers(&scope.component, &target.component)
}

fn field_covers(scope: &str, target: &str) -> bool {
    scope.is_empty() || scope == target
}

impl ResourceHierarchy {
    pub fn covers(&self, target: &ResourceHierarchy) -> bool {
        covers(self, target)
    }

    /// Deepest non-empty level.
    pub fn level(&self) -> HierarchyLevel {
        if !self.component.is_empty() {
            HierarchyLevel::Component
        } else if !self.project.is_empty() {
            HierarchyLevel::Project
        } else if !self.namespace.is_empty() {
            HierarchyLevel::Namespace
        } else {
            HierarchyLevel::Cluster
        }
    }

    /// "namespace/<ns>/project/<p>/component/<c>", or `*` when empty.
    pub fn to_path(&self) -> String {
        let mut segments = Vec::with_capacity(6);
        for (prefix, value) in [
            ("namespace", &self.namespace),
            ("project", &self.project),
            ("component", &self.component),
        ] {
            if !value.is_empty() {
                segments.push(prefix);
                segments.push(value.as_str());
            }
        }
        if segments.is_empty() {
            WILDCARD_PATH.to_string()
        } else {
            segments.join("/")
        }
    }

    pub fn parse_path(path: &str) -> Option<Self> {
        let mut hierarchy = ResourceHierarchy::default();
        if path == WILDCARD_PATH || path.is_empty() {
            return Some(hierarchy);
        }
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() % 2 != 0 {
            return None;
        }
        for pair in segments.chunks(2) {
            let (prefix, value) = (pair[0], pair[1]);
            if value.is_empty() {
                return None;
            }
            let slot = match prefix {
                "namespace" => &mut hierarchy.namespace,
                "project" => &mut hierarchy.project,
                "component" => &mut hierarchy.component,
                _ => return None,
            };
            *slot = value.to_string();
        }
        Some(hierarchy)
    }

    /// Bindings must be rooted: a project needs a namespace, a component
    /// needs a project.
    pub fn validate_scope(&self) -> Result<(), AuthzError> {
        if !self.project.is_empty() && self.namespace.is_empty() {
            return Err(AuthzError::InvalidRequest(
                "hierarchy project requires a namespace".into(),
            ));
        }
        if !self.component.is_empty() && self.project.is_empty() {
            return Err(AuthzError::InvalidRequest(
                "hierarchy component requires a project".into(),
            ));
        }
        Ok(())
    }
}

/// Of two hierarchies where one covers the other, the deeper one. `None`
/// when they are disjoint.
pub fn narrower<'a>(
    a: &'a ResourceHierarchy,
    b: &'a ResourceHierarchy,
) -> Option<&'a ResourceHierarchy> {
    if a.covers(b) {
        Some(b)
    } else if b.covers(a) {
        Some(a)
    } else {
        None
    }
}
