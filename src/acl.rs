//! Access control: may a role perform an action on a resource?

use std::collections::HashMap;

/// Role that passes every permission check regardless of grants.
pub const ROOT_ROLE: &str = "root";

/// Role used when the caller has none.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Access control evaluator.
pub trait Acl: Send + Sync {
    fn can(&self, role: &str, resource: &str, action: &str) -> bool;
}

/// One `resource:action` grant; either side may be `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Grant {
    resource: String,
    action: String,
}

impl Grant {
    /// `orders:list`, `orders:*`, `*:list`, `orders` (all actions) or `*`.
    fn parse(pattern: &str) -> Self {
        match pattern.split_once(':') {
            Some((resource, action)) => Self {
                resource: resource.trim().to_string(),
                action: action.trim().to_string(),
            },
            None => Self {
                resource: pattern.trim().to_string(),
                action: "*".to_string(),
            },
        }
    }

    fn allows(&self, resource: &str, action: &str) -> bool {
        (self.resource == "*" || self.resource == resource)
            && (self.action == "*" || self.action == action)
    }
}

/// ACL backed by a fixed role → grants table.
#[derive(Debug, Clone, Default)]
pub struct StaticAcl {
    roles: HashMap<String, Vec<Grant>>,
}

impl StaticAcl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration: role → list of grant patterns.
    pub fn from_roles(roles: &HashMap<String, Vec<String>>) -> Self {
        let mut acl = Self::new();
        for (role, patterns) in roles {
            for pattern in patterns {
                acl = acl.grant(role, pattern);
            }
        }
        acl
    }

    pub fn grant(mut self, role: &str, pattern: &str) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .push(Grant::parse(pattern));
        self
    }
}

impl Acl for StaticAcl {
    fn can(&self, role: &str, resource: &str, action: &str) -> bool {
        self.roles
            .get(role)
            .map(|grants| grants.iter().any(|g| g.allows(resource, action)))
            .unwrap_or(false)
    }
}
