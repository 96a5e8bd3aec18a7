//! Role-based access control for notification endpoints.
//!
//! Permissions are `(subject, resource, action, object)` tuples. Objects are
//! lowercase `team/app` or `environment/app` strings where either side may be
//! `*`. [`objects`] turns request identifiers into those strings and
//! [`PolicyEnforcer`] decides them against the stored policy set.

pub mod enforcer;
pub mod matcher;
pub mod objects;

pub use enforcer::{spawn_policy_reload_task, PolicyEnforcer};
pub use objects::{build_rbac_objects, RbacObjects};

use thiserror::Error;

use crate::db::PipelineType;

/// Resource a permission object belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Applications,
    Environment,
    Notification,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applications => "applications",
            Self::Environment => "environment",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object granting access to every entry of a resource
pub const ALL_OBJECTS: &str = "*";

/// Policy decision point.
///
/// `subject` is the session user's email.
pub trait Enforcer: Send + Sync {
    fn enforce(&self, subject: &str, resource: Resource, action: Action, object: &str) -> bool;

    /// True when every object is allowed. An empty list is denied.
    fn enforce_all(&self, subject: &str, resource: Resource, action: Action, objects: &[String]) -> bool {
        !objects.is_empty()
            && objects
                .iter()
                .all(|object| self.enforce(subject, resource, action, object))
    }
}

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("team {0} not found")]
    TeamNotFound(i64),

    #[error("app {0} not found")]
    AppNotFound(i64),

    #[error("environment {0} not found")]
    EnvironmentNotFound(i64),

    #[error("{pipeline_type} pipeline {id} not found")]
    PipelineNotFound { pipeline_type: PipelineType, id: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;

    /// Enforcer allowing exactly the listed `(resource, action, object)` triples
    #[derive(Default)]
    pub struct StaticEnforcer {
        pub allowed: HashSet<(Resource, Action, String)>,
        pub allow_all: bool,
    }

    impl StaticEnforcer {
        pub fn allow_all() -> Self {
            Self {
                allow_all: true,
                ..Default::default()
            }
        }

        pub fn deny_all() -> Self {
            Self::default()
        }

        pub fn allow(mut self, resource: Resource, action: Action, object: &str) -> Self {
            self.allowed.insert((resource, action, object.to_string()));
            self
        }
    }

    impl Enforcer for StaticEnforcer {
        fn enforce(&self, _subject: &str, resource: Resource, action: Action, object: &str) -> bool {
            self.allow_all || self.allowed.contains(&(resource, action, object.to_string()))
        }
    }

    #[test]
    fn enforce_all_denies_empty_object_list() {
        let enforcer = StaticEnforcer::allow_all();
        assert!(!enforcer.enforce_all("a@b.c", Resource::Applications, Action::Get, &[]));
        assert!(enforcer.enforce_all(
            "a@b.c",
            Resource::Applications,
            Action::Get,
            &["payments/*".to_string()]
        ));
    }

    #[test]
    fn enforce_all_requires_every_object() {
        let enforcer =
            StaticEnforcer::deny_all().allow(Resource::Environment, Action::Create, "prod/api");
        let objects = vec!["prod/api".to_string(), "prod/web".to_string()];
        assert!(!enforcer.enforce_all("a@b.c", Resource::Environment, Action::Create, &objects));
        assert!(enforcer.enforce_all(
            "a@b.c",
            Resource::Environment,
            Action::Create,
            &objects[..1]
        ));
    }
}
