//! Policy enforcer backed by the `rbac_policies` and `rbac_role_bindings` tables.
//!
//! The loaded policy set is an immutable snapshot behind an [`ArcSwap`], so
//! request handlers never wait on a reload. Decisions are memoized per
//! snapshot and the cache is dropped whenever a new snapshot is stored.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use super::matcher::{field_match, wildcard_match};
use super::{Action, Enforcer, Resource};
use crate::db::{DbPool, PolicyRule, RoleBinding, User};

#[derive(Debug, Clone)]
struct Rule {
    resource: String,
    action: String,
    object: String,
}

#[derive(Debug, Default)]
struct PolicySnapshot {
    /// Rules per subject, already flattened through role bindings
    rules: HashMap<String, Vec<Rule>>,
    superadmins: HashSet<String>,
}

impl PolicySnapshot {
    fn build(rules: Vec<PolicyRule>, bindings: Vec<RoleBinding>, superadmins: Vec<String>) -> Self {
        let mut direct: HashMap<String, Vec<Rule>> = HashMap::new();
        for rule in rules {
            direct
                .entry(rule.subject.to_lowercase())
                .or_default()
                .push(Rule {
                    resource: rule.resource.to_lowercase(),
                    action: rule.action.to_lowercase(),
                    object: rule.object.to_lowercase(),
                });
        }

        let mut roles: HashMap<String, Vec<String>> = HashMap::new();
        for binding in bindings {
            roles
                .entry(binding.subject.to_lowercase())
                .or_default()
                .push(binding.role.to_lowercase());
        }

        let subjects: HashSet<String> = direct.keys().chain(roles.keys()).cloned().collect();
        let mut flattened = HashMap::with_capacity(subjects.len());
        for subject in subjects {
            let mut collected = Vec::new();
            let mut visited = HashSet::new();
            let mut queue = VecDeque::from([subject.clone()]);
            while let Some(current) = queue.pop_front() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                if let Some(rules) = direct.get(&current) {
                    collected.extend(rules.iter().cloned());
                }
                if let Some(parents) = roles.get(&current) {
                    queue.extend(parents.iter().cloned());
                }
            }
            flattened.insert(subject, collected);
        }

        Self {
            rules: flattened,
            superadmins: superadmins.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    fn allows(&self, subject: &str, resource: Resource, action: Action, object: &str) -> bool {
        if self.superadmins.contains(subject) {
            return true;
        }
        self.rules.get(subject).is_some_and(|rules| {
            rules.iter().any(|rule| {
                field_match(&rule.resource, resource.as_str())
                    && field_match(&rule.action, action.as_str())
                    && wildcard_match(&rule.object, object)
            })
        })
    }
}

type DecisionKey = (String, Resource, Action, String);

pub struct PolicyEnforcer {
    db: DbPool,
    snapshot: ArcSwap<PolicySnapshot>,
    cache: DashMap<DecisionKey, bool>,
}

impl PolicyEnforcer {
    /// Load the current policy set from the database.
    pub async fn load(db: DbPool) -> Result<Self, sqlx::Error> {
        let snapshot = Self::fetch_snapshot(&db).await?;
        Ok(Self {
            db,
            snapshot: ArcSwap::from_pointee(snapshot),
            cache: DashMap::new(),
        })
    }

    async fn fetch_snapshot(db: &DbPool) -> Result<PolicySnapshot, sqlx::Error> {
        let rules = PolicyRule::list_all(db).await?;
        let bindings = RoleBinding::list_all(db).await?;
        let superadmins = User::list_superadmin_emails(db).await?;
        Ok(PolicySnapshot::build(rules, bindings, superadmins))
    }

    /// Replace the snapshot with the database state and clear cached decisions.
    pub async fn reload(&self) -> Result<(), sqlx::Error> {
        let snapshot = Self::fetch_snapshot(&self.db).await?;
        let subjects = snapshot.rules.len();
        self.snapshot.store(Arc::new(snapshot));
        self.cache.clear();
        tracing::debug!(subjects, "Policy snapshot reloaded");
        Ok(())
    }

    /// Number of memoized decisions
    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }
}

impl Enforcer for PolicyEnforcer {
    fn enforce(&self, subject: &str, resource: Resource, action: Action, object: &str) -> bool {
        let key = (
            subject.to_lowercase(),
            resource,
            action,
            object.to_lowercase(),
        );
        if let Some(decision) = self.cache.get(&key) {
            return *decision;
        }
        let decision = self.snapshot.load().allows(&key.0, resource, action, &key.3);
        if !decision {
            tracing::debug!(
                subject = %key.0,
                resource = %resource,
                action = %action,
                object = %key.3,
                "Permission denied"
            );
        }
        self.cache.insert(key, decision);
        decision
    }
}

/// Spawn the background task that periodically reloads the policy set.
///
/// Returns `None` when `interval_secs` is zero.
pub fn spawn_policy_reload_task(
    enforcer: Arc<PolicyEnforcer>,
    interval_secs: u64,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        tracing::info!("Periodic policy reload disabled");
        return None;
    }

    tracing::info!(interval_secs, "Starting policy reload background task");

    Some(tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately and the snapshot is already fresh
        tick.tick().await;

        loop {
            tick.tick().await;
            if let Err(e) = enforcer.reload().await {
                tracing::warn!(error = %e, "Failed to reload policies");
            }
        }
    }))
}
