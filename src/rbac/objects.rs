//! Builds permission objects from team, environment, app and pipeline ids.

use std::collections::HashMap;

use super::{Action, Enforcer, RbacError, Resource};
use crate::db::{
    dedup_ids, App, DbPool, Environment, NotificationConfigRequest, NsConfig, PipelineDetail,
    PipelineType, Team,
};

/// Lowercase `team/app` objects (checked on `applications`) and
/// `environment/app` objects (checked on `environment`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RbacObjects {
    pub team_objects: Vec<String>,
    pub env_objects: Vec<String>,
}

impl RbacObjects {
    pub fn is_empty(&self) -> bool {
        self.team_objects.is_empty() && self.env_objects.is_empty()
    }

    pub fn push_team(&mut self, object: String) {
        if !self.team_objects.contains(&object) {
            self.team_objects.push(object);
        }
    }

    pub fn push_env(&mut self, object: String) {
        if !self.env_objects.contains(&object) {
            self.env_objects.push(object);
        }
    }

    /// Every object passes `action`. Nothing to check means denied.
    pub fn allowed_all(&self, enforcer: &dyn Enforcer, subject: &str, action: Action) -> bool {
        if self.is_empty() {
            return false;
        }
        self.team_objects
            .iter()
            .all(|o| enforcer.enforce(subject, Resource::Applications, action, o))
            && self
                .env_objects
                .iter()
                .all(|o| enforcer.enforce(subject, Resource::Environment, action, o))
    }

    /// At least one object passes `action`.
    pub fn allowed_any(&self, enforcer: &dyn Enforcer, subject: &str, action: Action) -> bool {
        self.team_objects
            .iter()
            .any(|o| enforcer.enforce(subject, Resource::Applications, action, o))
            || self
                .env_objects
                .iter()
                .any(|o| enforcer.enforce(subject, Resource::Environment, action, o))
    }
}

pub fn object(scope: &str, app: &str) -> String {
    format!("{}/{}", scope, app).to_lowercase()
}

/// `team/*`
pub fn team_wide_object(team_name: &str) -> String {
    object(team_name, "*")
}

/// How a pipeline id is resolved while building objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineLookup {
    /// Requests must name a live pipeline.
    Live,
    /// Stored settings keep the objects of a deleted pipeline; a pipeline
    /// row that is gone entirely contributes nothing.
    Stored,
}

/// Build the permission objects for a selection.
///
/// Every id must resolve to an active record. A positive `pipeline_id`
/// adds the objects of that live pipeline.
pub async fn build_rbac_objects(
    db: &DbPool,
    team_ids: &[i64],
    env_ids: &[i64],
    app_ids: &[i64],
    pipeline_id: Option<i64>,
    pipeline_type: PipelineType,
) -> Result<RbacObjects, RbacError> {
    build_objects(
        db,
        team_ids,
        env_ids,
        app_ids,
        pipeline_id,
        pipeline_type,
        PipelineLookup::Live,
    )
    .await
}

async fn build_objects(
    db: &DbPool,
    team_ids: &[i64],
    env_ids: &[i64],
    app_ids: &[i64],
    pipeline_id: Option<i64>,
    pipeline_type: PipelineType,
    lookup: PipelineLookup,
) -> Result<RbacObjects, RbacError> {
    let teams = resolve_teams(db, &dedup_ids(team_ids)).await?;
    let envs = resolve_environments(db, &dedup_ids(env_ids)).await?;
    let apps = resolve_apps(db, &dedup_ids(app_ids)).await?;

    let mut objects = RbacObjects::default();

    if apps.is_empty() {
        for team in &teams {
            objects.push_team(team_wide_object(&team.name));
        }
    } else if !teams.is_empty() {
        for team in &teams {
            for app in &apps {
                objects.push_team(object(&team.name, &app.app_name));
            }
        }
    } else {
        let owner_ids: Vec<i64> = dedup_ids(&apps.iter().map(|a| a.team_id).collect::<Vec<_>>());
        let owners: HashMap<i64, Team> = resolve_teams(db, &owner_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        for app in &apps {
            let team = owners
                .get(&app.team_id)
                .ok_or(RbacError::TeamNotFound(app.team_id))?;
            objects.push_team(object(&team.name, &app.app_name));
        }
    }

    for env in &envs {
        if apps.is_empty() {
            objects.push_env(object(&env.environment_identifier, "*"));
        } else {
            for app in &apps {
                objects.push_env(object(&env.environment_identifier, &app.app_name));
            }
        }
    }

    if let Some(id) = pipeline_id.filter(|id| *id > 0) {
        let pipeline = match lookup {
            PipelineLookup::Live => Some(
                PipelineDetail::find(db, pipeline_type, id)
                    .await?
                    .ok_or(RbacError::PipelineNotFound { pipeline_type, id })?,
            ),
            PipelineLookup::Stored => {
                PipelineDetail::find_including_deleted(db, pipeline_type, id).await?
            }
        };
        if let Some(pipeline) = pipeline {
            objects.push_team(object(&pipeline.team_name, &pipeline.app_name));
            if pipeline_type == PipelineType::Cd {
                if let Some(env_identifier) = pipeline.environment_identifier.as_deref() {
                    objects.push_env(object(env_identifier, &pipeline.app_name));
                }
            }
        }
    }

    Ok(objects)
}

/// Objects of a stored setting. Its pipeline may have been deleted since.
pub async fn objects_for_config(db: &DbPool, config: &NsConfig) -> Result<RbacObjects, RbacError> {
    build_objects(
        db,
        &config.team_id,
        &config.env_id,
        &config.app_id,
        config.pipeline(),
        config.pipeline_type,
        PipelineLookup::Stored,
    )
    .await
}

pub async fn objects_for_request(
    db: &DbPool,
    item: &NotificationConfigRequest,
) -> Result<RbacObjects, RbacError> {
    build_rbac_objects(
        db,
        &item.team_id,
        &item.env_id,
        &item.app_id,
        item.pipeline_id,
        item.pipeline_type,
    )
    .await
}

async fn resolve_teams(db: &DbPool, ids: &[i64]) -> Result<Vec<Team>, RbacError> {
    let teams = Team::find_by_ids(db, ids).await?;
    if let Some(missing) = ids.iter().find(|id| !teams.iter().any(|t| t.id == **id)) {
        return Err(RbacError::TeamNotFound(*missing));
    }
    Ok(teams)
}

async fn resolve_environments(db: &DbPool, ids: &[i64]) -> Result<Vec<Environment>, RbacError> {
    let envs = Environment::find_by_ids(db, ids).await?;
    if let Some(missing) = ids.iter().find(|id| !envs.iter().any(|e| e.id == **id)) {
        return Err(RbacError::EnvironmentNotFound(*missing));
    }
    Ok(envs)
}

async fn resolve_apps(db: &DbPool, ids: &[i64]) -> Result<Vec<App>, RbacError> {
    let apps = App::find_by_ids(db, ids).await?;
    if let Some(missing) = ids.iter().find(|id| !apps.iter().any(|a| a.id == **id)) {
        return Err(RbacError::AppNotFound(*missing));
    }
    Ok(apps)
}
