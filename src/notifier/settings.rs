//! Notification settings: the stored views and their expanded per-event rows.

use sqlx::{Sqlite, Transaction};

use crate::db::{
    now_rfc3339, App, DbPool, Environment, IdName, NotificationRequest, NotificationSettingsResponse,
    NotificationSettingsView, NotificationUpdateRequest, NsConfig, NsView, PipelineDetail,
    PipelineResponse, PipelineType, ProviderConfigResponse, SearchFilterResponse, SearchRequest,
    Team, UpdateType,
};

use super::{config_name, NotifierError};

#[derive(Clone)]
pub struct NotificationSettingsService {
    db: DbPool,
}

impl NotificationSettingsService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create a view for every entry with `id == 0` and replace the others.
    ///
    /// Returns the view ids in request order.
    pub async fn create_or_update(
        &self,
        request: &NotificationRequest,
        user_id: i64,
    ) -> Result<Vec<i64>, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(request.notification_config_request.len());

        for item in &request.notification_config_request {
            let config = item.to_ns_config(&request.providers);
            let id = if item.id > 0 {
                update_view(&mut tx, item.id, &config, user_id).await?;
                item.id
            } else {
                insert_view(&mut tx, &config, user_id).await?
            };
            write_settings(&mut tx, id, &config).await?;
            ids.push(id);
        }

        tx.commit().await?;
        tracing::info!(views = ?ids, user_id, "Notification settings saved");
        Ok(ids)
    }

    /// Replace the events or the recipients of existing views.
    pub async fn update(
        &self,
        request: &NotificationUpdateRequest,
        user_id: i64,
    ) -> Result<Vec<i64>, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(request.notification_config_request.len());

        for item in &request.notification_config_request {
            let view = sqlx::query_as::<_, NotificationSettingsView>(
                "SELECT * FROM notification_settings_view WHERE id = ?",
            )
            .bind(item.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| NotifierError::not_found("notification setting", item.id))?;

            let mut config = view.ns_config()?;
            match request.update_type {
                UpdateType::Events => config.event_type_ids = item.event_type_ids.clone(),
                UpdateType::Recipients => config.providers = request.providers.clone(),
            }

            update_view(&mut tx, view.id, &config, user_id).await?;
            write_settings(&mut tx, view.id, &config).await?;
            ids.push(view.id);
        }

        tx.commit().await?;
        tracing::info!(views = ?ids, update_type = ?request.update_type, "Notification settings updated");
        Ok(ids)
    }

    pub async fn fetch_views_by_ids(&self, ids: &[i64]) -> Result<Vec<NsView>, NotifierError> {
        let views = NotificationSettingsView::find_by_ids(&self.db, ids).await?;
        decode_views(views)
    }

    /// Delete views and their rows. Returns the number of views removed.
    pub async fn delete(&self, ids: &[i64]) -> Result<u64, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut removed = 0;
        for id in ids {
            sqlx::query("DELETE FROM notification_settings WHERE view_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += sqlx::query("DELETE FROM notification_settings_view WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        tracing::info!(views = ?ids, removed, "Notification settings deleted");
        Ok(removed)
    }

    /// A page of views, newest first, and the total number of views.
    pub async fn find_all(&self, offset: i64, size: i64) -> Result<(Vec<NsView>, i64), NotifierError> {
        let views = NotificationSettingsView::find_page(&self.db, offset, size).await?;
        let total = NotificationSettingsView::count(&self.db).await?;
        Ok((decode_views(views)?, total))
    }

    /// Resolve names for the given views.
    ///
    /// Views whose pipeline no longer exists are left out; their number is
    /// returned alongside the responses.
    pub async fn build_response(
        &self,
        views: &[NsView],
    ) -> Result<(Vec<NotificationSettingsResponse>, i64), NotifierError> {
        let mut responses = Vec::with_capacity(views.len());
        let mut deleted = 0;

        for view in views {
            let config = &view.config;
            let pipeline_response = match config.pipeline() {
                Some(id) => match PipelineDetail::find(&self.db, config.pipeline_type, id).await? {
                    Some(pipeline) => Some(pipeline_response(pipeline)),
                    None => {
                        deleted += 1;
                        continue;
                    }
                },
                None => None,
            };

            let mut provider_configs = Vec::with_capacity(config.providers.len());
            for provider in &config.providers {
                if provider.config_id > 0 {
                    if let Some(name) = config_name(&self.db, provider.dest, provider.config_id).await? {
                        provider_configs.push(ProviderConfigResponse {
                            id: provider.config_id,
                            dest: provider.dest,
                            name,
                            recipient: provider.recipient.clone(),
                        });
                    }
                } else {
                    provider_configs.push(ProviderConfigResponse {
                        id: 0,
                        dest: provider.dest,
                        name: provider.recipient.clone(),
                        recipient: provider.recipient.clone(),
                    });
                }
            }

            responses.push(NotificationSettingsResponse {
                id: view.id,
                team_response: id_names(Team::find_by_ids(&self.db, &config.team_id).await?.iter()),
                app_response: id_names(App::find_by_ids(&self.db, &config.app_id).await?.iter()),
                env_response: id_names(
                    Environment::find_by_ids(&self.db, &config.env_id).await?.iter(),
                ),
                pipeline_response,
                pipeline_type: config.pipeline_type,
                provider_configs,
                event_types: config.event_type_ids.clone(),
            });
        }

        Ok((responses, deleted))
    }

    /// Selectable scopes for a new setting.
    ///
    /// Yields one team-wide, one environment-wide and one app-wide option for
    /// the ids given, then one option per CI and CD pipeline whose name
    /// contains `pipeline_name`.
    pub async fn find_options(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<SearchFilterResponse>, NotifierError> {
        let mut options = Vec::new();

        let teams = Team::find_by_ids(&self.db, &request.team_id).await?;
        if !teams.is_empty() {
            options.push(SearchFilterResponse {
                team_response: id_names(teams.iter()),
                ..Default::default()
            });
        }

        let envs = Environment::find_by_ids(&self.db, &request.env_id).await?;
        if !envs.is_empty() {
            options.push(SearchFilterResponse {
                env_response: id_names(envs.iter()),
                ..Default::default()
            });
        }

        let apps = App::find_by_ids(&self.db, &request.app_id).await?;
        if !apps.is_empty() {
            options.push(SearchFilterResponse {
                app_response: id_names(apps.iter()),
                ..Default::default()
            });
        }

        let name = request.pipeline_name.trim();
        if !name.is_empty() {
            for pipeline_type in [PipelineType::Ci, PipelineType::Cd] {
                let pipelines = PipelineDetail::search(
                    &self.db,
                    pipeline_type,
                    name,
                    &request.team_id,
                    &request.app_id,
                )
                .await?;
                options.extend(pipelines.into_iter().map(|p| pipeline_option(pipeline_type, p)));
            }
        }

        Ok(options)
    }
}

fn decode_views(views: Vec<NotificationSettingsView>) -> Result<Vec<NsView>, NotifierError> {
    views
        .into_iter()
        .map(|view| {
            Ok(NsView {
                id: view.id,
                config: view.ns_config()?,
            })
        })
        .collect()
}

fn id_names<'a, T: 'a>(items: impl Iterator<Item = &'a T>) -> Vec<IdName>
where
    IdName: From<&'a T>,
{
    items.map(IdName::from).collect()
}

fn pipeline_response(pipeline: PipelineDetail) -> PipelineResponse {
    PipelineResponse {
        id: pipeline.id,
        name: pipeline.name,
        environment_name: pipeline.environment_name,
        app_name: pipeline.app_name,
    }
}

fn pipeline_option(pipeline_type: PipelineType, pipeline: PipelineDetail) -> SearchFilterResponse {
    let env_response = match (pipeline.environment_id, &pipeline.environment_name) {
        (Some(id), Some(name)) => vec![IdName { id, name: name.clone() }],
        _ => Vec::new(),
    };
    SearchFilterResponse {
        team_response: vec![IdName {
            id: pipeline.team_id,
            name: pipeline.team_name.clone(),
        }],
        app_response: vec![IdName {
            id: pipeline.app_id,
            name: pipeline.app_name.clone(),
        }],
        env_response,
        pipeline_response: Some(pipeline_response(pipeline)),
        pipeline_type: Some(pipeline_type),
    }
}

async fn insert_view(
    tx: &mut Transaction<'_, Sqlite>,
    config: &NsConfig,
    user_id: i64,
) -> Result<i64, NotifierError> {
    let now = now_rfc3339();
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO notification_settings_view (config, created_by, updated_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(serde_json::to_string(config)?)
    .bind(user_id)
    .bind(user_id)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn update_view(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    config: &NsConfig,
    user_id: i64,
) -> Result<(), NotifierError> {
    let result = sqlx::query(
        "UPDATE notification_settings_view SET config = ?, updated_by = ?, updated_at = ? WHERE id = ?",
    )
    .bind(serde_json::to_string(config)?)
    .bind(user_id)
    .bind(now_rfc3339())
    .bind(id)
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(NotifierError::not_found("notification setting", id));
    }
    Ok(())
}

/// One row per team × app × env × event; an empty dimension contributes a single null.
fn expand_rows(config: &NsConfig) -> Vec<(Option<i64>, Option<i64>, Option<i64>, i64)> {
    fn dimension(ids: &[i64]) -> Vec<Option<i64>> {
        if ids.is_empty() {
            vec![None]
        } else {
            ids.iter().copied().map(Some).collect()
        }
    }

    let teams = dimension(&config.team_id);
    let apps = dimension(&config.app_id);
    let envs = dimension(&config.env_id);
    let mut rows = Vec::new();
    for team in &teams {
        for app in &apps {
            for env in &envs {
                for event in &config.event_type_ids {
                    rows.push((*team, *app, *env, *event));
                }
            }
        }
    }
    rows
}

async fn write_settings(
    tx: &mut Transaction<'_, Sqlite>,
    view_id: i64,
    config: &NsConfig,
) -> Result<(), NotifierError> {
    sqlx::query("DELETE FROM notification_settings WHERE view_id = ?")
        .bind(view_id)
        .execute(&mut **tx)
        .await?;

    let providers = serde_json::to_string(&config.providers)?;
    let pipeline_type = config.pipeline_type.to_string();
    for (team_id, app_id, env_id, event_type_id) in expand_rows(config) {
        sqlx::query(
            r#"
            INSERT INTO notification_settings (team_id, app_id, env_id, pipeline_id, pipeline_type,
                event_type_id, config, view_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(team_id)
        .bind(app_id)
        .bind(env_id)
        .bind(config.pipeline())
        .bind(&pipeline_type)
        .bind(event_type_id)
        .bind(&providers)
        .bind(view_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
