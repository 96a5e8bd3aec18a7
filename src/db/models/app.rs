//! Applications and the CI/CD pipelines that belong to them.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::push_id_list;
use super::notification::PipelineType;
use super::team::IdName;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct App {
    pub id: i64,
    pub app_name: String,
    pub team_id: i64,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl App {
    pub async fn find_by_ids(db: &SqlitePool, ids: &[i64]) -> Result<Vec<App>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM apps WHERE active = 1 AND id IN ");
        push_id_list(&mut builder, ids);
        builder.push(" ORDER BY id");
        builder.build_query_as::<App>().fetch_all(db).await
    }
}

impl From<&App> for IdName {
    fn from(app: &App) -> Self {
        Self {
            id: app.id,
            name: app.app_name.clone(),
        }
    }
}

/// A pipeline joined with the names needed for permission checks and responses.
///
/// CI pipelines carry no environment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineDetail {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
    pub app_name: String,
    pub team_id: i64,
    pub team_name: String,
    pub environment_id: Option<i64>,
    pub environment_name: Option<String>,
    pub environment_identifier: Option<String>,
}

const CI_PIPELINE_DETAIL: &str = r#"
    SELECT p.id, p.name, a.id AS app_id, a.app_name, t.id AS team_id, t.name AS team_name,
           NULL AS environment_id, NULL AS environment_name, NULL AS environment_identifier
    FROM ci_pipelines p
    JOIN apps a ON a.id = p.app_id
    JOIN teams t ON t.id = a.team_id
"#;

const CD_PIPELINE_DETAIL: &str = r#"
    SELECT p.id, p.name, a.id AS app_id, a.app_name, t.id AS team_id, t.name AS team_name,
           e.id AS environment_id, e.environment_name, e.environment_identifier
    FROM cd_pipelines p
    JOIN apps a ON a.id = p.app_id
    JOIN teams t ON t.id = a.team_id
    JOIN environments e ON e.id = p.environment_id
"#;

fn detail_sql(pipeline_type: PipelineType) -> &'static str {
    match pipeline_type {
        PipelineType::Ci => CI_PIPELINE_DETAIL,
        PipelineType::Cd => CD_PIPELINE_DETAIL,
    }
}

impl PipelineDetail {
    /// Find a live pipeline of the given type.
    pub async fn find(
        db: &SqlitePool,
        pipeline_type: PipelineType,
        id: i64,
    ) -> Result<Option<PipelineDetail>, sqlx::Error> {
        let sql = format!("{} WHERE p.deleted = 0 AND p.id = ?", detail_sql(pipeline_type));
        sqlx::query_as::<_, PipelineDetail>(&sql)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Find a pipeline whether or not it has been deleted.
    pub async fn find_including_deleted(
        db: &SqlitePool,
        pipeline_type: PipelineType,
        id: i64,
    ) -> Result<Option<PipelineDetail>, sqlx::Error> {
        let sql = format!("{} WHERE p.id = ?", detail_sql(pipeline_type));
        sqlx::query_as::<_, PipelineDetail>(&sql)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Search live pipelines whose name contains `name`, optionally restricted
    /// to the given teams and apps.
    pub async fn search(
        db: &SqlitePool,
        pipeline_type: PipelineType,
        name: &str,
        team_ids: &[i64],
        app_ids: &[i64],
    ) -> Result<Vec<PipelineDetail>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(detail_sql(pipeline_type));
        builder.push(" WHERE p.deleted = 0 AND p.name LIKE ");
        builder.push_bind(format!("%{}%", name));
        if !team_ids.is_empty() {
            builder.push(" AND t.id IN ");
            push_id_list(&mut builder, team_ids);
        }
        if !app_ids.is_empty() {
            builder.push(" AND a.id IN ");
            push_id_list(&mut builder, app_ids);
        }
        builder.push(" ORDER BY p.id LIMIT 50");
        builder.build_query_as::<PipelineDetail>().fetch_all(db).await
    }
}
