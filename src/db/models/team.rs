//! Teams and environments, the two scopes notification access is granted on.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::push_id_list;

/// Team entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Team {
    /// Find active teams by id. Unknown ids are silently skipped.
    pub async fn find_by_ids(db: &SqlitePool, ids: &[i64]) -> Result<Vec<Team>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM teams WHERE active = 1 AND id IN ");
        push_id_list(&mut builder, ids);
        builder.push(" ORDER BY id");
        builder.build_query_as::<Team>().fetch_all(db).await
    }

    pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<Team>, sqlx::Error> {
        sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ? AND active = 1")
            .bind(id)
            .fetch_optional(db)
            .await
    }
}

/// Deployment environment
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Environment {
    pub id: i64,
    pub environment_name: String,
    /// Stable identifier used in permission objects (e.g. `prod-cluster__payments`)
    pub environment_identifier: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Environment {
    pub async fn find_by_ids(
        db: &SqlitePool,
        ids: &[i64],
    ) -> Result<Vec<Environment>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM environments WHERE active = 1 AND id IN ");
        push_id_list(&mut builder, ids);
        builder.push(" ORDER BY id");
        builder.build_query_as::<Environment>().fetch_all(db).await
    }
}

/// `{id, name}` pair used by every response that lists teams, apps or environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdName {
    pub id: i64,
    pub name: String,
}

impl From<&Team> for IdName {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
        }
    }
}

impl From<&Environment> for IdName {
    fn from(env: &Environment) -> Self {
        Self {
            id: env.id,
            name: env.environment_name.clone(),
        }
    }
}
