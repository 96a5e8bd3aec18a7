//! Stored policy rules and role bindings.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// `subject` may act with `action` on `resource` objects matching `object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PolicyRule {
    pub id: i64,
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub object: String,
}

/// `subject` (a user email or a role) inherits every rule of `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RoleBinding {
    pub id: i64,
    pub subject: String,
    pub role: String,
}

impl PolicyRule {
    pub async fn list_all(db: &SqlitePool) -> Result<Vec<PolicyRule>, sqlx::Error> {
        sqlx::query_as::<_, PolicyRule>("SELECT * FROM rbac_policies ORDER BY id")
            .fetch_all(db)
            .await
    }

    pub async fn insert(
        db: &SqlitePool,
        subject: &str,
        resource: &str,
        action: &str,
        object: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO rbac_policies (subject, resource, action, object) VALUES (?, ?, ?, ?)",
        )
        .bind(subject)
        .bind(resource)
        .bind(action)
        .bind(object)
        .execute(db)
        .await?;
        Ok(())
    }
}

impl RoleBinding {
    pub async fn list_all(db: &SqlitePool) -> Result<Vec<RoleBinding>, sqlx::Error> {
        sqlx::query_as::<_, RoleBinding>("SELECT * FROM rbac_role_bindings ORDER BY id")
            .fetch_all(db)
            .await
    }

    pub async fn insert(db: &SqlitePool, subject: &str, role: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO rbac_role_bindings (subject, role) VALUES (?, ?)")
            .bind(subject)
            .bind(role)
            .execute(db)
            .await?;
        Ok(())
    }
}
