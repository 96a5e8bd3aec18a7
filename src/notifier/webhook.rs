//! Generic webhook configs and the payload template variables.

use std::collections::BTreeMap;

use crate::db::{
    now_rfc3339, Channel, DbPool, NotificationChannelAutoResponse, WebhookConfig,
    WebhookConfigDto, WebhookVariable,
};

use super::{soft_delete_config, NotifierError};

#[derive(Clone)]
pub struct WebhookService {
    db: DbPool,
}

impl WebhookService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn save_or_edit(
        &self,
        configs: &[WebhookConfigDto],
        user_id: i64,
    ) -> Result<Vec<i64>, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(configs.len());
        let now = now_rfc3339();

        for config in configs {
            let header = serde_json::to_string(&config.header)?;
            if config.id > 0 {
                let result = sqlx::query(
                    r#"
                    UPDATE webhook_config
                    SET web_hook_url = ?, config_name = ?, header = ?, payload = ?, description = ?,
                        updated_by = ?, updated_at = ?
                    WHERE id = ? AND deleted = 0
                    "#,
                )
                .bind(&config.webhook_url)
                .bind(&config.config_name)
                .bind(&header)
                .bind(&config.payload)
                .bind(&config.description)
                .bind(user_id)
                .bind(&now)
                .bind(config.id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(NotifierError::not_found("webhook config", config.id));
                }
                ids.push(config.id);
            } else {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO webhook_config (web_hook_url, config_name, header, payload,
                        description, owner_id, created_by, updated_by, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&config.webhook_url)
                .bind(&config.config_name)
                .bind(&header)
                .bind(&config.payload)
                .bind(&config.description)
                .bind(user_id)
                .bind(user_id)
                .bind(user_id)
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?;
                ids.push(id);
            }
        }

        tx.commit().await?;
        tracing::info!(count = ids.len(), user_id, "Webhook configs saved");
        Ok(ids)
    }

    pub async fn fetch_all(&self) -> Result<Vec<WebhookConfigDto>, NotifierError> {
        let configs = sqlx::query_as::<_, WebhookConfig>(
            "SELECT * FROM webhook_config WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(configs.into_iter().map(WebhookConfigDto::from).collect())
    }

    pub async fn fetch_by_id(&self, id: i64) -> Result<Option<WebhookConfigDto>, NotifierError> {
        let config = sqlx::query_as::<_, WebhookConfig>(
            "SELECT * FROM webhook_config WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(config.map(WebhookConfigDto::from))
    }

    pub async fn fetch_all_autocomplete(
        &self,
    ) -> Result<Vec<NotificationChannelAutoResponse>, NotifierError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, config_name FROM webhook_config WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, config_name)| NotificationChannelAutoResponse {
                id,
                config_name,
                team_id: None,
            })
            .collect())
    }

    pub async fn delete(&self, id: i64, user_id: i64) -> Result<(), NotifierError> {
        soft_delete_config(&self.db, Channel::Webhook, id, user_id).await
    }

    /// Variable name to template placeholder, e.g. `appName` -> `{{appName}}`
    pub fn webhook_variables(&self) -> BTreeMap<&'static str, String> {
        WebhookVariable::ALL
            .iter()
            .map(|v| (v.name(), v.placeholder()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;
    use std::collections::HashMap;

    #[tokio::test]
    async fn headers_survive_storage() {
        let db = init_in_memory().await.unwrap();
        let service = WebhookService::new(db);

        let config = WebhookConfigDto {
            webhook_url: "https://hooks.example.com/deploy".to_string(),
            config_name: "deploy-hook".to_string(),
            header: HashMap::from([("X-Token".to_string(), "abc".to_string())]),
            payload: r#"{"app": "{{appName}}"}"#.to_string(),
            ..Default::default()
        };
        let ids = service.save_or_edit(&[config], 4).await.unwrap();

        let stored = service.fetch_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.header.get("X-Token").map(String::as_str), Some("abc"));
        assert_eq!(stored.user_id, 4);
        assert_eq!(service.fetch_all_autocomplete().await.unwrap()[0].team_id, None);
    }

    #[tokio::test]
    async fn variables_list_every_placeholder() {
        let db = init_in_memory().await.unwrap();
        let variables = WebhookService::new(db).webhook_variables();
        assert_eq!(variables.len(), WebhookVariable::ALL.len());
        assert_eq!(variables["eventType"], "{{eventType}}");
    }
}
