//! Slack incoming-webhook configs and recipient suggestions.

use crate::db::{
    now_rfc3339, Channel, DbPool, NotificationChannelAutoResponse,
    NotificationRecipientListingResponse, SlackConfig, SlackConfigDto, User,
};

use super::{soft_delete_config, NotifierError};

/// Maximum user emails offered per suggestion request
const RECIPIENT_SUGGESTION_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct SlackService {
    db: DbPool,
}

impl SlackService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Insert configs with `id == 0` and update the others. Returns the saved ids.
    pub async fn save_or_edit(
        &self,
        configs: &[SlackConfigDto],
        user_id: i64,
    ) -> Result<Vec<i64>, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(configs.len());
        let now = now_rfc3339();

        for config in configs {
            if config.id > 0 {
                let result = sqlx::query(
                    r#"
                    UPDATE slack_config
                    SET team_id = ?, web_hook_url = ?, config_name = ?, description = ?,
                        updated_by = ?, updated_at = ?
                    WHERE id = ? AND deleted = 0
                    "#,
                )
                .bind(config.team_id)
                .bind(&config.webhook_url)
                .bind(&config.config_name)
                .bind(&config.description)
                .bind(user_id)
                .bind(&now)
                .bind(config.id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(NotifierError::not_found("slack config", config.id));
                }
                ids.push(config.id);
            } else {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO slack_config (team_id, web_hook_url, config_name, description,
                        owner_id, created_by, updated_by, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(config.team_id)
                .bind(&config.webhook_url)
                .bind(&config.config_name)
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
        tracing::info!(count = ids.len(), user_id, "Slack configs saved");
        Ok(ids)
    }

    pub async fn fetch_all(&self) -> Result<Vec<SlackConfigDto>, NotifierError> {
        let configs = sqlx::query_as::<_, SlackConfig>(
            "SELECT * FROM slack_config WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(configs.into_iter().map(SlackConfigDto::from).collect())
    }

    pub async fn fetch_by_id(&self, id: i64) -> Result<Option<SlackConfigDto>, NotifierError> {
        let config = sqlx::query_as::<_, SlackConfig>(
            "SELECT * FROM slack_config WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(config.map(SlackConfigDto::from))
    }

    pub async fn fetch_all_autocomplete(
        &self,
    ) -> Result<Vec<NotificationChannelAutoResponse>, NotifierError> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT id, config_name, team_id FROM slack_config WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, config_name, team_id)| NotificationChannelAutoResponse {
                id,
                config_name,
                team_id: Some(team_id),
            })
            .collect())
    }

    pub async fn delete(&self, id: i64, user_id: i64) -> Result<(), NotifierError> {
        soft_delete_config(&self.db, Channel::Slack, id, user_id).await
    }

    /// Slack and webhook configs whose name contains `value`, then matching user emails.
    pub async fn recipient_listing_suggestion(
        &self,
        value: &str,
    ) -> Result<Vec<NotificationRecipientListingResponse>, NotifierError> {
        let pattern = format!("%{}%", value);
        let mut suggestions = Vec::new();

        let slack: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, config_name FROM slack_config WHERE deleted = 0 AND config_name LIKE ? ORDER BY id",
        )
        .bind(&pattern)
        .fetch_all(&self.db)
        .await?;
        suggestions.extend(slack.into_iter().map(|(config_id, recipient)| {
            NotificationRecipientListingResponse {
                dest: Channel::Slack,
                config_id,
                recipient,
            }
        }));

        let webhooks: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, config_name FROM webhook_config WHERE deleted = 0 AND config_name LIKE ? ORDER BY id",
        )
        .bind(&pattern)
        .fetch_all(&self.db)
        .await?;
        suggestions.extend(webhooks.into_iter().map(|(config_id, recipient)| {
            NotificationRecipientListingResponse {
                dest: Channel::Webhook,
                config_id,
                recipient,
            }
        }));

        let emails = User::search_emails(&self.db, value, RECIPIENT_SUGGESTION_LIMIT).await?;
        suggestions.extend(emails.into_iter().map(|recipient| {
            NotificationRecipientListingResponse {
                dest: Channel::Ses,
                config_id: 0,
                recipient,
            }
        }));

        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;
    use crate::db::test_support::{seed_catalog, seed_user};

    fn dto(id: i64, team_id: i64, name: &str) -> SlackConfigDto {
        SlackConfigDto {
            id,
            team_id,
            webhook_url: "https://hooks.slack.com/services/T000/B000/XXX".to_string(),
            config_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn save_then_edit() {
        let db = init_in_memory().await.unwrap();
        seed_catalog(&db).await;
        let service = SlackService::new(db);

        let ids = service
            .save_or_edit(&[dto(0, 1, "payments-alerts")], 1)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        service
            .save_or_edit(&[dto(ids[0], 2, "search-alerts")], 1)
            .await
            .unwrap();
        let stored = service.fetch_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.team_id, 2);
        assert_eq!(stored.config_name, "search-alerts");
        assert_eq!(stored.user_id, 1);
    }

    #[tokio::test]
    async fn editing_unknown_config_fails_without_partial_writes() {
        let db = init_in_memory().await.unwrap();
        seed_catalog(&db).await;
        let service = SlackService::new(db);

        let err = service
            .save_or_edit(&[dto(0, 1, "new"), dto(99, 1, "missing")], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::NotFound(_)));
        assert!(service.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_soft_and_missing_is_empty() {
        let db = init_in_memory().await.unwrap();
        seed_catalog(&db).await;
        let service = SlackService::new(db);

        let ids = service.save_or_edit(&[dto(0, 1, "a")], 1).await.unwrap();
        service.delete(ids[0], 1).await.unwrap();
        assert!(service.fetch_by_id(ids[0]).await.unwrap().is_none());
        assert!(service.fetch_all_autocomplete().await.unwrap().is_empty());
        assert!(matches!(
            service.delete(ids[0], 1).await.unwrap_err(),
            NotifierError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn recipient_suggestions_cover_configs_and_users() {
        let db = init_in_memory().await.unwrap();
        seed_catalog(&db).await;
        seed_user(&db, "ops-lead@example.com").await;
        let service = SlackService::new(db.clone());
        service.save_or_edit(&[dto(0, 1, "ops-channel")], 1).await.unwrap();
        sqlx::query(
            "INSERT INTO webhook_config (web_hook_url, config_name, owner_id, created_by, updated_by, created_at, updated_at) VALUES ('https://example.com/hook', 'ops-webhook', 1, 1, 1, '', '')",
        )
        .execute(&db)
        .await
        .unwrap();

        let suggestions = service.recipient_listing_suggestion("ops").await.unwrap();
        let dests: Vec<Channel> = suggestions.iter().map(|s| s.dest).collect();
        assert_eq!(dests, vec![Channel::Slack, Channel::Webhook, Channel::Ses]);
        assert_eq!(suggestions[2].recipient, "ops-lead@example.com");
        assert_eq!(suggestions[2].config_id, 0);
    }
}
