//! SMTP server configs. The auth password is sealed and masked like SES secrets.

use crate::crypto::SecretCipher;
use crate::db::{
    now_rfc3339, Channel, DbPool, NotificationChannelAutoResponse, SmtpConfig, SmtpConfigDto,
};

use super::{mask, resolve_secret, soft_delete_config, NotifierError};

#[derive(Clone)]
pub struct SmtpService {
    db: DbPool,
    cipher: SecretCipher,
}

impl SmtpService {
    pub fn new(db: DbPool, cipher: SecretCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn save_or_edit(
        &self,
        configs: &[SmtpConfigDto],
        user_id: i64,
    ) -> Result<Vec<i64>, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(configs.len());
        let now = now_rfc3339();

        for config in configs {
            let live: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM smtp_config WHERE deleted = 0")
                    .fetch_one(&mut *tx)
                    .await?;

            let id = if config.id > 0 {
                let stored = sqlx::query_as::<_, SmtpConfig>(
                    "SELECT * FROM smtp_config WHERE id = ? AND deleted = 0",
                )
                .bind(config.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| NotifierError::not_found("smtp config", config.id))?;

                let password = resolve_secret(
                    &self.cipher,
                    &config.auth_password,
                    Some(&stored.auth_password),
                )?;

                sqlx::query(
                    r#"
                    UPDATE smtp_config
                    SET host = ?, port = ?, auth_type = ?, auth_user = ?, auth_password = ?,
                        from_email = ?, config_name = ?, description = ?, is_default = ?,
                        updated_by = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&config.host)
                .bind(i64::from(config.port))
                .bind(&config.auth_type)
                .bind(&config.auth_user)
                .bind(&password)
                .bind(&config.from_email)
                .bind(&config.config_name)
                .bind(&config.description)
                .bind(config.default || stored.is_default)
                .bind(user_id)
                .bind(&now)
                .bind(config.id)
                .execute(&mut *tx)
                .await?;
                config.id
            } else {
                let password = resolve_secret(&self.cipher, &config.auth_password, None)?;

                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO smtp_config (host, port, auth_type, auth_user, auth_password,
                        from_email, config_name, description, owner_id, is_default,
                        created_by, updated_by, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&config.host)
                .bind(i64::from(config.port))
                .bind(&config.auth_type)
                .bind(&config.auth_user)
                .bind(&password)
                .bind(&config.from_email)
                .bind(&config.config_name)
                .bind(&config.description)
                .bind(user_id)
                .bind(config.default || live == 0)
                .bind(user_id)
                .bind(user_id)
                .bind(&now)
                .bind(&now)
                .fetch_one(&mut *tx)
                .await?
            };

            if config.default {
                sqlx::query("UPDATE smtp_config SET is_default = 0 WHERE id != ? AND deleted = 0")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            ids.push(id);
        }

        tx.commit().await?;
        tracing::info!(count = ids.len(), user_id, "SMTP configs saved");
        Ok(ids)
    }

    pub async fn fetch_all(&self) -> Result<Vec<SmtpConfigDto>, NotifierError> {
        let configs = sqlx::query_as::<_, SmtpConfig>(
            "SELECT * FROM smtp_config WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(configs.into_iter().map(to_dto).collect())
    }

    pub async fn fetch_by_id(&self, id: i64) -> Result<Option<SmtpConfigDto>, NotifierError> {
        let config = sqlx::query_as::<_, SmtpConfig>(
            "SELECT * FROM smtp_config WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(config.map(to_dto))
    }

    pub async fn fetch_all_autocomplete(
        &self,
    ) -> Result<Vec<NotificationChannelAutoResponse>, NotifierError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, config_name FROM smtp_config WHERE deleted = 0 ORDER BY id",
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
        soft_delete_config(&self.db, Channel::Smtp, id, user_id).await
    }
}

fn to_dto(config: SmtpConfig) -> SmtpConfigDto {
    SmtpConfigDto {
        id: config.id,
        port: u16::try_from(config.port).unwrap_or_default(),
        host: config.host,
        auth_type: config.auth_type,
        auth_user: config.auth_user,
        auth_password: mask(&config.auth_password),
        from_email: config.from_email,
        config_name: config.config_name,
        description: config.description,
        owner_id: config.owner_id,
        default: config.is_default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_in_memory, MASKED_SECRET};
    use crate::notifier::NotificationSettingsService;

    fn dto(id: i64, name: &str, password: &str) -> SmtpConfigDto {
        SmtpConfigDto {
            id,
            host: "smtp.example.com".to_string(),
            port: 587,
            auth_type: "PLAIN".to_string(),
            auth_user: "mailer".to_string(),
            auth_password: password.to_string(),
            from_email: "noreply@example.com".to_string(),
            config_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn keyless_cipher_stores_plaintext_but_still_masks() {
        let db = init_in_memory().await.unwrap();
        let service = SmtpService::new(db.clone(), SecretCipher::default());

        let ids = service.save_or_edit(&[dto(0, "mail", "hunter2")], 1).await.unwrap();
        let raw: String = sqlx::query_scalar("SELECT auth_password FROM smtp_config WHERE id = ?")
            .bind(ids[0])
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(raw, "hunter2");

        let fetched = service.fetch_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(fetched.auth_password, MASKED_SECRET);
        assert_eq!(fetched.port, 587);
        assert!(fetched.default);
    }

    #[tokio::test]
    async fn deleting_default_promotes_oldest_remaining() {
        let db = init_in_memory().await.unwrap();
        let service = SmtpService::new(db, SecretCipher::default());

        service.save_or_edit(&[dto(0, "relay-a", "p1")], 1).await.unwrap();
        let b = service.save_or_edit(&[dto(0, "relay-b", "p2")], 1).await.unwrap();
        service.save_or_edit(&[dto(0, "relay-c", "p3")], 1).await.unwrap();
        let mut promote = dto(b[0], "relay-b", "p2");
        promote.default = true;
        service.save_or_edit(&[promote], 1).await.unwrap();

        service.delete(b[0], 1).await.unwrap();

        let defaults: Vec<String> = service
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.default)
            .map(|c| c.config_name)
            .collect();
        assert_eq!(defaults, vec!["relay-a".to_string()]);
    }

    #[tokio::test]
    async fn config_in_use_cannot_be_deleted() {
        let db = init_in_memory().await.unwrap();
        let service = SmtpService::new(db.clone(), SecretCipher::default());
        let ids = service.save_or_edit(&[dto(0, "mail", "pw")], 1).await.unwrap();

        sqlx::query("INSERT INTO teams (id, name) VALUES (1, 'payments')")
            .execute(&db)
            .await
            .unwrap();
        let settings = NotificationSettingsService::new(db.clone());
        let request: crate::db::NotificationRequest = serde_json::from_value(serde_json::json!({
            "notificationConfigRequest": [{"teamId": [1], "pipelineType": "CI", "eventTypeIds": [3]}],
            "providers": [{"dest": "smtp", "configId": ids[0], "recipient": "oncall@example.com"}]
        }))
        .unwrap();
        let view_ids = settings.create_or_update(&request, 1).await.unwrap();

        assert!(matches!(
            service.delete(ids[0], 1).await.unwrap_err(),
            NotifierError::InUse { channel: Channel::Smtp, .. }
        ));

        settings.delete(&view_ids).await.unwrap();
        service.delete(ids[0], 1).await.unwrap();
        assert!(service.fetch_all().await.unwrap().is_empty());
    }
}
