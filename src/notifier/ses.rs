//! Amazon SES sender configs.
//!
//! The secret access key and session token are sealed with the configured
//! [`SecretCipher`] and masked in every response. Exactly one live config
//! is the default once any exists.

use crate::crypto::SecretCipher;
use crate::db::{
    now_rfc3339, Channel, DbPool, NotificationChannelAutoResponse, SesConfig, SesConfigDto,
};

use super::{mask, resolve_secret, soft_delete_config, NotifierError};

#[derive(Clone)]
pub struct SesService {
    db: DbPool,
    cipher: SecretCipher,
}

impl SesService {
    pub fn new(db: DbPool, cipher: SecretCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn save_or_edit(
        &self,
        configs: &[SesConfigDto],
        user_id: i64,
    ) -> Result<Vec<i64>, NotifierError> {
        let mut tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(configs.len());
        let now = now_rfc3339();

        for config in configs {
            let live: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM ses_config WHERE deleted = 0")
                    .fetch_one(&mut *tx)
                    .await?;

            let id = if config.id > 0 {
                let stored = sqlx::query_as::<_, SesConfig>(
                    "SELECT * FROM ses_config WHERE id = ? AND deleted = 0",
                )
                .bind(config.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| NotifierError::not_found("ses config", config.id))?;

                let secret = resolve_secret(
                    &self.cipher,
                    &config.secret_key,
                    Some(&stored.secret_access_key),
                )?;
                let session_token = resolve_secret(
                    &self.cipher,
                    &config.session_token,
                    Some(&stored.session_token),
                )?;

                sqlx::query(
                    r#"
                    UPDATE ses_config
                    SET team_id = ?, region = ?, access_key = ?, secret_access_key = ?,
                        session_token = ?, from_email = ?, to_email = ?, config_name = ?,
                        description = ?, is_default = ?, updated_by = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(config.team_id)
                .bind(&config.region)
                .bind(&config.access_key)
                .bind(&secret)
                .bind(&session_token)
                .bind(&config.from_email)
                .bind(&config.to_email)
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
                let secret = resolve_secret(&self.cipher, &config.secret_key, None)?;
                let session_token = resolve_secret(&self.cipher, &config.session_token, None)?;

                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO ses_config (team_id, region, access_key, secret_access_key,
                        session_token, from_email, to_email, config_name, description, owner_id,
                        is_default, created_by, updated_by, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(config.team_id)
                .bind(&config.region)
                .bind(&config.access_key)
                .bind(&secret)
                .bind(&session_token)
                .bind(&config.from_email)
                .bind(&config.to_email)
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
                sqlx::query("UPDATE ses_config SET is_default = 0 WHERE id != ? AND deleted = 0")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            ids.push(id);
        }

        tx.commit().await?;
        tracing::info!(count = ids.len(), user_id, "SES configs saved");
        Ok(ids)
    }

    pub async fn fetch_all(&self) -> Result<Vec<SesConfigDto>, NotifierError> {
        let configs = sqlx::query_as::<_, SesConfig>(
            "SELECT * FROM ses_config WHERE deleted = 0 ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(configs.into_iter().map(to_dto).collect())
    }

    pub async fn fetch_by_id(&self, id: i64) -> Result<Option<SesConfigDto>, NotifierError> {
        let config = sqlx::query_as::<_, SesConfig>(
            "SELECT * FROM ses_config WHERE id = ? AND deleted = 0",
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
            "SELECT id, config_name FROM ses_config WHERE deleted = 0 ORDER BY id",
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
        soft_delete_config(&self.db, Channel::Ses, id, user_id).await
    }

    /// Plaintext secret access key of a live config
    #[cfg(test)]
    pub async fn reveal_secret_key(&self, id: i64) -> Result<Option<String>, NotifierError> {
        let stored: Option<String> = sqlx::query_scalar(
            "SELECT secret_access_key FROM ses_config WHERE id = ? AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        stored
            .map(|value| self.cipher.open(&value).map_err(NotifierError::from))
            .transpose()
    }
}

fn to_dto(config: SesConfig) -> SesConfigDto {
    SesConfigDto {
        id: config.id,
        owner_id: config.owner_id,
        team_id: config.team_id,
        region: config.region,
        access_key: config.access_key,
        secret_key: mask(&config.secret_access_key),
        from_email: config.from_email,
        to_email: config.to_email,
        session_token: mask(&config.session_token),
        config_name: config.config_name,
        description: config.description,
        default: config.is_default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key, is_encrypted};
    use crate::db::{init_in_memory, MASKED_SECRET};

    fn dto(id: i64, name: &str, secret: &str, default: bool) -> SesConfigDto {
        SesConfigDto {
            id,
            region: "us-east-1".to_string(),
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: secret.to_string(),
            from_email: "noreply@example.com".to_string(),
            config_name: name.to_string(),
            default,
            ..Default::default()
        }
    }

    fn service(db: DbPool) -> SesService {
        SesService::new(db, SecretCipher::new(Some(derive_key("test-key"))))
    }

    #[tokio::test]
    async fn first_config_becomes_default() {
        let db = init_in_memory().await.unwrap();
        let service = service(db);

        service.save_or_edit(&[dto(0, "first", "s1", false)], 1).await.unwrap();
        service.save_or_edit(&[dto(0, "second", "s2", false)], 1).await.unwrap();

        let all = service.fetch_all().await.unwrap();
        assert!(all[0].default);
        assert!(!all[1].default);
    }

    #[tokio::test]
    async fn new_default_clears_previous() {
        let db = init_in_memory().await.unwrap();
        let service = service(db);

        service.save_or_edit(&[dto(0, "first", "s1", false)], 1).await.unwrap();
        service.save_or_edit(&[dto(0, "second", "s2", true)], 1).await.unwrap();

        let defaults: Vec<String> = service
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.default)
            .map(|c| c.config_name)
            .collect();
        assert_eq!(defaults, vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn deleting_default_promotes_oldest_remaining() {
        let db = init_in_memory().await.unwrap();
        let service = service(db);

        let first = service.save_or_edit(&[dto(0, "first", "s1", false)], 1).await.unwrap();
        service.save_or_edit(&[dto(0, "second", "s2", false)], 1).await.unwrap();
        service.save_or_edit(&[dto(0, "third", "s3", false)], 1).await.unwrap();

        service.delete(first[0], 1).await.unwrap();

        let remaining = service.fetch_all().await.unwrap();
        let defaults: Vec<&str> = remaining
            .iter()
            .filter(|c| c.default)
            .map(|c| c.config_name.as_str())
            .collect();
        assert_eq!(defaults, vec!["second"]);
    }

    #[tokio::test]
    async fn deleting_non_default_keeps_default() {
        let db = init_in_memory().await.unwrap();
        let service = service(db);

        service.save_or_edit(&[dto(0, "first", "s1", false)], 1).await.unwrap();
        let second = service.save_or_edit(&[dto(0, "second", "s2", false)], 1).await.unwrap();
        service.delete(second[0], 1).await.unwrap();

        let remaining = service.fetch_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].default);
    }

    #[tokio::test]
    async fn secrets_are_sealed_masked_and_kept_on_masked_edit() {
        let db = init_in_memory().await.unwrap();
        let service = service(db.clone());

        let ids = service
            .save_or_edit(&[dto(0, "prod", "aws-secret", false)], 1)
            .await
            .unwrap();
        let raw: String = sqlx::query_scalar("SELECT secret_access_key FROM ses_config WHERE id = ?")
            .bind(ids[0])
            .fetch_one(&db)
            .await
            .unwrap();
        assert!(is_encrypted(&raw));

        let fetched = service.fetch_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(fetched.secret_key, MASKED_SECRET);
        assert_eq!(fetched.session_token, "");

        service
            .save_or_edit(&[dto(ids[0], "prod-renamed", MASKED_SECRET, false)], 1)
            .await
            .unwrap();
        assert_eq!(
            service.reveal_secret_key(ids[0]).await.unwrap().as_deref(),
            Some("aws-secret")
        );
    }
}
