//! Notification services: settings plus one service per delivery channel.
//!
//! Services own their SQL and never see HTTP types. Handlers in
//! [`crate::api::notifications`] authorize first and then call in here.

pub mod error;
pub mod settings;
pub mod ses;
pub mod slack;
pub mod smtp;
pub mod webhook;

pub use error::NotifierError;
pub use ses::SesService;
pub use settings::NotificationSettingsService;
pub use slack::SlackService;
pub use smtp::SmtpService;
pub use webhook::WebhookService;

use crate::crypto::SecretCipher;
use crate::db::{Channel, DbPool, MASKED_SECRET};

/// Every notification service, sharing one pool
#[derive(Clone)]
pub struct Notifier {
    pub settings: NotificationSettingsService,
    pub slack: SlackService,
    pub ses: SesService,
    pub smtp: SmtpService,
    pub webhook: WebhookService,
}

impl Notifier {
    pub fn new(db: DbPool, cipher: SecretCipher) -> Self {
        Self {
            settings: NotificationSettingsService::new(db.clone()),
            slack: SlackService::new(db.clone()),
            ses: SesService::new(db.clone(), cipher.clone()),
            smtp: SmtpService::new(db.clone(), cipher),
            webhook: WebhookService::new(db),
        }
    }
}

pub fn config_table(channel: Channel) -> &'static str {
    match channel {
        Channel::Slack => "slack_config",
        Channel::Ses => "ses_config",
        Channel::Smtp => "smtp_config",
        Channel::Webhook => "webhook_config",
    }
}

/// Whether any notification setting delivers through the given config
pub async fn config_in_use(db: &DbPool, channel: Channel, id: i64) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM notification_settings_view v, json_each(v.config, '$.providers') p
        WHERE json_extract(p.value, '$.dest') = ? AND json_extract(p.value, '$.configId') = ?
        "#,
    )
    .bind(channel.to_string())
    .bind(id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

/// Name of a live channel config
pub async fn config_name(db: &DbPool, channel: Channel, id: i64) -> Result<Option<String>, sqlx::Error> {
    let sql = format!(
        "SELECT config_name FROM {} WHERE id = ? AND deleted = 0",
        config_table(channel)
    );
    sqlx::query_scalar::<_, String>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Soft-delete a config unless a notification setting still uses it.
///
/// SES and SMTP keep one live default: when the default goes, the oldest
/// remaining config takes over.
async fn soft_delete_config(
    db: &DbPool,
    channel: Channel,
    id: i64,
    user_id: i64,
) -> Result<(), NotifierError> {
    if config_in_use(db, channel, id).await? {
        return Err(NotifierError::InUse { channel, id });
    }
    let table = config_table(channel);
    let mut tx = db.begin().await?;

    let sql = format!(
        "UPDATE {} SET deleted = 1, updated_by = ?, updated_at = ? WHERE id = ? AND deleted = 0",
        table
    );
    let result = sqlx::query(&sql)
        .bind(user_id)
        .bind(crate::db::now_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(NotifierError::not_found(format!("{} config", channel), id));
    }

    if matches!(channel, Channel::Ses | Channel::Smtp) {
        let sql = format!(
            r#"
            UPDATE {table} SET is_default = 1
            WHERE id = (SELECT MIN(id) FROM {table} WHERE deleted = 0)
              AND NOT EXISTS (SELECT 1 FROM {table} WHERE deleted = 0 AND is_default = 1)
            "#
        );
        let promoted = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
        if promoted > 0 {
            tracing::info!(channel = %channel, "Promoted oldest config to default");
        }
    }

    tx.commit().await?;
    tracing::info!(channel = %channel, id, user_id, "Channel config deleted");
    Ok(())
}

/// Value returned to clients in place of a stored secret
fn mask(stored: &str) -> String {
    if stored.is_empty() {
        String::new()
    } else {
        MASKED_SECRET.to_string()
    }
}

/// Secret to store for an edit. A masked or empty value keeps `stored`.
fn resolve_secret(
    cipher: &SecretCipher,
    submitted: &str,
    stored: Option<&str>,
) -> Result<String, NotifierError> {
    match stored {
        Some(stored) if submitted.is_empty() || submitted == MASKED_SECRET => Ok(stored.to_string()),
        _ => Ok(cipher.seal(submitted)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_key;
    use crate::db::init_in_memory;

    #[test]
    fn masks_only_non_empty_secrets() {
        assert_eq!(mask(""), "");
        assert_eq!(mask("ENC:abc"), MASKED_SECRET);
    }

    #[test]
    fn masked_secret_keeps_stored_value() {
        let cipher = SecretCipher::new(Some(derive_key("k")));
        assert_eq!(
            resolve_secret(&cipher, MASKED_SECRET, Some("ENC:stored")).unwrap(),
            "ENC:stored"
        );
        let fresh = resolve_secret(&cipher, "new-secret", Some("ENC:stored")).unwrap();
        assert_eq!(cipher.open(&fresh).unwrap(), "new-secret");
        assert_eq!(resolve_secret(&cipher, "", None).unwrap(), "");
    }

    #[tokio::test]
    async fn config_in_use_reads_view_providers() {
        let db = init_in_memory().await.unwrap();
        sqlx::query(
            r#"INSERT INTO notification_settings_view (config, created_by, updated_by, created_at, updated_at)
               VALUES ('{"teamId":[1],"pipelineType":"CI","eventTypeIds":[1],"providers":[{"dest":"slack","configId":7,"recipient":""}]}', 1, 1, '', '')"#,
        )
        .execute(&db)
        .await
        .unwrap();

        assert!(config_in_use(&db, Channel::Slack, 7).await.unwrap());
        assert!(!config_in_use(&db, Channel::Webhook, 7).await.unwrap());
        assert!(!config_in_use(&db, Channel::Slack, 8).await.unwrap());
    }
}
