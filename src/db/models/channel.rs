//! Channel configuration models for Slack, SES, SMTP and Webhook destinations.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

use super::notification::Channel;

/// Slack incoming-webhook config stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SlackConfig {
    pub id: i64,
    pub team_id: i64,
    pub web_hook_url: String,
    pub config_name: String,
    pub description: String,
    pub owner_id: i64,
    pub deleted: bool,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Amazon SES config stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SesConfig {
    pub id: i64,
    pub team_id: i64,
    pub region: String,
    pub access_key: String,
    pub secret_access_key: String, // encrypted when a key is configured
    pub session_token: String,     // encrypted when a key is configured
    pub from_email: String,
    pub to_email: String,
    pub config_name: String,
    pub description: String,
    pub owner_id: i64,
    pub is_default: bool,
    pub deleted: bool,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// SMTP server config stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SmtpConfig {
    pub id: i64,
    pub host: String,
    pub port: i64,
    pub auth_type: String,
    pub auth_user: String,
    pub auth_password: String, // encrypted when a key is configured
    pub from_email: String,
    pub config_name: String,
    pub description: String,
    pub owner_id: i64,
    pub is_default: bool,
    pub deleted: bool,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Generic webhook config stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookConfig {
    pub id: i64,
    pub web_hook_url: String,
    pub config_name: String,
    pub header: String, // JSON serialized header map
    pub payload: String,
    pub description: String,
    pub owner_id: i64,
    pub deleted: bool,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlackConfigDto {
    pub id: i64,
    pub user_id: i64,
    pub team_id: i64,
    pub webhook_url: String,
    pub config_name: String,
    pub description: String,
}

impl From<SlackConfig> for SlackConfigDto {
    fn from(config: SlackConfig) -> Self {
        Self {
            id: config.id,
            user_id: config.owner_id,
            team_id: config.team_id,
            webhook_url: config.web_hook_url,
            config_name: config.config_name,
            description: config.description,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SesConfigDto {
    pub id: i64,
    pub owner_id: i64,
    pub team_id: i64,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub from_email: String,
    pub to_email: String,
    pub session_token: String,
    pub config_name: String,
    pub description: String,
    pub default: bool,
}

impl std::fmt::Debug for SesConfigDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SesConfigDto")
            .field("id", &self.id)
            .field("team_id", &self.team_id)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("from_email", &self.from_email)
            .field("to_email", &self.to_email)
            .field("config_name", &self.config_name)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmtpConfigDto {
    pub id: i64,
    pub port: u16,
    pub host: String,
    pub auth_type: String,
    pub auth_user: String,
    pub auth_password: String,
    pub from_email: String,
    pub config_name: String,
    pub description: String,
    pub owner_id: i64,
    pub default: bool,
}

impl std::fmt::Debug for SmtpConfigDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfigDto")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_type", &self.auth_type)
            .field("auth_user", &self.auth_user)
            .field("from_email", &self.from_email)
            .field("config_name", &self.config_name)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookConfigDto {
    pub id: i64,
    pub user_id: i64,
    pub webhook_url: String,
    pub config_name: String,
    pub header: HashMap<String, String>,
    pub payload: String,
    pub description: String,
}

impl From<WebhookConfig> for WebhookConfigDto {
    fn from(config: WebhookConfig) -> Self {
        Self {
            id: config.id,
            user_id: config.owner_id,
            webhook_url: config.web_hook_url,
            config_name: config.config_name,
            header: serde_json::from_str(&config.header).unwrap_or_default(),
            payload: config.payload,
            description: config.description,
        }
    }
}

/// Save request, discriminated by the `channel` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum ChannelConfigRequest {
    Slack { configs: Vec<SlackConfigDto> },
    Ses { configs: Vec<SesConfigDto> },
    Smtp { configs: Vec<SmtpConfigDto> },
    Webhook { configs: Vec<WebhookConfigDto> },
}

impl ChannelConfigRequest {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Slack { .. } => Channel::Slack,
            Self::Ses { .. } => Channel::Ses,
            Self::Smtp { .. } => Channel::Smtp,
            Self::Webhook { .. } => Channel::Webhook,
        }
    }
}

/// Delete request, discriminated by the `channel` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum DeleteChannelConfigRequest {
    Slack(SlackConfigDto),
    Ses(SesConfigDto),
    Smtp(SmtpConfigDto),
    Webhook(WebhookConfigDto),
}

impl DeleteChannelConfigRequest {
    pub fn config_id(&self) -> i64 {
        match self {
            Self::Slack(dto) => dto.id,
            Self::Ses(dto) => dto.id,
            Self::Smtp(dto) => dto.id,
            Self::Webhook(dto) => dto.id,
        }
    }
}

/// Every configured channel, grouped by type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    pub slack_configs: Vec<SlackConfigDto>,
    pub webhook_configs: Vec<WebhookConfigDto>,
    pub ses_configs: Vec<SesConfigDto>,
    pub smtp_configs: Vec<SmtpConfigDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannelAutoResponse {
    pub id: i64,
    pub config_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecipientListingResponse {
    pub dest: Channel,
    pub config_id: i64,
    pub recipient: String,
}

/// Placeholders that webhook payload templates may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookVariable {
    EventType,
    AppName,
    AppId,
    EnvName,
    EnvId,
    CiPipelineId,
    CdPipelineId,
    TriggeredByEmail,
    ContainerImageTag,
    ContainerImageRepo,
    BuildGitCommitHash,
}

impl WebhookVariable {
    pub const ALL: [WebhookVariable; 11] = [
        Self::EventType,
        Self::AppName,
        Self::AppId,
        Self::EnvName,
        Self::EnvId,
        Self::CiPipelineId,
        Self::CdPipelineId,
        Self::TriggeredByEmail,
        Self::ContainerImageTag,
        Self::ContainerImageRepo,
        Self::BuildGitCommitHash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::EventType => "eventType",
            Self::AppName => "appName",
            Self::AppId => "appId",
            Self::EnvName => "envName",
            Self::EnvId => "envId",
            Self::CiPipelineId => "ciPipelineId",
            Self::CdPipelineId => "cdPipelineId",
            Self::TriggeredByEmail => "triggeredByEmail",
            Self::ContainerImageTag => "containerImageTag",
            Self::ContainerImageRepo => "containerImageRepo",
            Self::BuildGitCommitHash => "buildGitCommitHash",
        }
    }

    /// The template placeholder, e.g. `{{appName}}`
    pub fn placeholder(self) -> String {
        format!("{{{{{}}}}}", self.name())
    }
}
