//! Notification settings models.
//!
//! A setting is stored twice: once as a view holding the user's selection
//! (`NsConfig`, serialized as JSON) and once as one row per concrete
//! team/app/env/event combination for the event dispatcher.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::{null_as_default, push_id_list};
use super::team::IdName;

/// Delivery channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Slack,
    Ses,
    Smtp,
    Webhook,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slack => write!(f, "slack"),
            Self::Ses => write!(f, "ses"),
            Self::Smtp => write!(f, "smtp"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "ses" => Ok(Self::Ses),
            "smtp" => Ok(Self::Smtp),
            "webhook" => Ok(Self::Webhook),
            _ => Err(format!("Unsupported channel: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineType {
    #[serde(rename = "CI")]
    Ci,
    #[serde(rename = "CD")]
    Cd,
}

impl std::fmt::Display for PipelineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ci => write!(f, "CI"),
            Self::Cd => write!(f, "CD"),
        }
    }
}

/// Pipeline events a setting can subscribe to. Ids match the `event` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Trigger = 1,
    Success = 2,
    Fail = 3,
}

impl EventType {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Trigger),
            2 => Some(Self::Success),
            3 => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        self as i64
    }
}

/// A notification destination. With `config_id == 0` the recipient is a raw
/// address; otherwise it points at a stored channel config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub dest: Channel,
    #[serde(default)]
    pub config_id: i64,
    #[serde(default)]
    pub recipient: String,
}

/// The selection a notification setting was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NsConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub team_id: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_id: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env_id: Vec<i64>,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
    pub pipeline_type: PipelineType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_type_ids: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub providers: Vec<Provider>,
}

impl NsConfig {
    /// Pipeline id, treating `0` as absent
    pub fn pipeline(&self) -> Option<i64> {
        self.pipeline_id.filter(|id| *id > 0)
    }
}

/// One entry of a create/update request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfigRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub team_id: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_id: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env_id: Vec<i64>,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
    pub pipeline_type: PipelineType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_type_ids: Vec<i64>,
}

impl NotificationConfigRequest {
    pub fn to_ns_config(&self, providers: &[Provider]) -> NsConfig {
        NsConfig {
            team_id: self.team_id.clone(),
            app_id: self.app_id.clone(),
            env_id: self.env_id.clone(),
            pipeline_id: self.pipeline_id.filter(|id| *id > 0),
            pipeline_type: self.pipeline_type,
            event_type_ids: self.event_type_ids.clone(),
            providers: providers.to_vec(),
        }
    }
}

/// Request to create (or, for entries with an id, replace) notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub notification_config_request: Vec<NotificationConfigRequest>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub providers: Vec<Provider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Events,
    Recipients,
}

/// Request to change the events or the recipients of existing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdateRequest {
    pub update_type: UpdateType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub notification_config_request: Vec<NotificationConfigRequest>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub providers: Vec<Provider>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsDeleteRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: Vec<i64>,
}

/// Notification settings view stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationSettingsView {
    pub id: i64,
    pub config: String, // JSON serialized NsConfig
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl NotificationSettingsView {
    pub fn ns_config(&self) -> Result<NsConfig, serde_json::Error> {
        serde_json::from_str(&self.config)
    }

    pub async fn find_by_ids(
        db: &SqlitePool,
        ids: &[i64],
    ) -> Result<Vec<NotificationSettingsView>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT * FROM notification_settings_view WHERE id IN ");
        push_id_list(&mut builder, ids);
        builder.push(" ORDER BY id");
        builder
            .build_query_as::<NotificationSettingsView>()
            .fetch_all(db)
            .await
    }

    /// A page of views, newest first
    pub async fn find_page(
        db: &SqlitePool,
        offset: i64,
        size: i64,
    ) -> Result<Vec<NotificationSettingsView>, sqlx::Error> {
        sqlx::query_as::<_, NotificationSettingsView>(
            "SELECT * FROM notification_settings_view ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(size)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_settings_view")
            .fetch_one(db)
            .await
    }

    pub async fn list_all(db: &SqlitePool) -> Result<Vec<NotificationSettingsView>, sqlx::Error> {
        sqlx::query_as::<_, NotificationSettingsView>(
            "SELECT * FROM notification_settings_view ORDER BY id",
        )
        .fetch_all(db)
        .await
    }
}

/// A view id paired with its decoded selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsView {
    pub id: i64,
    pub config: NsConfig,
}

/// Expanded per-event row consumed by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationSetting {
    pub id: i64,
    pub team_id: Option<i64>,
    pub app_id: Option<i64>,
    pub env_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub pipeline_type: String,
    pub event_type_id: i64,
    pub config: String, // JSON serialized providers
    pub view_id: i64,
}

impl NotificationSetting {
    pub async fn find_by_view(
        db: &SqlitePool,
        view_id: i64,
    ) -> Result<Vec<NotificationSetting>, sqlx::Error> {
        sqlx::query_as::<_, NotificationSetting>(
            "SELECT * FROM notification_settings WHERE view_id = ? ORDER BY id",
        )
        .bind(view_id)
        .fetch_all(db)
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,
    pub app_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigResponse {
    pub id: i64,
    pub dest: Channel,
    pub name: String,
    pub recipient: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettingsResponse {
    pub id: i64,
    pub team_response: Vec<IdName>,
    pub app_response: Vec<IdName>,
    pub env_response: Vec<IdName>,
    pub pipeline_response: Option<PipelineResponse>,
    pub pipeline_type: PipelineType,
    pub provider_configs: Vec<ProviderConfigResponse>,
    pub event_types: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsViewResponse {
    pub total: i64,
    pub settings: Vec<NotificationSettingsResponse>,
}

/// Filter for the notification setting option search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub team_id: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env_id: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_id: Vec<i64>,
    #[serde(default)]
    pub pipeline_name: String,
}

/// One selectable option returned by the search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilterResponse {
    pub team_response: Vec<IdName>,
    pub app_response: Vec<IdName>,
    pub env_response: Vec<IdName>,
    pub pipeline_response: Option<PipelineResponse>,
    pub pipeline_type: Option<PipelineType>,
}
