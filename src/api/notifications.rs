//! Notification settings and channel config endpoints.
//!
//! Every handler runs the same steps: decode, validate, derive permission
//! objects, enforce, delegate to [`crate::notifier`], wrap the result.

use axum::extract::State;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{JsonBody, PathParam, QueryParams};
use super::metrics::{record_channel_configs_saved, record_rbac_denied};
use super::response::ApiResponse;
use super::validation::{
    validate_channel_request, validate_delete_ids, validate_notification_request,
    validate_notification_update,
};
use crate::db::{
    Channel, ChannelConfigRequest, ChannelResponse, DeleteChannelConfigRequest,
    NotificationChannelAutoResponse, NotificationRecipientListingResponse, NotificationRequest,
    NotificationUpdateRequest, NsDeleteRequest, NsView, NsViewResponse, PipelineType,
    SearchFilterResponse, SearchRequest, SesConfigDto, SlackConfigDto, SmtpConfigDto, Team,
    WebhookConfigDto,
};
use crate::notifier::NotifierError;
use crate::rbac::objects::{objects_for_config, objects_for_request, team_wide_object};
use crate::rbac::{build_rbac_objects, Action, RbacError, Resource, ALL_OBJECTS};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct RecipientQuery {
    #[serde(default)]
    pub value: String,
}

fn forbidden(operation: &'static str) -> ApiError {
    record_rbac_denied(operation);
    ApiError::forbidden("Unauthorized User")
}

fn service_err(operation: &'static str) -> impl Fn(NotifierError) -> ApiError {
    move |e| {
        tracing::error!(error = %e, "service err, {}", operation);
        ApiError::from(e)
    }
}

fn rbac_err(operation: &'static str) -> impl Fn(RbacError) -> ApiError {
    move |e| {
        tracing::error!(error = %e, "request err, {}", operation);
        ApiError::from(e)
    }
}

fn validation_err(operation: &'static str) -> impl Fn(ApiError) -> ApiError {
    move |e| {
        tracing::error!(error = %e, "validation err, {}", operation);
        e
    }
}

/// `notification:<action> *`
fn require_notification(
    state: &AppState,
    user: &CurrentUser,
    action: Action,
    operation: &'static str,
) -> Result<(), ApiError> {
    if state
        .enforcer
        .enforce(&user.email, Resource::Notification, action, ALL_OBJECTS)
    {
        Ok(())
    } else {
        Err(forbidden(operation))
    }
}

/// `applications:<action> team/*` for the team owning a Slack config.
///
/// A team that no longer exists is treated as not allowed.
async fn team_allowed(
    state: &AppState,
    user: &CurrentUser,
    team_id: i64,
    action: Action,
) -> Result<bool, ApiError> {
    let Some(team) = Team::find_by_id(&state.db, team_id).await? else {
        return Ok(false);
    };
    Ok(state.enforcer.enforce(
        &user.email,
        Resource::Applications,
        action,
        &team_wide_object(&team.name),
    ))
}

/// Every stored view must pass `action` on its derived objects.
async fn authorize_views(
    state: &AppState,
    user: &CurrentUser,
    views: &[NsView],
    action: Action,
    operation: &'static str,
) -> Result<(), ApiError> {
    for view in views {
        let objects = objects_for_config(&state.db, &view.config)
            .await
            .map_err(rbac_err(operation))?;
        if !objects.allowed_all(state.enforcer.as_ref(), &user.email, action) {
            tracing::warn!(view_id = view.id, user = %user.email, "{} denied", operation);
            return Err(forbidden(operation));
        }
    }
    Ok(())
}

/// POST /notification
pub async fn save_notification_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    JsonBody(request): JsonBody<NotificationRequest>,
) -> Result<ApiResponse<Vec<i64>>, ApiError> {
    const OP: &str = "SaveNotificationSettings";
    tracing::info!(payload = ?request, user_id = user.id, "{}", OP);

    validate_notification_request(&request).map_err(validation_err(OP))?;

    for item in &request.notification_config_request {
        let objects = objects_for_request(&state.db, item)
            .await
            .map_err(rbac_err(OP))?;
        if !objects.allowed_all(state.enforcer.as_ref(), &user.email, Action::Create) {
            return Err(forbidden(OP));
        }
    }

    let ids = state
        .notifier
        .settings
        .create_or_update(&request, user.id)
        .await
        .map_err(service_err(OP))?;
    Ok(ApiResponse::ok(ids))
}

/// PUT /notification
pub async fn update_notification_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    JsonBody(request): JsonBody<NotificationUpdateRequest>,
) -> Result<ApiResponse<Vec<i64>>, ApiError> {
    const OP: &str = "UpdateNotificationSettings";
    tracing::info!(payload = ?request, user_id = user.id, "{}", OP);

    validate_notification_update(&request).map_err(validation_err(OP))?;

    let ids: Vec<i64> = request
        .notification_config_request
        .iter()
        .map(|item| item.id)
        .collect();
    let views = state
        .notifier
        .settings
        .fetch_views_by_ids(&ids)
        .await
        .map_err(service_err(OP))?;
    authorize_views(&state, &user, &views, Action::Update, OP).await?;

    let ids = state
        .notifier
        .settings
        .update(&request, user.id)
        .await
        .map_err(service_err(OP))?;
    Ok(ApiResponse::ok(ids))
}

/// DELETE /notification
pub async fn delete_notification_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    JsonBody(request): JsonBody<NsDeleteRequest>,
) -> Result<ApiResponse<u64>, ApiError> {
    const OP: &str = "DeleteNotificationSettings";
    tracing::info!(payload = ?request, user_id = user.id, "{}", OP);

    validate_delete_ids(&request.id).map_err(validation_err(OP))?;

    let views = state
        .notifier
        .settings
        .fetch_views_by_ids(&request.id)
        .await
        .map_err(service_err(OP))?;
    authorize_views(&state, &user, &views, Action::Delete, OP).await?;

    let removed = state
        .notifier
        .settings
        .delete(&request.id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "service err, {}", OP);
            ApiError::internal(e.to_string())
        })?;
    Ok(ApiResponse::ok(removed))
}

/// GET /notification?offset=&size=
///
/// Views the caller may not `get` are dropped from the page.
pub async fn get_all_notification_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    QueryParams(query): QueryParams<PageQuery>,
) -> Result<ApiResponse<NsViewResponse>, ApiError> {
    const OP: &str = "GetAllNotificationSettings";

    let mut builder = ValidationErrorBuilder::new();
    if query.offset < 0 {
        builder.add("offset", "offset must not be negative");
    }
    if query.size <= 0 || query.size > MAX_PAGE_SIZE {
        builder.add("size", format!("size must be between 1 and {}", MAX_PAGE_SIZE));
    }
    builder.finish().map_err(validation_err(OP))?;

    let (views, total) = state
        .notifier
        .settings
        .find_all(query.offset, query.size)
        .await
        .map_err(service_err(OP))?;

    let mut visible = Vec::with_capacity(views.len());
    for view in views {
        match objects_for_config(&state.db, &view.config).await {
            Ok(objects) if objects.allowed_all(state.enforcer.as_ref(), &user.email, Action::Get) => {
                visible.push(view);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(view_id = view.id, error = %e, "Skipping unresolvable notification setting");
            }
        }
    }

    let (settings, deleted) = state
        .notifier
        .settings
        .build_response(&visible)
        .await
        .map_err(service_err(OP))?;

    Ok(ApiResponse::ok(NsViewResponse {
        total: total - deleted,
        settings,
    }))
}

/// POST /notification/search
///
/// An option is kept when the caller may `create` on any of its objects.
pub async fn get_options_for_notification_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    JsonBody(request): JsonBody<SearchRequest>,
) -> Result<ApiResponse<Vec<SearchFilterResponse>>, ApiError> {
    const OP: &str = "GetOptionsForNotificationSettings";
    tracing::info!(payload = ?request, user_id = user.id, "{}", OP);

    let options = state
        .notifier
        .settings
        .find_options(&request)
        .await
        .map_err(service_err(OP))?;

    let mut allowed = Vec::with_capacity(options.len());
    for option in options {
        let ids = |items: &[crate::db::IdName]| items.iter().map(|i| i.id).collect::<Vec<_>>();
        let objects = build_rbac_objects(
            &state.db,
            &ids(&option.team_response),
            &ids(&option.env_response),
            &ids(&option.app_response),
            option.pipeline_response.as_ref().map(|p| p.id),
            option.pipeline_type.unwrap_or(PipelineType::Ci),
        )
        .await;
        match objects {
            Ok(objects) if objects.allowed_any(state.enforcer.as_ref(), &user.email, Action::Create) => {
                allowed.push(option);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Skipping unresolvable option"),
        }
    }

    Ok(ApiResponse::ok(allowed))
}

/// POST /notification/channel
pub async fn save_notification_channel_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    JsonBody(request): JsonBody<ChannelConfigRequest>,
) -> Result<ApiResponse<Vec<i64>>, ApiError> {
    const OP: &str = "SaveNotificationChannelConfig";
    tracing::info!(payload = ?request, user_id = user.id, "{}", OP);

    validate_channel_request(&request).map_err(validation_err(OP))?;

    let channel = request.channel();
    let ids = match &request {
        ChannelConfigRequest::Slack { configs } => {
            for config in configs {
                let team = Team::find_by_id(&state.db, config.team_id)
                    .await?
                    .ok_or(RbacError::TeamNotFound(config.team_id))
                    .map_err(rbac_err(OP))?;
                if !state.enforcer.enforce(
                    &user.email,
                    Resource::Applications,
                    Action::Create,
                    &team_wide_object(&team.name),
                ) {
                    return Err(forbidden(OP));
                }
            }
            state.notifier.slack.save_or_edit(configs, user.id).await
        }
        ChannelConfigRequest::Ses { configs } => {
            require_notification(&state, &user, Action::Create, OP)?;
            state.notifier.ses.save_or_edit(configs, user.id).await
        }
        ChannelConfigRequest::Smtp { configs } => {
            require_notification(&state, &user, Action::Create, OP)?;
            state.notifier.smtp.save_or_edit(configs, user.id).await
        }
        ChannelConfigRequest::Webhook { configs } => {
            require_notification(&state, &user, Action::Create, OP)?;
            state.notifier.webhook.save_or_edit(configs, user.id).await
        }
    }
    .map_err(service_err(OP))?;

    record_channel_configs_saved(channel, ids.len());
    Ok(ApiResponse::ok(ids))
}

/// GET /notification/channel
///
/// Slack configs are limited to teams the caller may `get`.
pub async fn find_all_notification_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<ApiResponse<ChannelResponse>, ApiError> {
    const OP: &str = "FindAllNotificationConfig";
    require_notification(&state, &user, Action::Get, OP)?;

    let notifier = &state.notifier;
    let mut slack_configs = Vec::new();
    for config in notifier.slack.fetch_all().await.map_err(service_err(OP))? {
        if team_allowed(&state, &user, config.team_id, Action::Get).await? {
            slack_configs.push(config);
        }
    }

    Ok(ApiResponse::ok(ChannelResponse {
        slack_configs,
        webhook_configs: notifier.webhook.fetch_all().await.map_err(service_err(OP))?,
        ses_configs: notifier.ses.fetch_all().await.map_err(service_err(OP))?,
        smtp_configs: notifier.smtp.fetch_all().await.map_err(service_err(OP))?,
    }))
}

/// GET /notification/channel/ses/:id
pub async fn find_ses_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<ApiResponse<SesConfigDto>, ApiError> {
    const OP: &str = "FindSESConfig";
    require_notification(&state, &user, Action::Get, OP)?;

    let config = state
        .notifier
        .ses
        .fetch_by_id(id)
        .await
        .map_err(service_err(OP))?;
    Ok(ApiResponse::from_option(config))
}

/// GET /notification/channel/slack/:id
pub async fn find_slack_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<ApiResponse<SlackConfigDto>, ApiError> {
    const OP: &str = "FindSlackConfig";
    require_notification(&state, &user, Action::Get, OP)?;

    let config = state
        .notifier
        .slack
        .fetch_by_id(id)
        .await
        .map_err(service_err(OP))?;
    if let Some(config) = &config {
        if !team_allowed(&state, &user, config.team_id, Action::Get).await? {
            return Err(forbidden(OP));
        }
    }
    Ok(ApiResponse::from_option(config))
}

/// GET /notification/channel/smtp/:id
pub async fn find_smtp_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<ApiResponse<SmtpConfigDto>, ApiError> {
    const OP: &str = "FindSMTPConfig";
    require_notification(&state, &user, Action::Get, OP)?;

    let config = state
        .notifier
        .smtp
        .fetch_by_id(id)
        .await
        .map_err(service_err(OP))?;
    Ok(ApiResponse::from_option(config))
}

/// GET /notification/channel/webhook/:id
pub async fn find_webhook_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<ApiResponse<WebhookConfigDto>, ApiError> {
    const OP: &str = "FindWebhookConfig";
    require_notification(&state, &user, Action::Get, OP)?;

    let config = state
        .notifier
        .webhook
        .fetch_by_id(id)
        .await
        .map_err(service_err(OP))?;
    Ok(ApiResponse::from_option(config))
}

/// GET /notification/variables
pub async fn get_webhook_variables(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<ApiResponse<BTreeMap<&'static str, String>>, ApiError> {
    require_notification(&state, &user, Action::Get, "GetWebhookVariables")?;
    Ok(ApiResponse::ok(state.notifier.webhook.webhook_variables()))
}

/// GET /notification/recipient?value=
pub async fn recipient_listing_suggestion(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    QueryParams(query): QueryParams<RecipientQuery>,
) -> Result<ApiResponse<Vec<NotificationRecipientListingResponse>>, ApiError> {
    const OP: &str = "RecipientListingSuggestion";
    require_notification(&state, &user, Action::Get, OP)?;

    let suggestions = state
        .notifier
        .slack
        .recipient_listing_suggestion(query.value.trim())
        .await
        .map_err(service_err(OP))?;
    Ok(ApiResponse::ok(suggestions))
}

/// GET /notification/channel/autocomplete/:type
pub async fn find_all_notification_config_autocomplete(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    PathParam(channel_type): PathParam<String>,
) -> Result<ApiResponse<Vec<NotificationChannelAutoResponse>>, ApiError> {
    const OP: &str = "FindAllNotificationConfigAutocomplete";
    require_notification(&state, &user, Action::Get, OP)?;

    let channel: Channel = channel_type.parse().map_err(|e: String| {
        tracing::error!(error = %e, "request err, {}", OP);
        ApiError::bad_request(e)
    })?;

    let notifier = &state.notifier;
    let configs = match channel {
        Channel::Slack => {
            let mut allowed = Vec::new();
            for config in notifier
                .slack
                .fetch_all_autocomplete()
                .await
                .map_err(service_err(OP))?
            {
                let team_id = config.team_id.unwrap_or_default();
                if team_allowed(&state, &user, team_id, Action::Get).await? {
                    allowed.push(config);
                }
            }
            Ok(allowed)
        }
        Channel::Ses => notifier.ses.fetch_all_autocomplete().await,
        Channel::Smtp => notifier.smtp.fetch_all_autocomplete().await,
        Channel::Webhook => notifier.webhook.fetch_all_autocomplete().await,
    }
    .map_err(service_err(OP))?;

    Ok(ApiResponse::ok(configs))
}

/// DELETE /notification/channel
pub async fn delete_notification_channel_config(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    JsonBody(request): JsonBody<DeleteChannelConfigRequest>,
) -> Result<ApiResponse<String>, ApiError> {
    const OP: &str = "DeleteNotificationChannelConfig";
    tracing::info!(payload = ?request, user_id = user.id, "{}", OP);

    let id = request.config_id();
    if id <= 0 {
        return Err(validation_err(OP)(ApiError::validation_field(
            "id",
            "id is required",
        )));
    }
    require_notification(&state, &user, Action::Create, OP)?;

    let notifier = &state.notifier;
    let message = match request {
        DeleteChannelConfigRequest::Slack(_) => notifier
            .slack
            .delete(id, user.id)
            .await
            .map(|_| "Slack config deleted successfully."),
        DeleteChannelConfigRequest::Webhook(_) => notifier
            .webhook
            .delete(id, user.id)
            .await
            .map(|_| "Webhook config deleted successfully."),
        DeleteChannelConfigRequest::Ses(_) => notifier
            .ses
            .delete(id, user.id)
            .await
            .map(|_| "SES config deleted successfully."),
        DeleteChannelConfigRequest::Smtp(_) => notifier
            .smtp
            .delete(id, user.id)
            .await
            .map(|_| "SMTP config deleted successfully."),
    }
    .map_err(service_err(OP))?;

    Ok(ApiResponse::ok(message.to_string()))
}
