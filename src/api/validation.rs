//! Input validation for notification requests.
//!
//! Field checks return `Result<(), String>`. The request validators collect
//! them with [`ValidationErrorBuilder`] and report every failing field at
//! once, keyed by its JSON path.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{
    Channel, ChannelConfigRequest, EventType, NotificationConfigRequest, NotificationRequest,
    NotificationUpdateRequest, Provider, SesConfigDto, SlackConfigDto, SmtpConfigDto, UpdateType,
    WebhookConfigDto,
};

const MAX_CONFIG_NAME_LEN: usize = 250;
const MAX_URL_LEN: usize = 2048;

lazy_static! {
    /// HTTP/HTTPS URL with a host and optional port, path and query
    static ref HTTP_URL_REGEX: Regex = Regex::new(
        r"^https?://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)*(:\d+)?(/[^\s]*)?$"
    ).unwrap();

    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"
    ).unwrap();
}

pub fn validate_required(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }
    Ok(())
}

/// Validate an HTTP(S) URL
pub fn validate_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err("URL is required".to_string());
    }
    if url.len() > MAX_URL_LEN {
        return Err(format!("URL is too long (max {} characters)", MAX_URL_LEN));
    }
    if !HTTP_URL_REGEX.is_match(url) {
        return Err("Invalid URL format. Must be an HTTP(S) URL".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err(format!("Invalid email address: {}", email));
    }
    Ok(())
}

pub fn validate_config_name(name: &str) -> Result<(), String> {
    validate_required(name, "configName")?;
    if name.len() > MAX_CONFIG_NAME_LEN {
        return Err(format!(
            "configName is too long (max {} characters)",
            MAX_CONFIG_NAME_LEN
        ));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> Result<(), String> {
    if port == 0 {
        return Err("Port must be between 1 and 65535".to_string());
    }
    Ok(())
}

pub fn validate_event_type_ids(ids: &[i64]) -> Result<(), String> {
    if ids.is_empty() {
        return Err("At least one event type is required".to_string());
    }
    if let Some(id) = ids.iter().find(|id| EventType::from_id(**id).is_none()) {
        return Err(format!("Unknown event type id: {}", id));
    }
    Ok(())
}

/// A provider either references a stored config or carries a raw recipient.
/// Raw email recipients must be valid addresses.
pub fn validate_provider(provider: &Provider) -> Result<(), String> {
    if provider.config_id < 0 {
        return Err("configId must not be negative".to_string());
    }
    if provider.config_id == 0 {
        if provider.recipient.is_empty() {
            return Err("Either configId or recipient is required".to_string());
        }
        if matches!(provider.dest, Channel::Ses | Channel::Smtp) {
            validate_email(&provider.recipient)?;
        }
    }
    Ok(())
}

/// A setting must be scoped by at least one team, app, environment or pipeline.
pub fn validate_selector(item: &NotificationConfigRequest) -> Result<(), String> {
    let has_pipeline = item.pipeline_id.is_some_and(|id| id > 0);
    if item.team_id.is_empty() && item.app_id.is_empty() && item.env_id.is_empty() && !has_pipeline
    {
        return Err("At least one of teamId, appId, envId or pipelineId is required".to_string());
    }
    Ok(())
}

fn check_providers(builder: &mut ValidationErrorBuilder, providers: &[Provider]) {
    if providers.is_empty() {
        builder.add("providers", "At least one provider is required");
    }
    for (i, provider) in providers.iter().enumerate() {
        builder.check(format!("providers[{}]", i), validate_provider(provider));
    }
}

/// Validate a create/replace request for notification settings
pub fn validate_notification_request(request: &NotificationRequest) -> Result<(), ApiError> {
    let mut builder = ValidationErrorBuilder::new();

    if request.notification_config_request.is_empty() {
        builder.add(
            "notificationConfigRequest",
            "At least one notification config is required",
        );
    }
    for (i, item) in request.notification_config_request.iter().enumerate() {
        let prefix = format!("notificationConfigRequest[{}]", i);
        builder.check(prefix.clone(), validate_selector(item));
        builder.check(
            format!("{}.eventTypeIds", prefix),
            validate_event_type_ids(&item.event_type_ids),
        );
    }
    check_providers(&mut builder, &request.providers);

    builder.finish()
}

/// Validate an events or recipients update.
///
/// Every entry must reference an existing setting by id.
pub fn validate_notification_update(request: &NotificationUpdateRequest) -> Result<(), ApiError> {
    let mut builder = ValidationErrorBuilder::new();

    if request.notification_config_request.is_empty() {
        builder.add(
            "notificationConfigRequest",
            "At least one notification config is required",
        );
    }
    for (i, item) in request.notification_config_request.iter().enumerate() {
        let prefix = format!("notificationConfigRequest[{}]", i);
        if item.id <= 0 {
            builder.add(format!("{}.id", prefix), "id is required");
        }
        if request.update_type == UpdateType::Events {
            builder.check(
                format!("{}.eventTypeIds", prefix),
                validate_event_type_ids(&item.event_type_ids),
            );
        }
    }
    if request.update_type == UpdateType::Recipients {
        check_providers(&mut builder, &request.providers);
    }

    builder.finish()
}

pub fn validate_delete_ids(ids: &[i64]) -> Result<(), ApiError> {
    let mut builder = ValidationErrorBuilder::new();
    if ids.is_empty() {
        builder.add("id", "At least one id is required");
    }
    if ids.iter().any(|id| *id <= 0) {
        builder.add("id", "ids must be positive");
    }
    builder.finish()
}

fn check_slack(builder: &mut ValidationErrorBuilder, prefix: &str, config: &SlackConfigDto) {
    if config.team_id <= 0 {
        builder.add(format!("{}.teamId", prefix), "teamId is required");
    }
    builder.check(format!("{}.webhookUrl", prefix), validate_url(&config.webhook_url));
    builder.check(format!("{}.configName", prefix), validate_config_name(&config.config_name));
}

fn check_ses(builder: &mut ValidationErrorBuilder, prefix: &str, config: &SesConfigDto) {
    builder.check(format!("{}.region", prefix), validate_required(&config.region, "region"));
    builder.check(
        format!("{}.accessKey", prefix),
        validate_required(&config.access_key, "accessKey"),
    );
    // Edits may omit the secret to keep the stored one
    if config.id == 0 {
        builder.check(
            format!("{}.secretKey", prefix),
            validate_required(&config.secret_key, "secretKey"),
        );
    }
    builder.check(format!("{}.fromEmail", prefix), validate_email(&config.from_email));
    if !config.to_email.is_empty() {
        builder.check(format!("{}.toEmail", prefix), validate_email(&config.to_email));
    }
    builder.check(format!("{}.configName", prefix), validate_config_name(&config.config_name));
}

fn check_smtp(builder: &mut ValidationErrorBuilder, prefix: &str, config: &SmtpConfigDto) {
    builder.check(format!("{}.host", prefix), validate_required(&config.host, "host"));
    builder.check(format!("{}.port", prefix), validate_port(config.port));
    builder.check(format!("{}.fromEmail", prefix), validate_email(&config.from_email));
    builder.check(format!("{}.configName", prefix), validate_config_name(&config.config_name));
}

fn check_webhook(builder: &mut ValidationErrorBuilder, prefix: &str, config: &WebhookConfigDto) {
    builder.check(format!("{}.webhookUrl", prefix), validate_url(&config.webhook_url));
    builder.check(format!("{}.configName", prefix), validate_config_name(&config.config_name));
    for name in config.header.keys() {
        if name.trim().is_empty() {
            builder.add(format!("{}.header", prefix), "Header names must not be empty");
        }
    }
}

/// Validate a channel config save request
pub fn validate_channel_request(request: &ChannelConfigRequest) -> Result<(), ApiError> {
    let mut builder = ValidationErrorBuilder::new();

    let count = match request {
        ChannelConfigRequest::Slack { configs } => {
            for (i, config) in configs.iter().enumerate() {
                check_slack(&mut builder, &format!("configs[{}]", i), config);
            }
            configs.len()
        }
        ChannelConfigRequest::Ses { configs } => {
            for (i, config) in configs.iter().enumerate() {
                check_ses(&mut builder, &format!("configs[{}]", i), config);
            }
            configs.len()
        }
        ChannelConfigRequest::Smtp { configs } => {
            for (i, config) in configs.iter().enumerate() {
                check_smtp(&mut builder, &format!("configs[{}]", i), config);
            }
            configs.len()
        }
        ChannelConfigRequest::Webhook { configs } => {
            for (i, config) in configs.iter().enumerate() {
                check_webhook(&mut builder, &format!("configs[{}]", i), config);
            }
            configs.len()
        }
    };
    if count == 0 {
        builder.add("configs", "At least one config is required");
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PipelineType;
    use std::collections::HashMap;

    fn item(team_id: Vec<i64>, event_type_ids: Vec<i64>) -> NotificationConfigRequest {
        NotificationConfigRequest {
            id: 0,
            team_id,
            app_id: vec![],
            env_id: vec![],
            pipeline_id: None,
            pipeline_type: PipelineType::Cd,
            event_type_ids,
        }
    }

    fn slack_provider(config_id: i64) -> Provider {
        Provider {
            dest: Channel::Slack,
            config_id,
            recipient: String::new(),
        }
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://hooks.slack.com/services/T000/B000/XXXX").is_ok());
        assert!(validate_url("http://localhost:8080/hook?x=1").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("https://").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("oncall@example.com").is_ok());
        assert!(validate_email("first.last+alerts@corp.example.io").is_ok());
        assert!(validate_email("oncall").is_err());
        assert!(validate_email("oncall@localhost").is_err());
    }

    #[test]
    fn test_validate_event_type_ids() {
        assert!(validate_event_type_ids(&[1, 2, 3]).is_ok());
        assert!(validate_event_type_ids(&[]).is_err());
        assert_eq!(
            validate_event_type_ids(&[1, 4]).unwrap_err(),
            "Unknown event type id: 4"
        );
    }

    #[test]
    fn test_validate_provider() {
        assert!(validate_provider(&slack_provider(3)).is_ok());
        assert!(validate_provider(&slack_provider(0)).is_err());

        let raw_email = Provider {
            dest: Channel::Ses,
            config_id: 0,
            recipient: "not-an-email".to_string(),
        };
        assert!(validate_provider(&raw_email).is_err());
    }

    #[test]
    fn test_notification_request_reports_every_field() {
        let request = NotificationRequest {
            notification_config_request: vec![item(vec![], vec![1]), item(vec![2], vec![])],
            providers: vec![],
        };
        let err = validate_notification_request(&request).unwrap_err();
        assert_eq!(err.code(), crate::api::error::ErrorCode::ValidationError);
        assert!(err.message().contains("3 fields"));
    }

    #[test]
    fn test_notification_request_ok() {
        let request = NotificationRequest {
            notification_config_request: vec![item(vec![1], vec![1, 3])],
            providers: vec![slack_provider(2)],
        };
        assert!(validate_notification_request(&request).is_ok());
    }

    #[test]
    fn test_update_requires_ids() {
        let request = NotificationUpdateRequest {
            update_type: UpdateType::Events,
            notification_config_request: vec![item(vec![], vec![2])],
            providers: vec![],
        };
        assert!(validate_notification_update(&request).is_err());

        let mut with_id = item(vec![], vec![2]);
        with_id.id = 5;
        let request = NotificationUpdateRequest {
            update_type: UpdateType::Events,
            notification_config_request: vec![with_id],
            providers: vec![],
        };
        assert!(validate_notification_update(&request).is_ok());
    }

    #[test]
    fn test_channel_request_requires_configs() {
        let request = ChannelConfigRequest::Webhook { configs: vec![] };
        assert!(validate_channel_request(&request).is_err());
    }

    #[test]
    fn test_ses_edit_may_omit_secret() {
        let config = SesConfigDto {
            id: 4,
            region: "eu-west-1".to_string(),
            access_key: "AKIA".to_string(),
            from_email: "noreply@example.com".to_string(),
            config_name: "ses".to_string(),
            ..Default::default()
        };
        let request = ChannelConfigRequest::Ses {
            configs: vec![config.clone()],
        };
        assert!(validate_channel_request(&request).is_ok());

        let request = ChannelConfigRequest::Ses {
            configs: vec![SesConfigDto { id: 0, ..config }],
        };
        assert!(validate_channel_request(&request).is_err());
    }

    #[test]
    fn test_webhook_rejects_blank_header_name() {
        let config = WebhookConfigDto {
            webhook_url: "https://example.com/hook".to_string(),
            config_name: "hook".to_string(),
            header: HashMap::from([(" ".to_string(), "x".to_string())]),
            ..Default::default()
        };
        let request = ChannelConfigRequest::Webhook {
            configs: vec![config],
        };
        assert!(validate_channel_request(&request).is_err());
    }
}
