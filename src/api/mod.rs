pub mod auth;
pub mod error;
pub mod extract;
pub mod metrics;
mod notifications;
pub mod response;
pub mod validation;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Session routes (login is whitelisted in the auth middleware)
    let session_routes = Router::new()
        .route("/session", post(auth::login))
        .route("/session/validate", get(auth::validate));

    let notification_routes = Router::new()
        .route(
            "/",
            post(notifications::save_notification_settings)
                .put(notifications::update_notification_settings)
                .delete(notifications::delete_notification_settings)
                .get(notifications::get_all_notification_settings),
        )
        .route(
            "/search",
            post(notifications::get_options_for_notification_settings),
        )
        .route(
            "/channel",
            post(notifications::save_notification_channel_config)
                .get(notifications::find_all_notification_config)
                .delete(notifications::delete_notification_channel_config),
        )
        .route("/channel/ses/:id", get(notifications::find_ses_config))
        .route("/channel/slack/:id", get(notifications::find_slack_config))
        .route("/channel/smtp/:id", get(notifications::find_smtp_config))
        .route("/channel/webhook/:id", get(notifications::find_webhook_config))
        .route(
            "/channel/autocomplete/:type",
            get(notifications::find_all_notification_config_autocomplete),
        )
        .route("/variables", get(notifications::get_webhook_variables))
        .route(
            "/recipient",
            get(notifications::recipient_listing_suggestion),
        );

    let orchestrator_routes = Router::new()
        .nest("/api/v1", session_routes)
        .nest("/notification", notification_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/orchestrator", orchestrator_routes)
        // Sessions are resolved for every path outside the whitelist
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::crypto::SecretCipher;
    use crate::db::{self, test_support::seed_catalog, DbPool};
    use crate::notifier::Notifier;
    use crate::rbac::testing::StaticEnforcer;
    use crate::rbac::{Action, Enforcer, Resource};

    const ADMIN_TOKEN: &str = "test-admin-token";

    async fn test_app(enforcer: StaticEnforcer) -> (Router, DbPool) {
        let db = db::init_in_memory().await.unwrap();
        seed_catalog(&db).await;

        let mut config = Config::default();
        config.auth.admin_token = ADMIN_TOKEN.to_string();

        let enforcer: Arc<dyn Enforcer> = Arc::new(enforcer);
        let notifier = Notifier::new(db.clone(), SecretCipher::default());
        let router = create_router(Arc::new(AppState::new(config, db.clone(), enforcer, notifier)));
        (router, db)
    }

    async fn test_router(enforcer: StaticEnforcer) -> Router {
        test_app(enforcer).await.0
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("token", ADMIN_TOKEN)
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn settings_request(selectors: Vec<Value>) -> Value {
        json!({
            "notificationConfigRequest": selectors,
            "providers": [{"dest": "slack", "configId": 0, "recipient": "#alerts"}]
        })
    }

    async fn save_settings(router: &Router, selectors: Vec<Value>) -> Vec<i64> {
        let (status, body) = send(
            router,
            request(Method::POST, "/orchestrator/notification", Some(settings_request(selectors))),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|id| id.as_i64().unwrap())
            .collect()
    }

    fn webhook_request() -> Value {
        json!({
            "channel": "webhook",
            "configs": [{
                "webhookUrl": "https://hooks.example.com/deploys",
                "configName": "deploy-hook",
                "header": {"X-Token": "abc"},
                "payload": "{\"text\": \"{{eventType}}\"}"
            }]
        })
    }

    #[tokio::test]
    async fn test_health_is_whitelisted() {
        let router = test_router(StaticEnforcer::deny_all()).await;
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let request = Request::get("/orchestrator/notification/channel")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
        assert_eq!(body["error"]["message"], "Unauthorized User");
    }

    #[tokio::test]
    async fn test_denied_channel_save_is_forbidden() {
        let router = test_router(StaticEnforcer::deny_all()).await;
        let (status, body) = send(
            &router,
            request(Method::POST, "/orchestrator/notification/channel", Some(webhook_request())),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], "Forbidden");
        assert!(body["result"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let request = Request::post("/orchestrator/notification/channel")
            .header("token", ADMIN_TOKEN)
            .header("content-type", "application/json")
            .body(Body::from("{\"channel\": \"webhook\", \"configs\": ["))
            .unwrap();

        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_invalid_channel_config_is_rejected() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let body = json!({
            "channel": "webhook",
            "configs": [{"webhookUrl": "not-a-url", "configName": ""}]
        });
        let (status, body) = send(
            &router,
            request(Method::POST, "/orchestrator/notification/channel", Some(body)),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["configs[0].webhookUrl"].is_array());
    }

    #[tokio::test]
    async fn test_webhook_config_save_and_fetch() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let (status, body) = send(
            &router,
            request(Method::POST, "/orchestrator/notification/channel", Some(webhook_request())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["result"][0].as_i64().unwrap();

        let (status, body) = send(
            &router,
            request(Method::GET, &format!("/orchestrator/notification/channel/webhook/{}", id), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["configName"], "deploy-hook");
        assert_eq!(body["result"]["header"]["X-Token"], "abc");

        let (status, body) = send(
            &router,
            request(Method::GET, "/orchestrator/notification/channel/webhook/9999", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"].is_null());
    }

    #[tokio::test]
    async fn test_slack_configs_are_filtered_by_team() {
        let enforcer = StaticEnforcer::deny_all()
            .allow(Resource::Applications, Action::Create, "payments/*")
            .allow(Resource::Applications, Action::Create, "search/*")
            .allow(Resource::Applications, Action::Get, "payments/*")
            .allow(Resource::Notification, Action::Get, "*");
        let router = test_router(enforcer).await;

        let save = json!({
            "channel": "slack",
            "configs": [
                {"teamId": 1, "webhookUrl": "https://hooks.slack.com/a", "configName": "payments-alerts"},
                {"teamId": 2, "webhookUrl": "https://hooks.slack.com/b", "configName": "search-alerts"}
            ]
        });
        let (status, _) = send(
            &router,
            request(Method::POST, "/orchestrator/notification/channel", Some(save)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            request(Method::GET, "/orchestrator/notification/channel", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let slack = body["result"]["slackConfigs"].as_array().unwrap();
        assert_eq!(slack.len(), 1);
        assert_eq!(slack[0]["configName"], "payments-alerts");
    }

    #[tokio::test]
    async fn test_unknown_autocomplete_type_is_bad_request() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let (status, _) = send(
            &router,
            request(Method::GET, "/orchestrator/notification/channel/autocomplete/pager", None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_channel_config_with_invalid_id() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let body = json!({"channel": "smtp", "id": 0});
        let (status, _) = send(
            &router,
            request(Method::DELETE, "/orchestrator/notification/channel", Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    const NOTIFICATION_ROUTES: [(&str, &str); 15] = [
        ("POST", "/orchestrator/notification"),
        ("PUT", "/orchestrator/notification"),
        ("DELETE", "/orchestrator/notification"),
        ("GET", "/orchestrator/notification?offset=0&size=20"),
        ("POST", "/orchestrator/notification/search"),
        ("POST", "/orchestrator/notification/channel"),
        ("GET", "/orchestrator/notification/channel"),
        ("DELETE", "/orchestrator/notification/channel"),
        ("GET", "/orchestrator/notification/channel/ses/1"),
        ("GET", "/orchestrator/notification/channel/slack/1"),
        ("GET", "/orchestrator/notification/channel/smtp/1"),
        ("GET", "/orchestrator/notification/channel/webhook/1"),
        ("GET", "/orchestrator/notification/channel/autocomplete/slack"),
        ("GET", "/orchestrator/notification/variables"),
        ("GET", "/orchestrator/notification/recipient?value=al"),
    ];

    #[tokio::test]
    async fn test_every_notification_route_requires_a_session() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        for (method, uri) in NOTIFICATION_ROUTES {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap();
            let (status, body) = send(&router, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
            assert_eq!(body["code"], 401, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_malformed_settings_bodies_are_bad_request() {
        let router = test_router(StaticEnforcer::allow_all()).await;
        let cases = [
            (Method::POST, "/orchestrator/notification"),
            (Method::PUT, "/orchestrator/notification"),
            (Method::DELETE, "/orchestrator/notification"),
            (Method::POST, "/orchestrator/notification/search"),
        ];
        for (method, uri) in cases {
            let request = Request::builder()
                .method(method.clone())
                .uri(uri)
                .header("token", ADMIN_TOKEN)
                .header("content-type", "application/json")
                .body(Body::from("{\"notificationConfigRequest\": ["))
                .unwrap();
            let (status, body) = send(&router, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
            assert_eq!(body["error"]["code"], "bad_request", "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_settings_save_without_create_is_forbidden() {
        let enforcer =
            StaticEnforcer::deny_all().allow(Resource::Applications, Action::Create, "payments/api");
        let router = test_router(enforcer).await;

        // team 2 owns the indexer, which this caller may not touch
        let body = settings_request(vec![
            json!({"appId": [100], "pipelineType": "CI", "eventTypeIds": [1]}),
            json!({"appId": [102], "pipelineType": "CI", "eventTypeIds": [1]}),
        ]);
        let (status, body) = send(
            &router,
            request(Method::POST, "/orchestrator/notification", Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["message"], "Unauthorized User");
    }

    #[tokio::test]
    async fn test_settings_update_and_delete_need_their_own_action() {
        let enforcer =
            StaticEnforcer::deny_all().allow(Resource::Applications, Action::Create, "payments/api");
        let router = test_router(enforcer).await;
        let ids = save_settings(
            &router,
            vec![json!({"appId": [100], "pipelineType": "CI", "eventTypeIds": [1]})],
        )
        .await;

        let update = json!({
            "updateType": "events",
            "notificationConfigRequest": [{"id": ids[0], "pipelineType": "CI", "eventTypeIds": [1, 2]}],
            "providers": []
        });
        let (status, _) = send(
            &router,
            request(Method::PUT, "/orchestrator/notification", Some(update)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &router,
            request(Method::DELETE, "/orchestrator/notification", Some(json!({"id": ids}))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_settings_list_hides_views_the_caller_cannot_get() {
        let enforcer = StaticEnforcer::deny_all()
            .allow(Resource::Applications, Action::Create, "payments/api")
            .allow(Resource::Applications, Action::Create, "search/indexer")
            .allow(Resource::Applications, Action::Get, "payments/api");
        let router = test_router(enforcer).await;
        save_settings(
            &router,
            vec![
                json!({"appId": [100], "pipelineType": "CI", "eventTypeIds": [1]}),
                json!({"appId": [102], "pipelineType": "CI", "eventTypeIds": [1]}),
            ],
        )
        .await;

        let (status, body) = send(
            &router,
            request(Method::GET, "/orchestrator/notification?offset=0&size=20", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let settings = body["result"]["settings"].as_array().unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0]["appResponse"][0]["name"], "Api");
    }

    #[tokio::test]
    async fn test_settings_of_deleted_pipeline_can_be_listed_and_removed() {
        let (router, db) = test_app(StaticEnforcer::allow_all()).await;
        let pipeline_view = save_settings(
            &router,
            vec![json!({"pipelineId": 500, "pipelineType": "CI", "eventTypeIds": [1]})],
        )
        .await[0];
        save_settings(
            &router,
            vec![json!({"appId": [100], "pipelineType": "CI", "eventTypeIds": [1]})],
        )
        .await;

        sqlx::query("UPDATE ci_pipelines SET deleted = 1 WHERE id = 500")
            .execute(&db)
            .await
            .unwrap();

        let (status, body) = send(
            &router,
            request(Method::GET, "/orchestrator/notification?offset=0&size=20", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["total"], 1);
        assert_eq!(body["result"]["settings"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &router,
            request(
                Method::DELETE,
                "/orchestrator/notification",
                Some(json!({"id": [pipeline_view]})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], 1);
    }

    #[tokio::test]
    async fn test_search_keeps_options_with_any_allowed_object() {
        let enforcer =
            StaticEnforcer::deny_all().allow(Resource::Applications, Action::Create, "payments/*");
        let router = test_router(enforcer).await;

        let search = json!({"teamId": [1], "envId": [11], "appId": [], "pipelineName": ""});
        let (status, body) = send(
            &router,
            request(Method::POST, "/orchestrator/notification/search", Some(search)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let options = body["result"].as_array().unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0]["teamResponse"][0]["name"], "Payments");
    }

    #[tokio::test]
    async fn test_slack_autocomplete_is_filtered_by_team() {
        let enforcer = StaticEnforcer::deny_all()
            .allow(Resource::Applications, Action::Create, "payments/*")
            .allow(Resource::Applications, Action::Create, "search/*")
            .allow(Resource::Applications, Action::Get, "payments/*")
            .allow(Resource::Notification, Action::Get, "*");
        let router = test_router(enforcer).await;

        let save = json!({
            "channel": "slack",
            "configs": [
                {"teamId": 1, "webhookUrl": "https://hooks.slack.com/a", "configName": "payments-alerts"},
                {"teamId": 2, "webhookUrl": "https://hooks.slack.com/b", "configName": "search-alerts"}
            ]
        });
        let (status, _) = send(
            &router,
            request(Method::POST, "/orchestrator/notification/channel", Some(save)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            request(Method::GET, "/orchestrator/notification/channel/autocomplete/slack", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let configs = body["result"].as_array().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0]["configName"], "payments-alerts");
        assert_eq!(configs[0]["teamId"], 1);
    }
}
