//! Access-controller tests against a mocked Odoo MCP REST surface.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use odoo_mcp::AccessController;
use odoo_mcp_core::Config;

fn api_key_config(base: &str) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .url(base)
            .database("prod")
            .api_key("secret-key")
            .build()
            .unwrap(),
    )
}

fn credentials_config(base: &str) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .url(base)
            .database("prod")
            .username("admin")
            .password("secret")
            .build()
            .unwrap(),
    )
}

fn models_payload() -> serde_json::Value {
    json!({
        "success": true,
        "data": {
            "models": [
                {"model": "res.partner", "name": "Contact"},
                {"model": "sale.order", "name": "Sales Order"},
            ]
        }
    })
}

#[tokio::test]
async fn enabled_models_with_api_key_and_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mcp/models"))
        .and(header("X-API-Key", "secret-key"))
        .and(header("X-Odoo-Database", "prod"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let controller = AccessController::new(api_key_config(&server.uri())).unwrap();

    let models = controller.get_enabled_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].model, "res.partner");
    assert_eq!(models[0].name, "Contact");

    // Second lookup is served from the TTL cache; the mock's expect(1)
    // verifies no extra request went out.
    let again = controller.get_enabled_models().await.unwrap();
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn permissions_gate_operations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mcp/models/res.partner/permissions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "model": "res.partner",
                "enabled": true,
                "operations": {"read": true, "write": true, "create": false, "unlink": false}
            }
        })))
        .mount(&server)
        .await;

    let controller = AccessController::new(api_key_config(&server.uri())).unwrap();

    let (read_ok, _) = controller.check_operation_allowed("res.partner", "read").await;
    assert!(read_ok);
    let (write_ok, _) = controller.check_operation_allowed("res.partner", "write").await;
    assert!(write_ok);
    let (create_ok, reason) = controller
        .check_operation_allowed("res.partner", "create")
        .await;
    assert!(!create_ok);
    assert!(reason.unwrap().contains("create"));

    let err = controller
        .validate_model_access("res.partner", "unlink")
        .await
        .unwrap_err();
    assert!(err.0.contains("unlink"));
}

#[tokio::test]
async fn disabled_model_is_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mcp/models/res.bank/permissions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "model": "res.bank",
                "enabled": false,
                "operations": {"read": false, "write": false, "create": false, "unlink": false}
            }
        })))
        .mount(&server)
        .await;

    let controller = AccessController::new(api_key_config(&server.uri())).unwrap();
    let (allowed, reason) = controller.check_operation_allowed("res.bank", "read").await;
    assert!(!allowed);
    assert!(reason.unwrap().contains("not enabled"));
    assert!(!controller.is_model_enabled("res.bank").await);
}

#[tokio::test]
async fn session_cookie_flow() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/web/session/authenticate"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "params": {"db": "prod", "login": "admin", "password": "secret"}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "session_id=sid-fresh; Path=/; HttpOnly")
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"uid": 2}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/mcp/models"))
        .and(header("Cookie", "session_id=sid-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let controller = AccessController::new(credentials_config(&server.uri())).unwrap();
    let models = controller.get_enabled_models().await.unwrap();
    assert_eq!(models.len(), 2);
}

#[tokio::test]
async fn session_401_triggers_reauth_and_single_retry() {
    let server = MockServer::start().await;

    // First login hands out a soon-to-be-stale cookie, the second a good one.
    Mock::given(method("POST"))
        .and(path("/web/session/authenticate"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "session_id=old; Path=/")
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"uid": 2}})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/web/session/authenticate"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "session_id=new; Path=/")
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"uid": 2}})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/mcp/models"))
        .and(header("Cookie", "session_id=old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mcp/models"))
        .and(header("Cookie", "session_id=new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let controller = AccessController::new(credentials_config(&server.uri())).unwrap();
    let models = controller.get_enabled_models().await.unwrap();
    assert_eq!(models.len(), 2);
}

#[tokio::test]
async fn session_auth_rejection_is_explicit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/web/session/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": 100, "message": "Odoo Session Invalid"}
        })))
        .mount(&server)
        .await;

    let controller = AccessController::new(credentials_config(&server.uri())).unwrap();
    let err = controller.get_enabled_models().await.unwrap_err();
    assert!(err
        .to_string()
        .contains("Session authentication failed: invalid credentials"));
}

#[tokio::test]
async fn clear_cache_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mcp/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models_payload()))
        .expect(2)
        .mount(&server)
        .await;

    let controller = AccessController::new(api_key_config(&server.uri())).unwrap();
    controller.get_enabled_models().await.unwrap();
    controller.clear_cache();
    controller.get_enabled_models().await.unwrap();
}
