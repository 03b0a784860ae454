//! End-to-end tool and resource scenarios over a scripted RPC transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use odoo_mcp::handlers::LogContext;
use odoo_mcp::protocol::{ContentBlock, JsonRpcRequest};
use odoo_mcp::server::OdooMcpServer;
use odoo_mcp::Connection;
use odoo_mcp_core::{Config, YoloMode};
use odoo_xmlrpc::{MockTransport, Value as Rpc};

fn rpc_struct(pairs: &[(&str, Rpc)]) -> Rpc {
    Rpc::Struct(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn version_reply(version: &str) -> Rpc {
    rpc_struct(&[
        ("server_version", Rpc::String(version.into())),
        ("protocol_version", Rpc::Int(1)),
    ])
}

fn record(pairs: &[(&str, Rpc)]) -> Rpc {
    rpc_struct(pairs)
}

fn config(yolo: YoloMode) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .url("https://odoo.example.com")
            .database("prod")
            .username("admin")
            .password("secret")
            .yolo_mode(yolo)
            .build()
            .unwrap(),
    )
}

async fn server_with(
    yolo: YoloMode,
    version: &str,
) -> (Arc<OdooMcpServer>, Arc<MockTransport>) {
    let mock = Arc::new(MockTransport::new());
    mock.expect("version", Ok(version_reply(version)));
    mock.expect("authenticate", Ok(Rpc::Int(2)));

    let config = config(yolo);
    let connection =
        Arc::new(Connection::with_transport(config.clone(), mock.clone()).unwrap());
    let server = Arc::new(OdooMcpServer::with_connection(config, connection).unwrap());
    server.startup().await.unwrap();
    (server, mock)
}

fn result_text(result: &odoo_mcp::protocol::ToolResult) -> String {
    match &result.content[0] {
        ContentBlock::Text { text } => text.clone(),
        other => panic!("unexpected content: {other:?}"),
    }
}

#[tokio::test]
async fn search_companies_scenario() {
    let (server, mock) = server_with(YoloMode::Read, "18.0").await;

    mock.expect("execute_kw:search_count", Ok(Rpc::Int(3)));
    mock.expect(
        "execute_kw:search_read",
        Ok(Rpc::Array(vec![
            record(&[("id", Rpc::Int(1)), ("name", Rpc::String("A".into()))]),
            record(&[("id", Rpc::Int(2)), ("name", Rpc::String("B".into()))]),
            record(&[("id", Rpc::Int(3)), ("name", Rpc::String("C".into()))]),
        ])),
    );

    let result = server
        .call_tool(
            "search_records",
            json!({
                "model": "res.partner",
                "domain": r#"[["is_company", "=", true]]"#,
                "limit": 3,
            }),
            &LogContext::disabled(),
        )
        .await;

    assert_eq!(result.is_error, Some(false));
    let envelope = result.structured_content.unwrap();
    assert_eq!(envelope["model"], "res.partner");
    assert_eq!(envelope["total"], 3);
    assert_eq!(envelope["limit"], 3);
    assert_eq!(envelope["offset"], 0);
    assert_eq!(envelope["records"].as_array().unwrap().len(), 3);
    assert_eq!(envelope["records"][0]["id"], 1);

    assert_eq!(mock.call_count("execute_kw:search_count"), 1);
    assert_eq!(mock.call_count("execute_kw:search_read"), 1);

    // The parsed domain goes out as the positional argument.
    let calls = mock.calls();
    let count_call = calls
        .iter()
        .find(|c| c.inner_method() == Some("search_count"))
        .unwrap();
    let domain = count_call.args().unwrap()[0].to_json();
    assert_eq!(domain, json!([["is_company", "=", true]]));
}

#[tokio::test]
async fn get_nonexistent_record_reports_not_found() {
    let (server, mock) = server_with(YoloMode::Read, "18.0").await;

    mock.expect(
        "execute_kw:fields_get",
        Ok(rpc_struct(&[(
            "name",
            rpc_struct(&[("type", Rpc::String("char".into()))]),
        )])),
    );
    mock.expect("execute_kw:read", Ok(Rpc::Array(vec![])));

    let result = server
        .call_tool(
            "get_record",
            json!({"model": "res.partner", "record_id": 999_999_999}),
            &LogContext::disabled(),
        )
        .await;

    assert_eq!(result.is_error, Some(true));
    let text = result_text(&result);
    assert!(text.contains("not found"));
    assert!(text.contains("res.partner"));
}

#[tokio::test]
async fn create_then_delete_company_in_yolo_true() {
    let (server, mock) = server_with(YoloMode::True, "18.0").await;

    // create_record: create + display_name read-back.
    mock.expect("execute_kw:create", Ok(Rpc::Int(42)));
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("id", Rpc::Int(42)),
            ("display_name", Rpc::String("X".into())),
        ])])),
    );

    let created = server
        .call_tool(
            "create_record",
            json!({"model": "res.company", "values": {"name": "X"}}),
            &LogContext::disabled(),
        )
        .await;
    assert_eq!(created.is_error, Some(false));
    let envelope = created.structured_content.unwrap();
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["record"]["id"], 42);
    assert_eq!(
        envelope["url"],
        "https://odoo.example.com/odoo/res.company/42"
    );

    // delete_record: pre-fetch + unlink.
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("id", Rpc::Int(42)),
            ("display_name", Rpc::String("X".into())),
        ])])),
    );
    mock.expect("execute_kw:unlink", Ok(Rpc::Bool(true)));

    let deleted = server
        .call_tool(
            "delete_record",
            json!({"model": "res.company", "record_id": 42}),
            &LogContext::disabled(),
        )
        .await;
    let envelope = deleted.structured_content.unwrap();
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["deleted_id"], 42);

    // get_record afterwards: gone.
    mock.expect(
        "execute_kw:fields_get",
        Ok(rpc_struct(&[(
            "name",
            rpc_struct(&[("type", Rpc::String("char".into()))]),
        )])),
    );
    mock.expect("execute_kw:read", Ok(Rpc::Array(vec![])));

    let fetched = server
        .call_tool(
            "get_record",
            json!({"model": "res.company", "record_id": 42}),
            &LogContext::disabled(),
        )
        .await;
    assert_eq!(fetched.is_error, Some(true));
    assert!(result_text(&fetched).contains("not found"));
}

#[tokio::test]
async fn yolo_read_denies_mutations_before_any_rpc() {
    let (server, mock) = server_with(YoloMode::Read, "18.0").await;

    let result = server
        .call_tool(
            "create_record",
            json!({"model": "res.partner", "values": {"name": "X"}}),
            &LogContext::disabled(),
        )
        .await;

    assert_eq!(result.is_error, Some(true));
    let text = result_text(&result);
    assert!(text.contains("Permission denied"));
    assert!(text.contains("Access denied"));
    assert_eq!(mock.call_count("execute_kw:create"), 0);
}

#[tokio::test]
async fn confirm_quotation_from_draft() {
    let (server, mock) = server_with(YoloMode::True, "18.0").await;

    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("S00042".into())),
            ("state", Rpc::String("draft".into())),
            ("amount_total", Rpc::Double(100.0)),
        ])])),
    );
    mock.expect("execute_kw:action_confirm", Ok(Rpc::Bool(true)));
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("S00042".into())),
            ("state", Rpc::String("sale".into())),
            ("amount_total", Rpc::Double(100.0)),
        ])])),
    );

    let result = server
        .call_tool(
            "confirm_quotation",
            json!({"quotation_id": 7}),
            &LogContext::disabled(),
        )
        .await;

    assert_eq!(result.is_error, Some(false));
    let envelope = result.structured_content.unwrap();
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["order_name"], "S00042");
    assert_eq!(envelope["state"], "sale");
    assert!(envelope["url"].as_str().unwrap().contains("/odoo/sale.order/7"));
    assert_eq!(mock.call_count("execute_kw:action_confirm"), 1);
}

#[tokio::test]
async fn confirm_quotation_rejects_non_draft() {
    let (server, mock) = server_with(YoloMode::True, "18.0").await;

    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("S00042".into())),
            ("state", Rpc::String("sale".into())),
            ("amount_total", Rpc::Double(100.0)),
        ])])),
    );

    let result = server
        .call_tool(
            "confirm_quotation",
            json!({"quotation_id": 7}),
            &LogContext::disabled(),
        )
        .await;

    assert_eq!(result.is_error, Some(true));
    assert!(result_text(&result).contains("must be 'draft'"));
    assert_eq!(mock.call_count("execute_kw:action_confirm"), 0);
}

#[tokio::test]
async fn confirm_manufacturing_order_swallows_assign_failure() {
    let (server, mock) = server_with(YoloMode::True, "18.0").await;

    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("MO/001".into())),
            ("state", Rpc::String("draft".into())),
        ])])),
    );
    mock.expect("execute_kw:action_confirm", Ok(Rpc::Bool(true)));
    mock.expect(
        "execute_kw:action_assign",
        Err(odoo_xmlrpc::RpcError::Fault {
            code: 1,
            message: "Not enough stock".into(),
        }),
    );
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("MO/001".into())),
            ("state", Rpc::String("confirmed".into())),
            ("product_qty", Rpc::Double(5.0)),
        ])])),
    );

    let result = server
        .call_tool(
            "confirm_manufacturing_order",
            json!({"mo_id": 3}),
            &LogContext::disabled(),
        )
        .await;

    // Reservation failed, confirmation still succeeds.
    assert_eq!(result.is_error, Some(false));
    let envelope = result.structured_content.unwrap();
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["state"], "confirmed");
}

#[tokio::test]
async fn receive_inventory_requires_exactly_one_identifier() {
    let (server, _mock) = server_with(YoloMode::True, "18.0").await;

    let neither = server
        .call_tool("receive_inventory", json!({}), &LogContext::disabled())
        .await;
    assert_eq!(neither.is_error, Some(true));
    assert!(result_text(&neither).contains("must be provided"));

    let both = server
        .call_tool(
            "receive_inventory",
            json!({"picking_id": 5, "po_name": "P00016"}),
            &LogContext::disabled(),
        )
        .await;
    assert_eq!(both.is_error, Some(true));
    assert!(result_text(&both).contains("not both"));
}

#[tokio::test]
async fn receive_inventory_by_po_name() {
    let (server, mock) = server_with(YoloMode::True, "18.0").await;

    mock.expect("execute_kw:search", Ok(Rpc::Array(vec![Rpc::Int(9)])));
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("WH/IN/00009".into())),
            ("state", Rpc::String("assigned".into())),
            ("origin", Rpc::String("P00016".into())),
        ])])),
    );
    mock.expect("execute_kw:action_assign", Ok(Rpc::Bool(true)));
    mock.expect("execute_kw:button_validate", Ok(Rpc::Bool(true)));
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("name", Rpc::String("WH/IN/00009".into())),
            ("state", Rpc::String("done".into())),
            ("origin", Rpc::String("P00016".into())),
        ])])),
    );

    let result = server
        .call_tool(
            "receive_inventory",
            json!({"po_name": "P00016"}),
            &LogContext::disabled(),
        )
        .await;

    assert_eq!(result.is_error, Some(false));
    let envelope = result.structured_content.unwrap();
    assert_eq!(envelope["picking_id"], 9);
    assert_eq!(envelope["state"], "done");

    // The search filtered on origin and picking type.
    let calls = mock.calls();
    let search = calls
        .iter()
        .find(|c| c.inner_method() == Some("search"))
        .unwrap();
    let domain = search.args().unwrap()[0].to_json();
    assert_eq!(
        domain,
        json!([["origin", "=", "P00016"], ["picking_type_code", "=", "incoming"]])
    );
}

#[tokio::test]
async fn list_models_in_yolo_mode_queries_ir_model() {
    let (server, mock) = server_with(YoloMode::Read, "18.0").await;

    mock.expect(
        "execute_kw:search_read",
        Ok(Rpc::Array(vec![
            record(&[
                ("model", Rpc::String("ir.attachment".into())),
                ("name", Rpc::String("Attachment".into())),
            ]),
            record(&[
                ("model", Rpc::String("ir.cron".into())),
                ("name", Rpc::String("Scheduled Actions".into())),
            ]),
            record(&[
                ("model", Rpc::String("res.partner".into())),
                ("name", Rpc::String("Contact".into())),
            ]),
        ])),
    );

    let result = server
        .call_tool("list_models", json!({}), &LogContext::disabled())
        .await;

    let envelope = result.structured_content.unwrap();
    let models = envelope["models"].as_array().unwrap();
    let names: Vec<&str> = models
        .iter()
        .map(|m| m["model"].as_str().unwrap())
        .collect();
    // ir.attachment survives the prefix filter via the allowlist; ir.cron
    // does not.
    assert!(names.contains(&"ir.attachment"));
    assert!(names.contains(&"res.partner"));
    assert!(!names.contains(&"ir.cron"));

    assert_eq!(envelope["yolo_mode"]["enabled"], true);
    assert_eq!(envelope["yolo_mode"]["level"], "read");
    assert_eq!(envelope["yolo_mode"]["operations"]["write"], false);

    // Read-only policy reflected per model.
    assert_eq!(models[0]["operations"]["read"], true);
    assert_eq!(models[0]["operations"]["unlink"], false);
}

#[tokio::test]
async fn resource_read_renders_record() {
    let (server, mock) = server_with(YoloMode::Read, "18.0").await;

    mock.expect("execute_kw:search", Ok(Rpc::Array(vec![Rpc::Int(1)])));
    mock.expect(
        "execute_kw:fields_get",
        Ok(rpc_struct(&[
            (
                "name",
                rpc_struct(&[
                    ("type", Rpc::String("char".into())),
                    ("string", Rpc::String("Name".into())),
                ]),
            ),
            (
                "image_1920",
                rpc_struct(&[("type", Rpc::String("binary".into()))]),
            ),
        ])),
    );
    mock.expect(
        "execute_kw:read",
        Ok(Rpc::Array(vec![record(&[
            ("id", Rpc::Int(1)),
            ("name", Rpc::String("Azure Interior".into())),
        ])])),
    );

    let request = JsonRpcRequest::new(
        1i64,
        "resources/read",
        json!({"uri": "odoo://res.partner/record/1"}),
    );
    let response = server
        .handle_request(request, &LogContext::disabled())
        .await
        .unwrap();

    let result = response.result.unwrap();
    let text = result["contents"][0]["text"].as_str().unwrap();
    assert!(text.contains("Resource: res.partner/record/1"));
    assert!(text.contains("Name: Azure Interior"));

    // Binary fields never make it into the projection.
    let calls = mock.calls();
    let read = calls
        .iter()
        .find(|c| c.inner_method() == Some("read"))
        .unwrap();
    let fields = read.kwargs().unwrap()["fields"].to_json();
    assert_eq!(fields, json!(["name"]));
}

#[tokio::test]
async fn initialize_and_tool_listing() {
    let (server, _mock) = server_with(YoloMode::Read, "18.0").await;

    let init = server
        .handle_request(
            JsonRpcRequest::new(1i64, "initialize", Value::Null),
            &LogContext::disabled(),
        )
        .await
        .unwrap();
    let result = init.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "odoo-mcp");

    let tools = server
        .handle_request(
            JsonRpcRequest::new(2i64, "tools/list", Value::Null),
            &LogContext::disabled(),
        )
        .await
        .unwrap();
    let listed = tools.result.unwrap();
    assert_eq!(listed["tools"].as_array().unwrap().len(), 17);

    let templates = server
        .handle_request(
            JsonRpcRequest::new(3i64, "resources/templates/list", Value::Null),
            &LogContext::disabled(),
        )
        .await
        .unwrap();
    let listed = templates.result.unwrap();
    assert_eq!(listed["resourceTemplates"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn notifications_get_no_response() {
    let (server, _mock) = server_with(YoloMode::Read, "18.0").await;

    let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
    let request: JsonRpcRequest = serde_json::from_str(raw).unwrap();
    assert!(server
        .handle_request(request, &LogContext::disabled())
        .await
        .is_none());
}

#[tokio::test]
async fn health_reflects_session_state() {
    let (server, _mock) = server_with(YoloMode::Read, "18.0").await;

    let healthy = server.health();
    assert_eq!(healthy["status"], "healthy");
    assert_eq!(healthy["connection"]["connected"], true);
    assert_eq!(healthy["connection"]["database"], "prod");

    server.shutdown();
    let unhealthy = server.health();
    assert_eq!(unhealthy["status"], "unhealthy");
}

#[tokio::test]
async fn unknown_tool_is_reported() {
    let (server, _mock) = server_with(YoloMode::Read, "18.0").await;
    let result = server
        .call_tool("explode", json!({}), &LogContext::disabled())
        .await;
    assert_eq!(result.is_error, Some(true));
    assert!(result_text(&result).contains("Unknown tool"));
}
