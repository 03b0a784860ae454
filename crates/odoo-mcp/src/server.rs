//! Server wiring: component construction, tool registration, dispatch,
//! and the session lifespan.
//!
//! One `OdooMcpServer` owns the connection, the access controller, and the
//! three handler families. Transports feed it `JsonRpcRequest`s and write
//! back whatever it returns; notifications from the logging context travel
//! over a channel the transport owns.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use odoo_mcp_core::{Config, ServiceError};

use crate::access::AccessController;
use crate::connection::Connection;
use crate::handlers::{LogContext, ResourceHandler, ToolHandler, WorkflowHandler};
use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ResourceContents, ToolDefinition, ToolResult,
    PROTOCOL_VERSION,
};
use crate::schema::sanitize_schema;

// --- tool argument types -------------------------------------------------

#[derive(Deserialize, JsonSchema)]
struct SearchRecordsArgs {
    /// Technical model name, e.g. "res.partner".
    model: String,
    /// Search domain as JSON text, Python-literal text, or a native list.
    domain: Option<Value>,
    /// Fields as a CSV string, JSON list text, or native list.
    fields: Option<Value>,
    limit: Option<i64>,
    offset: Option<i64>,
    /// Sort specification, e.g. "name desc".
    order: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct GetRecordArgs {
    model: String,
    record_id: i64,
    /// Explicit field list; smart defaults are used when omitted.
    fields: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
struct ListModelsArgs {}

#[derive(Deserialize, JsonSchema)]
struct CreateRecordArgs {
    model: String,
    /// Field values for the new record.
    values: Map<String, Value>,
}

#[derive(Deserialize, JsonSchema)]
struct UpdateRecordArgs {
    model: String,
    record_id: i64,
    /// Field values to write.
    values: Map<String, Value>,
}

#[derive(Deserialize, JsonSchema)]
struct DeleteRecordArgs {
    model: String,
    record_id: i64,
}

#[derive(Deserialize, JsonSchema)]
struct ListResourceTemplatesArgs {}

#[derive(Deserialize, JsonSchema)]
struct CreateQuotationArgs {
    customer_id: i64,
    /// Lines of `{product_id, quantity, price_unit?}`.
    product_lines: Vec<Value>,
    /// Order date as YYYY-MM-DD.
    order_date: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct ConfirmQuotationArgs {
    quotation_id: i64,
}

#[derive(Deserialize, JsonSchema)]
struct CreateManufacturingOrderArgs {
    product_id: i64,
    quantity: f64,
    /// Source document reference, e.g. a sales order name.
    origin: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct ConfirmManufacturingOrderArgs {
    mo_id: i64,
}

#[derive(Deserialize, JsonSchema)]
struct CreatePurchaseOrderArgs {
    vendor_id: i64,
    /// Lines of `{product_id, quantity, price_unit}`.
    product_lines: Vec<Value>,
}

#[derive(Deserialize, JsonSchema)]
struct ConfirmPurchaseOrderArgs {
    po_id: i64,
}

#[derive(Deserialize, JsonSchema)]
struct ReceiveInventoryArgs {
    picking_id: Option<i64>,
    /// Purchase order name, e.g. "P00016".
    po_name: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct DeliverToCustomerArgs {
    picking_id: Option<i64>,
    /// Sales order name, e.g. "S00276".
    so_name: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct CreateBomArgs {
    product_id: i64,
    /// Lines of `{product_id, quantity}`.
    component_lines: Vec<Value>,
    /// BOM type: "normal", "phantom", or "subcontract".
    bom_type: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct GetWorkflowStatusArgs {
    order_id: i64,
    /// "sale", "purchase", or "manufacturing".
    order_type: Option<String>,
}

// --- the server ----------------------------------------------------------

pub struct OdooMcpServer {
    config: Arc<Config>,
    connection: Arc<Connection>,
    access: Arc<AccessController>,
    resources: ResourceHandler,
    tools: ToolHandler,
    workflows: WorkflowHandler,
    tool_definitions: Vec<ToolDefinition>,
}

impl OdooMcpServer {
    /// Wire up all components over the real transport.
    ///
    /// # Errors
    ///
    /// Fails when an HTTP client cannot be constructed.
    pub fn new(config: Arc<Config>) -> Result<Self, ServiceError> {
        let connection = Arc::new(Connection::new(config.clone())?);
        Self::wire(config, connection)
    }

    /// Wire up over an injected connection (tests use mock transports).
    pub fn with_connection(
        config: Arc<Config>,
        connection: Arc<Connection>,
    ) -> Result<Self, ServiceError> {
        Self::wire(config, connection)
    }

    fn wire(config: Arc<Config>, connection: Arc<Connection>) -> Result<Self, ServiceError> {
        let access = Arc::new(AccessController::new(config.clone())?);
        let resources =
            ResourceHandler::new(connection.clone(), access.clone(), config.clone());
        let tools = ToolHandler::new(connection.clone(), access.clone(), config.clone());
        let workflows =
            WorkflowHandler::new(connection.clone(), access.clone(), config.clone());

        Ok(Self {
            config,
            connection,
            access,
            resources,
            tools,
            workflows,
            tool_definitions: build_tool_definitions(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Connect and authenticate; called once before serving.
    pub async fn startup(&self) -> Result<(), ServiceError> {
        self.connection.connect().await?;
        self.connection.authenticate().await?;
        if let Some(database) = self.connection.database() {
            self.access.set_database(database);
        }
        tracing::info!(transport = %self.config.transport, "Odoo MCP server ready");
        Ok(())
    }

    /// Tear the session down; safe to call on every exit path.
    pub fn shutdown(&self) {
        self.connection.disconnect();
    }

    /// Health payload for the HTTP transport.
    pub fn health(&self) -> Value {
        let connected = self.connection.is_connected() && self.connection.is_authenticated();
        let mut connection = json!({ "connected": connected });
        if let Some(database) = self.connection.database() {
            connection["database"] = json!(database);
        }
        json!({
            "status": if connected { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "connection": connection,
        })
    }

    /// Handle one JSON-RPC request. Notifications yield `None`.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: &LogContext,
    ) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }
        let id = request.id.clone().expect("checked above");

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {},
                        "resources": {},
                        "logging": {},
                    },
                    "serverInfo": {
                        "name": "odoo-mcp",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                JsonRpcResponse::success(id, json!({ "tools": self.tool_definitions }))
            }
            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let ctx = match request.params.pointer("/_meta/progressToken") {
                    Some(token) => ctx.clone().with_progress_token(token.clone()),
                    None => ctx.clone(),
                };

                let result = self.call_tool(&name, arguments, &ctx).await;
                JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
            }
            "resources/list" => self.handle_resources_list(id).await,
            "resources/read" => self.handle_resources_read(id, &request.params).await,
            "resources/templates/list" => JsonRpcResponse::success(
                id,
                json!({ "resourceTemplates": self.tools.list_resource_templates() }),
            ),
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };

        Some(response)
    }

    async fn handle_resources_list(&self, id: crate::protocol::RequestId) -> JsonRpcResponse {
        let resources: Vec<Value> = match self.access.get_enabled_models().await {
            Ok(models) => models
                .iter()
                .map(|entry| {
                    json!({
                        "uri": format!("odoo://{}", entry.model),
                        "name": entry.name,
                        "mimeType": "text/plain",
                    })
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate enabled models");
                Vec::new()
            }
        };
        JsonRpcResponse::success(id, json!({ "resources": resources }))
    }

    async fn handle_resources_read(
        &self,
        id: crate::protocol::RequestId,
        params: &Value,
    ) -> JsonRpcResponse {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return JsonRpcResponse::error(id, JsonRpcError::invalid_params("missing 'uri'"));
        };

        match self.resources.read_uri(uri).await {
            Ok(text) => JsonRpcResponse::success(
                id,
                json!({ "contents": [ResourceContents::text(uri, text)] }),
            ),
            Err(e) => {
                // Resource reads raise through the protocol, unlike tools.
                let message = format!("{}: {}", e.status_label(), e);
                let error = if e.status_code() == 400 {
                    JsonRpcError::invalid_params(message)
                } else {
                    JsonRpcError::internal_error(message)
                };
                JsonRpcResponse::error(id, error)
            }
        }
    }

    /// Dispatch one tool call; every failure becomes an error envelope.
    pub async fn call_tool(&self, name: &str, arguments: Value, ctx: &LogContext) -> ToolResult {
        match self.dispatch_tool(name, arguments, ctx).await {
            Ok(result) => result,
            Err(e) => {
                if e.status_code() >= 500 {
                    tracing::error!(tool = name, error = %e, "tool failed");
                } else {
                    tracing::debug!(tool = name, error = %e, "tool rejected");
                }
                ToolResult::error(format!("{}: {}", e.status_label(), e))
            }
        }
    }

    async fn dispatch_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: &LogContext,
    ) -> Result<ToolResult, ServiceError> {
        fn parse<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ServiceError> {
            serde_json::from_value(arguments)
                .map_err(|e| ServiceError::validation(format!("Invalid arguments: {e}")))
        }

        let result = match name {
            "search_records" => {
                let args: SearchRecordsArgs = parse(arguments)?;
                let envelope = self
                    .tools
                    .search_records(
                        &args.model,
                        args.domain.as_ref(),
                        args.fields.as_ref(),
                        args.limit,
                        args.offset,
                        args.order.as_deref(),
                        ctx,
                    )
                    .await?;
                to_tool_result(&envelope)?
            }
            "get_record" => {
                let args: GetRecordArgs = parse(arguments)?;
                let envelope = self
                    .tools
                    .get_record(&args.model, args.record_id, args.fields, ctx)
                    .await?;
                to_tool_result(&envelope)?
            }
            "list_models" => {
                let _args: ListModelsArgs = parse(arguments)?;
                to_tool_result(&self.tools.list_models().await?)?
            }
            "create_record" => {
                let args: CreateRecordArgs = parse(arguments)?;
                to_tool_result(
                    &self
                        .tools
                        .create_record(&args.model, args.values, ctx)
                        .await?,
                )?
            }
            "update_record" => {
                let args: UpdateRecordArgs = parse(arguments)?;
                to_tool_result(
                    &self
                        .tools
                        .update_record(&args.model, args.record_id, args.values, ctx)
                        .await?,
                )?
            }
            "delete_record" => {
                let args: DeleteRecordArgs = parse(arguments)?;
                to_tool_result(
                    &self
                        .tools
                        .delete_record(&args.model, args.record_id, ctx)
                        .await?,
                )?
            }
            "list_resource_templates" => {
                let _args: ListResourceTemplatesArgs = parse(arguments)?;
                ToolResult::json(json!({
                    "templates": self.tools.list_resource_templates(),
                }))
            }
            "create_quotation" => {
                let args: CreateQuotationArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .create_quotation(
                            args.customer_id,
                            &args.product_lines,
                            args.order_date.as_deref(),
                            ctx,
                        )
                        .await?,
                )
            }
            "confirm_quotation" => {
                let args: ConfirmQuotationArgs = parse(arguments)?;
                ToolResult::json(self.workflows.confirm_quotation(args.quotation_id, ctx).await?)
            }
            "create_manufacturing_order" => {
                let args: CreateManufacturingOrderArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .create_manufacturing_order(
                            args.product_id,
                            args.quantity,
                            args.origin.as_deref(),
                            ctx,
                        )
                        .await?,
                )
            }
            "confirm_manufacturing_order" => {
                let args: ConfirmManufacturingOrderArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .confirm_manufacturing_order(args.mo_id, ctx)
                        .await?,
                )
            }
            "create_purchase_order" => {
                let args: CreatePurchaseOrderArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .create_purchase_order(args.vendor_id, &args.product_lines, ctx)
                        .await?,
                )
            }
            "confirm_purchase_order" => {
                let args: ConfirmPurchaseOrderArgs = parse(arguments)?;
                ToolResult::json(self.workflows.confirm_purchase_order(args.po_id, ctx).await?)
            }
            "receive_inventory" => {
                let args: ReceiveInventoryArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .receive_inventory(args.picking_id, args.po_name.as_deref(), ctx)
                        .await?,
                )
            }
            "deliver_to_customer" => {
                let args: DeliverToCustomerArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .deliver_to_customer(args.picking_id, args.so_name.as_deref(), ctx)
                        .await?,
                )
            }
            "create_bom" => {
                let args: CreateBomArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .create_bom(
                            args.product_id,
                            &args.component_lines,
                            args.bom_type.as_deref().unwrap_or("normal"),
                            ctx,
                        )
                        .await?,
                )
            }
            "get_workflow_status" => {
                let args: GetWorkflowStatusArgs = parse(arguments)?;
                ToolResult::json(
                    self.workflows
                        .get_workflow_status(
                            args.order_id,
                            args.order_type.as_deref().unwrap_or("sale"),
                            ctx,
                        )
                        .await?,
                )
            }
            other => {
                return Err(ServiceError::validation(format!("Unknown tool: {other}")))
            }
        };

        Ok(result)
    }
}

fn to_tool_result<T: serde::Serialize>(envelope: &T) -> Result<ToolResult, ServiceError> {
    let value = serde_json::to_value(envelope)
        .map_err(|e| ServiceError::Internal(format!("Could not serialize result: {e}")))?;
    Ok(ToolResult::json(value))
}

fn definition<Args: JsonSchema>(name: &str, description: &str) -> ToolDefinition {
    let mut schema =
        serde_json::to_value(schemars::schema_for!(Args)).unwrap_or_else(|_| json!({}));
    sanitize_schema(&mut schema);
    ToolDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema,
    }
}

fn build_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        definition::<SearchRecordsArgs>(
            "search_records",
            "Search records of an Odoo model with domain, fields, limit, offset, and order",
        ),
        definition::<GetRecordArgs>(
            "get_record",
            "Fetch one record by ID, with smart-default or explicit field selection",
        ),
        definition::<ListModelsArgs>(
            "list_models",
            "List the Odoo models enabled for MCP access and their permitted operations",
        ),
        definition::<CreateRecordArgs>("create_record", "Create a record in an Odoo model"),
        definition::<UpdateRecordArgs>("update_record", "Update fields of an existing record"),
        definition::<DeleteRecordArgs>("delete_record", "Delete a record by ID"),
        definition::<ListResourceTemplatesArgs>(
            "list_resource_templates",
            "List the odoo:// resource URI templates this server understands",
        ),
        definition::<CreateQuotationArgs>(
            "create_quotation",
            "Create a sales quotation with order lines",
        ),
        definition::<ConfirmQuotationArgs>(
            "confirm_quotation",
            "Confirm a draft quotation into a sales order",
        ),
        definition::<CreateManufacturingOrderArgs>(
            "create_manufacturing_order",
            "Create a manufacturing order for a product (requires MRP)",
        ),
        definition::<ConfirmManufacturingOrderArgs>(
            "confirm_manufacturing_order",
            "Confirm a manufacturing order and reserve raw materials",
        ),
        definition::<CreatePurchaseOrderArgs>(
            "create_purchase_order",
            "Create a purchase order with priced lines",
        ),
        definition::<ConfirmPurchaseOrderArgs>(
            "confirm_purchase_order",
            "Confirm a purchase order, creating its incoming shipment",
        ),
        definition::<ReceiveInventoryArgs>(
            "receive_inventory",
            "Validate an incoming shipment by picking ID or purchase order name",
        ),
        definition::<DeliverToCustomerArgs>(
            "deliver_to_customer",
            "Validate an outgoing delivery by picking ID or sales order name",
        ),
        definition::<CreateBomArgs>(
            "create_bom",
            "Create a Bill of Materials for a product (requires MRP)",
        ),
        definition::<GetWorkflowStatusArgs>(
            "get_workflow_status",
            "Trace an order and its related documents through the workflow",
        ),
    ]
}
