//! Business workflow tools.
//!
//! Multi-step ERP transitions composed over the connection: quotations,
//! purchase orders, manufacturing, stock movements, and BOMs. Steps that
//! the ERP may route through a UI wizard (`action_assign`,
//! `button_validate`) are attempted and their failures logged, never
//! propagated; confirmation still succeeds without them.
//!
//! Workflows always return a structured payload with `success`, a
//! `message`, and a backend `url`; access denials surface as validation
//! errors here, matching the tool contract the clients already rely on.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use odoo_mcp_core::{Config, Domain, DomainItem, ServiceError};

use crate::access::AccessController;
use crate::connection::Connection;
use crate::handlers::LogContext;

pub struct WorkflowHandler {
    connection: Arc<Connection>,
    access: Arc<AccessController>,
    #[allow(dead_code)]
    config: Arc<Config>,
}

impl WorkflowHandler {
    pub fn new(
        connection: Arc<Connection>,
        access: Arc<AccessController>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            connection,
            access,
            config,
        }
    }

    // --- sales -----------------------------------------------------------

    /// Create a sales quotation with order lines.
    pub async fn create_quotation(
        &self,
        customer_id: i64,
        product_lines: &[Value],
        order_date: Option<&str>,
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self.connection.perf().track("workflow_create_quotation");
        self.gate("sale.order", "create").await?;

        self.read_one("res.partner", customer_id, &["name"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Customer with ID {customer_id} not found"))
            })?;

        let order_lines = build_order_lines(product_lines, "product_uom_qty", false)?;

        let mut values = Map::new();
        values.insert("partner_id".into(), json!(customer_id));
        values.insert("order_line".into(), Value::Array(order_lines));
        if let Some(date) = order_date {
            values.insert("date_order".into(), json!(date));
        }

        let quotation_id = self
            .create_checked("sale.order", values)
            .await?;

        let quotation = self
            .read_one(
                "sale.order",
                quotation_id,
                &["name", "id", "state", "amount_total", "partner_id"],
            )
            .await?
            .unwrap_or_default();

        let name = quotation["name"].as_str().unwrap_or_default().to_string();
        Ok(json!({
            "success": true,
            "quotation_id": quotation_id,
            "quotation_name": name,
            "customer": quotation["partner_id"][1],
            "total": quotation["amount_total"],
            "state": quotation["state"],
            "url": self.connection.build_record_url("sale.order", quotation_id),
            "message": format!("Successfully created quotation {name}"),
        }))
    }

    /// Confirm a draft quotation into a sales order.
    pub async fn confirm_quotation(
        &self,
        quotation_id: i64,
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self.connection.perf().track("workflow_confirm_quotation");
        self.gate("sale.order", "write").await?;

        let quotation = self
            .read_one("sale.order", quotation_id, &["name", "state", "amount_total"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Quotation with ID {quotation_id} not found"))
            })?;

        let name = quotation["name"].as_str().unwrap_or_default();
        let state = quotation["state"].as_str().unwrap_or_default();
        if state != "draft" {
            return Err(ServiceError::validation(format!(
                "Quotation {name} is in state '{state}', cannot confirm (must be 'draft')"
            )));
        }

        self.run("sale.order", "action_confirm", quotation_id).await?;

        let updated = self
            .read_one("sale.order", quotation_id, &["name", "state", "amount_total"])
            .await?
            .unwrap_or_default();
        let name = updated["name"].as_str().unwrap_or_default().to_string();

        Ok(json!({
            "success": true,
            "order_id": quotation_id,
            "order_name": name,
            "state": updated["state"],
            "total": updated["amount_total"],
            "url": self.connection.build_record_url("sale.order", quotation_id),
            "message": format!("Successfully confirmed quotation {name} into a sales order"),
        }))
    }

    // --- manufacturing ---------------------------------------------------

    /// Create a manufacturing order. Requires the MRP module.
    pub async fn create_manufacturing_order(
        &self,
        product_id: i64,
        quantity: f64,
        origin: Option<&str>,
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self
            .connection
            .perf()
            .track("workflow_create_manufacturing_order");
        self.gate_mrp("mrp.production", "create").await?;

        self.read_one("product.product", product_id, &["name"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Product with ID {product_id} not found"))
            })?;

        let mut values = Map::new();
        values.insert("product_id".into(), json!(product_id));
        values.insert("product_qty".into(), json!(quantity));
        if let Some(origin) = origin {
            values.insert("origin".into(), json!(origin));
        }

        let mo_id = self.create_checked("mrp.production", values).await?;

        let mo = self
            .read_one(
                "mrp.production",
                mo_id,
                &["name", "id", "state", "product_qty", "product_id"],
            )
            .await?
            .unwrap_or_default();
        let name = mo["name"].as_str().unwrap_or_default().to_string();

        Ok(json!({
            "success": true,
            "mo_id": mo_id,
            "mo_name": name,
            "product": mo["product_id"][1],
            "quantity": mo["product_qty"],
            "state": mo["state"],
            "url": self.connection.build_record_url("mrp.production", mo_id),
            "message": format!("Successfully created manufacturing order {name}"),
        }))
    }

    /// Confirm a manufacturing order and try to reserve materials.
    pub async fn confirm_manufacturing_order(
        &self,
        mo_id: i64,
        ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self
            .connection
            .perf()
            .track("workflow_confirm_manufacturing_order");
        self.gate("mrp.production", "write").await?;

        self.read_one("mrp.production", mo_id, &["name", "state"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Manufacturing order with ID {mo_id} not found"))
            })?;

        self.run("mrp.production", "action_confirm", mo_id).await?;

        // Material reservation may need stock the warehouse doesn't have;
        // the confirmation stands either way.
        if let Err(e) = self.run("mrp.production", "action_assign", mo_id).await {
            ctx.warning(format!("Could not auto-assign materials: {e}"));
        }

        let updated = self
            .read_one("mrp.production", mo_id, &["name", "state", "product_qty"])
            .await?
            .unwrap_or_default();
        let name = updated["name"].as_str().unwrap_or_default().to_string();

        Ok(json!({
            "success": true,
            "mo_id": mo_id,
            "mo_name": name,
            "state": updated["state"],
            "quantity": updated["product_qty"],
            "url": self.connection.build_record_url("mrp.production", mo_id),
            "message": format!("Successfully confirmed manufacturing order {name}"),
        }))
    }

    // --- purchasing ------------------------------------------------------

    /// Create a purchase order. Purchase lines must carry a price.
    pub async fn create_purchase_order(
        &self,
        vendor_id: i64,
        product_lines: &[Value],
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self
            .connection
            .perf()
            .track("workflow_create_purchase_order");
        self.gate("purchase.order", "create").await?;

        self.read_one("res.partner", vendor_id, &["name"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Vendor with ID {vendor_id} not found"))
            })?;

        let order_lines = build_order_lines(product_lines, "product_qty", true)?;

        let mut values = Map::new();
        values.insert("partner_id".into(), json!(vendor_id));
        values.insert("order_line".into(), Value::Array(order_lines));

        let po_id = self.create_checked("purchase.order", values).await?;

        let po = self
            .read_one(
                "purchase.order",
                po_id,
                &["name", "id", "state", "amount_total", "partner_id"],
            )
            .await?
            .unwrap_or_default();
        let name = po["name"].as_str().unwrap_or_default().to_string();

        Ok(json!({
            "success": true,
            "po_id": po_id,
            "po_name": name,
            "vendor": po["partner_id"][1],
            "total": po["amount_total"],
            "state": po["state"],
            "url": self.connection.build_record_url("purchase.order", po_id),
            "message": format!("Successfully created purchase order {name}"),
        }))
    }

    /// Confirm a purchase order, creating its incoming shipment.
    pub async fn confirm_purchase_order(
        &self,
        po_id: i64,
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self
            .connection
            .perf()
            .track("workflow_confirm_purchase_order");
        self.gate("purchase.order", "write").await?;

        self.read_one("purchase.order", po_id, &["name", "state"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Purchase order with ID {po_id} not found"))
            })?;

        self.run("purchase.order", "button_confirm", po_id).await?;

        let updated = self
            .read_one("purchase.order", po_id, &["name", "state", "amount_total"])
            .await?
            .unwrap_or_default();
        let name = updated["name"].as_str().unwrap_or_default().to_string();

        Ok(json!({
            "success": true,
            "po_id": po_id,
            "po_name": name,
            "state": updated["state"],
            "total": updated["amount_total"],
            "url": self.connection.build_record_url("purchase.order", po_id),
            "message": format!("Successfully confirmed purchase order {name}"),
        }))
    }

    // --- stock -----------------------------------------------------------

    /// Validate an incoming shipment, by picking id or purchase order name.
    pub async fn receive_inventory(
        &self,
        picking_id: Option<i64>,
        po_name: Option<&str>,
        ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self.connection.perf().track("workflow_receive_inventory");
        self.validate_picking(
            picking_id,
            po_name,
            "incoming",
            "po_name",
            "No incoming shipment found for purchase order",
            "Successfully received inventory",
            ctx,
        )
        .await
    }

    /// Validate an outgoing delivery, by picking id or sales order name.
    pub async fn deliver_to_customer(
        &self,
        picking_id: Option<i64>,
        so_name: Option<&str>,
        ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self.connection.perf().track("workflow_deliver_to_customer");
        self.validate_picking(
            picking_id,
            so_name,
            "outgoing",
            "so_name",
            "No outgoing delivery found for sales order",
            "Successfully delivered to customer",
            ctx,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn validate_picking(
        &self,
        picking_id: Option<i64>,
        origin_name: Option<&str>,
        picking_type: &str,
        name_param: &str,
        missing_message: &str,
        success_message: &str,
        ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        self.gate("stock.picking", "write").await?;

        let picking_id = match (picking_id, origin_name) {
            (Some(id), None) => id,
            (None, Some(origin)) => {
                let domain = Domain::from(vec![
                    DomainItem::condition("origin", "=", origin),
                    DomainItem::condition("picking_type_code", "=", picking_type),
                ]);
                let found = self
                    .connection
                    .search("stock.picking", &domain, Some(1), None, None)
                    .await
                    .map_err(rewrap_connection)?;
                *found.first().ok_or_else(|| {
                    ServiceError::not_found(format!("{missing_message} {origin}"))
                })?
            }
            (Some(_), Some(_)) => {
                return Err(ServiceError::validation(format!(
                    "Provide either picking_id or {name_param}, not both"
                )))
            }
            (None, None) => {
                return Err(ServiceError::validation(format!(
                    "Either picking_id or {name_param} must be provided"
                )))
            }
        };

        self.read_one("stock.picking", picking_id, &["name", "state", "origin"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Stock picking with ID {picking_id} not found"))
            })?;

        // Reservation and validation may require a UI wizard (backorders,
        // lot numbers); treat failures as warnings.
        if let Err(e) = self.run("stock.picking", "action_assign", picking_id).await {
            ctx.warning(format!("Validation may require UI: {e}"));
        } else if let Err(e) = self
            .run("stock.picking", "button_validate", picking_id)
            .await
        {
            ctx.warning(format!("Validation may require UI: {e}"));
        }

        let updated = self
            .read_one("stock.picking", picking_id, &["name", "state", "origin"])
            .await?
            .unwrap_or_default();
        let name = updated["name"].as_str().unwrap_or_default().to_string();

        Ok(json!({
            "success": true,
            "picking_id": picking_id,
            "picking_name": name,
            "origin": updated["origin"],
            "state": updated["state"],
            "url": self.connection.build_record_url("stock.picking", picking_id),
            "message": format!("{success_message}: {name}"),
        }))
    }

    // --- BOM -------------------------------------------------------------

    /// Create a Bill of Materials. Requires the MRP module.
    pub async fn create_bom(
        &self,
        product_id: i64,
        component_lines: &[Value],
        bom_type: &str,
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self.connection.perf().track("workflow_create_bom");
        self.gate_mrp("mrp.bom", "create").await?;

        let product = self
            .read_one("product.product", product_id, &["name", "product_tmpl_id"])
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("Product with ID {product_id} not found"))
            })?;

        // BOMs attach to the product template, not the variant.
        let template_id = product["product_tmpl_id"][0].as_i64().ok_or_else(|| {
            ServiceError::validation(format!(
                "Product {product_id} has no template; cannot create a BOM"
            ))
        })?;

        let bom_lines = build_order_lines(component_lines, "product_qty", false)?;

        let mut values = Map::new();
        values.insert("product_tmpl_id".into(), json!(template_id));
        values.insert("product_qty".into(), json!(1.0));
        values.insert("type".into(), json!(bom_type));
        values.insert("bom_line_ids".into(), Value::Array(bom_lines));

        let bom_id = self.create_checked("mrp.bom", values).await?;

        let bom = self
            .read_one(
                "mrp.bom",
                bom_id,
                &["id", "product_tmpl_id", "product_qty", "type"],
            )
            .await?
            .unwrap_or_default();

        let product_name = product["name"].as_str().unwrap_or_default().to_string();
        Ok(json!({
            "success": true,
            "bom_id": bom_id,
            "product": product_name,
            "product_id": product_id,
            "template_id": template_id,
            "components_count": component_lines.len(),
            "type": bom["type"],
            "url": self.connection.build_record_url("mrp.bom", bom_id),
            "message": format!("Successfully created BOM for {product_name}"),
        }))
    }

    // --- status ----------------------------------------------------------

    /// Trace an order through its lifecycle. Related documents from modules
    /// that are not installed are silently omitted.
    pub async fn get_workflow_status(
        &self,
        order_id: i64,
        order_type: &str,
        _ctx: &LogContext,
    ) -> Result<Value, ServiceError> {
        let _timer = self.connection.perf().track("workflow_get_status");

        let mut status = json!({
            "order_type": order_type,
            "order_id": order_id,
        });

        match order_type {
            "sale" => {
                self.gate("sale.order", "read").await?;
                let order = self
                    .read_one(
                        "sale.order",
                        order_id,
                        &["name", "state", "amount_total", "partner_id"],
                    )
                    .await?
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "Sales order with ID {order_id} not found"
                        ))
                    })?;
                let order_name = order["name"].as_str().unwrap_or_default().to_string();
                status["order"] = order;

                if let Some(mos) = self
                    .related_records(
                        "mrp.production",
                        &order_name,
                        None,
                        &["name", "state", "product_qty"],
                    )
                    .await
                {
                    status["manufacturing_orders"] = mos;
                }
                if let Some(pickings) = self
                    .related_records(
                        "stock.picking",
                        &order_name,
                        Some("outgoing"),
                        &["name", "state"],
                    )
                    .await
                {
                    status["deliveries"] = pickings;
                }
            }
            "purchase" => {
                self.gate("purchase.order", "read").await?;
                let order = self
                    .read_one(
                        "purchase.order",
                        order_id,
                        &["name", "state", "amount_total", "partner_id"],
                    )
                    .await?
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "Purchase order with ID {order_id} not found"
                        ))
                    })?;
                let order_name = order["name"].as_str().unwrap_or_default().to_string();
                status["order"] = order;

                if let Some(pickings) = self
                    .related_records(
                        "stock.picking",
                        &order_name,
                        Some("incoming"),
                        &["name", "state"],
                    )
                    .await
                {
                    status["receipts"] = pickings;
                }
            }
            "manufacturing" => {
                self.gate("mrp.production", "read").await?;
                let order = self
                    .read_one(
                        "mrp.production",
                        order_id,
                        &["name", "state", "product_qty", "product_id", "origin"],
                    )
                    .await?
                    .ok_or_else(|| {
                        ServiceError::not_found(format!(
                            "Manufacturing order with ID {order_id} not found"
                        ))
                    })?;
                status["order"] = order;
            }
            other => {
                return Err(ServiceError::validation(format!(
                    "Invalid order_type: {other}. Must be 'sale', 'purchase', or 'manufacturing'"
                )))
            }
        }

        Ok(status)
    }

    /// Search documents whose `origin` references the order; `None` when
    /// the search fails (module missing) or nothing matches.
    async fn related_records(
        &self,
        model: &str,
        origin: &str,
        picking_type: Option<&str>,
        fields: &[&str],
    ) -> Option<Value> {
        let mut items = vec![DomainItem::condition("origin", "=", origin)];
        if let Some(code) = picking_type {
            items.push(DomainItem::condition("picking_type_code", "=", code));
        }
        let domain = Domain::from(items);

        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        match self
            .connection
            .search_read(model, &domain, Some(&fields), None, None, None)
            .await
        {
            Ok(records) if !records.is_empty() => Some(Value::Array(records)),
            _ => None,
        }
    }

    // --- shared plumbing -------------------------------------------------

    async fn gate(&self, model: &str, op: &str) -> Result<(), ServiceError> {
        self.access
            .validate_model_access(model, op)
            .await
            .map_err(|e| ServiceError::validation(format!("Access denied: {e}")))
    }

    /// MRP models get a friendlier denial: the usual cause is that the
    /// Manufacturing app simply is not installed.
    async fn gate_mrp(&self, model: &str, op: &str) -> Result<(), ServiceError> {
        self.access.validate_model_access(model, op).await.map_err(|_| {
            ServiceError::validation(
                "MRP (Manufacturing) module not installed or not accessible. \
                 Install the Manufacturing app in Odoo first.",
            )
        })
    }

    async fn read_one(
        &self,
        model: &str,
        id: i64,
        fields: &[&str],
    ) -> Result<Option<Value>, ServiceError> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let records = self
            .connection
            .read(model, &[id], Some(&fields))
            .await
            .map_err(rewrap_connection)?;
        Ok(records.into_iter().next())
    }

    async fn create_checked(
        &self,
        model: &str,
        values: Map<String, Value>,
    ) -> Result<i64, ServiceError> {
        self.connection
            .create(model, values)
            .await
            .map_err(rewrap_connection)
    }

    async fn run(&self, model: &str, action: &str, id: i64) -> Result<Value, ServiceError> {
        self.connection.execute(model, action, &[id]).await
    }
}

/// Workflow tools answer with validation errors, not 503s.
fn rewrap_connection(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::Connection(msg) => {
            ServiceError::validation(format!("Connection error: {msg}"))
        }
        other => other,
    }
}

/// Convert `{product_id, quantity, price_unit?}` lines into Odoo's
/// `(0, 0, values)` one2many command triples.
fn build_order_lines(
    lines: &[Value],
    quantity_field: &str,
    require_price: bool,
) -> Result<Vec<Value>, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::validation(
            "At least one product line is required",
        ));
    }

    let mut commands = Vec::with_capacity(lines.len());
    for line in lines {
        let product_id = line.get("product_id").and_then(Value::as_i64);
        let quantity = line.get("quantity").and_then(Value::as_f64);

        let (Some(product_id), Some(quantity)) = (product_id, quantity) else {
            return Err(ServiceError::validation(
                "Each product line must have 'product_id' and 'quantity'",
            ));
        };

        let price_unit = line.get("price_unit").and_then(Value::as_f64);
        if require_price && price_unit.is_none() {
            return Err(ServiceError::validation(
                "Each product line must have 'product_id', 'quantity', and 'price_unit'",
            ));
        }

        let mut data = Map::new();
        data.insert("product_id".into(), json!(product_id));
        data.insert(quantity_field.into(), json!(quantity));
        if let Some(price) = price_unit {
            data.insert("price_unit".into(), json!(price));
        }

        commands.push(json!([0, 0, data]));
    }
    Ok(commands)
}
