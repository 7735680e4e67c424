use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::aggregator::{aggregate, Delivery, ImpactAggregator, ImpactRow, ImpactSummary};
use super::records::{ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord, SpoolRecord};
use super::store::LineageStore;
use super::warnings::{self, DataWarning, WarningKind};
use super::{distinct_ids, TraceabilityChain};
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippedSerial {
    pub serial_number: String,
    /// Null while the unit is still in stock
    pub sales_order_id: Option<Uuid>,
}

/// One usage row of the traced spool and everything downstream of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForwardUsage {
    pub usage_id: Uuid,
    pub production_order_id: Uuid,
    /// Null when the usage row points at a production order that does not exist
    pub production_order: Option<ProductionOrderRecord>,
    pub weight_consumed: Decimal,
    /// Sales order the production order was built for; null for stock builds
    pub sales_order: Option<SalesOrderRecord>,
    /// True when the output has neither a linked sale nor any shipped serial
    pub in_inventory: bool,
    pub serial_numbers: Vec<ShippedSerial>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForwardTraceResult {
    pub spool: SpoolRecord,
    pub purchase_info: Option<PurchaseOrigin>,
    pub usage: Vec<ForwardUsage>,
    /// Every distinct sales order reached, through the order link or a shipped serial
    pub sales_orders: Vec<SalesOrderRecord>,
    pub summary: ImpactSummary,
    pub traceability_chain: TraceabilityChain,
    pub warnings: Vec<DataWarning>,
    #[serde(skip)]
    pub(crate) impact: ImpactAggregator,
}

impl ForwardTraceResult {
    /// Identity sets behind [`summary`](Self::summary), ready to merge.
    pub fn impact(&self) -> &ImpactAggregator {
        &self.impact
    }
}

/// Follows a spool downstream: production orders, sales orders, customers, serials.
#[derive(Clone)]
pub struct ForwardTracer {
    store: Arc<dyn LineageStore>,
}

impl ForwardTracer {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn trace(&self, spool_id: Uuid) -> Result<ForwardTraceResult, ServiceError> {
        let started = Instant::now();

        let spool = self
            .store
            .spool(spool_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Spool {} not found", spool_id)))?;

        let purchase_info = self.store.purchase_origins(&[spool.id]).await?.remove(&spool.id);
        let mut usages = self.store.usages_for_spools(&[spool.id]).await?;
        warnings::ensure_non_negative(&usages)?;

        let mut warnings = warnings::weight_warnings(&spool, &usages);
        let mut missing_links = Vec::new();

        if purchase_info.is_none() {
            warnings.push(DataWarning::new(
                WarningKind::MissingPurchaseOrigin,
                spool.id,
                format!("Spool {} has no purchase order origin", spool.spool_number),
            ));
            missing_links.push(format!("spool {} -> purchase order", spool.spool_number));
        }

        let production_order_ids = distinct_ids(usages.iter().map(|u| u.production_order_id));
        let production_orders: HashMap<Uuid, ProductionOrderRecord> = self
            .store
            .production_orders(&production_order_ids)
            .await?
            .into_iter()
            .map(|order| (order.id, order))
            .collect();

        let serials = self
            .store
            .serials_for_production_orders(&production_order_ids)
            .await?;

        let sales_order_ids = distinct_ids(
            production_orders
                .values()
                .filter_map(|order| order.sales_order_id)
                .chain(serials.iter().filter_map(|serial| serial.sales_order_id)),
        );
        let sales_orders: HashMap<Uuid, SalesOrderRecord> = self
            .store
            .sales_orders(&sales_order_ids)
            .await?
            .into_iter()
            .map(|order| (order.id, order))
            .collect();

        for sales_order_id in sales_order_ids.iter().filter(|id| !sales_orders.contains_key(id)) {
            warnings.push(DataWarning::new(
                WarningKind::MissingSalesOrder,
                *sales_order_id,
                format!("Sales order {} is referenced but does not exist", sales_order_id),
            ));
            missing_links.push(format!("sales order {}", sales_order_id));
        }

        let mut serials_by_order: HashMap<Uuid, Vec<ShippedSerial>> = HashMap::new();
        for serial in serials {
            serials_by_order
                .entry(serial.production_order_id)
                .or_default()
                .push(ShippedSerial {
                    serial_number: serial.serial_number,
                    sales_order_id: serial.sales_order_id,
                });
        }
        for shipped in serials_by_order.values_mut() {
            shipped.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        }

        usages.sort_by(|a, b| {
            let code_a = production_orders.get(&a.production_order_id).map(|o| &o.code);
            let code_b = production_orders.get(&b.production_order_id).map(|o| &o.code);
            code_a.cmp(&code_b).then(a.id.cmp(&b.id))
        });

        let delivery_for = |id: Uuid| {
            sales_orders.get(&id).map(|order| Delivery {
                sales_order_id: order.id,
                customer_id: order.customer.id,
            })
        };

        let mut entries = Vec::with_capacity(usages.len());
        let mut rows = Vec::with_capacity(usages.len());
        for usage in &usages {
            let order = production_orders.get(&usage.production_order_id);
            if order.is_none() {
                warnings.push(DataWarning::new(
                    WarningKind::MissingProductionOrder,
                    usage.production_order_id,
                    format!(
                        "Usage {} references production order {} which does not exist",
                        usage.id, usage.production_order_id
                    ),
                ));
                missing_links.push(format!(
                    "usage {} -> production order {}",
                    usage.id, usage.production_order_id
                ));
            }

            let sales_order = order
                .and_then(|o| o.sales_order_id)
                .and_then(|id| sales_orders.get(&id))
                .cloned();
            let shipped = serials_by_order
                .get(&usage.production_order_id)
                .cloned()
                .unwrap_or_default();

            let deliveries: Vec<Delivery> = order
                .and_then(|o| o.sales_order_id)
                .into_iter()
                .chain(shipped.iter().filter_map(|s| s.sales_order_id))
                .filter_map(delivery_for)
                .collect();

            let in_inventory = order.map_or(false, |o| o.sales_order_id.is_none())
                && shipped.iter().all(|s| s.sales_order_id.is_none());

            rows.push(ImpactRow {
                usage_id: usage.id,
                spool_id: spool.id,
                production_order_id: usage.production_order_id,
                product_id: order.map(|o| o.product.id),
                weight_consumed: usage.weight_consumed,
                deliveries,
                serial_numbers: shipped.iter().map(|s| s.serial_number.clone()).collect(),
            });

            entries.push(ForwardUsage {
                usage_id: usage.id,
                production_order_id: usage.production_order_id,
                production_order: order.cloned(),
                weight_consumed: usage.weight_consumed,
                sales_order,
                in_inventory,
                serial_numbers: shipped,
            });
        }

        let mut impact = aggregate(&rows);
        impact.record_spool(spool.id);
        let mut reached_sales_orders: Vec<SalesOrderRecord> = impact
            .sales_orders()
            .iter()
            .filter_map(|id| sales_orders.get(id).cloned())
            .collect();
        reached_sales_orders.sort_by(|a, b| a.order_number.cmp(&b.order_number));

        warnings::normalize(&mut warnings);
        if !warnings.is_empty() {
            warn!(
                spool = %spool.spool_number,
                warnings = warnings.len(),
                "forward trace completed with data warnings"
            );
        }

        counter!("traceability.forward.traces", 1);
        histogram!(
            "traceability.forward.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0
        );

        Ok(ForwardTraceResult {
            spool,
            purchase_info,
            usage: entries,
            sales_orders: reached_sales_orders,
            summary: impact.summary(),
            traceability_chain: TraceabilityChain::from_missing_links(missing_links),
            warnings,
            impact,
        })
    }
}
