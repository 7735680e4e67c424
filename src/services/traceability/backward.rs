use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::aggregator::{aggregate, Delivery, ImpactAggregator, ImpactRow, ImpactSummary};
use super::records::{
    ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord, SerialNumberRecord, SpoolRecord,
    SpoolUsageRecord,
};
use super::store::LineageStore;
use super::warnings::{self, DataWarning, WarningKind};
use super::{distinct_ids, TraceabilityChain};
use crate::errors::ServiceError;

/// What a backward trace started from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackwardSubject {
    SerialNumber {
        serial: SerialNumberRecord,
        /// Null while the unit has not shipped
        sales_order: Option<SalesOrderRecord>,
    },
    SalesOrder {
        sales_order: SalesOrderRecord,
        serial_numbers: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductionOrderWeight {
    pub production_order_id: Uuid,
    pub production_order_code: Option<String>,
    pub weight: Decimal,
}

/// A spool feeding the traced production orders, with its upstream origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MaterialLineageEntry {
    pub spool_id: Uuid,
    /// Null when a usage row points at a spool that does not exist
    pub spool: Option<SpoolRecord>,
    pub purchase_info: Option<PurchaseOrigin>,
    /// Summed across every production order in the trace that shares the spool
    pub total_weight_consumed: Decimal,
    pub consumed_by: Vec<ProductionOrderWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackwardTraceResult {
    pub subject: BackwardSubject,
    pub production_orders: Vec<ProductionOrderRecord>,
    pub material_lineage: Vec<MaterialLineageEntry>,
    pub summary: ImpactSummary,
    pub traceability_chain: TraceabilityChain,
    pub warnings: Vec<DataWarning>,
}

struct MaterialWalk {
    usages: Vec<SpoolUsageRecord>,
    lineage: Vec<MaterialLineageEntry>,
    warnings: Vec<DataWarning>,
    missing_links: Vec<String>,
}

/// Follows a finished unit or a sales order upstream to spools and vendors.
#[derive(Clone)]
pub struct BackwardTracer {
    store: Arc<dyn LineageStore>,
}

impl BackwardTracer {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn trace_serial(&self, serial_number: &str) -> Result<BackwardTraceResult, ServiceError> {
        let started = Instant::now();
        let serial_number = serial_number.trim();
        if serial_number.is_empty() {
            return Err(ServiceError::ValidationError(
                "Serial number must not be blank".to_string(),
            ));
        }

        let serial = self
            .store
            .serial_by_number(serial_number)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Serial number {} not found", serial_number))
            })?;

        let mut warnings = Vec::new();
        let mut missing_links = Vec::new();

        let orders = self
            .store
            .production_orders(&[serial.production_order_id])
            .await?;
        if orders.is_empty() {
            warnings.push(DataWarning::new(
                WarningKind::MissingProductionOrder,
                serial.production_order_id,
                format!(
                    "Serial {} references production order {} which does not exist",
                    serial.serial_number, serial.production_order_id
                ),
            ));
            missing_links.push(format!("serial {} -> production order", serial.serial_number));
        }
        for order in orders.iter().filter(|order| !order.is_completed()) {
            warnings.push(not_completed(order));
            missing_links.push(format!("production order {} -> completion", order.code));
        }

        let sales_order = match serial.sales_order_id {
            Some(sales_order_id) => {
                let found = self.store.sales_order(sales_order_id).await?;
                if found.is_none() {
                    warnings.push(DataWarning::new(
                        WarningKind::MissingSalesOrder,
                        sales_order_id,
                        format!(
                            "Serial {} shipped on sales order {} which does not exist",
                            serial.serial_number, sales_order_id
                        ),
                    ));
                    missing_links.push(format!("serial {} -> sales order", serial.serial_number));
                }
                found
            }
            None => {
                warnings.push(DataWarning::new(
                    WarningKind::SerialNotShipped,
                    serial.id,
                    format!("Serial {} is not linked to a sales order", serial.serial_number),
                ));
                missing_links.push(format!("serial {} -> sales order", serial.serial_number));
                None
            }
        };

        let walk = self.walk_materials(&orders).await?;
        let deliveries: Vec<Delivery> = sales_order.iter().map(delivery).collect();
        let impact = summarize(
            &orders,
            &walk.usages,
            &deliveries,
            std::slice::from_ref(&serial.serial_number),
        );

        let result = finish(
            BackwardSubject::SerialNumber {
                serial,
                sales_order,
            },
            orders,
            walk,
            impact,
            warnings,
            missing_links,
        );

        counter!("traceability.backward.traces", 1, "subject" => "serial_number");
        histogram!(
            "traceability.backward.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            "subject" => "serial_number"
        );
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn trace_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<BackwardTraceResult, ServiceError> {
        let started = Instant::now();

        let sales_order = self
            .store
            .sales_order(sales_order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Sales order {} not found", sales_order_id))
            })?;

        let mut warnings = Vec::new();
        let mut missing_links = Vec::new();

        let serials = self.store.serials_for_sales_order(sales_order.id).await?;
        let mut orders = self
            .store
            .production_orders_for_sales_order(sales_order.id)
            .await?;

        // Serials shipped on this order may come from stock builds that carry no
        // sales order link of their own.
        let unlinked: Vec<Uuid> = distinct_ids(serials.iter().map(|s| s.production_order_id))
            .into_iter()
            .filter(|id| !orders.iter().any(|order| order.id == *id))
            .collect();
        if !unlinked.is_empty() {
            let found = self.store.production_orders(&unlinked).await?;
            for missing in unlinked.iter().filter(|id| !found.iter().any(|o| o.id == **id)) {
                warnings.push(DataWarning::new(
                    WarningKind::MissingProductionOrder,
                    *missing,
                    format!(
                        "A serial shipped on sales order {} references production order {} which does not exist",
                        sales_order.order_number, missing
                    ),
                ));
                missing_links.push(format!("serial -> production order {}", missing));
            }
            orders.extend(found);
        }

        if orders.is_empty() {
            missing_links.push(format!(
                "sales order {} -> production order",
                sales_order.order_number
            ));
        }
        warnings.extend(
            orders
                .iter()
                .filter(|order| !order.is_completed())
                .map(not_completed),
        );

        let mut serial_numbers: Vec<String> =
            serials.into_iter().map(|s| s.serial_number).collect();
        serial_numbers.sort();
        serial_numbers.dedup();

        let walk = self.walk_materials(&orders).await?;
        let impact = summarize(&orders, &walk.usages, &[delivery(&sales_order)], &serial_numbers);

        let result = finish(
            BackwardSubject::SalesOrder {
                sales_order,
                serial_numbers,
            },
            orders,
            walk,
            impact,
            warnings,
            missing_links,
        );

        counter!("traceability.backward.traces", 1, "subject" => "sales_order");
        histogram!(
            "traceability.backward.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            "subject" => "sales_order"
        );
        Ok(result)
    }

    /// Resolves every spool feeding `orders`, with one query per relation.
    async fn walk_materials(
        &self,
        orders: &[ProductionOrderRecord],
    ) -> Result<MaterialWalk, ServiceError> {
        let order_ids = distinct_ids(orders.iter().map(|order| order.id));
        let usages = self.store.usages_for_production_orders(&order_ids).await?;
        warnings::ensure_non_negative(&usages)?;

        let spool_ids = distinct_ids(usages.iter().map(|u| u.spool_id));
        let spools: HashMap<Uuid, SpoolRecord> = self
            .store
            .spools(&spool_ids)
            .await?
            .into_iter()
            .map(|spool| (spool.id, spool))
            .collect();
        let origins = self.store.purchase_origins(&spool_ids).await?;
        // Weight checks cover every recorded usage of a spool, not only the traced ones.
        let spool_usages = self.store.usages_for_spools(&spool_ids).await?;

        let mut warnings = Vec::new();
        let mut missing_links = Vec::new();

        for order in orders {
            if !usages.iter().any(|u| u.production_order_id == order.id) {
                warnings.push(DataWarning::new(
                    WarningKind::ProductionOrderWithoutSpoolUsage,
                    order.id,
                    format!("Production order {} has no recorded spool usage", order.code),
                ));
                missing_links.push(format!("production order {} -> spool usage", order.code));
            }
        }

        let codes: HashMap<Uuid, &str> = orders
            .iter()
            .map(|order| (order.id, order.code.as_str()))
            .collect();

        let mut by_spool: BTreeMap<Uuid, Vec<&SpoolUsageRecord>> = BTreeMap::new();
        for usage in &usages {
            by_spool.entry(usage.spool_id).or_default().push(usage);
        }

        let mut lineage = Vec::with_capacity(by_spool.len());
        for (spool_id, rows) in by_spool {
            let spool = spools.get(&spool_id).cloned();
            let purchase_info = origins.get(&spool_id).cloned();

            match &spool {
                Some(spool) => {
                    warnings.extend(warnings::weight_warnings(spool, &spool_usages));
                    if purchase_info.is_none() {
                        warnings.push(DataWarning::new(
                            WarningKind::MissingPurchaseOrigin,
                            spool.id,
                            format!("Spool {} has no purchase order origin", spool.spool_number),
                        ));
                    }
                }
                None => warnings.push(DataWarning::new(
                    WarningKind::MissingSpool,
                    spool_id,
                    format!("Spool {} is referenced by usage but does not exist", spool_id),
                )),
            }

            let mut per_order: BTreeMap<Uuid, Decimal> = BTreeMap::new();
            for row in &rows {
                *per_order.entry(row.production_order_id).or_default() += row.weight_consumed;
            }
            let mut consumed_by: Vec<ProductionOrderWeight> = per_order
                .into_iter()
                .map(|(production_order_id, weight)| ProductionOrderWeight {
                    production_order_id,
                    production_order_code: codes.get(&production_order_id).map(|c| c.to_string()),
                    weight,
                })
                .collect();
            consumed_by.sort_by(|a, b| {
                a.production_order_code
                    .cmp(&b.production_order_code)
                    .then(a.production_order_id.cmp(&b.production_order_id))
            });

            lineage.push(MaterialLineageEntry {
                spool_id,
                spool,
                purchase_info,
                total_weight_consumed: rows.iter().map(|r| r.weight_consumed).sum(),
                consumed_by,
            });
        }

        lineage.sort_by(|a, b| {
            let number_a = a.spool.as_ref().map(|s| &s.spool_number);
            let number_b = b.spool.as_ref().map(|s| &s.spool_number);
            number_a.cmp(&number_b).then(a.spool_id.cmp(&b.spool_id))
        });

        Ok(MaterialWalk {
            usages,
            lineage,
            warnings,
            missing_links,
        })
    }
}

fn delivery(order: &SalesOrderRecord) -> Delivery {
    Delivery {
        sales_order_id: order.id,
        customer_id: order.customer.id,
    }
}

fn not_completed(order: &ProductionOrderRecord) -> DataWarning {
    DataWarning::new(
        WarningKind::ProductionOrderNotCompleted,
        order.id,
        format!("Production order {} has no completion timestamp", order.code),
    )
}

fn summarize(
    orders: &[ProductionOrderRecord],
    usages: &[SpoolUsageRecord],
    deliveries: &[Delivery],
    serial_numbers: &[String],
) -> ImpactAggregator {
    let products: HashMap<Uuid, Uuid> = orders
        .iter()
        .map(|order| (order.id, order.product.id))
        .collect();
    let rows: Vec<ImpactRow> = usages
        .iter()
        .map(|usage| ImpactRow {
            usage_id: usage.id,
            spool_id: usage.spool_id,
            production_order_id: usage.production_order_id,
            product_id: products.get(&usage.production_order_id).copied(),
            weight_consumed: usage.weight_consumed,
            deliveries: Vec::new(),
            serial_numbers: Vec::new(),
        })
        .collect();

    let mut impact = aggregate(&rows);
    for order in orders {
        impact.record_production_order(order.id, Some(order.product.id));
    }
    for delivery in deliveries {
        impact.record_delivery(*delivery);
    }
    for serial_number in serial_numbers {
        impact.record_serial(serial_number.clone());
    }
    impact
}

fn finish(
    subject: BackwardSubject,
    mut orders: Vec<ProductionOrderRecord>,
    walk: MaterialWalk,
    impact: ImpactAggregator,
    mut warnings: Vec<DataWarning>,
    mut missing_links: Vec<String>,
) -> BackwardTraceResult {
    orders.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));
    orders.dedup_by(|a, b| a.id == b.id);

    warnings.extend(walk.warnings);
    warnings::normalize(&mut warnings);
    missing_links.extend(walk.missing_links);

    if !warnings.is_empty() {
        warn!(
            warnings = warnings.len(),
            "backward trace completed with data warnings"
        );
    }

    BackwardTraceResult {
        subject,
        production_orders: orders,
        material_lineage: walk.lineage,
        summary: impact.summary(),
        traceability_chain: TraceabilityChain::from_missing_links(missing_links),
        warnings,
    }
}
