use futures::{stream, StreamExt, TryStreamExt};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::aggregator::{ImpactAggregator, ImpactSummary};
use super::forward::{ForwardTraceResult, ForwardTracer};
use super::records::{
    CustomerRef, ProductRef, ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord,
};
use super::warnings::{self, DataWarning};
use super::{distinct_ids, TraceabilityConfig};
use crate::errors::ServiceError;

/// Customers above this count make a recall `HIGH`.
pub const HIGH_SEVERITY_CUSTOMER_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecallSeverity {
    Low,
    Medium,
    High,
}

impl RecallSeverity {
    pub fn from_customer_count(customers: usize) -> Self {
        match customers {
            0 => RecallSeverity::Low,
            n if n > HIGH_SEVERITY_CUSTOMER_THRESHOLD => RecallSeverity::High,
            _ => RecallSeverity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecallSeverity::Low => "LOW",
            RecallSeverity::Medium => "MEDIUM",
            RecallSeverity::High => "HIGH",
        }
    }
}

impl fmt::Display for RecallSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recalled spool and how far its material travelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecallSpool {
    pub spool_id: Uuid,
    pub spool_number: String,
    pub material_type: String,
    pub supplier_lot_number: Option<String>,
    pub purchase_info: Option<PurchaseOrigin>,
    pub weight_consumed: Decimal,
    pub production_order_count: usize,
    pub traceability_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecallImpact {
    pub spools: Vec<RecallSpool>,
    pub impact: ImpactSummary,
    pub production_orders: Vec<ProductionOrderRecord>,
    pub sales_orders: Vec<SalesOrderRecord>,
    pub customers: Vec<CustomerRef>,
    pub serial_numbers: Vec<String>,
    pub products: Vec<ProductRef>,
    pub severity: RecallSeverity,
    pub warnings: Vec<DataWarning>,
}

/// Unions the forward traces of several spools and grades the exposure.
#[derive(Clone)]
pub struct RecallAnalyzer {
    forward: ForwardTracer,
    config: TraceabilityConfig,
}

impl RecallAnalyzer {
    pub fn new(forward: ForwardTracer, config: TraceabilityConfig) -> Self {
        Self { forward, config }
    }

    #[instrument(skip(self, spool_ids), fields(requested = spool_ids.len()))]
    pub async fn analyze(&self, spool_ids: &[Uuid]) -> Result<RecallImpact, ServiceError> {
        let started = Instant::now();

        if spool_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one spool id is required for recall analysis".to_string(),
            ));
        }
        let ids = distinct_ids(spool_ids.iter().copied());
        if ids.len() > self.config.recall_max_spools {
            return Err(ServiceError::ValidationError(format!(
                "Recall analysis accepts at most {} spools, got {}",
                self.config.recall_max_spools,
                ids.len()
            )));
        }

        let traces: Vec<ForwardTraceResult> = stream::iter(ids)
            .map(|spool_id| self.forward.trace(spool_id))
            .buffer_unordered(self.config.recall_concurrency.max(1))
            .try_collect()
            .await?;

        let result = fold(traces);

        info!(
            spools = result.spools.len(),
            customers = result.impact.customer_count,
            severity = %result.severity,
            "recall analysis complete"
        );
        counter!("traceability.recall.analyses", 1, "severity" => result.severity.as_str());
        histogram!(
            "traceability.recall.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0
        );

        Ok(result)
    }
}

/// Folds per-spool traces into one impact. Input order does not matter.
fn fold(traces: Vec<ForwardTraceResult>) -> RecallImpact {
    let mut impact = ImpactAggregator::new();
    let mut production_orders: BTreeMap<Uuid, ProductionOrderRecord> = BTreeMap::new();
    let mut sales_orders: BTreeMap<Uuid, SalesOrderRecord> = BTreeMap::new();
    let mut spools = Vec::with_capacity(traces.len());
    let mut warnings = Vec::new();

    for trace in traces {
        let summary = trace.impact.summary();
        spools.push(RecallSpool {
            spool_id: trace.spool.id,
            spool_number: trace.spool.spool_number,
            material_type: trace.spool.material_type,
            supplier_lot_number: trace.spool.supplier_lot_number,
            purchase_info: trace.purchase_info,
            weight_consumed: summary.total_weight_consumed,
            production_order_count: summary.production_order_count,
            traceability_complete: trace.traceability_chain.complete,
        });

        for order in trace.usage.into_iter().filter_map(|u| u.production_order) {
            production_orders.insert(order.id, order);
        }
        for order in trace.sales_orders {
            sales_orders.insert(order.id, order);
        }
        warnings.extend(trace.warnings);
        impact.merge_in(trace.impact);
    }

    let mut customers: BTreeMap<Uuid, CustomerRef> = BTreeMap::new();
    for order in sales_orders.values() {
        customers.insert(order.customer.id, order.customer.clone());
    }
    let mut products: BTreeMap<Uuid, ProductRef> = BTreeMap::new();
    for order in production_orders.values() {
        products.insert(order.product.id, order.product.clone());
    }

    let mut production_orders: Vec<ProductionOrderRecord> = production_orders.into_values().collect();
    production_orders.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));
    let mut sales_orders: Vec<SalesOrderRecord> = sales_orders.into_values().collect();
    sales_orders.sort_by(|a, b| a.order_number.cmp(&b.order_number).then(a.id.cmp(&b.id)));
    let mut customers: Vec<CustomerRef> = customers.into_values().collect();
    customers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    let mut products: Vec<ProductRef> = products.into_values().collect();
    products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    spools.sort_by(|a, b| a.spool_number.cmp(&b.spool_number).then(a.spool_id.cmp(&b.spool_id)));
    warnings::normalize(&mut warnings);

    let summary = impact.summary();
    RecallImpact {
        spools,
        severity: RecallSeverity::from_customer_count(summary.customer_count),
        impact: summary,
        production_orders,
        sales_orders,
        customers,
        serial_numbers: impact.serial_numbers().iter().cloned().collect(),
        products,
        warnings,
    }
}
