//! Material lineage traceability.
//!
//! Walks the chain spool → production order → sales order → customer → serial
//! number in either direction over a read-only [`LineageStore`], aggregates
//! the impact of that chain, grades recall severity and compiles Device History
//! Records.

pub mod aggregator;
pub mod backward;
pub mod dhr;
pub mod forward;
pub mod memory_store;
pub mod recall;
pub mod records;
pub mod sea_orm_store;
pub mod store;
pub mod warnings;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

pub use aggregator::{aggregate, Delivery, ImpactAggregator, ImpactRow, ImpactSummary};
pub use backward::{
    BackwardSubject, BackwardTraceResult, BackwardTracer, MaterialLineageEntry,
    ProductionOrderWeight,
};
pub use dhr::{DhrCompiler, DhrDocument, TraceDirection, DHR_FORMAT_VERSION};
pub use forward::{ForwardTraceResult, ForwardTracer, ForwardUsage, ShippedSerial};
pub use memory_store::InMemoryLineageStore;
pub use recall::{RecallAnalyzer, RecallImpact, RecallSeverity, RecallSpool};
pub use sea_orm_store::{create_lineage_schema, SeaOrmLineageStore};
pub use store::LineageStore;
pub use warnings::{DataWarning, WarningKind};

/// Engine tunables, taken from [`AppConfig`](crate::config::AppConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityConfig {
    /// Forward traces in flight during one recall analysis
    pub recall_concurrency: usize,
    /// Distinct spools accepted by one recall analysis
    pub recall_max_spools: usize,
}

impl Default for TraceabilityConfig {
    fn default() -> Self {
        Self {
            recall_concurrency: 8,
            recall_max_spools: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TraceabilityChain {
    /// Derived from `missing_links`: true exactly when it is empty
    pub complete: bool,
    pub missing_links: Vec<String>,
}

impl TraceabilityChain {
    pub fn from_missing_links(mut missing_links: Vec<String>) -> Self {
        missing_links.sort();
        missing_links.dedup();
        Self {
            complete: missing_links.is_empty(),
            missing_links,
        }
    }
}

/// Sorted, duplicate-free ids for a batched store lookup.
pub(crate) fn distinct_ids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Entry point of a trace, resolved once at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TraceSubject {
    Spool(Uuid),
    SerialNumber(String),
    SalesOrder(Uuid),
}

impl TraceSubject {
    /// Parses a `(kind, identifier)` pair such as `("serial_number", "SN1")`.
    pub fn parse(kind: &str, identifier: &str) -> Result<Self, ServiceError> {
        let identifier = identifier.trim();
        match kind.trim().to_ascii_lowercase().as_str() {
            "spool" | "spools" => parse_uuid("spool", identifier).map(TraceSubject::Spool),
            "serial" | "serials" | "serial_number" | "serial-number" | "serial-numbers" => {
                if identifier.is_empty() {
                    return Err(ServiceError::ValidationError(
                        "Serial number must not be blank".to_string(),
                    ));
                }
                Ok(TraceSubject::SerialNumber(identifier.to_string()))
            }
            "sales_order" | "sales-order" | "sales-orders" => {
                parse_uuid("sales order", identifier).map(TraceSubject::SalesOrder)
            }
            other => Err(ServiceError::ValidationError(format!(
                "Unknown trace subject kind '{}'; expected spool, serial_number or sales_order",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TraceSubject::Spool(_) => "spool",
            TraceSubject::SerialNumber(_) => "serial_number",
            TraceSubject::SalesOrder(_) => "sales_order",
        }
    }
}

impl fmt::Display for TraceSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceSubject::Spool(id) => write!(f, "spool:{}", id),
            TraceSubject::SerialNumber(serial) => write!(f, "serial_number:{}", serial),
            TraceSubject::SalesOrder(id) => write!(f, "sales_order:{}", id),
        }
    }
}

fn parse_uuid(label: &str, identifier: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(identifier).map_err(|_| {
        ServiceError::ValidationError(format!("Invalid {} id '{}'", label, identifier))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum TraceResult {
    Forward(ForwardTraceResult),
    Backward(BackwardTraceResult),
}

/// Façade over the tracers, the recall analyzer and the DHR compiler, all
/// sharing one injected store.
#[derive(Clone)]
pub struct TraceabilityService {
    forward: ForwardTracer,
    backward: BackwardTracer,
    recall: RecallAnalyzer,
    dhr: DhrCompiler,
    config: TraceabilityConfig,
}

impl TraceabilityService {
    pub fn new(store: Arc<dyn LineageStore>, config: TraceabilityConfig) -> Self {
        let forward = ForwardTracer::new(store.clone());
        Self {
            recall: RecallAnalyzer::new(forward.clone(), config),
            backward: BackwardTracer::new(store),
            forward,
            dhr: DhrCompiler::new(),
            config,
        }
    }

    pub fn config(&self) -> &TraceabilityConfig {
        &self.config
    }

    pub async fn trace_forward(&self, spool_id: Uuid) -> Result<ForwardTraceResult, ServiceError> {
        self.forward.trace(spool_id).await
    }

    pub async fn trace_backward_serial(
        &self,
        serial_number: &str,
    ) -> Result<BackwardTraceResult, ServiceError> {
        self.backward.trace_serial(serial_number).await
    }

    pub async fn trace_backward_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<BackwardTraceResult, ServiceError> {
        self.backward.trace_sales_order(sales_order_id).await
    }

    pub async fn analyze_recall(&self, spool_ids: &[Uuid]) -> Result<RecallImpact, ServiceError> {
        self.recall.analyze(spool_ids).await
    }

    /// Runs the trace direction implied by the subject.
    #[instrument(skip(self), fields(subject = %subject))]
    pub async fn trace(&self, subject: &TraceSubject) -> Result<TraceResult, ServiceError> {
        match subject {
            TraceSubject::Spool(id) => self.trace_forward(*id).await.map(TraceResult::Forward),
            TraceSubject::SerialNumber(serial) => self
                .trace_backward_serial(serial)
                .await
                .map(TraceResult::Backward),
            TraceSubject::SalesOrder(id) => self
                .trace_backward_sales_order(*id)
                .await
                .map(TraceResult::Backward),
        }
    }

    pub fn compile_dhr(
        &self,
        trace: &TraceResult,
        requested_by: &str,
    ) -> Result<DhrDocument, ServiceError> {
        self.dhr.compile(trace, requested_by)
    }

    /// Traces `subject` and renders the result as a DHR.
    pub async fn dhr_for(
        &self,
        subject: &TraceSubject,
        requested_by: &str,
    ) -> Result<DhrDocument, ServiceError> {
        if requested_by.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A DHR must name who requested it".to_string(),
            ));
        }
        let trace = self.trace(subject).await?;
        self.compile_dhr(&trace, requested_by)
    }
}
