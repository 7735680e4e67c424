//! Device History Record compilation.
//!
//! A DHR is the audit rendering of a trace result. It never recomputes
//! anything: completeness, missing links and warnings are copied verbatim from
//! the tracer, and absent links are rendered as explicit `null`s rather than
//! omitted fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::backward::{BackwardSubject, BackwardTraceResult};
use super::forward::ForwardTraceResult;
use super::warnings::DataWarning;
use super::TraceResult;
use crate::errors::ServiceError;

pub const DHR_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TraceDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DhrSubject {
    pub kind: String,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DhrPurchaseOrder {
    pub purchase_order_id: Uuid,
    pub po_number: String,
    pub vendor_id: Uuid,
    pub vendor_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DhrMaterial {
    pub spool_id: Uuid,
    pub spool_number: Option<String>,
    pub material_type: Option<String>,
    pub supplier_lot_number: Option<String>,
    pub purchase_order: Option<DhrPurchaseOrder>,
    pub weight_consumed: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DhrProduction {
    pub production_order_id: Uuid,
    pub code: Option<String>,
    pub product_name: Option<String>,
    pub quantity_produced: Option<i32>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sales_order: Option<Uuid>,
    pub weight_consumed: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DhrDelivery {
    pub sales_order_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub customer_name: Option<String>,
    pub ship_date: Option<DateTime<Utc>>,
    pub serial_numbers: Vec<String>,
}

/// Lineage in canonical order: material, then production, then delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DhrLineage {
    pub material: Vec<DhrMaterial>,
    pub production: Vec<DhrProduction>,
    pub delivery: Vec<DhrDelivery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DhrDocument {
    pub document_id: Uuid,
    pub format_version: String,
    pub subject: DhrSubject,
    pub direction: TraceDirection,
    pub lineage: DhrLineage,
    pub complete: bool,
    pub missing_links: Vec<String>,
    pub warnings: Vec<DataWarning>,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
}

impl DhrDocument {
    pub fn to_json(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Download name, e.g. `DHR-serial_number-SN1.json`.
    pub fn file_name(&self) -> String {
        let identifier: String = self
            .subject
            .identifier
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("DHR-{}-{}.json", self.subject.kind, identifier)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DhrCompiler;

impl DhrCompiler {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(
        &self,
        trace: &TraceResult,
        requested_by: &str,
    ) -> Result<DhrDocument, ServiceError> {
        self.compile_at(trace, requested_by, Utc::now())
    }

    #[instrument(skip(self, trace))]
    pub fn compile_at(
        &self,
        trace: &TraceResult,
        requested_by: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<DhrDocument, ServiceError> {
        let requested_by = requested_by.trim();
        if requested_by.is_empty() {
            return Err(ServiceError::ValidationError(
                "A DHR must name who requested it".to_string(),
            ));
        }

        let (subject, direction, lineage, chain, warnings) = match trace {
            TraceResult::Forward(result) => (
                DhrSubject {
                    kind: "spool".to_string(),
                    identifier: result.spool.id.to_string(),
                },
                TraceDirection::Forward,
                forward_lineage(result),
                &result.traceability_chain,
                &result.warnings,
            ),
            TraceResult::Backward(result) => (
                backward_subject(&result.subject),
                TraceDirection::Backward,
                backward_lineage(result),
                &result.traceability_chain,
                &result.warnings,
            ),
        };

        metrics::counter!("traceability.dhr.compiled", 1);

        Ok(DhrDocument {
            document_id: Uuid::new_v4(),
            format_version: DHR_FORMAT_VERSION.to_string(),
            subject,
            direction,
            lineage,
            complete: chain.complete,
            missing_links: chain.missing_links.clone(),
            warnings: warnings.clone(),
            generated_at,
            generated_by: requested_by.to_string(),
        })
    }
}

fn purchase_order(origin: &super::records::PurchaseOrigin) -> DhrPurchaseOrder {
    DhrPurchaseOrder {
        purchase_order_id: origin.purchase_order_id,
        po_number: origin.po_number.clone(),
        vendor_id: origin.vendor_id,
        vendor_name: origin.vendor_name.clone(),
    }
}

fn forward_lineage(result: &ForwardTraceResult) -> DhrLineage {
    let material = vec![DhrMaterial {
        spool_id: result.spool.id,
        spool_number: Some(result.spool.spool_number.clone()),
        material_type: Some(result.spool.material_type.clone()),
        supplier_lot_number: result.spool.supplier_lot_number.clone(),
        purchase_order: result.purchase_info.as_ref().map(purchase_order),
        weight_consumed: result.summary.total_weight_consumed,
    }];

    let mut production: Vec<DhrProduction> = Vec::new();
    for usage in &result.usage {
        if let Some(existing) = production
            .iter_mut()
            .find(|p| p.production_order_id == usage.production_order_id)
        {
            existing.weight_consumed += usage.weight_consumed;
            continue;
        }
        let order = usage.production_order.as_ref();
        production.push(DhrProduction {
            production_order_id: usage.production_order_id,
            code: order.map(|o| o.code.clone()),
            product_name: order.and_then(|o| o.product.name.clone()),
            quantity_produced: order.map(|o| o.quantity_produced),
            completed_at: order.and_then(|o| o.completed_at),
            // The recorded link, even when the sales order itself is missing
            sales_order: order.and_then(|o| o.sales_order_id),
            weight_consumed: usage.weight_consumed,
        });
    }

    let mut serials_by_order: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
    for serial in result.usage.iter().flat_map(|u| u.serial_numbers.iter()) {
        if let Some(sales_order_id) = serial.sales_order_id {
            serials_by_order
                .entry(sales_order_id)
                .or_default()
                .push(serial.serial_number.clone());
        }
    }

    let delivery = result
        .sales_orders
        .iter()
        .map(|order| {
            let mut serial_numbers = serials_by_order.remove(&order.id).unwrap_or_default();
            serial_numbers.sort();
            serial_numbers.dedup();
            DhrDelivery {
                sales_order_id: order.id,
                order_number: order.order_number.clone(),
                customer_id: order.customer.id,
                customer_name: order.customer.name.clone(),
                ship_date: order.ship_date,
                serial_numbers,
            }
        })
        .collect();

    DhrLineage {
        material,
        production,
        delivery,
    }
}

fn backward_subject(subject: &BackwardSubject) -> DhrSubject {
    match subject {
        BackwardSubject::SerialNumber { serial, .. } => DhrSubject {
            kind: "serial_number".to_string(),
            identifier: serial.serial_number.clone(),
        },
        BackwardSubject::SalesOrder { sales_order, .. } => DhrSubject {
            kind: "sales_order".to_string(),
            identifier: sales_order.id.to_string(),
        },
    }
}

fn backward_lineage(result: &BackwardTraceResult) -> DhrLineage {
    let material = result
        .material_lineage
        .iter()
        .map(|entry| DhrMaterial {
            spool_id: entry.spool_id,
            spool_number: entry.spool.as_ref().map(|s| s.spool_number.clone()),
            material_type: entry.spool.as_ref().map(|s| s.material_type.clone()),
            supplier_lot_number: entry
                .spool
                .as_ref()
                .and_then(|s| s.supplier_lot_number.clone()),
            purchase_order: entry.purchase_info.as_ref().map(purchase_order),
            weight_consumed: entry.total_weight_consumed,
        })
        .collect();

    let mut weights: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for consumed in result
        .material_lineage
        .iter()
        .flat_map(|entry| entry.consumed_by.iter())
    {
        *weights.entry(consumed.production_order_id).or_default() += consumed.weight;
    }

    let production = result
        .production_orders
        .iter()
        .map(|order| DhrProduction {
            production_order_id: order.id,
            code: Some(order.code.clone()),
            product_name: order.product.name.clone(),
            quantity_produced: Some(order.quantity_produced),
            completed_at: order.completed_at,
            sales_order: order.sales_order_id,
            weight_consumed: weights.get(&order.id).copied().unwrap_or_default(),
        })
        .collect();

    let delivery = match &result.subject {
        BackwardSubject::SerialNumber {
            serial,
            sales_order: Some(order),
        } => vec![DhrDelivery {
            sales_order_id: order.id,
            order_number: order.order_number.clone(),
            customer_id: order.customer.id,
            customer_name: order.customer.name.clone(),
            ship_date: order.ship_date,
            serial_numbers: vec![serial.serial_number.clone()],
        }],
        BackwardSubject::SerialNumber {
            sales_order: None, ..
        } => Vec::new(),
        BackwardSubject::SalesOrder {
            sales_order,
            serial_numbers,
        } => vec![DhrDelivery {
            sales_order_id: sales_order.id,
            order_number: sales_order.order_number.clone(),
            customer_id: sales_order.customer.id,
            customer_name: sales_order.customer.name.clone(),
            ship_date: sales_order.ship_date,
            serial_numbers: serial_numbers.clone(),
        }],
    };

    DhrLineage {
        material,
        production,
        delivery,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::traceability::backward::BackwardTracer;
    use crate::services::traceability::fixtures::RoundTrip;
    use crate::services::traceability::forward::ForwardTracer;
    use crate::services::traceability::records::SerialNumberRecord;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn forward_dhr_carries_chain_verbatim() {
        let fixture = RoundTrip::build();
        let trace = ForwardTracer::new(Arc::new(fixture.store.clone()))
            .trace(fixture.s1.id)
            .await
            .unwrap();
        let trace = TraceResult::Forward(trace);

        let doc = DhrCompiler::new()
            .compile_at(&trace, "qa@example.com", generated_at())
            .unwrap();

        assert_eq!(doc.direction, TraceDirection::Forward);
        assert_eq!(doc.subject.kind, "spool");
        assert!(doc.complete);
        assert_eq!(doc.lineage.material.len(), 1);
        assert_eq!(doc.lineage.production.len(), 2);
        assert_eq!(doc.lineage.delivery.len(), 1);
        assert_eq!(doc.lineage.delivery[0].serial_numbers, vec!["SN1", "SN2"]);
        assert_eq!(doc.generated_by, "qa@example.com");
        assert_eq!(doc.format_version, DHR_FORMAT_VERSION);
    }

    #[tokio::test]
    async fn missing_links_render_as_explicit_nulls() {
        let mut fixture = RoundTrip::build();
        fixture
            .store
            .insert_serial(SerialNumberRecord::new("SN3", fixture.po2.id));
        let trace = BackwardTracer::new(Arc::new(fixture.store.clone()))
            .trace_serial("SN3")
            .await
            .unwrap();
        let trace = TraceResult::Backward(trace);

        let doc = DhrCompiler::new()
            .compile_at(&trace, "auditor", generated_at())
            .unwrap();
        assert!(!doc.complete);
        assert!(!doc.missing_links.is_empty());

        let value: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        let production = &value["lineage"]["production"][0];
        assert!(production.get("sales_order").unwrap().is_null());
        assert_eq!(value["subject"]["identifier"], "SN3");
        assert_eq!(value["lineage"]["delivery"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn forward_dhr_keeps_link_to_missing_sales_order() {
        let mut fixture = RoundTrip::build();
        let dangling = Uuid::new_v4();
        fixture.store.link_production_order(fixture.po2.id, dangling);
        let trace = ForwardTracer::new(Arc::new(fixture.store.clone()))
            .trace(fixture.s1.id)
            .await
            .unwrap();

        let doc = DhrCompiler::new()
            .compile_at(&TraceResult::Forward(trace), "auditor", generated_at())
            .unwrap();

        let stock = doc
            .lineage
            .production
            .iter()
            .find(|p| p.production_order_id == fixture.po2.id)
            .unwrap();
        assert_eq!(stock.sales_order, Some(dangling));
        let shipped = doc
            .lineage
            .production
            .iter()
            .find(|p| p.production_order_id == fixture.po1.id)
            .unwrap();
        assert_eq!(shipped.sales_order, Some(fixture.so1.id));
        assert!(!doc.complete);
    }

    #[tokio::test]
    async fn blank_requester_is_rejected() {
        let fixture = RoundTrip::build();
        let trace = ForwardTracer::new(Arc::new(fixture.store.clone()))
            .trace(fixture.s1.id)
            .await
            .unwrap();
        let err = DhrCompiler::new()
            .compile(&TraceResult::Forward(trace), "  ")
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn file_name_is_filesystem_safe() {
        let doc = DhrDocument {
            document_id: Uuid::nil(),
            format_version: DHR_FORMAT_VERSION.to_string(),
            subject: DhrSubject {
                kind: "serial_number".to_string(),
                identifier: "SN/01 A".to_string(),
            },
            direction: TraceDirection::Backward,
            lineage: DhrLineage::default(),
            complete: true,
            missing_links: Vec::new(),
            warnings: Vec::new(),
            generated_at: generated_at(),
            generated_by: "qa".to_string(),
        };
        assert_eq!(doc.file_name(), "DHR-serial_number-SN_01_A.json");
    }
}
