//! Engine-side views of the lineage relations.
//!
//! Records are decoupled from the storage entities so that any
//! [`LineageStore`](super::LineageStore) adapter can produce them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub use crate::entities::traceability::spool::SpoolStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SpoolRecord {
    pub id: Uuid,
    pub spool_number: String,
    pub material_type: String,
    /// Grams at receipt
    pub initial_weight: Decimal,
    pub current_weight: Decimal,
    pub supplier_lot_number: Option<String>,
    pub received_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SpoolStatus,
}

impl SpoolRecord {
    pub fn new(
        spool_number: impl Into<String>,
        material_type: impl Into<String>,
        initial_weight: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            spool_number: spool_number.into(),
            material_type: material_type.into(),
            initial_weight,
            current_weight: initial_weight,
            supplier_lot_number: None,
            received_at: Utc::now(),
            expires_at: None,
            status: SpoolStatus::Active,
        }
    }

    pub fn with_supplier_lot(mut self, lot: impl Into<String>) -> Self {
        self.supplier_lot_number = Some(lot.into());
        self
    }

    pub fn with_current_weight(mut self, weight: Decimal) -> Self {
        self.current_weight = weight;
        self
    }

    pub fn with_status(mut self, status: SpoolStatus) -> Self {
        self.status = status;
        self
    }
}

/// Receiving event a spool's mass traces back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PurchaseOrigin {
    pub purchase_order_id: Uuid,
    pub po_number: String,
    pub vendor_id: Uuid,
    /// Null when the vendor row is missing upstream
    pub vendor_name: Option<String>,
    pub ordered_at: Option<DateTime<Utc>>,
}

impl PurchaseOrigin {
    pub fn new(po_number: impl Into<String>, vendor_name: impl Into<String>) -> Self {
        Self {
            purchase_order_id: Uuid::new_v4(),
            po_number: po_number.into(),
            vendor_id: Uuid::new_v4(),
            vendor_name: Some(vendor_name.into()),
            ordered_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SpoolUsageRecord {
    pub id: Uuid,
    pub spool_id: Uuid,
    pub production_order_id: Uuid,
    pub weight_consumed: Decimal,
}

impl SpoolUsageRecord {
    pub fn new(spool_id: Uuid, production_order_id: Uuid, weight_consumed: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            spool_id,
            production_order_id,
            weight_consumed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct ProductRef {
    pub id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct CustomerRef {
    pub id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductionOrderRecord {
    pub id: Uuid,
    pub code: String,
    pub product: ProductRef,
    pub quantity_produced: i32,
    pub completed_at: Option<DateTime<Utc>>,
    /// Null for build-to-stock orders
    pub sales_order_id: Option<Uuid>,
}

impl ProductionOrderRecord {
    pub fn new(code: impl Into<String>, product_name: impl Into<String>, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            product: ProductRef {
                id: Uuid::new_v4(),
                name: Some(product_name.into()),
            },
            quantity_produced: quantity,
            completed_at: None,
            sales_order_id: None,
        }
    }

    pub fn completed(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn for_sales_order(mut self, sales_order_id: Uuid) -> Self {
        self.sales_order_id = Some(sales_order_id);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesOrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub customer: CustomerRef,
    pub ship_date: Option<DateTime<Utc>>,
    pub status: String,
}

impl SalesOrderRecord {
    pub fn new(order_number: impl Into<String>, customer: CustomerRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.into(),
            customer,
            ship_date: None,
            status: "open".to_string(),
        }
    }

    pub fn shipped(mut self, at: DateTime<Utc>) -> Self {
        self.ship_date = Some(at);
        self.status = "shipped".to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SerialNumberRecord {
    pub id: Uuid,
    pub serial_number: String,
    pub production_order_id: Uuid,
    /// Null until the unit ships
    pub sales_order_id: Option<Uuid>,
}

impl SerialNumberRecord {
    pub fn new(serial_number: impl Into<String>, production_order_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            serial_number: serial_number.into(),
            production_order_id,
            sales_order_id: None,
        }
    }

    pub fn shipped_on(mut self, sales_order_id: Uuid) -> Self {
        self.sales_order_id = Some(sales_order_id);
        self
    }
}

impl CustomerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Some(name.into()),
        }
    }
}
