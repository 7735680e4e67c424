use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use super::records::{
    ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord, SerialNumberRecord, SpoolRecord,
    SpoolUsageRecord,
};
use crate::errors::ServiceError;

/// Read-only port over the lineage relations owned by the surrounding ERP.
///
/// Every lookup takes a batch of identities so a trace issues one query per
/// relation rather than one per entity. Ids that do not resolve are simply
/// absent from the result; deciding whether that is an error belongs to the
/// caller.
#[async_trait]
pub trait LineageStore: Send + Sync {
    async fn spools(&self, ids: &[Uuid]) -> Result<Vec<SpoolRecord>, ServiceError>;

    /// Purchase origin keyed by spool id. Spools without a receiving record are omitted.
    async fn purchase_origins(
        &self,
        spool_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, PurchaseOrigin>, ServiceError>;

    async fn usages_for_spools(
        &self,
        spool_ids: &[Uuid],
    ) -> Result<Vec<SpoolUsageRecord>, ServiceError>;

    async fn usages_for_production_orders(
        &self,
        production_order_ids: &[Uuid],
    ) -> Result<Vec<SpoolUsageRecord>, ServiceError>;

    async fn production_orders(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError>;

    async fn production_orders_for_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError>;

    async fn sales_orders(&self, ids: &[Uuid]) -> Result<Vec<SalesOrderRecord>, ServiceError>;

    async fn serials_for_production_orders(
        &self,
        production_order_ids: &[Uuid],
    ) -> Result<Vec<SerialNumberRecord>, ServiceError>;

    async fn serials_for_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<SerialNumberRecord>, ServiceError>;

    async fn serial_by_number(
        &self,
        serial_number: &str,
    ) -> Result<Option<SerialNumberRecord>, ServiceError>;

    async fn spool(&self, id: Uuid) -> Result<Option<SpoolRecord>, ServiceError> {
        Ok(self.spools(&[id]).await?.into_iter().next())
    }

    async fn sales_order(&self, id: Uuid) -> Result<Option<SalesOrderRecord>, ServiceError> {
        Ok(self.sales_orders(&[id]).await?.into_iter().next())
    }
}
