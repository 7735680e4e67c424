use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use super::records::{
    ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord, SerialNumberRecord, SpoolRecord,
    SpoolUsageRecord,
};
use super::store::LineageStore;
use crate::errors::ServiceError;

/// Indexed in-memory [`LineageStore`].
///
/// Secondary indexes mirror the foreign keys the ERP tables carry, so every
/// lookup is a direct map hit. Mutators keep the indexes in step.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLineageStore {
    spools: HashMap<Uuid, SpoolRecord>,
    origins: HashMap<Uuid, PurchaseOrigin>,
    usages: HashMap<Uuid, SpoolUsageRecord>,
    usages_by_spool: HashMap<Uuid, Vec<Uuid>>,
    usages_by_production_order: HashMap<Uuid, Vec<Uuid>>,
    production_orders: HashMap<Uuid, ProductionOrderRecord>,
    sales_orders: HashMap<Uuid, SalesOrderRecord>,
    serials: HashMap<String, SerialNumberRecord>,
    serials_by_production_order: HashMap<Uuid, Vec<String>>,
}

impl InMemoryLineageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_spool(&mut self, spool: SpoolRecord, origin: Option<PurchaseOrigin>) {
        match origin {
            Some(origin) => {
                self.origins.insert(spool.id, origin);
            }
            None => {
                self.origins.remove(&spool.id);
            }
        }
        self.spools.insert(spool.id, spool);
    }

    pub fn insert_usage(&mut self, usage: SpoolUsageRecord) {
        if let Some(previous) = self.usages.get(&usage.id) {
            if let Some(list) = self.usages_by_spool.get_mut(&previous.spool_id) {
                list.retain(|id| *id != usage.id);
            }
            if let Some(list) = self
                .usages_by_production_order
                .get_mut(&previous.production_order_id)
            {
                list.retain(|id| *id != usage.id);
            }
        }
        self.usages_by_spool
            .entry(usage.spool_id)
            .or_default()
            .push(usage.id);
        self.usages_by_production_order
            .entry(usage.production_order_id)
            .or_default()
            .push(usage.id);
        self.usages.insert(usage.id, usage);
    }

    pub fn insert_production_order(&mut self, order: ProductionOrderRecord) {
        self.production_orders.insert(order.id, order);
    }

    pub fn insert_sales_order(&mut self, order: SalesOrderRecord) {
        self.sales_orders.insert(order.id, order);
    }

    pub fn insert_serial(&mut self, serial: SerialNumberRecord) {
        if let Some(previous) = self.serials.get(&serial.serial_number) {
            let previous_po = previous.production_order_id;
            if let Some(list) = self.serials_by_production_order.get_mut(&previous_po) {
                list.retain(|sn| sn != &serial.serial_number);
            }
        }
        self.serials_by_production_order
            .entry(serial.production_order_id)
            .or_default()
            .push(serial.serial_number.clone());
        self.serials.insert(serial.serial_number.clone(), serial);
    }

    /// Attaches a shipped sales order to an existing production order.
    pub fn link_production_order(&mut self, production_order_id: Uuid, sales_order_id: Uuid) {
        if let Some(order) = self.production_orders.get_mut(&production_order_id) {
            order.sales_order_id = Some(sales_order_id);
        }
    }

    /// Records that a serial number shipped on a sales order.
    pub fn link_serial(&mut self, serial_number: &str, sales_order_id: Uuid) {
        if let Some(serial) = self.serials.get_mut(serial_number) {
            serial.sales_order_id = Some(sales_order_id);
        }
    }

    pub fn with_spool(mut self, spool: SpoolRecord, origin: Option<PurchaseOrigin>) -> Self {
        self.insert_spool(spool, origin);
        self
    }

    pub fn with_usage(mut self, usage: SpoolUsageRecord) -> Self {
        self.insert_usage(usage);
        self
    }

    pub fn with_production_order(mut self, order: ProductionOrderRecord) -> Self {
        self.insert_production_order(order);
        self
    }

    pub fn with_sales_order(mut self, order: SalesOrderRecord) -> Self {
        self.insert_sales_order(order);
        self
    }

    pub fn with_serial(mut self, serial: SerialNumberRecord) -> Self {
        self.insert_serial(serial);
        self
    }

    fn usages_by(&self, index: &HashMap<Uuid, Vec<Uuid>>, keys: &[Uuid]) -> Vec<SpoolUsageRecord> {
        keys.iter()
            .filter_map(|key| index.get(key))
            .flatten()
            .filter_map(|usage_id| self.usages.get(usage_id).cloned())
            .collect()
    }
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn spools(&self, ids: &[Uuid]) -> Result<Vec<SpoolRecord>, ServiceError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.spools.get(id).cloned())
            .collect())
    }

    async fn purchase_origins(
        &self,
        spool_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, PurchaseOrigin>, ServiceError> {
        Ok(spool_ids
            .iter()
            .filter_map(|id| self.origins.get(id).map(|origin| (*id, origin.clone())))
            .collect())
    }

    async fn usages_for_spools(
        &self,
        spool_ids: &[Uuid],
    ) -> Result<Vec<SpoolUsageRecord>, ServiceError> {
        Ok(self.usages_by(&self.usages_by_spool, spool_ids))
    }

    async fn usages_for_production_orders(
        &self,
        production_order_ids: &[Uuid],
    ) -> Result<Vec<SpoolUsageRecord>, ServiceError> {
        Ok(self.usages_by(&self.usages_by_production_order, production_order_ids))
    }

    async fn production_orders(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.production_orders.get(id).cloned())
            .collect())
    }

    async fn production_orders_for_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError> {
        Ok(self
            .production_orders
            .values()
            .filter(|order| order.sales_order_id == Some(sales_order_id))
            .cloned()
            .collect())
    }

    async fn sales_orders(&self, ids: &[Uuid]) -> Result<Vec<SalesOrderRecord>, ServiceError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.sales_orders.get(id).cloned())
            .collect())
    }

    async fn serials_for_production_orders(
        &self,
        production_order_ids: &[Uuid],
    ) -> Result<Vec<SerialNumberRecord>, ServiceError> {
        Ok(production_order_ids
            .iter()
            .filter_map(|id| self.serials_by_production_order.get(id))
            .flatten()
            .filter_map(|sn| self.serials.get(sn).cloned())
            .collect())
    }

    async fn serials_for_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<SerialNumberRecord>, ServiceError> {
        Ok(self
            .serials
            .values()
            .filter(|serial| serial.sales_order_id == Some(sales_order_id))
            .cloned()
            .collect())
    }

    async fn serial_by_number(
        &self,
        serial_number: &str,
    ) -> Result<Option<SerialNumberRecord>, ServiceError> {
        Ok(self.serials.get(serial_number).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn usage_indexes_follow_both_foreign_keys() {
        let spool = SpoolRecord::new("S-1", "PLA", dec!(1000));
        let po_a = ProductionOrderRecord::new("PO-A", "Bracket", 10);
        let po_b = ProductionOrderRecord::new("PO-B", "Bracket", 5);
        let store = InMemoryLineageStore::new()
            .with_spool(spool.clone(), None)
            .with_production_order(po_a.clone())
            .with_production_order(po_b.clone())
            .with_usage(SpoolUsageRecord::new(spool.id, po_a.id, dec!(300)))
            .with_usage(SpoolUsageRecord::new(spool.id, po_b.id, dec!(200)));

        assert_eq!(store.usages_for_spools(&[spool.id]).await.unwrap().len(), 2);
        let for_a = store.usages_for_production_orders(&[po_a.id]).await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].weight_consumed, dec!(300));
        assert!(store.purchase_origins(&[spool.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reinserting_a_usage_replaces_it() {
        let spool = SpoolRecord::new("S-1", "PLA", dec!(1000));
        let po_a = ProductionOrderRecord::new("PO-A", "Bracket", 10);
        let po_b = ProductionOrderRecord::new("PO-B", "Bracket", 5);
        let usage = SpoolUsageRecord::new(spool.id, po_a.id, dec!(300));
        let mut store = InMemoryLineageStore::new()
            .with_spool(spool.clone(), None)
            .with_production_order(po_a.clone())
            .with_production_order(po_b.clone())
            .with_usage(usage.clone());

        store.insert_usage(usage.clone());
        let for_spool = store.usages_for_spools(&[spool.id]).await.unwrap();
        assert_eq!(for_spool.len(), 1);
        assert_eq!(for_spool[0].weight_consumed, dec!(300));

        let mut moved = usage;
        moved.production_order_id = po_b.id;
        store.insert_usage(moved);
        assert!(store
            .usages_for_production_orders(&[po_a.id])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .usages_for_production_orders(&[po_b.id])
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn reinserting_a_serial_moves_it_between_orders() {
        let po_a = ProductionOrderRecord::new("PO-A", "Bracket", 1);
        let po_b = ProductionOrderRecord::new("PO-B", "Bracket", 1);
        let mut store = InMemoryLineageStore::new()
            .with_serial(SerialNumberRecord::new("SN-1", po_a.id));
        store.insert_serial(SerialNumberRecord::new("SN-1", po_b.id));

        assert!(store
            .serials_for_production_orders(&[po_a.id])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .serials_for_production_orders(&[po_b.id])
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_absent_not_errors() {
        let store = InMemoryLineageStore::new();
        assert!(store.spool(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.serial_by_number("missing").await.unwrap().is_none());
    }
}
