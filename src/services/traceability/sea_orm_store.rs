use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Schema,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::records::{
    CustomerRef, ProductRef, ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord,
    SerialNumberRecord, SpoolRecord, SpoolUsageRecord,
};
use super::store::LineageStore;
use crate::entities::traceability::{
    customer, product, production_order, purchase_order, sales_order, serial_number, spool,
    spool_usage, vendor,
};
use crate::errors::ServiceError;

/// [`LineageStore`] over the ERP tables, one batched query per relation.
#[derive(Clone)]
pub struct SeaOrmLineageStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmLineageStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn hydrate_production_orders(
        &self,
        models: Vec<production_order::Model>,
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError> {
        if models.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db;
        let product_ids: Vec<Uuid> = models.iter().map(|m| m.product_id).collect();
        let names: HashMap<Uuid, String> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        Ok(models
            .into_iter()
            .map(|m| ProductionOrderRecord {
                id: m.id,
                code: m.code,
                product: ProductRef {
                    id: m.product_id,
                    name: names.get(&m.product_id).cloned(),
                },
                quantity_produced: m.quantity_produced,
                completed_at: m.completed_at,
                sales_order_id: m.sales_order_id,
            })
            .collect())
    }
}

impl From<spool::Model> for SpoolRecord {
    fn from(model: spool::Model) -> Self {
        Self {
            id: model.id,
            spool_number: model.spool_number,
            material_type: model.material_type,
            initial_weight: model.initial_weight,
            current_weight: model.current_weight,
            supplier_lot_number: model.supplier_lot_number,
            received_at: model.received_at,
            expires_at: model.expires_at,
            status: model.status,
        }
    }
}

impl From<spool_usage::Model> for SpoolUsageRecord {
    fn from(model: spool_usage::Model) -> Self {
        Self {
            id: model.id,
            spool_id: model.spool_id,
            production_order_id: model.production_order_id,
            weight_consumed: model.weight_consumed,
        }
    }
}

impl From<serial_number::Model> for SerialNumberRecord {
    fn from(model: serial_number::Model) -> Self {
        Self {
            id: model.id,
            serial_number: model.serial_number,
            production_order_id: model.production_order_id,
            sales_order_id: model.sales_order_id,
        }
    }
}

#[async_trait]
impl LineageStore for SeaOrmLineageStore {
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn spools(&self, ids: &[Uuid]) -> Result<Vec<SpoolRecord>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let spools = spool::Entity::find()
            .filter(spool::Column::Id.is_in(ids.to_vec()))
            .all(&*self.db)
            .await?;
        Ok(spools.into_iter().map(SpoolRecord::from).collect())
    }

    #[instrument(skip(self, spool_ids), fields(count = spool_ids.len()))]
    async fn purchase_origins(
        &self,
        spool_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, PurchaseOrigin>, ServiceError> {
        if spool_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db = &*self.db;

        let links: Vec<(Uuid, Uuid)> = spool::Entity::find()
            .filter(spool::Column::Id.is_in(spool_ids.to_vec()))
            .all(db)
            .await?
            .into_iter()
            .filter_map(|s| s.purchase_order_id.map(|po| (s.id, po)))
            .collect();
        if links.is_empty() {
            return Ok(HashMap::new());
        }

        let orders: HashMap<Uuid, purchase_order::Model> = purchase_order::Entity::find()
            .filter(purchase_order::Column::Id.is_in(links.iter().map(|(_, po)| *po)))
            .all(db)
            .await?
            .into_iter()
            .map(|po| (po.id, po))
            .collect();

        let vendors: HashMap<Uuid, String> = vendor::Entity::find()
            .filter(vendor::Column::Id.is_in(orders.values().map(|po| po.vendor_id)))
            .all(db)
            .await?
            .into_iter()
            .map(|v| (v.id, v.name))
            .collect();

        let origins: HashMap<Uuid, PurchaseOrigin> = links
            .into_iter()
            .filter_map(|(spool_id, po_id)| {
                orders.get(&po_id).map(|po| {
                    (
                        spool_id,
                        PurchaseOrigin {
                            purchase_order_id: po.id,
                            po_number: po.po_number.clone(),
                            vendor_id: po.vendor_id,
                            vendor_name: vendors.get(&po.vendor_id).cloned(),
                            ordered_at: po.ordered_at,
                        },
                    )
                })
            })
            .collect();
        debug!(resolved = origins.len(), "purchase origins loaded");
        Ok(origins)
    }

    #[instrument(skip(self, spool_ids), fields(count = spool_ids.len()))]
    async fn usages_for_spools(
        &self,
        spool_ids: &[Uuid],
    ) -> Result<Vec<SpoolUsageRecord>, ServiceError> {
        if spool_ids.is_empty() {
            return Ok(Vec::new());
        }
        let usages = spool_usage::Entity::find()
            .filter(spool_usage::Column::SpoolId.is_in(spool_ids.to_vec()))
            .order_by_asc(spool_usage::Column::RecordedAt)
            .all(&*self.db)
            .await?;
        Ok(usages.into_iter().map(SpoolUsageRecord::from).collect())
    }

    #[instrument(skip(self, production_order_ids), fields(count = production_order_ids.len()))]
    async fn usages_for_production_orders(
        &self,
        production_order_ids: &[Uuid],
    ) -> Result<Vec<SpoolUsageRecord>, ServiceError> {
        if production_order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let usages = spool_usage::Entity::find()
            .filter(spool_usage::Column::ProductionOrderId.is_in(production_order_ids.to_vec()))
            .order_by_asc(spool_usage::Column::RecordedAt)
            .all(&*self.db)
            .await?;
        Ok(usages.into_iter().map(SpoolUsageRecord::from).collect())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn production_orders(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let models = production_order::Entity::find()
            .filter(production_order::Column::Id.is_in(ids.to_vec()))
            .all(&*self.db)
            .await?;
        self.hydrate_production_orders(models).await
    }

    #[instrument(skip(self))]
    async fn production_orders_for_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<ProductionOrderRecord>, ServiceError> {
        let models = production_order::Entity::find()
            .filter(production_order::Column::SalesOrderId.eq(sales_order_id))
            .all(&*self.db)
            .await?;
        self.hydrate_production_orders(models).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn sales_orders(&self, ids: &[Uuid]) -> Result<Vec<SalesOrderRecord>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db;
        let orders = sales_order::Entity::find()
            .filter(sales_order::Column::Id.is_in(ids.to_vec()))
            .all(db)
            .await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let customers: HashMap<Uuid, String> = customer::Entity::find()
            .filter(customer::Column::Id.is_in(orders.iter().map(|o| o.customer_id)))
            .all(db)
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        Ok(orders
            .into_iter()
            .map(|o| SalesOrderRecord {
                id: o.id,
                order_number: o.order_number,
                customer: CustomerRef {
                    id: o.customer_id,
                    name: customers.get(&o.customer_id).cloned(),
                },
                ship_date: o.ship_date,
                status: o.status,
            })
            .collect())
    }

    #[instrument(skip(self, production_order_ids), fields(count = production_order_ids.len()))]
    async fn serials_for_production_orders(
        &self,
        production_order_ids: &[Uuid],
    ) -> Result<Vec<SerialNumberRecord>, ServiceError> {
        if production_order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let serials = serial_number::Entity::find()
            .filter(serial_number::Column::ProductionOrderId.is_in(production_order_ids.to_vec()))
            .order_by_asc(serial_number::Column::SerialNumber)
            .all(&*self.db)
            .await?;
        Ok(serials.into_iter().map(SerialNumberRecord::from).collect())
    }

    #[instrument(skip(self))]
    async fn serials_for_sales_order(
        &self,
        sales_order_id: Uuid,
    ) -> Result<Vec<SerialNumberRecord>, ServiceError> {
        let serials = serial_number::Entity::find()
            .filter(serial_number::Column::SalesOrderId.eq(sales_order_id))
            .order_by_asc(serial_number::Column::SerialNumber)
            .all(&*self.db)
            .await?;
        Ok(serials.into_iter().map(SerialNumberRecord::from).collect())
    }

    #[instrument(skip(self))]
    async fn serial_by_number(
        &self,
        serial_number: &str,
    ) -> Result<Option<SerialNumberRecord>, ServiceError> {
        let serial = serial_number::Entity::find()
            .filter(serial_number::Column::SerialNumber.eq(serial_number))
            .one(&*self.db)
            .await?;
        Ok(serial.map(SerialNumberRecord::from))
    }
}

/// Creates the lineage tables from the entity definitions when they are absent.
///
/// Production databases get these tables from the ERP's own schema; this is
/// for local runs against SQLite and for tests.
pub async fn create_lineage_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let schema = Schema::new(db.get_database_backend());
    create_table(db, &schema, vendor::Entity).await?;
    create_table(db, &schema, purchase_order::Entity).await?;
    create_table(db, &schema, spool::Entity).await?;
    create_table(db, &schema, product::Entity).await?;
    create_table(db, &schema, customer::Entity).await?;
    create_table(db, &schema, sales_order::Entity).await?;
    create_table(db, &schema, production_order::Entity).await?;
    create_table(db, &schema, spool_usage::Entity).await?;
    create_table(db, &schema, serial_number::Entity).await?;
    Ok(())
}

async fn create_table<E: EntityTrait>(
    db: &DatabaseConnection,
    schema: &Schema,
    entity: E,
) -> Result<(), DbErr> {
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(db.get_database_backend().build(&statement))
        .await?;
    Ok(())
}
