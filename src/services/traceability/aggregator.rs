use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;
use uuid::Uuid;

/// A sales order reached through the lineage and the customer it shipped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Delivery {
    pub sales_order_id: Uuid,
    pub customer_id: Uuid,
}

/// One spool usage edge with everything reachable downstream of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactRow {
    pub usage_id: Uuid,
    pub spool_id: Uuid,
    pub production_order_id: Uuid,
    pub product_id: Option<Uuid>,
    pub weight_consumed: Decimal,
    pub deliveries: Vec<Delivery>,
    pub serial_numbers: Vec<String>,
}

/// Distinct-entity counts over a set of lineage edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImpactSummary {
    pub spool_count: usize,
    pub production_order_count: usize,
    pub product_count: usize,
    pub sales_order_count: usize,
    pub customer_count: usize,
    pub serial_count: usize,
    /// Grams, summed over distinct usage rows
    pub total_weight_consumed: Decimal,
}

/// Running sets of entity identities reached by a trace.
///
/// Counts are always taken over identities, never rows. Weight is keyed by
/// usage row, which makes [`merge`](Self::merge) a plain set union: it is
/// commutative, associative and idempotent, so per-spool results can be folded
/// in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpactAggregator {
    spools: BTreeSet<Uuid>,
    production_orders: BTreeSet<Uuid>,
    products: BTreeSet<Uuid>,
    sales_orders: BTreeSet<Uuid>,
    customers: BTreeSet<Uuid>,
    serial_numbers: BTreeSet<String>,
    weights: BTreeMap<Uuid, Decimal>,
}

/// Reduces raw usage rows into an aggregator.
pub fn aggregate<'a>(rows: impl IntoIterator<Item = &'a ImpactRow>) -> ImpactAggregator {
    let mut aggregator = ImpactAggregator::new();
    for row in rows {
        aggregator.record(row);
    }
    aggregator
}

impl ImpactAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, row: &ImpactRow) {
        self.spools.insert(row.spool_id);
        self.production_orders.insert(row.production_order_id);
        if let Some(product_id) = row.product_id {
            self.products.insert(product_id);
        }
        for delivery in &row.deliveries {
            self.record_delivery(*delivery);
        }
        self.serial_numbers
            .extend(row.serial_numbers.iter().cloned());
        self.record_weight(row.usage_id, row.weight_consumed);
    }

    pub fn record_spool(&mut self, spool_id: Uuid) {
        self.spools.insert(spool_id);
    }

    /// Records an order reached without a usage row, e.g. one with no spool usage yet.
    pub fn record_production_order(&mut self, production_order_id: Uuid, product_id: Option<Uuid>) {
        self.production_orders.insert(production_order_id);
        if let Some(product_id) = product_id {
            self.products.insert(product_id);
        }
    }

    pub fn record_delivery(&mut self, delivery: Delivery) {
        self.sales_orders.insert(delivery.sales_order_id);
        self.customers.insert(delivery.customer_id);
    }

    pub fn record_serial(&mut self, serial_number: impl Into<String>) {
        self.serial_numbers.insert(serial_number.into());
    }

    fn record_weight(&mut self, usage_id: Uuid, weight: Decimal) {
        // Conflicting weights for one usage row keep the larger value so the
        // union stays order-independent.
        self.weights
            .entry(usage_id)
            .and_modify(|existing| *existing = (*existing).max(weight))
            .or_insert(weight);
    }

    /// Folds `other` into `self`.
    pub fn merge(mut self, other: ImpactAggregator) -> ImpactAggregator {
        self.merge_in(other);
        self
    }

    pub fn merge_in(&mut self, other: ImpactAggregator) {
        self.spools.extend(other.spools);
        self.production_orders.extend(other.production_orders);
        self.products.extend(other.products);
        self.sales_orders.extend(other.sales_orders);
        self.customers.extend(other.customers);
        self.serial_numbers.extend(other.serial_numbers);
        for (usage_id, weight) in other.weights {
            self.record_weight(usage_id, weight);
        }
    }

    pub fn summary(&self) -> ImpactSummary {
        ImpactSummary {
            spool_count: self.spools.len(),
            production_order_count: self.production_orders.len(),
            product_count: self.products.len(),
            sales_order_count: self.sales_orders.len(),
            customer_count: self.customers.len(),
            serial_count: self.serial_numbers.len(),
            total_weight_consumed: self.weights.values().copied().sum(),
        }
    }

    pub fn spools(&self) -> &BTreeSet<Uuid> {
        &self.spools
    }

    pub fn production_orders(&self) -> &BTreeSet<Uuid> {
        &self.production_orders
    }

    pub fn products(&self) -> &BTreeSet<Uuid> {
        &self.products
    }

    pub fn sales_orders(&self) -> &BTreeSet<Uuid> {
        &self.sales_orders
    }

    pub fn customers(&self) -> &BTreeSet<Uuid> {
        &self.customers
    }

    pub fn serial_numbers(&self) -> &BTreeSet<String> {
        &self.serial_numbers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(spool: Uuid, po: Uuid, weight: Decimal) -> ImpactRow {
        ImpactRow {
            usage_id: Uuid::new_v4(),
            spool_id: spool,
            production_order_id: po,
            product_id: None,
            weight_consumed: weight,
            deliveries: Vec::new(),
            serial_numbers: Vec::new(),
        }
    }

    #[test]
    fn production_order_reached_twice_counts_once() {
        let po = Uuid::new_v4();
        let rows = vec![
            row(Uuid::new_v4(), po, dec!(250)),
            row(Uuid::new_v4(), po, dec!(150)),
        ];

        let summary = aggregate(&rows).summary();
        assert_eq!(summary.production_order_count, 1);
        assert_eq!(summary.spool_count, 2);
        assert_eq!(summary.total_weight_consumed, dec!(400));
    }

    #[test]
    fn customers_deduplicate_by_identity() {
        let customer = Uuid::new_v4();
        let mut first = row(Uuid::new_v4(), Uuid::new_v4(), dec!(10));
        first.deliveries.push(Delivery {
            sales_order_id: Uuid::new_v4(),
            customer_id: customer,
        });
        let mut second = row(Uuid::new_v4(), Uuid::new_v4(), dec!(10));
        second.deliveries.push(Delivery {
            sales_order_id: Uuid::new_v4(),
            customer_id: customer,
        });

        let summary = aggregate([&first, &second]).summary();
        assert_eq!(summary.sales_order_count, 2);
        assert_eq!(summary.customer_count, 1);
    }

    #[test]
    fn merge_equals_aggregate_of_union() {
        let shared = row(Uuid::new_v4(), Uuid::new_v4(), dec!(5));
        let a = vec![shared.clone(), row(Uuid::new_v4(), Uuid::new_v4(), dec!(7))];
        let b = vec![shared, row(Uuid::new_v4(), Uuid::new_v4(), dec!(11))];

        let ab = aggregate(&a).merge(aggregate(&b));
        let ba = aggregate(&b).merge(aggregate(&a));
        let union = aggregate(a.iter().chain(b.iter()));

        assert_eq!(ab, ba);
        assert_eq!(ab, union);
        assert_eq!(ab.summary().total_weight_consumed, dec!(23));
    }

    #[test]
    fn empty_aggregate_is_zeroed() {
        assert_eq!(ImpactAggregator::new().summary(), ImpactSummary::default());
    }
}
