#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::Value;
use stateset_traceability::{
    app_router,
    config::AppConfig,
    db,
    services::traceability::{
        records::{
            CustomerRef, ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord,
            SerialNumberRecord, SpoolRecord, SpoolUsageRecord,
        },
        InMemoryLineageStore, TraceabilityConfig, TraceabilityService,
    },
    AppState,
};
use tower::ServiceExt;

pub fn shipped_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
}

/// S1 (1000 g) feeds PO1 (600 g) and PO2 (400 g). PO1 minted SN1 and SN2,
/// both shipped on SO1 to Acme. PO2 went to stock.
///
/// Kept identical to the crate's unit-test `RoundTrip` fixture.
pub struct Lineage {
    pub store: InMemoryLineageStore,
    pub s1: SpoolRecord,
    pub origin: PurchaseOrigin,
    pub po1: ProductionOrderRecord,
    pub po2: ProductionOrderRecord,
    pub so1: SalesOrderRecord,
    pub acme: CustomerRef,
}

impl Lineage {
    pub fn round_trip() -> Self {
        let s1 = SpoolRecord::new("S1", "PETG", dec!(1000))
            .with_supplier_lot("LOT-77")
            .with_current_weight(dec!(0));
        let origin = PurchaseOrigin::new("PUR-100", "Polymer Supply Co");
        let acme = CustomerRef::new("Acme");
        let so1 = SalesOrderRecord::new("SO1", acme.clone()).shipped(shipped_at());
        let po1 = ProductionOrderRecord::new("PO1", "Bracket", 2)
            .completed(shipped_at() - Duration::days(3))
            .for_sales_order(so1.id);
        let po2 = ProductionOrderRecord::new("PO2", "Bracket", 4)
            .completed(shipped_at() - Duration::days(2));

        let store = InMemoryLineageStore::new()
            .with_spool(s1.clone(), Some(origin.clone()))
            .with_production_order(po1.clone())
            .with_production_order(po2.clone())
            .with_sales_order(so1.clone())
            .with_usage(SpoolUsageRecord::new(s1.id, po1.id, dec!(600)))
            .with_usage(SpoolUsageRecord::new(s1.id, po2.id, dec!(400)))
            .with_serial(SerialNumberRecord::new("SN1", po1.id).shipped_on(so1.id))
            .with_serial(SerialNumberRecord::new("SN2", po1.id).shipped_on(so1.id));

        Self {
            store,
            s1,
            origin,
            po1,
            po2,
            so1,
            acme,
        }
    }

    pub fn service(&self) -> TraceabilityService {
        service(self.store.clone())
    }
}

pub fn service(store: InMemoryLineageStore) -> TraceabilityService {
    TraceabilityService::new(Arc::new(store), TraceabilityConfig::default())
}

/// One spool whose single production order shipped one serial to each of
/// `customers` distinct customers.
pub fn fan_out(customers: usize) -> (InMemoryLineageStore, SpoolRecord) {
    let spool = SpoolRecord::new("S-FAN", "PLA", dec!(1000));
    let order = ProductionOrderRecord::new("PO-FAN", "Clip", customers as i32)
        .completed(shipped_at() - Duration::days(1));
    let mut store = InMemoryLineageStore::new()
        .with_spool(spool.clone(), Some(PurchaseOrigin::new("PUR-FAN", "Filament Works")))
        .with_production_order(order.clone())
        .with_usage(SpoolUsageRecord::new(spool.id, order.id, dec!(250)));

    for n in 0..customers {
        let sales_order = SalesOrderRecord::new(
            format!("SO-FAN-{:03}", n),
            CustomerRef::new(format!("Customer {:03}", n)),
        )
        .shipped(shipped_at());
        store.insert_serial(
            SerialNumberRecord::new(format!("SN-FAN-{:03}", n), order.id).shipped_on(sales_order.id),
        );
        store.insert_sales_order(sales_order);
    }

    (store, spool)
}

/// Router over an in-memory lineage store; the SQLite connection only backs the readiness check.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    pub async fn new(store: InMemoryLineageStore) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.recall_max_spools = 3;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        let traceability = Arc::new(TraceabilityService::new(
            Arc::new(store),
            cfg.traceability(),
        ));
        let state = AppState {
            db: Arc::new(pool),
            config: cfg,
            traceability,
        };

        Self {
            router: app_router(state.clone()),
            state,
        }
    }

    /// Send a request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.request(Method::GET, uri, None, &[]).await
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body is not json")
}
