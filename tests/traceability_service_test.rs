mod common;

use chrono::Duration;
use rstest::rstest;
use rust_decimal_macros::dec;
use stateset_traceability::{
    errors::ServiceError,
    services::traceability::{
        records::{
            CustomerRef, ProductionOrderRecord, PurchaseOrigin, SalesOrderRecord,
            SerialNumberRecord, SpoolRecord, SpoolUsageRecord,
        },
        BackwardSubject, InMemoryLineageStore, RecallSeverity, TraceResult, TraceSubject,
        TraceabilityService, WarningKind,
    },
};
use uuid::Uuid;

use common::{fan_out, service, shipped_at, Lineage};

#[test]
fn round_trip_fixture_builds_brackets_on_both_orders() {
    let lineage = Lineage::round_trip();
    assert_eq!(lineage.po1.product.name.as_deref(), Some("Bracket"));
    assert_eq!(lineage.po2.product.name.as_deref(), Some("Bracket"));
    assert_eq!(lineage.po2.quantity_produced, 4);
    assert_eq!(lineage.po2.sales_order_id, None);
    assert_eq!(lineage.s1.current_weight, dec!(0));
}

#[tokio::test]
async fn forward_trace_reaches_orders_customers_and_serials() {
    let lineage = Lineage::round_trip();
    let result = lineage
        .service()
        .trace_forward(lineage.s1.id)
        .await
        .expect("forward trace");

    assert_eq!(result.spool.id, lineage.s1.id);
    assert_eq!(
        result.purchase_info.as_ref().map(|p| p.po_number.as_str()),
        Some("PUR-100")
    );
    assert_eq!(result.usage.len(), 2);
    assert_eq!(result.summary.production_order_count, 2);
    assert_eq!(result.summary.sales_order_count, 1);
    assert_eq!(result.summary.customer_count, 1);
    assert_eq!(result.summary.serial_count, 2);
    assert_eq!(result.summary.total_weight_consumed, dec!(1000));
    assert_eq!(result.sales_orders.len(), 1);
    assert_eq!(result.sales_orders[0].customer.id, lineage.acme.id);
    assert!(result.traceability_chain.complete);
    assert!(result.warnings.is_empty());

    let stock = result
        .usage
        .iter()
        .find(|u| u.production_order_id == lineage.po2.id)
        .expect("PO2 usage");
    assert!(stock.in_inventory);
    assert!(stock.sales_order.is_none());

    let shipped = result
        .usage
        .iter()
        .find(|u| u.production_order_id == lineage.po1.id)
        .expect("PO1 usage");
    assert!(!shipped.in_inventory);
    let serials: Vec<_> = shipped
        .serial_numbers
        .iter()
        .map(|s| s.serial_number.as_str())
        .collect();
    assert_eq!(serials, vec!["SN1", "SN2"]);
}

#[tokio::test]
async fn backward_trace_from_serial_reaches_spool_and_vendor() {
    let lineage = Lineage::round_trip();
    let result = lineage
        .service()
        .trace_backward_serial("SN1")
        .await
        .expect("backward trace");

    match &result.subject {
        BackwardSubject::SerialNumber { serial, sales_order } => {
            assert_eq!(serial.serial_number, "SN1");
            assert_eq!(sales_order.as_ref().map(|so| so.id), Some(lineage.so1.id));
        }
        other => panic!("unexpected subject {:?}", other),
    }
    assert_eq!(result.production_orders.len(), 1);
    assert_eq!(result.production_orders[0].id, lineage.po1.id);
    assert_eq!(result.material_lineage.len(), 1);

    let material = &result.material_lineage[0];
    assert_eq!(material.spool_id, lineage.s1.id);
    assert_eq!(material.total_weight_consumed, dec!(600));
    assert_eq!(
        material
            .purchase_info
            .as_ref()
            .and_then(|p| p.vendor_name.as_deref()),
        Some("Polymer Supply Co")
    );
    assert!(result.traceability_chain.complete);
}

#[tokio::test]
async fn backward_trace_from_sales_order_covers_its_production() {
    let lineage = Lineage::round_trip();
    let result = lineage
        .service()
        .trace_backward_sales_order(lineage.so1.id)
        .await
        .expect("backward trace");

    match &result.subject {
        BackwardSubject::SalesOrder {
            sales_order,
            serial_numbers,
        } => {
            assert_eq!(sales_order.id, lineage.so1.id);
            assert_eq!(serial_numbers, &vec!["SN1".to_string(), "SN2".to_string()]);
        }
        other => panic!("unexpected subject {:?}", other),
    }
    assert_eq!(result.summary.spool_count, 1);
    assert_eq!(result.summary.total_weight_consumed, dec!(600));
    assert!(result.traceability_chain.complete);
}

#[tokio::test]
async fn recall_of_a_single_spool_with_one_customer_is_medium() {
    let lineage = Lineage::round_trip();
    let impact = lineage
        .service()
        .analyze_recall(&[lineage.s1.id])
        .await
        .expect("recall");

    assert_eq!(impact.severity, RecallSeverity::Medium);
    assert_eq!(impact.impact.customer_count, 1);
    assert_eq!(impact.impact.production_order_count, 2);
    assert_eq!(impact.serial_numbers, vec!["SN1".to_string(), "SN2".to_string()]);
    assert_eq!(impact.customers.len(), 1);
    assert_eq!(impact.customers[0].name.as_deref(), Some("Acme"));
}

#[tokio::test]
async fn recall_ignores_repeated_spool_ids() {
    let lineage = Lineage::round_trip();
    let svc = lineage.service();

    let once = svc.analyze_recall(&[lineage.s1.id]).await.expect("recall");
    let repeated = svc
        .analyze_recall(&[lineage.s1.id, lineage.s1.id, lineage.s1.id])
        .await
        .expect("recall");

    assert_eq!(repeated.spools.len(), 1);
    assert_eq!(repeated.impact, once.impact);
    assert_eq!(
        serde_json::to_value(&repeated.customers).unwrap(),
        serde_json::to_value(&once.customers).unwrap()
    );
}

#[tokio::test]
async fn recall_counts_shared_customers_once() {
    let lineage = Lineage::round_trip();
    let mut store = lineage.store.clone();

    let s2 = SpoolRecord::new("S2", "PETG", dec!(750));
    let po3 = ProductionOrderRecord::new("PO3", "Bracket", 1)
        .completed(shipped_at() - Duration::days(1));
    store.insert_spool(s2.clone(), Some(PurchaseOrigin::new("PUR-101", "Polymer Supply Co")));
    store.insert_production_order(po3.clone());
    store.insert_usage(SpoolUsageRecord::new(s2.id, po3.id, dec!(120)));
    store.insert_serial(SerialNumberRecord::new("SN3", po3.id).shipped_on(lineage.so1.id));

    let impact = service(store)
        .analyze_recall(&[lineage.s1.id, s2.id])
        .await
        .expect("recall");

    assert_eq!(impact.impact.spool_count, 2);
    assert_eq!(impact.impact.production_order_count, 3);
    assert_eq!(impact.impact.sales_order_count, 1);
    assert_eq!(impact.impact.customer_count, 1);
    assert_eq!(impact.impact.serial_count, 3);
    assert_eq!(impact.impact.total_weight_consumed, dec!(1120));
}

#[tokio::test]
async fn production_order_reached_through_two_usages_counts_once() {
    let lineage = Lineage::round_trip();
    let mut store = lineage.store.clone();
    store.insert_usage(SpoolUsageRecord::new(lineage.s1.id, lineage.po1.id, dec!(0)));

    let result = service(store).trace_forward(lineage.s1.id).await.unwrap();

    assert_eq!(result.usage.len(), 3);
    assert_eq!(result.summary.production_order_count, 2);
    assert_eq!(result.summary.serial_count, 2);
    assert_eq!(result.summary.total_weight_consumed, dec!(1000));
}

#[rstest]
#[case(0, RecallSeverity::Low)]
#[case(1, RecallSeverity::Medium)]
#[case(10, RecallSeverity::Medium)]
#[case(11, RecallSeverity::High)]
#[tokio::test]
async fn recall_severity_follows_customer_count(
    #[case] customers: usize,
    #[case] expected: RecallSeverity,
) {
    let (store, spool) = fan_out(customers);
    let impact = service(store)
        .analyze_recall(&[spool.id])
        .await
        .expect("recall");

    assert_eq!(impact.impact.customer_count, customers);
    assert_eq!(impact.severity, expected);
}

#[tokio::test]
async fn repeated_traces_serialize_identically() {
    let lineage = Lineage::round_trip();
    let svc = lineage.service();

    let first = serde_json::to_string(&svc.trace_forward(lineage.s1.id).await.unwrap()).unwrap();
    let second = serde_json::to_string(&svc.trace_forward(lineage.s1.id).await.unwrap()).unwrap();
    assert_eq!(first, second);

    let first = serde_json::to_string(&svc.trace_backward_serial("SN2").await.unwrap()).unwrap();
    let second = serde_json::to_string(&svc.trace_backward_serial("SN2").await.unwrap()).unwrap();
    assert_eq!(first, second);

    let ids = [lineage.s1.id];
    let first = serde_json::to_string(&svc.analyze_recall(&ids).await.unwrap()).unwrap();
    let second = serde_json::to_string(&svc.analyze_recall(&ids).await.unwrap()).unwrap();
    assert_eq!(first, second);
}

/// (forward complete, backward complete, backward missing link count)
async fn observe(store: &InMemoryLineageStore, spool_id: Uuid) -> (bool, bool, usize) {
    let svc = service(store.clone());
    let forward = svc.trace_forward(spool_id).await.unwrap();
    let backward = svc.trace_backward_serial("SN-GAP").await.unwrap();
    (
        forward.traceability_chain.complete,
        backward.traceability_chain.complete,
        backward.traceability_chain.missing_links.len(),
    )
}

#[tokio::test]
async fn filling_missing_links_never_breaks_completeness() {
    let spool = SpoolRecord::new("S-GAP", "ABS", dec!(500));
    let order = ProductionOrderRecord::new("PO-GAP", "Gear", 1);
    let customer = CustomerRef::new("Globex");
    let sales_order = SalesOrderRecord::new("SO-GAP", customer).shipped(shipped_at());

    let mut store = InMemoryLineageStore::new()
        .with_spool(spool.clone(), None)
        .with_production_order(order.clone())
        .with_usage(SpoolUsageRecord::new(spool.id, order.id, dec!(80)))
        .with_serial(SerialNumberRecord::new("SN-GAP", order.id));

    let mut states = Vec::new();
    states.push(observe(&store, spool.id).await);

    store.insert_spool(spool.clone(), Some(PurchaseOrigin::new("PUR-GAP", "Initech")));
    states.push(observe(&store, spool.id).await);

    store.insert_production_order(order.clone().completed(shipped_at() - Duration::days(1)));
    states.push(observe(&store, spool.id).await);

    store.insert_sales_order(sales_order.clone());
    store.link_serial("SN-GAP", sales_order.id);
    states.push(observe(&store, spool.id).await);

    assert_eq!(states.first(), Some(&(false, false, 2)));
    assert_eq!(states.last(), Some(&(true, true, 0)));
    for pair in states.windows(2) {
        let (before, after) = (pair[0], pair[1]);
        assert!(!before.0 || after.0, "forward completeness regressed: {:?}", states);
        assert!(!before.1 || after.1, "backward completeness regressed: {:?}", states);
        assert!(after.2 <= before.2, "missing links grew: {:?}", states);
    }
}

#[tokio::test]
async fn over_consumed_spool_is_reported_not_raised() {
    let spool = SpoolRecord::new("S-OVER", "PLA", dec!(100));
    let a = ProductionOrderRecord::new("PO-A", "Clip", 1).completed(shipped_at());
    let b = ProductionOrderRecord::new("PO-B", "Clip", 1).completed(shipped_at());
    let store = InMemoryLineageStore::new()
        .with_spool(spool.clone(), Some(PurchaseOrigin::new("PUR-O", "Filament Works")))
        .with_production_order(a.clone())
        .with_production_order(b.clone())
        .with_usage(SpoolUsageRecord::new(spool.id, a.id, dec!(70)))
        .with_usage(SpoolUsageRecord::new(spool.id, b.id, dec!(60)));

    let result = service(store).trace_forward(spool.id).await.expect("trace");
    assert_eq!(result.summary.total_weight_consumed, dec!(130));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::ConsumptionExceedsSpoolWeight));
}

#[tokio::test]
async fn backward_trace_reports_spool_over_consumed_elsewhere() {
    let lineage = Lineage::round_trip();
    let mut store = lineage.store.clone();
    let po3 = ProductionOrderRecord::new("PO3", "Bracket", 1).completed(shipped_at());
    store.insert_production_order(po3.clone());
    store.insert_usage(SpoolUsageRecord::new(lineage.s1.id, po3.id, dec!(300)));
    let svc = service(store);

    let result = svc.trace_backward_serial("SN1").await.expect("trace");
    assert_eq!(result.material_lineage[0].total_weight_consumed, dec!(600));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::ConsumptionExceedsSpoolWeight
            && w.entity_id == lineage.s1.id));

    let document = svc
        .dhr_for(&TraceSubject::SerialNumber("SN1".to_string()), "qa@example.com")
        .await
        .expect("dhr");
    assert!(document
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::ConsumptionExceedsSpoolWeight));
}

#[tokio::test]
async fn dispatch_by_subject_picks_the_direction() {
    let lineage = Lineage::round_trip();
    let svc = lineage.service();

    let subject = TraceSubject::parse("serial", "SN1").unwrap();
    assert!(matches!(
        svc.trace(&subject).await.unwrap(),
        TraceResult::Backward(_)
    ));

    let subject = TraceSubject::parse("spool", &lineage.s1.id.to_string()).unwrap();
    assert!(matches!(
        svc.trace(&subject).await.unwrap(),
        TraceResult::Forward(_)
    ));
}

#[tokio::test]
async fn dhr_records_full_lineage_for_a_serial() {
    let lineage = Lineage::round_trip();
    let subject = TraceSubject::SerialNumber("SN1".to_string());
    let document = lineage
        .service()
        .dhr_for(&subject, "qa@example.com")
        .await
        .expect("dhr");

    assert!(document.complete);
    assert_eq!(document.generated_by, "qa@example.com");
    assert_eq!(document.lineage.material.len(), 1);
    assert_eq!(document.lineage.production.len(), 1);
    assert_eq!(document.lineage.delivery.len(), 1);
    assert_eq!(document.file_name(), "DHR-serial_number-SN1.json");
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let svc: TraceabilityService = Lineage::round_trip().service();

    assert!(matches!(
        svc.analyze_recall(&[]).await,
        Err(ServiceError::ValidationError(_))
    ));
    assert!(matches!(
        svc.trace_backward_serial("NOPE").await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        svc.trace_backward_serial("   ").await,
        Err(ServiceError::ValidationError(_))
    ));
    assert!(matches!(
        svc.trace_forward(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        svc.analyze_recall(&[Uuid::new_v4()]).await,
        Err(ServiceError::NotFound(_))
    ));
}
