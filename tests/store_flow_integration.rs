//! End-to-end store scenarios: idempotent sync, return classification,
//! the category double-count regression, sales-type split, stock movements
//! and snapshot idempotence.

use salespulse_backend::models::{SalesFilter, UpstreamOrder, UpstreamStock};
use salespulse_backend::store::revenue::AggregateFilter;
use salespulse_backend::store::AnalyticsStore;
use serde_json::json;

fn open_store(dir: &tempfile::TempDir) -> AnalyticsStore {
    let path = dir.path().join("analytics.db");
    AnalyticsStore::new(path.to_str().unwrap()).unwrap()
}

fn order(value: serde_json::Value) -> UpstreamOrder {
    serde_json::from_value(value).unwrap()
}

fn stock(value: serde_json::Value) -> UpstreamStock {
    serde_json::from_value(value).unwrap()
}

fn scenario_orders() -> Vec<UpstreamOrder> {
    vec![
        order(json!({
            "id": 1, "source_id": 1, "status_id": 1, "grand_total": 100.0,
            "ordered_at": "2024-06-01T10:00:00Z",
            "created_at": "2024-06-01T10:00:30Z",
            "updated_at": "2024-06-01T10:01:00Z",
            "buyer_id": 11,
        })),
        order(json!({
            "id": 2, "source_id": 4, "status_id": 1, "grand_total": 500.0,
            "ordered_at": "2024-06-01T11:00:00Z",
            "created_at": "2024-06-01T11:00:30Z",
            "updated_at": "2024-06-01T11:01:00Z",
            "buyer_id": 12,
        })),
        order(json!({
            "id": 3, "source_id": 1, "status_id": 19, "grand_total": 200.0,
            "ordered_at": "2024-06-01T12:00:00Z",
            "created_at": "2024-06-01T12:00:30Z",
            "updated_at": "2024-06-01T12:01:00Z",
            "buyer_id": 13,
        })),
    ]
}

fn june_first_filter(sales: SalesFilter) -> AggregateFilter {
    AggregateFilter::new(
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        sales,
    )
}

#[test]
fn idempotent_sync_keeps_counts_and_sums() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let batch = scenario_orders();

    for _ in 0..2 {
        store.upsert_orders(&batch).unwrap();

        let (count, sum) = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(grand_total), 0) FROM orders",
                    [],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
                )?)
            })
            .unwrap();
        assert_eq!(count, 3);
        assert!((sum - 800.0).abs() < 1e-9);
    }

    // An older re-delivery is a no-op.
    let stale = vec![order(json!({
        "id": 1, "source_id": 1, "status_id": 1, "grand_total": 999.0,
        "ordered_at": "2024-06-01T10:00:00Z",
        "created_at": "2024-06-01T10:00:30Z",
        "updated_at": "2024-05-01T00:00:00Z",
    }))];
    let outcome = store.upsert_orders(&stale).unwrap();
    assert!(outcome.applied.is_empty());

    let total: f64 = store
        .with_conn(|conn| {
            Ok(conn.query_row("SELECT grand_total FROM orders WHERE id = 1", [], |row| {
                row.get(0)
            })?)
        })
        .unwrap();
    assert!((total - 100.0).abs() < 1e-9);
}

#[test]
fn return_classification_in_summary() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    store.upsert_orders(&scenario_orders()).unwrap();
    store.refresh_analytics_layers().unwrap();

    let all = store
        .get_summary_stats(&june_first_filter(SalesFilter::All))
        .unwrap();
    assert_eq!(all["totalOrders"], 2);
    assert_eq!(all["totalRevenue"], 600.0);
    assert_eq!(all["totalReturns"], 1);
    assert_eq!(all["returnsRevenue"], 200.0);
    assert_eq!(all["avgCheck"], 300.0);

    // Order 1 has no manager on source 1 ⇒ `other`; only the unassigned
    // Shopify order is retail.
    let retail = store
        .get_summary_stats(&june_first_filter(SalesFilter::Retail))
        .unwrap();
    assert_eq!(retail["totalOrders"], 1);
    assert_eq!(retail["totalRevenue"], 500.0);
}

#[test]
fn silver_rows_match_kyiv_dates_and_return_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    // 22:30 UTC is past midnight in Kyiv during summer.
    let late = vec![order(json!({
        "id": 7, "source_id": 2, "status_id": 23, "grand_total": 50.0,
        "ordered_at": "2024-06-01T22:30:00Z",
        "created_at": "2024-06-01T22:30:00Z",
        "updated_at": "2024-06-01T22:31:00Z",
    }))];
    store.upsert_orders(&late).unwrap();
    store.refresh_silver_orders().unwrap();

    let (order_date, is_return, sales_type): (String, bool, String) = store
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT order_date, is_return, sales_type FROM silver_orders WHERE id = 7",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?)
        })
        .unwrap();
    assert_eq!(order_date, "2024-06-02");
    assert!(is_return);
    assert_eq!(sales_type, "other");
}

#[test]
fn category_filter_counts_multi_product_order_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .upsert_categories(&[serde_json::from_value(json!({"id": 100, "name": "Skincare"})).unwrap()])
        .unwrap();
    store
        .upsert_products(&[
            serde_json::from_value(json!({"id": 1, "name": "Cream", "category_id": 100})).unwrap(),
            serde_json::from_value(json!({"id": 2, "name": "Serum", "category_id": 100})).unwrap(),
        ])
        .unwrap();

    // One order containing BOTH products of the category.
    let batch = vec![order(json!({
        "id": 10, "source_id": 1, "status_id": 1, "grand_total": 300.0,
        "ordered_at": "2024-06-01T09:00:00Z",
        "created_at": "2024-06-01T09:00:00Z",
        "updated_at": "2024-06-01T09:01:00Z",
        "manager_id": 4,
        "products": [
            {"id": 1, "product_id": 1, "name": "Cream", "quantity": 1, "price": 100.0},
            {"id": 2, "product_id": 2, "name": "Serum", "quantity": 2, "price": 100.0}
        ]
    }))];
    store.upsert_orders(&batch).unwrap();
    store.refresh_analytics_layers().unwrap();

    let mut filter = june_first_filter(SalesFilter::Retail);
    filter.category_id = Some(100);
    let summary = store.get_summary_stats(&filter).unwrap();

    // The hazard: summing gold_daily_products.order_count would report 2.
    assert_eq!(summary["totalOrders"], 1);
    assert_eq!(summary["totalRevenue"], 300.0);

    // Gold itself records per-product order counts of 1 each; the double
    // count only appears if a query sums them.
    let gold_sum: i64 = store
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT SUM(order_count) FROM gold_daily_products WHERE category_id = 100",
                [],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(gold_sum, 2);
}

#[test]
fn brand_filter_counts_multi_product_order_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .upsert_products(&[
            serde_json::from_value(json!({
                "id": 1, "name": "Cream",
                "custom_fields": [{"uuid": "CT_1002", "name": "Бренд", "value": "Acme"}]
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "id": 2, "name": "Serum",
                "custom_fields": [{"uuid": "CT_1002", "name": "Бренд", "value": "Acme"}]
            }))
            .unwrap(),
        ])
        .unwrap();

    // One order containing BOTH products of the brand.
    let batch = vec![order(json!({
        "id": 11, "source_id": 1, "status_id": 1, "grand_total": 300.0,
        "ordered_at": "2024-06-01T09:00:00Z",
        "created_at": "2024-06-01T09:00:00Z",
        "updated_at": "2024-06-01T09:01:00Z",
        "manager_id": 4,
        "products": [
            {"id": 1, "product_id": 1, "name": "Cream", "quantity": 1, "price": 100.0},
            {"id": 2, "product_id": 2, "name": "Serum", "quantity": 2, "price": 100.0}
        ]
    }))];
    store.upsert_orders(&batch).unwrap();
    store.refresh_analytics_layers().unwrap();

    let mut filter = june_first_filter(SalesFilter::Retail);
    filter.brand = Some("acme".to_string()); // brand match is case-insensitive
    let analytics = store.get_brand_analytics(&filter).unwrap();

    // The hazard: summing gold_daily_products.order_count would report 2.
    assert_eq!(analytics["topByRevenue"]["labels"][0], "Acme");
    assert_eq!(analytics["topByRevenue"]["orders"][0], 1);
    assert_eq!(analytics["topByRevenue"]["data"][0], 300.0);
    assert_eq!(analytics["topByRevenue"]["quantities"][0], 3);

    let gold_sum: i64 = store
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT SUM(order_count) FROM gold_daily_products WHERE brand = 'Acme'",
                [],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(gold_sum, 2);
}

#[test]
fn category_filter_applies_to_product_performance() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .upsert_categories(&[serde_json::from_value(json!({"id": 200, "name": "Haircare"})).unwrap()])
        .unwrap();
    store
        .upsert_products(&[
            serde_json::from_value(json!({"id": 1, "name": "Shampoo", "category_id": 200})).unwrap(),
            serde_json::from_value(json!({"id": 2, "name": "Candle"})).unwrap(),
        ])
        .unwrap();

    let batch = vec![order(json!({
        "id": 12, "source_id": 1, "status_id": 1, "grand_total": 250.0,
        "ordered_at": "2024-06-01T09:00:00Z",
        "created_at": "2024-06-01T09:00:00Z",
        "updated_at": "2024-06-01T09:01:00Z",
        "manager_id": 4,
        "products": [
            {"id": 1, "product_id": 1, "name": "Shampoo", "quantity": 1, "price": 150.0},
            {"id": 2, "product_id": 2, "name": "Candle", "quantity": 1, "price": 100.0}
        ]
    }))];
    store.upsert_orders(&batch).unwrap();
    store.refresh_analytics_layers().unwrap();

    let mut filter = june_first_filter(SalesFilter::Retail);
    filter.category_id = Some(200);
    let performance = store.get_product_performance(&filter).unwrap();

    let labels = performance["topByRevenue"]["labels"].as_array().unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0], "Shampoo");
    assert_eq!(performance["metrics"]["totalRevenue"], 150.0);
}

#[test]
fn sales_type_split() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let batch = vec![
        order(json!({
            "id": 21, "source_id": 1, "status_id": 1, "grand_total": 100.0,
            "ordered_at": "2024-06-02T10:00:00Z", "created_at": "2024-06-02T10:00:00Z",
            "updated_at": "2024-06-02T10:00:00Z", "manager_id": 15,
        })),
        order(json!({
            "id": 22, "source_id": 4, "status_id": 1, "grand_total": 100.0,
            "ordered_at": "2024-06-02T10:00:00Z", "created_at": "2024-06-02T10:00:00Z",
            "updated_at": "2024-06-02T10:00:00Z",
        })),
        order(json!({
            "id": 23, "source_id": 1, "status_id": 1, "grand_total": 100.0,
            "ordered_at": "2024-06-02T10:00:00Z", "created_at": "2024-06-02T10:00:00Z",
            "updated_at": "2024-06-02T10:00:00Z", "manager_id": 100,
        })),
    ];
    store.upsert_orders(&batch).unwrap();
    store.refresh_silver_orders().unwrap();

    let types: Vec<(i64, String)> = store
        .with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, sales_type FROM silver_orders ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .unwrap();

    assert_eq!(
        types,
        vec![
            (21, "b2b".to_string()),
            (22, "retail".to_string()),
            (23, "other".to_string()),
        ]
    );

    // The unknown-manager order is excluded from default retail queries.
    let filter = AggregateFilter::new(
        chrono::NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
        chrono::NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
        SalesFilter::Retail,
    );
    store.refresh_gold_daily_revenue().unwrap();
    let retail = store.get_summary_stats(&filter).unwrap();
    assert_eq!(retail["totalOrders"], 1);
}

#[test]
fn gold_refresh_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    store.upsert_orders(&scenario_orders()).unwrap();
    store.refresh_analytics_layers().unwrap();

    let snapshot = |store: &AnalyticsStore| -> (i64, f64, i64) {
        store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(revenue), 0),
                            COALESCE(SUM(orders_count), 0)
                     FROM gold_daily_revenue",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            })
            .unwrap()
    };

    let first = snapshot(&store);
    store.refresh_gold_daily_revenue().unwrap();
    let second = snapshot(&store);
    assert_eq!(first, second);
}

#[test]
fn new_customer_flag_marks_first_order_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let batch = vec![
        order(json!({
            "id": 31, "source_id": 1, "status_id": 1, "grand_total": 100.0,
            "ordered_at": "2024-05-01T10:00:00Z", "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z", "buyer_id": 500, "manager_id": 4,
        })),
        order(json!({
            "id": 32, "source_id": 1, "status_id": 1, "grand_total": 150.0,
            "ordered_at": "2024-06-01T10:00:00Z", "created_at": "2024-06-01T10:00:00Z",
            "updated_at": "2024-06-01T10:00:00Z", "buyer_id": 500, "manager_id": 4,
        })),
    ];
    store.upsert_orders(&batch).unwrap();
    store.refresh_silver_orders().unwrap();

    let flags: Vec<(i64, bool)> = store
        .with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, is_new_customer FROM silver_orders ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .unwrap();
    assert_eq!(flags, vec![(31, true), (32, false)]);
}

#[test]
fn stock_movements_classified_by_delta() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .upsert_offers(&[serde_json::from_value(json!({"id": 900, "product_id": 1, "sku": "SKU-900"}))
            .unwrap()])
        .unwrap();

    // First sighting with stock → initial.
    let outcome = store
        .upsert_stocks(&[stock(json!({"id": 900, "sku": "SKU-900", "quantity": 10, "reserve": 0, "price": 100.0}))])
        .unwrap();
    assert_eq!(outcome.movements, 1);

    // Quantity drop → stock_out; reserve-only change → reserve_change;
    // quantity rise → stock_in; no change → nothing.
    store
        .upsert_stocks(&[stock(json!({"id": 900, "sku": "SKU-900", "quantity": 7, "reserve": 0, "price": 100.0}))])
        .unwrap();
    store
        .upsert_stocks(&[stock(json!({"id": 900, "sku": "SKU-900", "quantity": 7, "reserve": 2, "price": 100.0}))])
        .unwrap();
    store
        .upsert_stocks(&[stock(json!({"id": 900, "sku": "SKU-900", "quantity": 12, "reserve": 2, "price": 100.0}))])
        .unwrap();
    let unchanged = store
        .upsert_stocks(&[stock(json!({"id": 900, "sku": "SKU-900", "quantity": 12, "reserve": 2, "price": 100.0}))])
        .unwrap();
    assert_eq!(unchanged.movements, 0);

    let movements: Vec<(String, i64)> = store
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT movement_type, delta FROM stock_movements ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .unwrap();

    assert_eq!(
        movements,
        vec![
            ("initial".to_string(), 10),
            ("stock_out".to_string(), -3),
            ("reserve_change".to_string(), 0),
            ("stock_in".to_string(), 5),
        ]
    );
}

#[test]
fn sku_snapshot_is_idempotent_per_day() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .upsert_offers(&[serde_json::from_value(json!({"id": 901, "product_id": 1, "sku": "SKU-901"}))
            .unwrap()])
        .unwrap();
    store
        .upsert_stocks(&[stock(json!({"id": 901, "sku": "SKU-901", "quantity": 5, "reserve": 1, "price": 50.0}))])
        .unwrap();
    store.refresh_sku_inventory_status().unwrap();

    assert!(store.record_sku_inventory_snapshot().unwrap());
    assert!(!store.record_sku_inventory_snapshot().unwrap());

    let rows: i64 = store
        .with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM inventory_sku_history", [], |r| {
                r.get(0)
            })?)
        })
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn line_items_are_replaced_with_the_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let v1 = vec![order(json!({
        "id": 40, "source_id": 1, "status_id": 1, "grand_total": 100.0,
        "ordered_at": "2024-06-01T10:00:00Z", "created_at": "2024-06-01T10:00:00Z",
        "updated_at": "2024-06-01T10:00:00Z",
        "products": [
            {"id": 1, "product_id": 1, "name": "Cream", "quantity": 1, "price": 50.0},
            {"id": 2, "product_id": 2, "name": "Serum", "quantity": 1, "price": 50.0}
        ]
    }))];
    store.upsert_orders(&v1).unwrap();

    // The updated version carries a single line item.
    let v2 = vec![order(json!({
        "id": 40, "source_id": 1, "status_id": 1, "grand_total": 60.0,
        "ordered_at": "2024-06-01T10:00:00Z", "created_at": "2024-06-01T10:00:00Z",
        "updated_at": "2024-06-01T12:00:00Z",
        "products": [
            {"id": 1, "product_id": 1, "name": "Cream", "quantity": 1, "price": 60.0}
        ]
    }))];
    store.upsert_orders(&v2).unwrap();

    let (count, total): (i64, f64) = store
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(price_sold * quantity), 0)
                 FROM order_products WHERE order_id = 40",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .unwrap();
    assert_eq!(count, 1);
    assert!((total - 60.0).abs() < 1e-9);
}
