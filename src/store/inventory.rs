//! Inventory: SKU status refresh, daily snapshots and stock analytics.
//!
//! `sku_inventory_status` is a denormalized current-state table, fully
//! rebuilt from Bronze + order history on each refresh. Snapshots are
//! append-only, one per calendar day, and never mutated in place.

use super::{fmt_date, round1, round2, AnalyticsStore};
use crate::config;
use crate::models::SkuStatus;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde_json::{json, Value};
use tracing::info;

fn kyiv_today() -> NaiveDate {
    Utc::now().with_timezone(&config::DISPLAY_TZ).date_naive()
}

/// Shared SELECT over sku_inventory_status with derived fields.
/// Binds one parameter: today's date (for days_since_sale).
const SKU_VIEW_SQL: &str = "
    SELECT s.offer_id, s.product_id, s.sku, s.name, s.brand,
           s.category_id, c.name AS category_name,
           s.quantity, s.reserve,
           s.quantity - s.reserve AS available,
           s.price, s.purchased_price,
           s.quantity * s.price AS stock_value,
           s.last_sale_date,
           CASE WHEN s.last_sale_date IS NULL THEN 999
                ELSE CAST(julianday(?1) - julianday(s.last_sale_date) AS INTEGER)
           END AS days_since_sale
    FROM sku_inventory_status s
    LEFT JOIN categories c ON s.category_id = c.id
    WHERE s.quantity > 0";

impl AnalyticsStore {
    /// Rebuild the denormalized SKU status table from Bronze.
    ///
    /// `first_seen_at` is preserved from a prior row when one exists, else
    /// falls back to the product's first order date, else today.
    pub fn refresh_sku_inventory_status(&self) -> Result<usize> {
        let today = fmt_date(kyiv_today());
        let return_ids = config::RETURN_STATUS_IDS
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let count = self.with_tx(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO sku_inventory_status
                        (offer_id, product_id, sku, name, brand, category_id,
                         quantity, reserve, price, purchased_price,
                         last_sale_date, first_seen_at, last_stock_out_at, updated_at)
                     SELECT
                        os.id,
                        COALESCE(o.product_id, 0),
                        COALESCE(os.sku, CAST(os.id AS TEXT)),
                        p.name,
                        p.brand,
                        p.category_id,
                        os.quantity,
                        os.reserve,
                        COALESCE(os.price, 0),
                        os.purchased_price,
                        pls.last_sale_date,
                        COALESCE(
                            (SELECT first_seen_at FROM sku_inventory_status
                             WHERE offer_id = os.id),
                            fod.first_order_date,
                            ?1
                        ),
                        smo.last_stock_out_date,
                        strftime('%Y-%m-%d %H:%M:%S', 'now')
                     FROM offer_stocks os
                     LEFT JOIN offers o ON os.id = o.id
                     LEFT JOIN products p ON o.product_id = p.id
                     LEFT JOIN (
                        SELECT op.product_id,
                               MAX(kyiv_date(ord.ordered_at)) AS last_sale_date
                        FROM order_products op
                        JOIN orders ord ON op.order_id = ord.id
                        WHERE ord.status_id NOT IN ({return_ids})
                        GROUP BY op.product_id
                     ) pls ON o.product_id = pls.product_id
                     LEFT JOIN (
                        SELECT op2.product_id,
                               MIN(kyiv_date(ord2.ordered_at)) AS first_order_date
                        FROM order_products op2
                        JOIN orders ord2 ON op2.order_id = ord2.id
                        GROUP BY op2.product_id
                     ) fod ON o.product_id = fod.product_id
                     LEFT JOIN (
                        SELECT offer_id, MAX(substr(recorded_at, 1, 10)) AS last_stock_out_date
                        FROM stock_movements
                        WHERE movement_type = 'stock_out'
                        GROUP BY offer_id
                     ) smo ON os.id = smo.offer_id"
                ),
                params![today],
            )?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM sku_inventory_status", [], |r| r.get(0))?;
            Ok(count as usize)
        })?;

        info!(skus = count, "refreshed sku_inventory_status");
        Ok(count)
    }

    /// Per-SKU daily snapshot. Idempotent: returns false when today's rows
    /// already exist.
    pub fn record_sku_inventory_snapshot(&self) -> Result<bool> {
        let today = fmt_date(kyiv_today());
        let recorded = self.with_tx(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM inventory_sku_history WHERE date = ?1 LIMIT 1",
                    params![today],
                    |row| row.get(0),
                )
                .ok();
            if exists.is_some() {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO inventory_sku_history (date, offer_id, quantity, reserve, price)
                 SELECT ?1, offer_id, quantity, reserve, price
                 FROM sku_inventory_status",
                params![today],
            )?;
            Ok(true)
        })?;

        if recorded {
            info!(date = %today, "recorded SKU inventory snapshot");
        }
        Ok(recorded)
    }

    /// Aggregate daily snapshot for average-inventory math.
    pub fn record_inventory_snapshot(&self, force: bool) -> Result<bool> {
        let today = fmt_date(kyiv_today());
        let recorded = self.with_tx(|conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM inventory_history WHERE date = ?1 LIMIT 1",
                    params![today],
                    |row| row.get(0),
                )
                .ok();
            if exists.is_some() {
                if !force {
                    return Ok(false);
                }
                conn.execute("DELETE FROM inventory_history WHERE date = ?1", params![today])?;
            }

            conn.execute(
                "INSERT INTO inventory_history
                    (date, total_quantity, total_value, total_reserve, sku_count)
                 SELECT ?1,
                        COALESCE(SUM(MAX(0, quantity - reserve)), 0),
                        COALESCE(SUM(MAX(0, quantity - reserve) * price), 0),
                        COALESCE(SUM(reserve), 0),
                        COUNT(*)
                 FROM offer_stocks",
                params![today],
            )?;
            Ok(true)
        })?;

        Ok(recorded)
    }

    /// Totals, top items and low/out-of-stock lists for the dashboard.
    pub fn get_stock_summary(&self, limit: usize) -> Result<Value> {
        self.with_conn(|conn| {
            // available = max(0, quantity - reserve) to match the CRM display
            let stats = conn.query_row(
                "SELECT
                    COUNT(*),
                    SUM(CASE WHEN quantity > 0 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN quantity = 0 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN quantity > 0 AND quantity <= 5 THEN 1 ELSE 0 END),
                    COALESCE(SUM(MAX(0, quantity - reserve)), 0),
                    COALESCE(SUM(reserve), 0),
                    COALESCE(SUM(MAX(0, quantity - reserve) * price), 0),
                    COALESCE(SUM(reserve * price), 0),
                    COALESCE(SUM(MAX(0, quantity - reserve) * COALESCE(purchased_price, 0)), 0),
                    COALESCE(SUM(reserve * COALESCE(purchased_price, 0)), 0)
                 FROM offer_stocks",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, f64>(9)?,
                    ))
                },
            )?;

            let item_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Value> {
                Ok(json!({
                    "sku": row.get::<_, Option<String>>(0)?,
                    "quantity": row.get::<_, i64>(1)?,
                    "reserve": row.get::<_, i64>(2)?,
                    "price": round2(row.get::<_, Option<f64>>(3)?.unwrap_or(0.0)),
                    "name": row.get::<_, Option<String>>(4)?,
                }))
            };

            let mut top_stmt = conn.prepare_cached(
                "SELECT os.sku, os.quantity, os.reserve, os.price, p.name
                 FROM offer_stocks os
                 LEFT JOIN offers o ON os.id = o.id
                 LEFT JOIN products p ON o.product_id = p.id
                 WHERE os.quantity > 0
                 ORDER BY os.quantity DESC
                 LIMIT ?1",
            )?;
            let top_by_quantity: Vec<Value> = top_stmt
                .query_map([limit as i64], item_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut low_stmt = conn.prepare_cached(
                "SELECT os.sku, os.quantity, os.reserve, os.price, p.name
                 FROM offer_stocks os
                 LEFT JOIN offers o ON os.id = o.id
                 LEFT JOIN products p ON o.product_id = p.id
                 WHERE os.quantity > 0 AND os.quantity <= 5
                 ORDER BY os.quantity ASC
                 LIMIT 20",
            )?;
            let low_stock: Vec<Value> = low_stmt
                .query_map([], item_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut out_stmt = conn.prepare_cached(
                "SELECT os.sku, os.price, p.name
                 FROM offer_stocks os
                 LEFT JOIN offers o ON os.id = o.id
                 LEFT JOIN products p ON o.product_id = p.id
                 WHERE os.quantity = 0
                 ORDER BY os.price DESC
                 LIMIT 20",
            )?;
            let out_of_stock: Vec<Value> = out_stmt
                .query_map([], |row| {
                    Ok(json!({
                        "sku": row.get::<_, Option<String>>(0)?,
                        "price": round2(row.get::<_, Option<f64>>(1)?.unwrap_or(0.0)),
                        "name": row.get::<_, Option<String>>(2)?,
                    }))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let last_sync: Option<String> = conn
                .query_row(
                    "SELECT value FROM sync_metadata WHERE key = 'stocks_last_sync'",
                    [],
                    |row| row.get(0),
                )
                .ok();

            Ok(json!({
                "summary": {
                    "totalOffers": stats.0,
                    "inStockCount": stats.1,
                    "outOfStockCount": stats.2,
                    "lowStockCount": stats.3,
                    "totalQuantity": stats.4,
                    "totalReserve": stats.5,
                    "totalValue": round2(stats.6),
                    "reserveValue": round2(stats.7),
                    "costValue": round2(stats.8),
                    "reserveCostValue": round2(stats.9),
                },
                "topByQuantity": top_by_quantity,
                "lowStock": low_stock,
                "outOfStock": out_of_stock,
                "lastSync": last_sync,
            }))
        })
    }

    /// (beginning + ending) / 2 over the lookback window.
    pub fn get_average_inventory(&self, days: i64) -> Result<Value> {
        self.with_conn(|conn| {
            let cutoff = fmt_date(kyiv_today() - chrono::Days::new(days.max(0) as u64));
            let mut stmt = conn.prepare_cached(
                "SELECT date, total_quantity, total_value
                 FROM inventory_history
                 WHERE date >= ?1
                 ORDER BY date",
            )?;
            let rows: Vec<(String, i64, f64)> = stmt
                .query_map([cutoff], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let (avg_quantity, avg_value) = match (rows.first(), rows.last()) {
                (Some(first), Some(last)) => (
                    (first.1 + last.1) as f64 / 2.0,
                    (first.2 + last.2) / 2.0,
                ),
                _ => (0.0, 0.0),
            };

            Ok(json!({
                "days": days,
                "dataPoints": rows.len(),
                "beginning": rows.first().map(|r| json!({
                    "date": r.0, "quantity": r.1, "value": round2(r.2),
                })),
                "ending": rows.last().map(|r| json!({
                    "date": r.0, "quantity": r.1, "value": round2(r.2),
                })),
                "averageQuantity": avg_quantity.round(),
                "averageValue": round2(avg_value),
            }))
        })
    }

    /// Status breakdown + aging buckets over in-stock SKUs.
    pub fn get_inventory_analysis(&self) -> Result<Value> {
        self.with_conn(|conn| {
            let today = fmt_date(kyiv_today());

            let sql = format!(
                "SELECT v.days_since_sale, v.quantity, v.stock_value FROM ({SKU_VIEW_SQL}) v"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(i64, i64, f64)> = stmt
                .query_map([&today], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // Status breakdown via the shared classification.
            let mut status_agg: Vec<(SkuStatus, i64, i64, f64, f64)> = [
                SkuStatus::Active,
                SkuStatus::Moderate,
                SkuStatus::Slow,
                SkuStatus::Dead,
            ]
            .into_iter()
            .map(|s| (s, 0i64, 0i64, 0.0f64, 0.0f64))
            .collect();

            for (days, qty, value) in &rows {
                let status = SkuStatus::from_days_since_sale(*days);
                let entry = status_agg
                    .iter_mut()
                    .find(|(s, ..)| *s == status)
                    .expect("all statuses present");
                entry.1 += 1;
                entry.2 += qty;
                entry.3 += value;
                entry.4 += *days as f64;
            }

            let statuses: Vec<Value> = status_agg
                .iter()
                .map(|(status, skus, units, value, days_sum)| {
                    json!({
                        "status": status.as_str(),
                        "priority": status.priority(),
                        "skuCount": skus,
                        "totalUnits": units,
                        "totalValue": round2(*value),
                        "avgDaysSinceSale": if *skus > 0 {
                            round1(days_sum / *skus as f64)
                        } else { 0.0 },
                    })
                })
                .collect();

            // Aging buckets.
            const BUCKETS: [(&str, i64, i64); 5] = [
                ("0-30 days", 0, 30),
                ("31-60 days", 31, 60),
                ("61-90 days", 61, 90),
                ("91-180 days", 91, 180),
                ("180+ days", 181, i64::MAX),
            ];
            let buckets: Vec<Value> = BUCKETS
                .iter()
                .map(|(label, lo, hi)| {
                    let matching: Vec<&(i64, i64, f64)> = rows
                        .iter()
                        .filter(|(d, _, _)| d >= lo && d <= hi)
                        .collect();
                    json!({
                        "bucket": label,
                        "skuCount": matching.len(),
                        "totalUnits": matching.iter().map(|(_, q, _)| q).sum::<i64>(),
                        "totalValue": round2(matching.iter().map(|(_, _, v)| v).sum::<f64>()),
                    })
                })
                .collect();

            Ok(json!({
                "byStatus": statuses,
                "agingBuckets": buckets,
                "inStockSkus": rows.len(),
            }))
        })
    }

    /// Recommended actions for dead/slow stock + restock alerts.
    pub fn get_inventory_actions(&self) -> Result<Value> {
        self.with_conn(|conn| {
            let today = fmt_date(kyiv_today());

            let sql = format!(
                "SELECT v.offer_id, v.sku, v.name, v.brand, v.category_name,
                        v.quantity, v.reserve, v.available, v.stock_value,
                        v.days_since_sale
                 FROM ({SKU_VIEW_SQL}) v"
            );
            let mut stmt = conn.prepare(&sql)?;

            struct SkuRow {
                offer_id: i64,
                sku: Option<String>,
                name: Option<String>,
                brand: Option<String>,
                category_name: Option<String>,
                quantity: i64,
                reserve: i64,
                available: i64,
                stock_value: f64,
                days_since_sale: i64,
            }

            let rows: Vec<SkuRow> = stmt
                .query_map([&today], |row| {
                    Ok(SkuRow {
                        offer_id: row.get(0)?,
                        sku: row.get(1)?,
                        name: row.get(2)?,
                        brand: row.get(3)?,
                        category_name: row.get(4)?,
                        quantity: row.get(5)?,
                        reserve: row.get(6)?,
                        available: row.get(7)?,
                        stock_value: row.get(8)?,
                        days_since_sale: row.get(9)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut actions: Vec<Value> = rows
                .iter()
                .filter_map(|r| {
                    let status = SkuStatus::from_days_since_sale(r.days_since_sale);
                    let action = match status {
                        SkuStatus::Dead => "Consider liquidation or clearance sale",
                        SkuStatus::Slow => "Apply promotional pricing",
                        SkuStatus::Moderate if r.quantity > 10 => "Monitor closely",
                        _ => return None,
                    };
                    Some(json!({
                        "offerId": r.offer_id,
                        "sku": r.sku,
                        "name": r.name,
                        "brand": r.brand,
                        "categoryName": r.category_name,
                        "quantity": r.quantity,
                        "stockValue": round2(r.stock_value),
                        "daysSinceSale": r.days_since_sale,
                        "status": status.as_str(),
                        "recommendedAction": action,
                        "potentialLoss": round2(r.stock_value * status.loss_factor()),
                    }))
                })
                .collect();
            actions.sort_by(|a, b| {
                let la = a["potentialLoss"].as_f64().unwrap_or(0.0);
                let lb = b["potentialLoss"].as_f64().unwrap_or(0.0);
                lb.partial_cmp(&la).unwrap_or(std::cmp::Ordering::Equal)
            });

            // Restock alerts: active sellers running out.
            let mut alerts: Vec<Value> = rows
                .iter()
                .filter(|r| {
                    r.available <= 5
                        && SkuStatus::from_days_since_sale(r.days_since_sale) == SkuStatus::Active
                })
                .map(|r| {
                    let level = if r.available <= 0 {
                        "Out of Stock"
                    } else if r.available <= 2 {
                        "Critical Low"
                    } else {
                        "Low Stock"
                    };
                    json!({
                        "offerId": r.offer_id,
                        "sku": r.sku,
                        "name": r.name,
                        "brand": r.brand,
                        "categoryName": r.category_name,
                        "quantity": r.quantity,
                        "reserve": r.reserve,
                        "available": r.available,
                        "daysSinceSale": r.days_since_sale,
                        "alertLevel": level,
                    })
                })
                .collect();
            alerts.sort_by_key(|a| {
                (
                    a["available"].as_i64().unwrap_or(0),
                    a["daysSinceSale"].as_i64().unwrap_or(0),
                )
            });

            Ok(json!({
                "recommendedActions": actions,
                "restockAlerts": alerts,
                "totalPotentialLoss": round2(
                    rows.iter()
                        .map(|r| {
                            r.stock_value
                                * SkuStatus::from_days_since_sale(r.days_since_sale).loss_factor()
                        })
                        .sum::<f64>()
                ),
            }))
        })
    }

    /// Daily totals from the aggregate snapshot history.
    pub fn get_inventory_trend(&self, days: i64) -> Result<Value> {
        self.with_conn(|conn| {
            let cutoff = fmt_date(kyiv_today() - chrono::Days::new(days.max(0) as u64));
            let mut stmt = conn.prepare_cached(
                "SELECT date, total_quantity, total_value, total_reserve, sku_count
                 FROM inventory_history
                 WHERE date >= ?1
                 ORDER BY date",
            )?;
            let rows: Vec<Value> = stmt
                .query_map([cutoff], |row| {
                    Ok(json!({
                        "date": row.get::<_, String>(0)?,
                        "totalQuantity": row.get::<_, i64>(1)?,
                        "totalValue": round2(row.get::<_, f64>(2)?),
                        "totalReserve": row.get::<_, i64>(3)?,
                        "skuCount": row.get::<_, i64>(4)?,
                    }))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(json!({"trend": rows, "days": days}))
        })
    }

    /// Drop audit rows older than the retention window. Returns rows deleted.
    pub fn prune_stock_movements(&self, retention_days: i64) -> Result<usize> {
        let cutoff = fmt_date(kyiv_today() - chrono::Days::new(retention_days.max(0) as u64));
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM stock_movements WHERE substr(recorded_at, 1, 10) < ?1",
                params![cutoff],
            )?;
            Ok(deleted)
        })
    }
}
