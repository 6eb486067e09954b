//! Dashboard revenue queries over Gold/Silver.
//!
//! Layer selection rule (applied by every aggregate):
//! - category/brand filter → Silver JOIN path with `COUNT(DISTINCT id)`.
//!   `gold_daily_products` aggregates per (date, product); summing its
//!   `order_count` double-counts orders with several matching products.
//! - source filter → per-source columns of `gold_daily_revenue`.
//! - otherwise → top-level columns of `gold_daily_revenue`.

use super::{fmt_date, parse_date, round1, round2, AnalyticsStore};
use crate::config;
use crate::models::SalesFilter;
use anyhow::Result;
use chrono::{Days, Months, NaiveDate};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Common parameters every aggregate query accepts.
#[derive(Debug, Clone)]
pub struct AggregateFilter {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub sales: SalesFilter,
    pub source_id: Option<i64>,
    pub category_id: Option<i64>,
    pub brand: Option<String>,
}

impl AggregateFilter {
    pub fn new(start: NaiveDate, end: NaiveDate, sales: SalesFilter) -> Self {
        Self {
            start,
            end,
            sales,
            source_id: None,
            category_id: None,
            brand: None,
        }
    }

    pub fn uses_product_join(&self) -> bool {
        self.category_id.is_some() || self.brand.is_some()
    }

    fn shifted(&self, compare: CompareWindow) -> (NaiveDate, NaiveDate) {
        match compare {
            CompareWindow::PreviousPeriod => {
                let days = (self.end - self.start).num_days() as u64;
                let prev_end = self.start - Days::new(1);
                let prev_start = prev_end - Days::new(days);
                (prev_start, prev_end)
            }
            CompareWindow::MonthAgo => (
                self.start - Months::new(1),
                self.end - Months::new(1),
            ),
            CompareWindow::YearAgo => (
                self.start - Months::new(12),
                self.end - Months::new(12),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareWindow {
    #[default]
    PreviousPeriod,
    MonthAgo,
    YearAgo,
}

impl CompareWindow {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "previous_period" => Some(CompareWindow::PreviousPeriod),
            "month_ago" => Some(CompareWindow::MonthAgo),
            "year_ago" => Some(CompareWindow::YearAgo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareWindow::PreviousPeriod => "previous_period",
            CompareWindow::MonthAgo => "month_ago",
            CompareWindow::YearAgo => "year_ago",
        }
    }
}

/// Category id plus all descendants (tree walk done in SQL).
pub(crate) fn category_with_children(conn: &Connection, category_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "WITH RECURSIVE category_tree AS (
            SELECT id FROM categories WHERE id = ?1
            UNION ALL
            SELECT c.id FROM categories c
            JOIN category_tree ct ON c.parent_id = ct.id
         )
         SELECT id FROM category_tree",
    )?;
    let ids = stmt
        .query_map([category_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(if ids.is_empty() { vec![category_id] } else { ids })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Wrap long product names for chart labels, two lines max.
fn wrap_label(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return vec!["Unknown".to_string()];
    }
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > 2 {
        let second: String = lines[1].chars().take(max_chars.saturating_sub(3)).collect();
        lines = vec![lines[0].clone(), format!("{second}...")];
    }
    lines
}

impl AnalyticsStore {
    /// Summary stats for a period.
    pub fn get_summary_stats(&self, filter: &AggregateFilter) -> Result<Value> {
        self.with_conn(|conn| {
            let (total_orders, total_revenue, total_returns, returns_revenue) =
                if filter.uses_product_join() {
                    summary_from_silver_join(conn, filter)?
                } else if filter.source_id.is_some() {
                    summary_from_gold_source(conn, filter)?
                } else {
                    summary_from_gold(conn, filter)?
                };

            let avg_check = if total_orders > 0 {
                total_revenue / total_orders as f64
            } else {
                0.0
            };

            Ok(json!({
                "totalOrders": total_orders,
                "totalRevenue": round2(total_revenue),
                "avgCheck": round2(avg_check),
                "totalReturns": total_returns,
                "returnsRevenue": round2(returns_revenue),
                "startDate": fmt_date(filter.start),
                "endDate": fmt_date(filter.end),
            }))
        })
    }

    /// Daily revenue trend with optional comparison window.
    pub fn get_revenue_trend(
        &self,
        filter: &AggregateFilter,
        include_comparison: bool,
        compare: CompareWindow,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let daily = daily_revenue_rows(conn, filter, filter.start, filter.end)?;

            let mut labels = Vec::new();
            let mut revenue = Vec::new();
            let mut orders = Vec::new();
            let mut day = filter.start;
            while day <= filter.end {
                labels.push(day.format("%d.%m").to_string());
                let (rev, cnt) = daily.get(&day).copied().unwrap_or((0.0, 0));
                revenue.push(round2(rev));
                orders.push(cnt);
                day = day + Days::new(1);
            }

            let current_total: f64 = revenue.iter().sum();
            let mut result = json!({
                "labels": labels,
                "revenue": revenue,
                "orders": orders,
            });

            if include_comparison {
                let (prev_start, prev_end) = filter.shifted(compare);
                let prev_daily = daily_revenue_rows(conn, filter, prev_start, prev_end)?;

                let mut prev_revenue = Vec::new();
                let mut prev_day = prev_start;
                while prev_day <= prev_end {
                    prev_revenue.push(round2(
                        prev_daily.get(&prev_day).map(|(r, _)| *r).unwrap_or(0.0),
                    ));
                    prev_day = prev_day + Days::new(1);
                }

                let prev_total: f64 = prev_revenue.iter().sum();
                let growth = if prev_total > 0.0 {
                    (current_total - prev_total) / prev_total * 100.0
                } else {
                    0.0
                };

                result["comparison"] = json!({
                    "revenue": prev_revenue,
                    "period": {
                        "start": fmt_date(prev_start),
                        "end": fmt_date(prev_end),
                        "type": compare.as_str(),
                    },
                    "totals": {
                        "current": round2(current_total),
                        "previous": round2(prev_total),
                        "growth_percent": round1(growth),
                    },
                });
            }

            Ok(result)
        })
    }

    /// Revenue/order breakdown by source with fixed names and colors.
    pub fn get_sales_by_source(&self, filter: &AggregateFilter) -> Result<Value> {
        self.with_conn(|conn| {
            // (source_id, orders, revenue) sorted by revenue desc
            let mut rows: Vec<(i64, i64, f64)> = if filter.uses_product_join() {
                let (where_sql, params) = silver_join_where(conn, filter)?;
                let sql = format!(
                    "SELECT s.source_id,
                            COUNT(DISTINCT s.id),
                            COALESCE(SUM(op.price_sold * op.quantity), 0)
                     FROM silver_orders s
                     JOIN order_products op ON s.id = op.order_id
                     LEFT JOIN products p ON op.product_id = p.id
                     WHERE {where_sql}
                     GROUP BY s.source_id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?; rows
            } else {
                let (where_sql, params) = gold_where(filter);
                let sql = format!(
                    "SELECT
                        SUM(instagram_orders), SUM(instagram_revenue),
                        SUM(telegram_orders), SUM(telegram_revenue),
                        SUM(shopify_orders), SUM(shopify_revenue)
                     FROM gold_daily_revenue
                     WHERE {where_sql}"
                );
                let row = conn.query_row(&sql, params_from_iter(params.iter()), |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                        row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                        row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                        row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                    ))
                })?;
                vec![(1, row.0, row.1), (2, row.2, row.3), (4, row.4, row.5)]
            };

            rows.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

            let mut labels = Vec::new();
            let mut orders = Vec::new();
            let mut revenue = Vec::new();
            let mut colors = Vec::new();
            for (source_id, order_count, rev) in rows {
                let Some(name) = config::source_name(source_id) else {
                    continue;
                };
                if order_count == 0 && rev == 0.0 {
                    continue;
                }
                labels.push(name);
                orders.push(order_count);
                revenue.push(round2(rev));
                colors.push(config::source_color(source_id));
            }

            Ok(json!({
                "labels": labels,
                "orders": orders,
                "revenue": revenue,
                "backgroundColor": colors,
            }))
        })
    }

    /// Top products by quantity. Percentages are shares of the returned set.
    pub fn get_top_products(&self, filter: &AggregateFilter, limit: usize) -> Result<Value> {
        self.with_conn(|conn| {
            // Category/brand filters force the Silver JOIN path; unfiltered
            // queries aggregate gold_daily_products (quantity sums are safe
            // there; only order counts are not).
            let rows: Vec<(String, i64)> = if filter.uses_product_join() {
                let (where_sql, mut params) = silver_join_where(conn, filter)?;
                params.push(SqlValue::Integer(limit as i64));
                let sql = format!(
                    "SELECT op.name, SUM(op.quantity) AS total_qty
                     FROM silver_orders s
                     JOIN order_products op ON s.id = op.order_id
                     LEFT JOIN products p ON op.product_id = p.id
                     WHERE {where_sql}
                     GROUP BY op.name
                     ORDER BY total_qty DESC
                     LIMIT ?"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?; rows
            } else {
                let (where_sql, mut params) = gold_products_where(conn, filter)?;
                params.push(SqlValue::Integer(limit as i64));
                let sql = format!(
                    "SELECT g.product_name, SUM(g.quantity_sold) AS total_qty
                     FROM gold_daily_products g
                     WHERE {where_sql}
                     GROUP BY COALESCE(CAST(g.product_id AS TEXT), g.product_name)
                     ORDER BY total_qty DESC
                     LIMIT ?"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?; rows
            };

            let data: Vec<i64> = rows.iter().map(|(_, qty)| *qty).collect();
            let total: i64 = data.iter().sum::<i64>().max(1);
            let percentages: Vec<f64> = data
                .iter()
                .map(|d| round1(*d as f64 / total as f64 * 100.0))
                .collect();

            Ok(json!({
                "labels": rows.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
                "wrappedLabels": rows
                    .iter()
                    .map(|(name, _)| wrap_label(name, 25))
                    .collect::<Vec<_>>(),
                "data": data,
                "percentages": percentages,
                "backgroundColor": "#2563EB",
            }))
        })
    }

    /// Top products by revenue + parent-category breakdown.
    pub fn get_product_performance(&self, filter: &AggregateFilter) -> Result<Value> {
        self.with_conn(|conn| {
            let (where_sql, params) = gold_products_where(conn, filter)?;

            let sql = format!(
                "SELECT g.product_name,
                        SUM(g.product_revenue) AS revenue,
                        SUM(g.quantity_sold) AS quantity
                 FROM gold_daily_products g
                 WHERE {where_sql}
                 GROUP BY g.product_name
                 ORDER BY revenue DESC
                 LIMIT 10"
            );
            let mut stmt = conn.prepare(&sql)?;
            let top: Vec<(String, f64, i64)> = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let cat_sql = format!(
                "SELECT COALESCE(g.parent_category_name, g.category_name, 'Other'),
                        SUM(g.product_revenue),
                        SUM(g.quantity_sold)
                 FROM gold_daily_products g
                 WHERE {where_sql}
                 GROUP BY COALESCE(g.parent_category_name, g.category_name, 'Other')
                 ORDER BY 2 DESC"
            );
            let mut cat_stmt = conn.prepare(&cat_sql)?;
            let cats: Vec<(String, f64, i64)> = cat_stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            const CATEGORY_COLORS: [&str; 8] = [
                "#7C3AED", "#2563EB", "#16A34A", "#F59E0B", "#eb4200", "#EC4899", "#8B5CF6",
                "#06B6D4",
            ];

            let total_revenue: f64 = top.iter().map(|(_, r, _)| r).sum();
            let total_quantity: i64 = top.iter().map(|(_, _, q)| q).sum();

            Ok(json!({
                "topByRevenue": {
                    "labels": top.iter().map(|(n, _, _)| n.clone()).collect::<Vec<_>>(),
                    "wrappedLabels": top.iter().map(|(n, _, _)| wrap_label(n, 25)).collect::<Vec<_>>(),
                    "data": top.iter().map(|(_, r, _)| round2(*r)).collect::<Vec<_>>(),
                    "quantities": top.iter().map(|(_, _, q)| *q).collect::<Vec<_>>(),
                    "backgroundColor": "#16A34A",
                },
                "categoryBreakdown": {
                    "labels": cats.iter().map(|(n, _, _)| n.clone()).collect::<Vec<_>>(),
                    "revenue": cats.iter().map(|(_, r, _)| round2(*r)).collect::<Vec<_>>(),
                    "quantity": cats.iter().map(|(_, _, q)| *q).collect::<Vec<_>>(),
                    "backgroundColor": CATEGORY_COLORS[..cats.len().min(CATEGORY_COLORS.len())].to_vec(),
                },
                "metrics": {
                    "totalProducts": top.len(),
                    "totalRevenue": round2(total_revenue),
                    "totalQuantity": total_quantity,
                    "avgProductRevenue": if top.is_empty() { 0.0 } else {
                        round2(total_revenue / top.len() as f64)
                    },
                },
            }))
        })
    }

    /// Per-brand revenue/quantity/orders.
    ///
    /// Orders are a distinct count, so a category/brand filter forces the
    /// Silver JOIN path; summing `gold_daily_products.order_count` would
    /// double-count orders containing several matching products.
    pub fn get_brand_analytics(&self, filter: &AggregateFilter) -> Result<Value> {
        self.with_conn(|conn| {
            let brands: Vec<(String, f64, i64, i64)> = if filter.uses_product_join() {
                let (where_sql, params) = silver_join_where(conn, filter)?;
                let sql = format!(
                    "SELECT COALESCE(p.brand, 'Unknown'),
                            COALESCE(SUM(op.price_sold * op.quantity), 0),
                            SUM(op.quantity),
                            COUNT(DISTINCT s.id)
                     FROM silver_orders s
                     JOIN order_products op ON s.id = op.order_id
                     LEFT JOIN products p ON op.product_id = p.id
                     WHERE {where_sql}
                     GROUP BY LOWER(COALESCE(p.brand, 'Unknown'))
                     ORDER BY 2 DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?; rows
            } else {
                // Unfiltered/source-only: pre-aggregated per-brand rows.
                let (where_sql, params) = gold_products_where(conn, filter)?;
                let sql = format!(
                    "SELECT COALESCE(g.brand, 'Unknown'),
                            SUM(g.product_revenue),
                            SUM(g.quantity_sold),
                            SUM(g.order_count)
                     FROM gold_daily_products g
                     WHERE {where_sql}
                     GROUP BY COALESCE(g.brand, 'Unknown')
                     ORDER BY 2 DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?; rows
            };

            const BRAND_COLORS: [&str; 10] = [
                "#7C3AED", "#2563EB", "#16A34A", "#F59E0B", "#eb4200", "#EC4899", "#8B5CF6",
                "#06B6D4", "#14B8A6", "#EF4444",
            ];

            let top_by_revenue: Vec<_> = brands.iter().take(10).collect();
            let mut by_qty: Vec<_> = brands.iter().collect();
            by_qty.sort_by(|a, b| b.2.cmp(&a.2));
            let top_by_quantity: Vec<_> = by_qty.into_iter().take(10).collect();

            let total_revenue: f64 = brands.iter().map(|b| b.1).sum();
            let total_quantity: i64 = brands.iter().map(|b| b.2).sum();
            let unique_brands = brands.iter().filter(|b| b.0 != "Unknown").count();
            let top_brand = brands.first().map(|b| b.0.clone()).unwrap_or_else(|| "N/A".into());
            let top_brand_share = if total_revenue > 0.0 {
                brands.first().map(|b| b.1 / total_revenue * 100.0).unwrap_or(0.0)
            } else {
                0.0
            };

            Ok(json!({
                "topByRevenue": {
                    "labels": top_by_revenue.iter().map(|b| b.0.clone()).collect::<Vec<_>>(),
                    "data": top_by_revenue.iter().map(|b| round2(b.1)).collect::<Vec<_>>(),
                    "quantities": top_by_revenue.iter().map(|b| b.2).collect::<Vec<_>>(),
                    "orders": top_by_revenue.iter().map(|b| b.3).collect::<Vec<_>>(),
                    "backgroundColor": BRAND_COLORS[..top_by_revenue.len().min(BRAND_COLORS.len())].to_vec(),
                },
                "topByQuantity": {
                    "labels": top_by_quantity.iter().map(|b| b.0.clone()).collect::<Vec<_>>(),
                    "data": top_by_quantity.iter().map(|b| b.2).collect::<Vec<_>>(),
                    "revenue": top_by_quantity.iter().map(|b| round2(b.1)).collect::<Vec<_>>(),
                    "backgroundColor": BRAND_COLORS[..top_by_quantity.len().min(BRAND_COLORS.len())].to_vec(),
                },
                "metrics": {
                    "totalBrands": unique_brands,
                    "topBrand": top_brand,
                    "topBrandShare": round1(top_brand_share),
                    "totalRevenue": round2(total_revenue),
                    "totalQuantity": total_quantity,
                    "avgBrandRevenue": if unique_brands > 0 {
                        round2(total_revenue / unique_brands as f64)
                    } else { 0.0 },
                },
            }))
        })
    }

    /// Return orders for a period with buyer/manager context.
    pub fn get_return_orders(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
        limit: usize,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let mut where_clauses = vec![
                "s.order_date BETWEEN ? AND ?".to_string(),
                "s.is_return = 1".to_string(),
                "s.is_active_source = 1".to_string(),
            ];
            let mut params: Vec<SqlValue> = vec![
                SqlValue::Text(fmt_date(start)),
                SqlValue::Text(fmt_date(end)),
            ];
            if let Some(stored) = sales.stored_value() {
                where_clauses.push("s.sales_type = ?".to_string());
                params.push(SqlValue::Text(stored.to_string()));
            }
            params.push(SqlValue::Integer(limit as i64));

            let sql = format!(
                "SELECT s.id, s.order_date, s.grand_total, s.status_id, s.source_name,
                        s.buyer_id, b.full_name, b.phone, s.manager_id, m.name
                 FROM silver_orders s
                 LEFT JOIN buyers b ON s.buyer_id = b.id
                 LEFT JOIN managers m ON s.manager_id = m.id
                 WHERE {}
                 ORDER BY s.order_date DESC, s.id DESC
                 LIMIT ?",
                where_clauses.join(" AND ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    let status_id: i64 = row.get(3)?;
                    Ok(json!({
                        "id": row.get::<_, i64>(0)?,
                        "date": row.get::<_, String>(1)?,
                        "amount": round2(row.get::<_, f64>(2)?),
                        "statusId": status_id,
                        "statusName": return_status_name(status_id),
                        "source": row.get::<_, String>(4)?,
                        "buyerId": row.get::<_, Option<i64>>(5)?,
                        "buyerName": row.get::<_, Option<String>>(6)?,
                        "buyerPhone": row.get::<_, Option<String>>(7)?,
                        "managerId": row.get::<_, Option<i64>>(8)?,
                        "managerName": row.get::<_, Option<String>>(9)?,
                    }))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let count = rows.len();
            Ok(json!({ "returns": rows, "count": count }))
        })
    }

    /// Root categories for the filter dropdown.
    pub fn get_categories(&self) -> Result<Value> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, name FROM categories WHERE parent_id IS NULL ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(json!({"id": row.get::<_, i64>(0)?, "name": row.get::<_, String>(1)?}))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(json!(rows))
        })
    }

    pub fn get_child_categories(&self, parent_id: i64) -> Result<Value> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT id, name FROM categories WHERE parent_id = ?1 ORDER BY name")?;
            let rows = stmt
                .query_map([parent_id], |row| {
                    Ok(json!({"id": row.get::<_, i64>(0)?, "name": row.get::<_, String>(1)?}))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(json!(rows))
        })
    }

    pub fn get_brands(&self) -> Result<Value> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT brand FROM products
                 WHERE brand IS NOT NULL AND brand != ''
                 ORDER BY brand",
            )?;
            let rows = stmt
                .query_map([], |row| Ok(json!({"name": row.get::<_, String>(0)?})))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(json!(rows))
        })
    }
}

fn return_status_name(status_id: i64) -> &'static str {
    match status_id {
        19 => "Returned",
        21 => "Canceled",
        22 => "Refund In Progress",
        23 => "Not Redeemed",
        _ => "Return",
    }
}

// ─── WHERE builders ──────────────────────────────────────────────────────────

/// Gold revenue WHERE: date range + sales_type.
fn gold_where(filter: &AggregateFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["date BETWEEN ? AND ?".to_string()];
    let mut params = vec![
        SqlValue::Text(fmt_date(filter.start)),
        SqlValue::Text(fmt_date(filter.end)),
    ];
    if let Some(stored) = filter.sales.stored_value() {
        clauses.push("sales_type = ?".to_string());
        params.push(SqlValue::Text(stored.to_string()));
    }
    (clauses.join(" AND "), params)
}

/// gold_daily_products WHERE: date + sales_type + source/category/brand.
/// The category filter expands to the root plus all descendants, same as the
/// Silver path. Safe only for quantity/revenue sums; order counts under a
/// product filter must come from `silver_join_where`.
fn gold_products_where(
    conn: &Connection,
    filter: &AggregateFilter,
) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = vec!["g.date BETWEEN ? AND ?".to_string()];
    let mut params = vec![
        SqlValue::Text(fmt_date(filter.start)),
        SqlValue::Text(fmt_date(filter.end)),
    ];
    if let Some(stored) = filter.sales.stored_value() {
        clauses.push("g.sales_type = ?".to_string());
        params.push(SqlValue::Text(stored.to_string()));
    }
    if let Some(source_id) = filter.source_id {
        clauses.push("g.source_id = ?".to_string());
        params.push(SqlValue::Integer(source_id));
    }
    if let Some(category_id) = filter.category_id {
        let ids = category_with_children(conn, category_id)?;
        clauses.push(format!("g.category_id IN ({})", placeholders(ids.len())));
        params.extend(ids.into_iter().map(SqlValue::Integer));
    }
    if let Some(brand) = &filter.brand {
        clauses.push("LOWER(g.brand) = LOWER(?)".to_string());
        params.push(SqlValue::Text(brand.clone()));
    }
    Ok((clauses.join(" AND "), params))
}

/// Silver JOIN WHERE used by the product-filtered paths.
fn silver_join_where(
    conn: &Connection,
    filter: &AggregateFilter,
) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = vec![
        "s.order_date BETWEEN ? AND ?".to_string(),
        "s.is_return = 0".to_string(),
        "s.is_active_source = 1".to_string(),
    ];
    let mut params = vec![
        SqlValue::Text(fmt_date(filter.start)),
        SqlValue::Text(fmt_date(filter.end)),
    ];

    if let Some(stored) = filter.sales.stored_value() {
        clauses.push("s.sales_type = ?".to_string());
        params.push(SqlValue::Text(stored.to_string()));
    }
    if let Some(source_id) = filter.source_id {
        clauses.push("s.source_id = ?".to_string());
        params.push(SqlValue::Integer(source_id));
    }
    if let Some(category_id) = filter.category_id {
        let ids = category_with_children(conn, category_id)?;
        clauses.push(format!("p.category_id IN ({})", placeholders(ids.len())));
        params.extend(ids.into_iter().map(SqlValue::Integer));
    }
    if let Some(brand) = &filter.brand {
        clauses.push("LOWER(p.brand) = LOWER(?)".to_string());
        params.push(SqlValue::Text(brand.clone()));
    }

    Ok((clauses.join(" AND "), params))
}

/// Summary via Silver JOIN (category/brand filters active).
fn summary_from_silver_join(
    conn: &Connection,
    filter: &AggregateFilter,
) -> Result<(i64, f64, i64, f64)> {
    let (where_sql, params) = silver_join_where(conn, filter)?;
    let sql = format!(
        "SELECT COUNT(DISTINCT s.id),
                COALESCE(SUM(op.price_sold * op.quantity), 0)
         FROM silver_orders s
         JOIN order_products op ON s.id = op.order_id
         LEFT JOIN products p ON op.product_id = p.id
         WHERE {where_sql}"
    );
    let (total_orders, total_revenue) =
        conn.query_row(&sql, params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

    // Returns from Silver, consistent with the filtered orders above. Returns
    // are not filtered by product (a returned order voids entirely).
    let mut ret_clauses = vec![
        "s.order_date BETWEEN ? AND ?".to_string(),
        "s.is_return = 1".to_string(),
        "s.is_active_source = 1".to_string(),
    ];
    let mut ret_params = vec![
        SqlValue::Text(fmt_date(filter.start)),
        SqlValue::Text(fmt_date(filter.end)),
    ];
    if let Some(stored) = filter.sales.stored_value() {
        ret_clauses.push("s.sales_type = ?".to_string());
        ret_params.push(SqlValue::Text(stored.to_string()));
    }
    if let Some(source_id) = filter.source_id {
        ret_clauses.push("s.source_id = ?".to_string());
        ret_params.push(SqlValue::Integer(source_id));
    }
    let ret_sql = format!(
        "SELECT COUNT(DISTINCT s.id), COALESCE(SUM(s.grand_total), 0)
         FROM silver_orders s
         WHERE {}",
        ret_clauses.join(" AND ")
    );
    let (total_returns, returns_revenue) =
        conn.query_row(&ret_sql, params_from_iter(ret_params.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

    Ok((total_orders, total_revenue, total_returns, returns_revenue))
}

/// Summary via per-source Gold columns (source filter, no product filter).
fn summary_from_gold_source(
    conn: &Connection,
    filter: &AggregateFilter,
) -> Result<(i64, f64, i64, f64)> {
    let source_id = filter.source_id.expect("source filter");
    let Some(col) = config::source_column(source_id) else {
        return Ok((0, 0.0, 0, 0.0));
    };

    let (where_sql, params) = gold_where(filter);
    let sql = format!(
        "SELECT SUM({col}_orders), SUM({col}_revenue)
         FROM gold_daily_revenue
         WHERE {where_sql}"
    );
    let (orders, revenue) = conn.query_row(&sql, params_from_iter(params.iter()), |row| {
        Ok((
            row.get::<_, Option<i64>>(0)?.unwrap_or(0),
            row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
        ))
    })?;

    // Gold has no per-source return columns; count them from Silver.
    let mut ret_clauses = vec![
        "order_date BETWEEN ? AND ?".to_string(),
        "is_return = 1".to_string(),
        "is_active_source = 1".to_string(),
        "source_id = ?".to_string(),
    ];
    let mut ret_params = vec![
        SqlValue::Text(fmt_date(filter.start)),
        SqlValue::Text(fmt_date(filter.end)),
        SqlValue::Integer(source_id),
    ];
    if let Some(stored) = filter.sales.stored_value() {
        ret_clauses.push("sales_type = ?".to_string());
        ret_params.push(SqlValue::Text(stored.to_string()));
    }
    let ret_sql = format!(
        "SELECT COUNT(DISTINCT id), COALESCE(SUM(grand_total), 0)
         FROM silver_orders WHERE {}",
        ret_clauses.join(" AND ")
    );
    let (returns, returns_revenue) =
        conn.query_row(&ret_sql, params_from_iter(ret_params.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

    Ok((orders, revenue, returns, returns_revenue))
}

/// Summary from top-level Gold columns (no filters beyond sales_type).
fn summary_from_gold(conn: &Connection, filter: &AggregateFilter) -> Result<(i64, f64, i64, f64)> {
    let (where_sql, params) = gold_where(filter);
    let sql = format!(
        "SELECT SUM(orders_count), SUM(revenue), SUM(returns_count), SUM(returns_revenue)
         FROM gold_daily_revenue
         WHERE {where_sql}"
    );
    let row = conn.query_row(&sql, params_from_iter(params.iter()), |row| {
        Ok((
            row.get::<_, Option<i64>>(0)?.unwrap_or(0),
            row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
            row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        ))
    })?;
    Ok(row)
}

/// Daily (revenue, order_count) rows for a window, layer chosen by filter.
fn daily_revenue_rows(
    conn: &Connection,
    filter: &AggregateFilter,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<HashMap<NaiveDate, (f64, i64)>> {
    let window = AggregateFilter {
        start,
        end,
        ..filter.clone()
    };

    let rows: Vec<(String, f64, i64)> = if window.uses_product_join() {
        let (where_sql, params) = silver_join_where(conn, &window)?;
        let sql = format!(
            "SELECT s.order_date,
                    COALESCE(SUM(op.price_sold * op.quantity), 0),
                    COUNT(DISTINCT s.id)
             FROM silver_orders s
             JOIN order_products op ON s.id = op.order_id
             LEFT JOIN products p ON op.product_id = p.id
             WHERE {where_sql}
             GROUP BY s.order_date
             ORDER BY s.order_date"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?; rows
    } else if let Some(col) = window.source_id.and_then(config::source_column) {
        let (where_sql, params) = gold_where(&window);
        let sql = format!(
            "SELECT date, SUM({col}_revenue), SUM({col}_orders)
             FROM gold_daily_revenue
             WHERE {where_sql}
             GROUP BY date
             ORDER BY date"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?; rows
    } else {
        let (where_sql, params) = gold_where(&window);
        let sql = format!(
            "SELECT date, SUM(revenue), SUM(orders_count)
             FROM gold_daily_revenue
             WHERE {where_sql}
             GROUP BY date
             ORDER BY date"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?; rows
    };

    let mut daily = HashMap::with_capacity(rows.len());
    for (date, revenue, orders) in rows {
        if let Some(d) = parse_date(&date) {
            daily.insert(d, (revenue, orders));
        }
    }
    Ok(daily)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_label_short_passthrough() {
        assert_eq!(wrap_label("Short name", 25), vec!["Short name"]);
        assert_eq!(wrap_label("", 25), vec!["Unknown"]);
    }

    #[test]
    fn wrap_label_two_lines_max() {
        let lines = wrap_label(
            "An extremely long product name that would never fit a chart axis label",
            25,
        );
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("..."));
    }

    #[test]
    fn compare_window_shifts() {
        let filter = AggregateFilter::new(
            NaiveDate::from_ymd_opt(2024, 6, 8).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
            SalesFilter::Retail,
        );
        assert_eq!(
            filter.shifted(CompareWindow::PreviousPeriod),
            (
                NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 6, 7).unwrap()
            )
        );
        assert_eq!(
            filter.shifted(CompareWindow::MonthAgo),
            (
                NaiveDate::from_ymd_opt(2024, 5, 8).unwrap(),
                NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()
            )
        );
        assert_eq!(
            filter.shifted(CompareWindow::YearAgo),
            (
                NaiveDate::from_ymd_opt(2023, 6, 8).unwrap(),
                NaiveDate::from_ymd_opt(2023, 6, 14).unwrap()
            )
        );
    }
}
