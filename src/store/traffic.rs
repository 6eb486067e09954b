//! Traffic attribution analytics over `gold_daily_traffic` and Silver.

use super::{fmt_date, round2, AnalyticsStore};
use crate::models::SalesFilter;
use crate::utm::build_evidence;
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn traffic_where(
    start: NaiveDate,
    end: NaiveDate,
    sales: SalesFilter,
    source_id: Option<i64>,
) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["g.date >= ?".to_string(), "g.date <= ?".to_string()];
    let mut params = vec![
        SqlValue::Text(fmt_date(start)),
        SqlValue::Text(fmt_date(end)),
    ];
    if let Some(source_id) = source_id {
        clauses.push("g.source_id = ?".to_string());
        params.push(SqlValue::Integer(source_id));
    }
    if let Some(stored) = sales.stored_value() {
        clauses.push("g.sales_type = ?".to_string());
        params.push(SqlValue::Text(stored.to_string()));
    }
    (clauses.join(" AND "), params)
}

impl AnalyticsStore {
    /// Breakdown by platform and traffic type with a paid/organic summary.
    pub fn get_traffic_analytics(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
        source_id: Option<i64>,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let (where_sql, params) = traffic_where(start, end, sales, source_id);
            let sql = format!(
                "SELECT g.platform, g.traffic_type,
                        SUM(g.orders_count), SUM(g.revenue)
                 FROM gold_daily_traffic g
                 WHERE {where_sql}
                 GROUP BY g.platform, g.traffic_type
                 ORDER BY 4 DESC"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(String, String, i64, f64)> = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut platforms: BTreeMap<String, (i64, f64)> = BTreeMap::new();
            let mut traffic_types: BTreeMap<String, (i64, f64)> = BTreeMap::new();
            for (platform, traffic_type, orders, revenue) in &rows {
                let p = platforms.entry(platform.clone()).or_default();
                p.0 += orders;
                p.1 += revenue;
                let t = traffic_types.entry(traffic_type.clone()).or_default();
                t.0 += orders;
                t.1 += revenue;
            }

            let total_orders: i64 = platforms.values().map(|(o, _)| o).sum();
            let total_revenue: f64 = platforms.values().map(|(_, r)| r).sum();

            let sum_types = |names: &[&str]| -> (i64, f64) {
                names
                    .iter()
                    .filter_map(|n| traffic_types.get(*n))
                    .fold((0, 0.0), |acc, (o, r)| (acc.0 + o, acc.1 + r))
            };
            let paid = sum_types(&["paid_confirmed", "paid_likely"]);
            let organic = sum_types(&["organic"]);
            let pixel_only = sum_types(&["pixel_only"]);
            let unknown = sum_types(&["unknown"]);

            Ok(json!({
                "period": {"start": fmt_date(start), "end": fmt_date(end)},
                "totals": {"orders": total_orders, "revenue": round2(total_revenue)},
                "summary": {
                    "paid": {"orders": paid.0, "revenue": round2(paid.1)},
                    "organic": {"orders": organic.0, "revenue": round2(organic.1)},
                    "pixel_only": {"orders": pixel_only.0, "revenue": round2(pixel_only.1)},
                    "unknown": {"orders": unknown.0, "revenue": round2(unknown.1)},
                },
                "by_platform": platforms
                    .iter()
                    .map(|(k, (o, r))| (k.clone(), json!({"orders": o, "revenue": round2(*r)})))
                    .collect::<BTreeMap<_, _>>(),
                "by_traffic_type": traffic_types
                    .iter()
                    .map(|(k, (o, r))| (k.clone(), json!({"orders": o, "revenue": round2(*r)})))
                    .collect::<BTreeMap<_, _>>(),
            }))
        })
    }

    /// Daily paid/organic/other split.
    pub fn get_traffic_trend(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
        source_id: Option<i64>,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let (where_sql, params) = traffic_where(start, end, sales, source_id);
            let sql = format!(
                "SELECT g.date, g.traffic_type, SUM(g.orders_count), SUM(g.revenue)
                 FROM gold_daily_traffic g
                 WHERE {where_sql}
                 GROUP BY g.date, g.traffic_type
                 ORDER BY g.date"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(String, String, i64, f64)> = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            #[derive(Default)]
            struct Daily {
                paid_orders: i64,
                paid_revenue: f64,
                organic_orders: i64,
                organic_revenue: f64,
                other_orders: i64,
                other_revenue: f64,
            }

            let mut daily: BTreeMap<String, Daily> = BTreeMap::new();
            for (date, traffic_type, orders, revenue) in rows {
                let entry = daily.entry(date).or_default();
                match traffic_type.as_str() {
                    "paid_confirmed" | "paid_likely" => {
                        entry.paid_orders += orders;
                        entry.paid_revenue += revenue;
                    }
                    "organic" => {
                        entry.organic_orders += orders;
                        entry.organic_revenue += revenue;
                    }
                    _ => {
                        entry.other_orders += orders;
                        entry.other_revenue += revenue;
                    }
                }
            }

            let trend: Vec<Value> = daily
                .into_iter()
                .map(|(date, d)| {
                    json!({
                        "date": date,
                        "paid_orders": d.paid_orders,
                        "paid_revenue": round2(d.paid_revenue),
                        "organic_orders": d.organic_orders,
                        "organic_revenue": round2(d.organic_revenue),
                        "other_orders": d.other_orders,
                        "other_revenue": round2(d.other_revenue),
                    })
                })
                .collect();

            Ok(json!({"trend": trend}))
        })
    }

    /// Paginated per-order attribution with classification evidence.
    pub fn get_traffic_transactions(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
        source_id: Option<i64>,
        traffic_type: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let mut clauses = vec![
                "s.is_return = 0".to_string(),
                "s.is_active_source = 1".to_string(),
                "s.order_date >= ?".to_string(),
                "s.order_date <= ?".to_string(),
            ];
            let mut params: Vec<SqlValue> = vec![
                SqlValue::Text(fmt_date(start)),
                SqlValue::Text(fmt_date(end)),
            ];
            if let Some(source_id) = source_id {
                clauses.push("s.source_id = ?".to_string());
                params.push(SqlValue::Integer(source_id));
            }
            if let Some(stored) = sales.stored_value() {
                clauses.push("s.sales_type = ?".to_string());
                params.push(SqlValue::Text(stored.to_string()));
            }
            if let Some(tt) = traffic_type {
                clauses.push("COALESCE(u.traffic_type, 'unknown') = ?".to_string());
                params.push(SqlValue::Text(tt.to_string()));
            }
            let where_sql = clauses.join(" AND ");

            let total: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*)
                     FROM silver_orders s
                     LEFT JOIN silver_order_utm u ON s.id = u.order_id
                     WHERE {where_sql}"
                ),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let mut data_params = params.clone();
            data_params.push(SqlValue::Integer(limit as i64));
            data_params.push(SqlValue::Integer(offset as i64));

            let sql = format!(
                "SELECT s.id, s.order_date, s.grand_total, s.source_name,
                        COALESCE(u.traffic_type, 'unknown'),
                        COALESCE(u.platform, 'other'),
                        u.utm_source, u.utm_medium, u.utm_campaign, u.utm_content,
                        u.fbp, u.fbc, u.ttp, u.fbclid
                 FROM silver_orders s
                 LEFT JOIN silver_order_utm u ON s.id = u.order_id
                 WHERE {where_sql}
                 ORDER BY s.order_date DESC, s.id DESC
                 LIMIT ? OFFSET ?"
            );

            let mut stmt = conn.prepare(&sql)?;
            let transactions: Vec<Value> = stmt
                .query_map(params_from_iter(data_params.iter()), |row| {
                    let utm_source: Option<String> = row.get(6)?;
                    let utm_medium: Option<String> = row.get(7)?;
                    let utm_campaign: Option<String> = row.get(8)?;
                    let utm_content: Option<String> = row.get(9)?;
                    let fbp: Option<String> = row.get(10)?;
                    let fbc: Option<String> = row.get(11)?;
                    let ttp: Option<String> = row.get(12)?;
                    let fbclid: Option<String> = row.get(13)?;

                    let evidence = build_evidence(
                        utm_source.as_deref(),
                        utm_medium.as_deref(),
                        utm_campaign.as_deref(),
                        utm_content.as_deref(),
                        fbp.as_deref(),
                        fbc.as_deref(),
                        ttp.as_deref(),
                        fbclid.as_deref(),
                    );

                    Ok(json!({
                        "id": row.get::<_, i64>(0)?,
                        "date": row.get::<_, String>(1)?,
                        "amount": round2(row.get::<_, f64>(2)?),
                        "source": row.get::<_, String>(3)?,
                        "traffic_type": row.get::<_, String>(4)?,
                        "platform": row.get::<_, String>(5)?,
                        "evidence": evidence,
                    }))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(json!({
                "transactions": transactions,
                "total": total,
                "limit": limit,
                "offset": offset,
            }))
        })
    }
}
