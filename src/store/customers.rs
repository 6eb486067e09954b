//! Customer insight queries: new vs returning, cohorts, LTV, churn risk.
//!
//! Cohort months are `YYYY-MM` strings; month arithmetic happens in SQL on
//! year*12+month so it works on the TEXT dates Silver stores.

use super::{fmt_date, round1, round2, AnalyticsStore};
use crate::config;
use crate::models::SalesFilter;
use anyhow::Result;
use chrono::{Datelike, Months, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::params_from_iter;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn kyiv_today() -> NaiveDate {
    Utc::now().with_timezone(&config::DISPLAY_TZ).date_naive()
}

/// `year*12 + month` SQL fragment for a `YYYY-MM...` text column.
fn month_index(expr: &str) -> String {
    format!("(CAST(substr({expr}, 1, 4) AS INTEGER) * 12 + CAST(substr({expr}, 6, 2) AS INTEGER))")
}

fn sales_clause(sales: SalesFilter, params: &mut Vec<SqlValue>) -> String {
    match sales.stored_value() {
        Some(stored) => {
            params.push(SqlValue::Text(stored.to_string()));
            "AND o.sales_type = ?".to_string()
        }
        None => String::new(),
    }
}

impl AnalyticsStore {
    /// New vs returning split, AOV trend and CLV metrics for a period.
    pub fn get_customer_insights(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            // Base order totals from Gold.
            let mut gold_params = vec![
                SqlValue::Text(fmt_date(start)),
                SqlValue::Text(fmt_date(end)),
            ];
            let mut gold_where = "date BETWEEN ? AND ?".to_string();
            if let Some(stored) = sales.stored_value() {
                gold_where.push_str(" AND sales_type = ?");
                gold_params.push(SqlValue::Text(stored.to_string()));
            }

            let (total_orders, total_revenue) = conn.query_row(
                &format!(
                    "SELECT SUM(orders_count), SUM(revenue)
                     FROM gold_daily_revenue WHERE {gold_where}"
                ),
                params_from_iter(gold_params.iter()),
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                        row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    ))
                },
            )?;

            // AOV per day from Gold.
            let mut aov_stmt = conn.prepare(&format!(
                "SELECT date,
                        CASE WHEN SUM(orders_count) > 0
                             THEN SUM(revenue) / SUM(orders_count) ELSE 0 END
                 FROM gold_daily_revenue
                 WHERE {gold_where}
                 GROUP BY date ORDER BY date"
            ))?;
            let aov_by_day: BTreeMap<String, f64> = aov_stmt
                .query_map(params_from_iter(gold_params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            let mut labels = Vec::new();
            let mut aov_data = Vec::new();
            let mut day = start;
            while day <= end {
                labels.push(day.format("%d.%m").to_string());
                aov_data.push(round2(
                    aov_by_day.get(&fmt_date(day)).copied().unwrap_or(0.0),
                ));
                day = day.succ_opt().unwrap_or(day);
                if labels.len() > 1000 {
                    break;
                }
            }

            // Accurate unique buyer counts from Silver: Gold sums daily unique
            // counts, which double-counts buyers active on several days.
            let mut pf_params = vec![
                SqlValue::Text(fmt_date(start)),
                SqlValue::Text(fmt_date(end)),
            ];
            let pf_sales = sales_clause(sales, &mut pf_params);
            let (unique_buyers, new_customers, returning_customers) = conn.query_row(
                &format!(
                    "SELECT COUNT(DISTINCT o.buyer_id),
                            COUNT(DISTINCT CASE WHEN o.is_new_customer = 1 THEN o.buyer_id END),
                            COUNT(DISTINCT CASE WHEN o.is_new_customer = 0 THEN o.buyer_id END)
                     FROM silver_orders o
                     WHERE o.order_date BETWEEN ? AND ?
                       AND o.is_return = 0 AND o.is_active_source = 1
                       AND o.buyer_id IS NOT NULL {pf_sales}"
                ),
                params_from_iter(pf_params.iter()),
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )?;

            // CLV over repeat customers (all time).
            let mut clv_params: Vec<SqlValue> = Vec::new();
            let clv_sales = sales_clause(sales, &mut clv_params);
            let (repeat_count, avg_frequency, avg_lifespan, avg_value) = conn.query_row(
                &format!(
                    "WITH customer_stats AS (
                        SELECT o.buyer_id,
                               COUNT(DISTINCT o.id) AS order_count,
                               SUM(o.grand_total) AS total_spent,
                               julianday(MAX(o.order_date)) - julianday(MIN(o.order_date))
                                   AS lifespan_days
                        FROM silver_orders o
                        WHERE o.buyer_id IS NOT NULL
                          AND o.is_return = 0 AND o.is_active_source = 1 {clv_sales}
                        GROUP BY o.buyer_id
                        HAVING COUNT(DISTINCT o.id) > 1
                     )
                     SELECT COUNT(*), AVG(order_count), AVG(lifespan_days), AVG(total_spent)
                     FROM customer_stats"
                ),
                params_from_iter(clv_params.iter()),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                        row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                        row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    ))
                },
            )?;

            // All-time repeat rate.
            let mut alltime_params: Vec<SqlValue> = Vec::new();
            let alltime_sales = sales_clause(sales, &mut alltime_params);
            let (alltime_total, alltime_repeat, alltime_avg_orders) = conn.query_row(
                &format!(
                    "WITH customer_orders AS (
                        SELECT o.buyer_id, COUNT(DISTINCT o.id) AS order_count
                        FROM silver_orders o
                        WHERE o.buyer_id IS NOT NULL
                          AND o.is_return = 0 AND o.is_active_source = 1 {alltime_sales}
                        GROUP BY o.buyer_id
                     )
                     SELECT COUNT(*),
                            SUM(CASE WHEN order_count >= 2 THEN 1 ELSE 0 END),
                            AVG(order_count)
                     FROM customer_orders"
                ),
                params_from_iter(alltime_params.iter()),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    ))
                },
            )?;

            let overall_aov = if total_orders > 0 {
                total_revenue / total_orders as f64
            } else {
                0.0
            };
            let repeat_rate = if unique_buyers > 0 {
                returning_customers as f64 / unique_buyers as f64 * 100.0
            } else {
                0.0
            };
            let true_repeat_rate = if alltime_total > 0 {
                alltime_repeat as f64 / alltime_total as f64 * 100.0
            } else {
                0.0
            };
            let purchase_frequency = if unique_buyers > 0 {
                total_orders as f64 / unique_buyers as f64
            } else {
                0.0
            };

            Ok(json!({
                "newVsReturning": {
                    "labels": ["New Customers", "Returning Customers"],
                    "data": [new_customers, returning_customers],
                    "backgroundColor": ["#2563EB", "#16A34A"],
                },
                "aovTrend": {
                    "labels": labels,
                    "data": aov_data,
                },
                "metrics": {
                    "totalCustomers": unique_buyers,
                    "newCustomers": new_customers,
                    "returningCustomers": returning_customers,
                    "totalOrders": total_orders,
                    "repeatRate": round1(repeat_rate),
                    "averageOrderValue": round2(overall_aov),
                    "customerLifetimeValue": if repeat_count > 0 { round2(avg_value) } else { 0.0 },
                    "avgPurchaseFrequency": round2(avg_frequency),
                    "avgCustomerLifespanDays": avg_lifespan.round(),
                    "purchaseFrequency": round2(purchase_frequency),
                    "totalCustomersAllTime": alltime_total,
                    "repeatCustomersAllTime": alltime_repeat,
                    "trueRepeatRate": round1(true_repeat_rate),
                    "avgOrdersPerCustomer": round2(alltime_avg_orders),
                },
            }))
        })
    }

    /// Cohort retention matrix: share of each first-purchase-month cohort
    /// that ordered again in the following months.
    pub fn get_cohort_retention(
        &self,
        months_back: u32,
        retention_months: u32,
        sales: SalesFilter,
        include_revenue: bool,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let cutoff = {
                let today = kyiv_today();
                let shifted = today - Months::new(months_back);
                format!("{:04}-{:02}", shifted.year(), shifted.month())
            };

            let sales_sql = match sales.stored_value() {
                Some(_) => "AND o.sales_type = ?".to_string(),
                None => String::new(),
            };

            let cohort_m = month_index("c.cohort_month");
            let order_m = month_index("substr(o.order_date, 1, 7)");

            let sql = format!(
                "WITH customer_cohorts AS (
                    SELECT o.buyer_id,
                           MIN(substr(o.order_date, 1, 7)) AS cohort_month
                    FROM silver_orders o
                    WHERE o.buyer_id IS NOT NULL
                      AND o.is_return = 0 AND o.is_active_source = 1 {sales_sql}
                    GROUP BY o.buyer_id
                 ),
                 cohort_revenue AS (
                    SELECT c.buyer_id, c.cohort_month,
                           SUM(CASE WHEN substr(o.order_date, 1, 7) = c.cohort_month
                                    THEN o.grand_total ELSE 0 END) AS m0_revenue
                    FROM customer_cohorts c
                    JOIN silver_orders o ON o.buyer_id = c.buyer_id
                    WHERE o.is_return = 0 AND o.is_active_source = 1
                    GROUP BY c.buyer_id, c.cohort_month
                 ),
                 customer_orders AS (
                    SELECT o.buyer_id, c.cohort_month,
                           {order_m} - {cohort_m} AS months_since,
                           o.grand_total AS revenue
                    FROM silver_orders o
                    JOIN customer_cohorts c ON o.buyer_id = c.buyer_id
                    WHERE o.is_return = 0 AND o.is_active_source = 1 {sales_sql2}
                 ),
                 cohort_sizes AS (
                    SELECT cohort_month,
                           COUNT(DISTINCT buyer_id) AS size,
                           SUM(m0_revenue) AS m0_revenue
                    FROM cohort_revenue
                    GROUP BY cohort_month
                 ),
                 retention_data AS (
                    SELECT r.cohort_month, r.months_since,
                           COUNT(DISTINCT r.buyer_id) AS retained,
                           SUM(r.revenue) AS period_revenue
                    FROM customer_orders r
                    WHERE r.months_since <= ?
                    GROUP BY r.cohort_month, r.months_since
                 )
                 SELECT r.cohort_month, s.size, s.m0_revenue, r.months_since,
                        r.retained, r.period_revenue
                 FROM retention_data r
                 JOIN cohort_sizes s ON r.cohort_month = s.cohort_month
                 WHERE r.cohort_month >= ?
                 ORDER BY r.cohort_month DESC, r.months_since",
                sales_sql2 = sales_sql,
            );

            // The sales clause appears in two CTEs; bind its value twice.
            let mut bind: Vec<SqlValue> = Vec::new();
            if let Some(stored) = sales.stored_value() {
                bind.push(SqlValue::Text(stored.to_string()));
                bind.push(SqlValue::Text(stored.to_string()));
            }
            bind.push(SqlValue::Integer(retention_months as i64));
            bind.push(SqlValue::Text(cutoff));

            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(String, i64, f64, i64, i64, f64)> = stmt
                .query_map(params_from_iter(bind.iter()), |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                        row.get(3)?,
                        row.get(4)?,
                        row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            #[derive(Default)]
            struct Cohort {
                size: i64,
                m0_revenue: f64,
                retention: BTreeMap<i64, f64>,
                revenue_retention: BTreeMap<i64, f64>,
            }

            let mut cohorts: BTreeMap<String, Cohort> = BTreeMap::new();
            for (month, size, m0_rev, months_since, retained, period_rev) in rows {
                let entry = cohorts.entry(month).or_default();
                entry.size = size;
                entry.m0_revenue = m0_rev;
                if size > 0 {
                    entry
                        .retention
                        .insert(months_since, round1(retained as f64 / size as f64 * 100.0));
                }
                if m0_rev > 0.0 {
                    entry
                        .revenue_retention
                        .insert(months_since, round1(period_rev / m0_rev * 100.0));
                }
            }

            let mut avg_retention: BTreeMap<i64, f64> = BTreeMap::new();
            for m in 0..=(retention_months as i64) {
                let values: Vec<f64> = cohorts
                    .values()
                    .filter_map(|c| c.retention.get(&m).copied())
                    .collect();
                if !values.is_empty() {
                    avg_retention
                        .insert(m, round1(values.iter().sum::<f64>() / values.len() as f64));
                }
            }

            let total_customers: i64 = cohorts.values().map(|c| c.size).sum();
            let cohort_rows: Vec<Value> = cohorts
                .iter()
                .rev()
                .map(|(month, c)| {
                    let retention: Vec<Option<f64>> = (0..=(retention_months as i64))
                        .map(|m| c.retention.get(&m).copied())
                        .collect();
                    let mut row = json!({
                        "month": month,
                        "size": c.size,
                        "retention": retention,
                    });
                    if include_revenue {
                        row["m0Revenue"] = json!(round2(c.m0_revenue));
                        row["revenueRetention"] = json!((0..=(retention_months as i64))
                            .map(|m| c.revenue_retention.get(&m).copied())
                            .collect::<Vec<_>>());
                    }
                    row
                })
                .collect();

            Ok(json!({
                "cohorts": cohort_rows,
                "retentionMonths": retention_months,
                "summary": {
                    "totalCohorts": cohorts.len(),
                    "totalCustomers": total_customers,
                    "avgRetention": avg_retention,
                },
            }))
        })
    }

    /// Days between a customer's first and second purchase, bucketed.
    pub fn get_days_to_second_purchase(&self, sales: SalesFilter) -> Result<Value> {
        self.with_conn(|conn| {
            let mut params: Vec<SqlValue> = Vec::new();
            let sales_sql = sales_clause(sales, &mut params);

            let sql = format!(
                "WITH ranked AS (
                    SELECT o.buyer_id, o.order_date,
                           ROW_NUMBER() OVER (
                               PARTITION BY o.buyer_id ORDER BY o.order_date, o.id
                           ) AS rn
                    FROM silver_orders o
                    WHERE o.buyer_id IS NOT NULL
                      AND o.is_return = 0 AND o.is_active_source = 1 {sales_sql}
                 )
                 SELECT CAST(julianday(b.order_date) - julianday(a.order_date) AS INTEGER)
                 FROM ranked a
                 JOIN ranked b ON a.buyer_id = b.buyer_id AND b.rn = 2
                 WHERE a.rn = 1"
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut gaps: Vec<i64> = stmt
                .query_map(params_from_iter(params.iter()), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            gaps.sort_unstable();

            const BUCKETS: [(&str, i64, i64); 6] = [
                ("0-30 days", 0, 30),
                ("31-60 days", 31, 60),
                ("61-90 days", 61, 90),
                ("91-120 days", 91, 120),
                ("121-180 days", 121, 180),
                ("180+ days", 181, i64::MAX),
            ];

            let total = gaps.len();
            let buckets: Vec<Value> = BUCKETS
                .iter()
                .map(|(label, lo, hi)| {
                    let count = gaps.iter().filter(|d| **d >= *lo && **d <= *hi).count();
                    json!({
                        "label": label,
                        "count": count,
                        "percent": if total > 0 {
                            round1(count as f64 / total as f64 * 100.0)
                        } else { 0.0 },
                    })
                })
                .collect();

            let avg_days = if total > 0 {
                gaps.iter().sum::<i64>() as f64 / total as f64
            } else {
                0.0
            };
            let median_days = if total > 0 { gaps[total / 2] } else { 0 };

            Ok(json!({
                "buckets": buckets,
                "customersWithSecondPurchase": total,
                "avgDays": round1(avg_days),
                "medianDays": median_days,
            }))
        })
    }

    /// Cumulative revenue per cohort across months 0..12.
    pub fn get_cohort_ltv(&self, months_back: u32, sales: SalesFilter) -> Result<Value> {
        const LTV_MONTHS: i64 = 12;

        self.with_conn(|conn| {
            let cutoff = {
                let today = kyiv_today();
                let shifted = today - Months::new(months_back);
                format!("{:04}-{:02}", shifted.year(), shifted.month())
            };

            let mut params: Vec<SqlValue> = Vec::new();
            let sales_sql = sales_clause(sales, &mut params);
            // The clause is used in both CTEs.
            if let Some(stored) = sales.stored_value() {
                params.push(SqlValue::Text(stored.to_string()));
            }
            params.push(SqlValue::Integer(LTV_MONTHS));
            params.push(SqlValue::Text(cutoff));

            let cohort_m = month_index("c.cohort_month");
            let order_m = month_index("substr(o.order_date, 1, 7)");

            let sql = format!(
                "WITH customer_cohorts AS (
                    SELECT o.buyer_id, MIN(substr(o.order_date, 1, 7)) AS cohort_month
                    FROM silver_orders o
                    WHERE o.buyer_id IS NOT NULL
                      AND o.is_return = 0 AND o.is_active_source = 1 {sales_sql}
                    GROUP BY o.buyer_id
                 )
                 SELECT c.cohort_month,
                        COUNT(DISTINCT c.buyer_id) AS cohort_size,
                        {order_m} - {cohort_m} AS months_since,
                        SUM(o.grand_total) AS revenue
                 FROM silver_orders o
                 JOIN customer_cohorts c ON o.buyer_id = c.buyer_id
                 WHERE o.is_return = 0 AND o.is_active_source = 1 {sales_sql}
                   AND {order_m} - {cohort_m} <= ?
                   AND c.cohort_month >= ?
                 GROUP BY c.cohort_month, months_since
                 ORDER BY c.cohort_month DESC, months_since"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows: Vec<(String, i64, i64, f64)> = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            #[derive(Default)]
            struct CohortLtv {
                size: i64,
                by_month: BTreeMap<i64, f64>,
            }

            let mut cohorts: BTreeMap<String, CohortLtv> = BTreeMap::new();
            for (month, size, months_since, revenue) in rows {
                let entry = cohorts.entry(month).or_default();
                entry.size = size;
                entry.by_month.insert(months_since, revenue);
            }

            let cohort_rows: Vec<Value> = cohorts
                .iter()
                .rev()
                .map(|(month, c)| {
                    let mut cumulative = 0.0;
                    let ltv: Vec<f64> = (0..=LTV_MONTHS)
                        .map(|m| {
                            cumulative += c.by_month.get(&m).copied().unwrap_or(0.0);
                            round2(cumulative)
                        })
                        .collect();
                    let per_customer: Vec<f64> = ltv
                        .iter()
                        .map(|v| {
                            if c.size > 0 {
                                round2(v / c.size as f64)
                            } else {
                                0.0
                            }
                        })
                        .collect();
                    json!({
                        "month": month,
                        "size": c.size,
                        "cumulativeRevenue": ltv,
                        "ltvPerCustomer": per_customer,
                    })
                })
                .collect();

            Ok(json!({
                "cohorts": cohort_rows,
                "months": LTV_MONTHS,
            }))
        })
    }

    /// Customers whose last purchase is older than `days_threshold`.
    pub fn get_at_risk_customers(
        &self,
        days_threshold: i64,
        sales: SalesFilter,
        limit: usize,
    ) -> Result<Value> {
        self.with_conn(|conn| {
            let today = kyiv_today();
            let cutoff = today - chrono::Days::new(days_threshold.max(0) as u64);

            let mut params: Vec<SqlValue> = Vec::new();
            let sales_sql = sales_clause(sales, &mut params);
            params.push(SqlValue::Text(fmt_date(cutoff)));
            params.push(SqlValue::Integer(limit as i64));

            let sql = format!(
                "SELECT o.buyer_id, b.full_name, b.phone,
                        MAX(o.order_date) AS last_order,
                        COUNT(DISTINCT o.id) AS orders,
                        SUM(o.grand_total) AS total_spent
                 FROM silver_orders o
                 LEFT JOIN buyers b ON o.buyer_id = b.id
                 WHERE o.buyer_id IS NOT NULL
                   AND o.is_return = 0 AND o.is_active_source = 1 {sales_sql}
                 GROUP BY o.buyer_id
                 HAVING COUNT(DISTINCT o.id) >= 2 AND MAX(o.order_date) < ?
                 ORDER BY total_spent DESC
                 LIMIT ?"
            );

            let mut stmt = conn.prepare(&sql)?;
            let customers: Vec<Value> = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    let last_order: String = row.get(3)?;
                    let days_since = super::parse_date(&last_order)
                        .map(|d| (today - d).num_days())
                        .unwrap_or(0);
                    Ok(json!({
                        "buyerId": row.get::<_, i64>(0)?,
                        "name": row.get::<_, Option<String>>(1)?,
                        "phone": row.get::<_, Option<String>>(2)?,
                        "lastOrderDate": last_order,
                        "daysSinceLastOrder": days_since,
                        "orderCount": row.get::<_, i64>(4)?,
                        "totalSpent": round2(row.get::<_, f64>(5)?),
                    }))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let count = customers.len();
            Ok(json!({
                "customers": customers,
                "count": count,
                "daysThreshold": days_threshold,
            }))
        })
    }
}
