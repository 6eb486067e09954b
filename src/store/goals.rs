//! Revenue goals: seasonality indices, growth metrics, weekly patterns and
//! smart goal generation.
//!
//! Smart goals combine three signals for the target month:
//! 1. last-year same-month revenue × capped YoY growth,
//! 2. recent-3-complete-months average × seasonality index,
//! 3. historical month average × capped growth (fallback),
//! take the max of (1) and (2) and round to a "nice" number.

use super::{fmt_date, round2, AnalyticsStore};
use crate::config;
use crate::models::SalesFilter;
use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

/// Growth cap; also the default when no history exists.
const MAX_GROWTH_RATE: f64 = 0.35;
const FALLBACK_MONTHLY_GOAL: f64 = 3_000_000.0;
/// A month needs this many days with orders to count as complete.
const COMPLETE_MONTH_MIN_DAYS: i64 = 25;

const DEFAULT_WEEKLY_WEIGHTS: [(i64, f64); 5] =
    [(1, 0.23), (2, 0.23), (3, 0.23), (4, 0.23), (5, 0.08)];

fn round_to(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

fn sales_predicate(sales: SalesFilter, params: &mut Vec<SqlValue>) -> String {
    match sales.stored_value() {
        Some(stored) => {
            params.push(SqlValue::Text(stored.to_string()));
            "AND s.sales_type = ?".to_string()
        }
        None => String::new(),
    }
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    (next - first).num_days()
}

/// Revenue per (year, month) for complete months, most recent first.
fn monthly_revenue(
    store: &AnalyticsStore,
    sales: SalesFilter,
) -> Result<Vec<(i32, u32, f64)>> {
    store.with_conn(|conn| {
        let mut bind: Vec<SqlValue> = Vec::new();
        let sales_sql = sales_predicate(sales, &mut bind);
        let sql = format!(
            "SELECT CAST(substr(s.order_date, 1, 4) AS INTEGER) AS year,
                    CAST(substr(s.order_date, 6, 2) AS INTEGER) AS month,
                    SUM(s.grand_total) AS revenue,
                    COUNT(DISTINCT s.order_date) AS days_with_orders
             FROM silver_orders s
             WHERE s.is_return = 0 AND s.is_active_source = 1 {sales_sql}
             GROUP BY year, month
             HAVING COUNT(DISTINCT s.order_date) >= {COMPLETE_MONTH_MIN_DAYS}
             ORDER BY year DESC, month DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok((row.get(0)?, row.get::<_, i64>(1)? as u32, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
}

impl AnalyticsStore {
    /// Per-month seasonality index = month average / overall monthly average.
    pub fn calculate_seasonality_indices(&self, sales: SalesFilter) -> Result<Value> {
        let months = monthly_revenue(self, sales)?;
        if months.is_empty() {
            return Ok(json!({"status": "no_data"}));
        }

        let overall_avg: f64 =
            months.iter().map(|(_, _, r)| r).sum::<f64>() / months.len() as f64;

        let mut by_month: HashMap<u32, Vec<f64>> = HashMap::new();
        for (_, month, revenue) in &months {
            by_month.entry(*month).or_default().push(*revenue);
        }

        let stored = sales.as_str().to_string();
        self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO seasonal_indices
                    (month, sales_type, seasonality_index, sample_size, avg_revenue,
                     min_revenue, max_revenue, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(month, sales_type) DO UPDATE SET
                    seasonality_index = excluded.seasonality_index,
                    sample_size = excluded.sample_size,
                    avg_revenue = excluded.avg_revenue,
                    min_revenue = excluded.min_revenue,
                    max_revenue = excluded.max_revenue,
                    confidence = CASE WHEN excluded.sample_size >= 3 THEN 'high'
                                      WHEN excluded.sample_size = 2 THEN 'medium'
                                      ELSE 'low' END,
                    updated_at = excluded.updated_at",
            )?;

            for (month, revenues) in &by_month {
                let avg = revenues.iter().sum::<f64>() / revenues.len() as f64;
                let min = revenues.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = revenues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let index = if overall_avg > 0.0 { avg / overall_avg } else { 1.0 };
                stmt.execute(params![
                    month,
                    stored,
                    index,
                    revenues.len() as i64,
                    avg,
                    min,
                    max,
                ])?;
            }
            // Backfill the confidence column for fresh inserts.
            conn.execute(
                "UPDATE seasonal_indices
                 SET confidence = CASE WHEN sample_size >= 3 THEN 'high'
                                       WHEN sample_size = 2 THEN 'medium'
                                       ELSE 'low' END
                 WHERE sales_type = ?1",
                params![stored],
            )?;
            Ok(())
        })?;

        info!(months = by_month.len(), sales_type = sales.as_str(), "seasonality recomputed");
        Ok(json!({
            "status": "ok",
            "monthsCovered": by_month.len(),
            "overallMonthlyAvg": round2(overall_avg),
        }))
    }

    /// Overall + per-calendar-month YoY growth rates.
    pub fn calculate_yoy_growth(&self, sales: SalesFilter) -> Result<Value> {
        let months = monthly_revenue(self, sales)?;
        if months.is_empty() {
            return Ok(json!({"status": "no_data"}));
        }

        // Yearly totals → consecutive-year growth rates.
        let mut yearly: HashMap<i32, f64> = HashMap::new();
        for (year, _, revenue) in &months {
            *yearly.entry(*year).or_default() += *revenue;
        }
        let mut years: Vec<i32> = yearly.keys().copied().collect();
        years.sort_unstable();

        let mut yoy_rates = Vec::new();
        for pair in years.windows(2) {
            let prev = yearly[&pair[0]];
            let curr = yearly[&pair[1]];
            if prev > 0.0 {
                yoy_rates.push((curr - prev) / prev);
            }
        }
        let overall_yoy = if yoy_rates.is_empty() {
            0.10
        } else {
            yoy_rates.iter().sum::<f64>() / yoy_rates.len() as f64
        };

        // Per calendar month: average growth across year pairs.
        let mut month_year: HashMap<(u32, i32), f64> = HashMap::new();
        for (year, month, revenue) in &months {
            month_year.insert((*month, *year), *revenue);
        }
        let mut monthly_yoy: HashMap<u32, f64> = HashMap::new();
        for month in 1..=12u32 {
            let mut rates = Vec::new();
            for pair in years.windows(2) {
                if let (Some(prev), Some(curr)) = (
                    month_year.get(&(month, pair[0])),
                    month_year.get(&(month, pair[1])),
                ) {
                    if *prev > 0.0 {
                        rates.push((curr - prev) / prev);
                    }
                }
            }
            if !rates.is_empty() {
                monthly_yoy.insert(month, rates.iter().sum::<f64>() / rates.len() as f64);
            }
        }

        let stored = sales.as_str().to_string();
        let (min_date, max_date) = self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT MIN(order_date), MAX(order_date) FROM silver_orders",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )?)
        })?;

        self.with_tx(|conn| {
            conn.execute(
                "INSERT INTO growth_metrics
                    (metric_type, sales_type, value, period_start, period_end,
                     sample_size, updated_at)
                 VALUES ('yoy_overall', ?1, ?2, ?3, ?4, ?5,
                         strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(metric_type, sales_type) DO UPDATE SET
                    value = excluded.value,
                    period_start = excluded.period_start,
                    period_end = excluded.period_end,
                    sample_size = excluded.sample_size,
                    updated_at = excluded.updated_at",
                params![stored, overall_yoy, min_date, max_date, yoy_rates.len() as i64],
            )?;

            let mut stmt = conn.prepare_cached(
                "UPDATE seasonal_indices
                 SET yoy_growth = ?1, updated_at = strftime('%Y-%m-%d %H:%M:%S', 'now')
                 WHERE month = ?2 AND sales_type = ?3",
            )?;
            for (month, rate) in &monthly_yoy {
                stmt.execute(params![rate, month, stored])?;
            }
            Ok(())
        })?;

        info!(
            overall_yoy = %format!("{:.2}%", overall_yoy * 100.0),
            sales_type = sales.as_str(),
            "YoY growth recomputed"
        );
        Ok(json!({
            "status": "ok",
            "overall_yoy": round2(overall_yoy * 10000.0) / 10000.0,
            "monthly_yoy": monthly_yoy
                .into_iter()
                .map(|(m, r)| (m.to_string(), round2(r * 10000.0) / 10000.0))
                .collect::<HashMap<_, _>>(),
            "sample_size": yoy_rates.len(),
        }))
    }

    /// Weight of each week-of-month (1..5) inside a month's revenue.
    pub fn calculate_weekly_patterns(&self, sales: SalesFilter) -> Result<Value> {
        let rows: Vec<(String, i64, f64)> = self.with_conn(|conn| {
            let mut bind: Vec<SqlValue> = Vec::new();
            let sales_sql = sales_predicate(sales, &mut bind);
            let sql = format!(
                "SELECT substr(s.order_date, 1, 7) AS ym,
                        MIN((CAST(substr(s.order_date, 9, 2) AS INTEGER) - 1) / 7 + 1, 5)
                            AS week_of_month,
                        SUM(s.grand_total) AS revenue
                 FROM silver_orders s
                 WHERE s.is_return = 0 AND s.is_active_source = 1 {sales_sql}
                 GROUP BY ym, week_of_month"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bind.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        if rows.is_empty() {
            return Ok(json!({"status": "no_data"}));
        }

        // Month totals, then weight samples per (calendar month, week).
        let mut month_totals: HashMap<String, f64> = HashMap::new();
        for (ym, _, revenue) in &rows {
            *month_totals.entry(ym.clone()).or_default() += *revenue;
        }

        let mut weights: HashMap<(u32, i64), Vec<f64>> = HashMap::new();
        for (ym, week, revenue) in &rows {
            let total = month_totals[ym];
            if total <= 0.0 {
                continue;
            }
            let month: u32 = ym[5..7].parse().unwrap_or(0);
            if month == 0 {
                continue;
            }
            weights
                .entry((month, *week))
                .or_default()
                .push(*revenue / total);
        }

        let stored = sales.as_str().to_string();
        let samples = weights.len();
        self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO weekly_patterns
                    (month, week_of_month, sales_type, weight, sample_size, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(month, week_of_month, sales_type) DO UPDATE SET
                    weight = excluded.weight,
                    sample_size = excluded.sample_size,
                    updated_at = excluded.updated_at",
            )?;
            for ((month, week), values) in &weights {
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                stmt.execute(params![month, week, stored, avg, values.len() as i64])?;
            }
            Ok(())
        })?;

        info!(cells = samples, sales_type = sales.as_str(), "weekly patterns recomputed");
        Ok(json!({"status": "ok", "cells": samples}))
    }

    /// Smart goal suggestion for one month.
    pub fn generate_smart_goals(
        &self,
        target_year: i32,
        target_month: u32,
        sales: SalesFilter,
    ) -> Result<Value> {
        // Seasonality for the target month.
        let (seasonality_index, historical_avg, monthly_yoy, confidence) =
            self.with_conn(|conn| {
                let row = conn
                    .query_row(
                        "SELECT seasonality_index, avg_revenue, yoy_growth, confidence
                         FROM seasonal_indices
                         WHERE month = ?1 AND sales_type = ?2",
                        params![target_month, sales.as_str()],
                        |row| {
                            Ok((
                                row.get::<_, Option<f64>>(0)?,
                                row.get::<_, Option<f64>>(1)?,
                                row.get::<_, Option<f64>>(2)?,
                                row.get::<_, Option<String>>(3)?,
                            ))
                        },
                    )
                    .ok();
                Ok(match row {
                    Some((index, avg, yoy, conf)) => (
                        index.unwrap_or(1.0),
                        avg.unwrap_or(0.0),
                        yoy.unwrap_or(MAX_GROWTH_RATE),
                        conf.unwrap_or_else(|| "low".to_string()),
                    ),
                    None => (1.0, 0.0, MAX_GROWTH_RATE, "low".to_string()),
                })
            })?;

        let overall_yoy = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM growth_metrics
                     WHERE metric_type = 'yoy_overall' AND sales_type = ?1",
                    params![sales.as_str()],
                    |row| row.get::<_, Option<f64>>(0),
                )
                .ok()
                .flatten()
                .unwrap_or(MAX_GROWTH_RATE))
        })?;

        // Last year, same month.
        let last_year_revenue: f64 = self.with_conn(|conn| {
            let mut bind: Vec<SqlValue> = vec![SqlValue::Text(format!(
                "{:04}-{:02}",
                target_year - 1,
                target_month
            ))];
            let sales_sql = sales_predicate(sales, &mut bind);
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT COALESCE(SUM(s.grand_total), 0)
                         FROM silver_orders s
                         WHERE substr(s.order_date, 1, 7) = ?
                           AND s.is_return = 0 AND s.is_active_source = 1 {sales_sql}"
                    ),
                    params_from_iter(bind.iter()),
                    |row| row.get(0),
                )
                .unwrap_or(0.0))
        })?;

        // Recent 3 complete months (excluding the current month).
        let recent_3_month_avg: f64 = {
            let current_ym = {
                let now = Utc::now().with_timezone(&config::DISPLAY_TZ);
                format!("{:04}-{:02}", now.year(), now.month())
            };
            let recent: Vec<f64> = monthly_revenue(self, sales)?
                .into_iter()
                .filter(|(y, m, _)| format!("{y:04}-{m:02}") < current_ym)
                .take(3)
                .map(|(_, _, r)| r)
                .collect();
            if recent.is_empty() {
                0.0
            } else {
                recent.iter().sum::<f64>() / recent.len() as f64
            }
        };

        let raw_growth = if monthly_yoy > 0.0 { monthly_yoy } else { overall_yoy };
        let mut growth_rate = raw_growth.min(MAX_GROWTH_RATE);

        let yoy_goal = if last_year_revenue > 0.0 {
            last_year_revenue * (1.0 + growth_rate)
        } else {
            0.0
        };
        let recent_goal = if recent_3_month_avg > 0.0 && seasonality_index > 0.0 {
            recent_3_month_avg * seasonality_index
        } else {
            0.0
        };

        let (mut monthly_goal, calculation_method) = if yoy_goal > 0.0 && recent_goal > 0.0 {
            (
                yoy_goal.max(recent_goal),
                if yoy_goal >= recent_goal { "yoy_growth" } else { "recent_trend" },
            )
        } else if recent_goal > 0.0 {
            (recent_goal, "recent_trend")
        } else if yoy_goal > 0.0 {
            (yoy_goal, "yoy_growth")
        } else if historical_avg > 0.0 {
            (historical_avg * (1.0 + growth_rate), "historical_avg")
        } else {
            growth_rate = MAX_GROWTH_RATE;
            (FALLBACK_MONTHLY_GOAL, "fallback")
        };

        monthly_goal = round_to(monthly_goal, 100_000.0);

        // Weekly split from the learned patterns, default distribution else.
        let mut weekly_weights: HashMap<i64, f64> = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT week_of_month, weight FROM weekly_patterns
                 WHERE month = ?1 AND sales_type = ?2
                 ORDER BY week_of_month",
            )?;
            let rows = stmt
                .query_map(params![target_month, sales.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Option<f64>>(1)?.unwrap_or(0.0)))
                })?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok(rows)
        })?;
        if weekly_weights.is_empty() {
            weekly_weights = DEFAULT_WEEKLY_WEIGHTS.iter().copied().collect();
        }
        let total_weight: f64 = weekly_weights.values().sum();
        if total_weight > 0.0 {
            for weight in weekly_weights.values_mut() {
                *weight /= total_weight;
            }
        }

        let weekly_goals: HashMap<String, f64> = weekly_weights
            .iter()
            .map(|(week, weight)| {
                (week.to_string(), round_to(monthly_goal * weight, 10_000.0))
            })
            .collect();

        let dim = days_in_month(target_year, target_month);
        let daily_goal = round_to(monthly_goal / dim as f64, 10_000.0);
        let weekly_goal = round_to(monthly_goal / 4.3, 50_000.0);

        Ok(json!({
            "targetYear": target_year,
            "targetMonth": target_month,
            "monthly": {
                "goal": monthly_goal,
                "lastYearRevenue": round2(last_year_revenue),
                "recent3MonthAvg": round2(recent_3_month_avg),
                "historicalAvg": round2(historical_avg),
                "yoyGoal": round2(yoy_goal),
                "recentGoal": round2(recent_goal),
                "growthRate": round2(growth_rate * 10000.0) / 10000.0,
                "seasonalityIndex": seasonality_index,
                "confidence": confidence,
                "calculationMethod": calculation_method,
            },
            "weekly": {
                "goal": weekly_goal,
                "breakdown": weekly_goals,
                "weights": weekly_weights
                    .iter()
                    .map(|(w, v)| (w.to_string(), round2(v * 10000.0) / 10000.0))
                    .collect::<HashMap<_, _>>(),
            },
            "daily": {
                "goal": daily_goal,
                "daysInMonth": dim,
            },
            "metadata": {
                "overallYoY": round2(overall_yoy * 10000.0) / 10000.0,
                "monthlyYoY": round2(monthly_yoy * 10000.0) / 10000.0,
            },
        }))
    }

    /// Smart goals for the current period, custom overrides applied.
    pub fn get_smart_goals(&self, sales: SalesFilter) -> Result<Value> {
        let now = Utc::now().with_timezone(&config::DISPLAY_TZ);
        let smart = self.generate_smart_goals(now.year(), now.month(), sales)?;

        let custom: HashMap<String, f64> = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT period_type, goal_amount FROM revenue_goals
                 WHERE is_custom = 1 AND sales_type = ?1",
            )?;
            let rows = stmt
                .query_map(params![sales.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok(rows)
        })?;

        let suggested = |period: &str| smart[period]["goal"].as_f64().unwrap_or(0.0);

        Ok(json!({
            "daily": {
                "amount": custom.get("daily").copied().unwrap_or_else(|| suggested("daily")),
                "isCustom": custom.contains_key("daily"),
                "suggestedAmount": suggested("daily"),
                "confidence": smart["monthly"]["confidence"],
            },
            "weekly": {
                "amount": custom.get("weekly").copied().unwrap_or_else(|| suggested("weekly")),
                "isCustom": custom.contains_key("weekly"),
                "suggestedAmount": suggested("weekly"),
                "weeklyBreakdown": smart["weekly"]["breakdown"],
                "confidence": smart["monthly"]["confidence"],
            },
            "monthly": {
                "amount": custom.get("monthly").copied().unwrap_or_else(|| suggested("monthly")),
                "isCustom": custom.contains_key("monthly"),
                "suggestedAmount": suggested("monthly"),
                "lastYearRevenue": smart["monthly"]["lastYearRevenue"],
                "growthRate": smart["monthly"]["growthRate"],
                "seasonalityIndex": smart["monthly"]["seasonalityIndex"],
                "confidence": smart["monthly"]["confidence"],
                "calculationMethod": smart["monthly"]["calculationMethod"],
            },
            "metadata": smart["metadata"],
        }))
    }

    pub fn set_custom_goal(
        &self,
        period_type: &str,
        sales: SalesFilter,
        amount: f64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO revenue_goals
                    (period_type, sales_type, goal_amount, is_custom, updated_at)
                 VALUES (?1, ?2, ?3, 1, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(period_type, sales_type) DO UPDATE SET
                    goal_amount = excluded.goal_amount,
                    is_custom = 1,
                    updated_at = excluded.updated_at",
                params![period_type, sales.as_str(), amount],
            )?;
            Ok(())
        })
    }

    pub fn clear_custom_goal(&self, period_type: &str, sales: SalesFilter) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM revenue_goals
                 WHERE period_type = ?1 AND sales_type = ?2 AND is_custom = 1",
                params![period_type, sales.as_str()],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Actual vs goal for the running month.
    pub fn get_goal_progress(&self, sales: SalesFilter) -> Result<Value> {
        let now = Utc::now().with_timezone(&config::DISPLAY_TZ);
        let today = now.date_naive();
        let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();

        let actual: f64 = self.with_conn(|conn| {
            let mut bind: Vec<SqlValue> = vec![
                SqlValue::Text(fmt_date(month_start)),
                SqlValue::Text(fmt_date(today)),
            ];
            let sales_sql = sales_predicate(sales, &mut bind);
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT COALESCE(SUM(s.grand_total), 0)
                         FROM silver_orders s
                         WHERE s.order_date BETWEEN ? AND ?
                           AND s.is_return = 0 AND s.is_active_source = 1 {sales_sql}"
                    ),
                    params_from_iter(bind.iter()),
                    |row| row.get(0),
                )
                .unwrap_or(0.0))
        })?;

        let goals = self.get_smart_goals(sales)?;
        let monthly_goal = goals["monthly"]["amount"].as_f64().unwrap_or(0.0);
        let percent = if monthly_goal > 0.0 {
            actual / monthly_goal * 100.0
        } else {
            0.0
        };

        let dim = days_in_month(today.year(), today.month());
        let day_of_month = today.day() as i64;
        let expected_pace = if dim > 0 {
            day_of_month as f64 / dim as f64 * 100.0
        } else {
            0.0
        };

        Ok(json!({
            "month": format!("{:04}-{:02}", today.year(), today.month()),
            "actualToDate": round2(actual),
            "monthlyGoal": monthly_goal,
            "percentComplete": super::round1(percent),
            "expectedPacePercent": super::round1(expected_pace),
            "onTrack": percent >= expected_pace,
            "dayOfMonth": day_of_month,
            "daysInMonth": dim,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_rounding() {
        assert_eq!(round_to(3_248_000.0, 100_000.0), 3_200_000.0);
        assert_eq!(round_to(3_250_000.0, 100_000.0), 3_300_000.0);
        assert_eq!(round_to(123_456.0, 10_000.0), 120_000.0);
        assert_eq!(round_to(770_000.0, 50_000.0), 750_000.0);
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 4), 30);
        assert_eq!(days_in_month(2024, 12), 31);
    }

    #[test]
    fn default_weights_normalize_to_one() {
        let total: f64 = DEFAULT_WEEKLY_WEIGHTS.iter().map(|(_, w)| w).sum();
        let normalized: f64 = DEFAULT_WEEKLY_WEIGHTS
            .iter()
            .map(|(_, w)| w / total)
            .sum();
        assert!((normalized - 1.0).abs() < 1e-9);
    }
}
