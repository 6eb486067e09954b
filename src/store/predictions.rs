//! Stored revenue predictions and the forecaster's training-data queries.

use super::{fmt_date, parse_date, round2, AnalyticsStore};
use crate::models::{DailyRevenue, SalesFilter};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

impl AnalyticsStore {
    /// Daily revenue series for model training: active sources, non-return
    /// orders, Kyiv-local dates.
    pub fn query_daily_revenue(
        &self,
        sales: SalesFilter,
        days_back: i64,
        today: NaiveDate,
    ) -> Result<Vec<DailyRevenue>> {
        let start = today - chrono::Days::new(days_back.max(0) as u64);

        self.with_conn(|conn| {
            let mut bind: Vec<SqlValue> = vec![SqlValue::Text(fmt_date(start))];
            let sales_sql = match sales.stored_value() {
                Some(stored) => {
                    bind.push(SqlValue::Text(stored.to_string()));
                    "AND s.sales_type = ?"
                }
                None => "",
            };

            let sql = format!(
                "SELECT s.order_date, COALESCE(SUM(s.grand_total), 0)
                 FROM silver_orders s
                 WHERE s.order_date >= ?
                   AND s.is_return = 0 AND s.is_active_source = 1 {sales_sql}
                 GROUP BY s.order_date
                 ORDER BY s.order_date"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bind.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows
                .into_iter()
                .filter_map(|(date, revenue)| {
                    parse_date(&date).map(|date| DailyRevenue { date, revenue })
                })
                .collect())
        })
    }

    /// Actual revenue from month start to `up_to`, inclusive.
    pub fn actual_revenue_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
    ) -> Result<f64> {
        self.with_conn(|conn| {
            let mut bind: Vec<SqlValue> = vec![
                SqlValue::Text(fmt_date(start)),
                SqlValue::Text(fmt_date(end)),
            ];
            let sales_sql = match sales.stored_value() {
                Some(stored) => {
                    bind.push(SqlValue::Text(stored.to_string()));
                    "AND s.sales_type = ?"
                }
                None => "",
            };

            let revenue: f64 = conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM(s.grand_total), 0)
                     FROM silver_orders s
                     WHERE s.order_date BETWEEN ? AND ?
                       AND s.is_return = 0 AND s.is_active_source = 1 {sales_sql}"
                ),
                params_from_iter(bind.iter()),
                |row| row.get(0),
            )?;
            Ok(revenue)
        })
    }

    /// Replace stored predictions for a sales type over the covered range.
    pub fn store_predictions(
        &self,
        predictions: &[(NaiveDate, f64)],
        sales: SalesFilter,
        model_mae: f64,
        model_mape: f64,
    ) -> Result<usize> {
        if predictions.is_empty() {
            return Ok(0);
        }

        let min_date = predictions.iter().map(|(d, _)| *d).min().unwrap();
        let max_date = predictions.iter().map(|(d, _)| *d).max().unwrap();

        self.with_tx(|conn| {
            conn.execute(
                "DELETE FROM revenue_predictions
                 WHERE sales_type = ?1 AND prediction_date BETWEEN ?2 AND ?3",
                params![sales.as_str(), fmt_date(min_date), fmt_date(max_date)],
            )?;

            let mut stmt = conn.prepare_cached(
                "INSERT INTO revenue_predictions
                    (prediction_date, sales_type, predicted_revenue,
                     model_mae, model_mape, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, strftime('%Y-%m-%d %H:%M:%S', 'now'))",
            )?;
            for (date, revenue) in predictions {
                stmt.execute(params![
                    fmt_date(*date),
                    sales.as_str(),
                    round2(*revenue),
                    model_mae,
                    model_mape,
                ])?;
            }
            Ok(predictions.len())
        })
    }

    /// Stored predictions inside a window, as API-shaped rows.
    pub fn get_predictions(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        sales: SalesFilter,
    ) -> Result<Vec<Value>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT prediction_date, predicted_revenue, model_mae, model_mape, created_at
                 FROM revenue_predictions
                 WHERE sales_type = ?1 AND prediction_date BETWEEN ?2 AND ?3
                 ORDER BY prediction_date",
            )?;
            let rows = stmt
                .query_map(
                    params![sales.as_str(), fmt_date(start), fmt_date(end)],
                    |row| {
                        Ok(json!({
                            "date": row.get::<_, String>(0)?,
                            "predicted_revenue": round2(row.get::<_, f64>(1)?),
                            "model_mae": row.get::<_, f64>(2)?,
                            "model_mape": row.get::<_, f64>(3)?,
                            "created_at": row.get::<_, String>(4)?,
                        }))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}
