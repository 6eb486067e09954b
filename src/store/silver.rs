//! Silver layer refresh: conformed orders and UTM attribution.

use super::AnalyticsStore;
use crate::config;
use crate::utm::{classify_traffic, parse_utm_comment};
use anyhow::Result;
use rusqlite::params;
use tracing::info;

impl AnalyticsStore {
    /// Rebuild `silver_orders` from Bronze.
    ///
    /// Derivations:
    /// - `order_date` is the Kyiv-local date of `ordered_at`.
    /// - `sales_type` by manager assignment (B2B manager, retail managers,
    ///   unassigned Shopify ⇒ retail, everything else ⇒ other).
    /// - `is_new_customer` marks the buyer's earliest non-return active-source
    ///   order, evaluated globally with ties broken by id.
    pub fn refresh_silver_orders(&self) -> Result<usize> {
        let retail_ids = config::RETAIL_MANAGER_IDS
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let return_ids = config::RETURN_STATUS_IDS
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let active_ids = config::ACTIVE_SOURCE_IDS
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            "INSERT INTO silver_orders
                (id, order_date, source_id, source_name, status_id, grand_total,
                 buyer_id, manager_id, is_return, is_active_source, sales_type,
                 is_new_customer)
             SELECT
                o.id,
                kyiv_date(o.ordered_at),
                o.source_id,
                CASE o.source_id
                    WHEN 1 THEN 'Instagram'
                    WHEN 2 THEN 'Telegram'
                    WHEN 4 THEN 'Shopify'
                    ELSE 'Other'
                END,
                o.status_id,
                o.grand_total,
                o.buyer_id,
                o.manager_id,
                o.status_id IN ({return_ids}),
                o.source_id IN ({active_ids}),
                CASE
                    WHEN o.manager_id = {b2b} THEN 'b2b'
                    WHEN o.manager_id IN ({retail_ids})
                         OR (o.manager_id IS NULL AND o.source_id = 4) THEN 'retail'
                    ELSE 'other'
                END,
                COALESCE(fo.first_id = o.id, 0)
             FROM orders o
             LEFT JOIN (
                SELECT buyer_id, id AS first_id,
                       ROW_NUMBER() OVER (
                           PARTITION BY buyer_id ORDER BY ordered_at, id
                       ) AS rn
                FROM orders
                WHERE buyer_id IS NOT NULL
                  AND status_id NOT IN ({return_ids})
                  AND source_id IN ({active_ids})
             ) fo ON fo.buyer_id = o.buyer_id AND fo.rn = 1
             WHERE o.ordered_at IS NOT NULL",
            b2b = config::B2B_MANAGER_ID,
        );

        let count = self.with_tx(|conn| {
            conn.execute("DELETE FROM silver_orders", [])?;
            let inserted = conn.execute(&sql, [])?;
            Ok(inserted)
        })?;

        info!(rows = count, "refreshed silver_orders");
        Ok(count)
    }

    /// Parse UTM attribution for orders not yet in `silver_order_utm`.
    ///
    /// Comments without any tracking still get a row (`unknown`/`other`) so
    /// they are not re-scanned every refresh.
    pub fn refresh_silver_utm(&self) -> Result<usize> {
        let pending: Vec<(i64, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT o.id, o.manager_comment
                 FROM orders o
                 WHERE o.manager_comment IS NOT NULL
                   AND o.manager_comment != ''
                   AND NOT EXISTS (
                       SELECT 1 FROM silver_order_utm u WHERE u.order_id = o.id
                   )",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        if pending.is_empty() {
            return Ok(0);
        }

        let count = self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR REPLACE INTO silver_order_utm
                    (order_id, utm_source, utm_medium, utm_campaign, utm_content,
                     utm_term, utm_lang, fbp, fbc, ttp, fbclid,
                     traffic_type, platform, parsed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         strftime('%Y-%m-%d %H:%M:%S', 'now'))",
            )?;

            for (order_id, comment) in &pending {
                let data = parse_utm_comment(comment);
                let (traffic_type, platform) = classify_traffic(&data);

                stmt.execute(params![
                    order_id,
                    data.fields.get("utm_source"),
                    data.fields.get("utm_medium"),
                    data.fields.get("utm_campaign"),
                    data.fields.get("utm_content"),
                    data.fields.get("utm_term"),
                    data.fields.get("utm_lang"),
                    data.fields.get("_fbp"),
                    data.fields.get("_fbc"),
                    data.fields.get("ttp"),
                    data.fields.get("fbclid"),
                    traffic_type.as_str(),
                    platform.as_str(),
                ])?;
            }

            Ok(pending.len())
        })?;

        info!(rows = count, "parsed UTM attribution");
        Ok(count)
    }
}
