//! Gold layer rebuilds.
//!
//! Each refresh is a full delete + insert-select from Silver and is
//! idempotent: identical Silver input produces identical Gold output.

use super::AnalyticsStore;
use anyhow::Result;
use tracing::info;

impl AnalyticsStore {
    /// Rebuild `gold_daily_revenue`, one row per `(date, sales_type)`.
    pub fn refresh_gold_daily_revenue(&self) -> Result<usize> {
        let count = self.with_tx(|conn| {
            conn.execute("DELETE FROM gold_daily_revenue", [])?;
            let inserted = conn.execute(
                "INSERT INTO gold_daily_revenue
                    (date, sales_type, revenue, orders_count, avg_order_value,
                     returns_count, returns_revenue, unique_customers,
                     new_customers, returning_customers,
                     instagram_orders, instagram_revenue,
                     telegram_orders, telegram_revenue,
                     shopify_orders, shopify_revenue)
                 SELECT
                    s.order_date,
                    s.sales_type,
                    COALESCE(SUM(CASE WHEN s.is_return = 0 THEN s.grand_total END), 0),
                    COUNT(CASE WHEN s.is_return = 0 THEN 1 END),
                    CASE WHEN COUNT(CASE WHEN s.is_return = 0 THEN 1 END) > 0
                         THEN COALESCE(SUM(CASE WHEN s.is_return = 0 THEN s.grand_total END), 0)
                              / COUNT(CASE WHEN s.is_return = 0 THEN 1 END)
                         ELSE 0 END,
                    COUNT(CASE WHEN s.is_return = 1 THEN 1 END),
                    COALESCE(SUM(CASE WHEN s.is_return = 1 THEN s.grand_total END), 0),
                    COUNT(DISTINCT CASE WHEN s.is_return = 0 THEN s.buyer_id END),
                    COUNT(DISTINCT CASE WHEN s.is_return = 0 AND s.is_new_customer = 1
                                        THEN s.buyer_id END),
                    COUNT(DISTINCT CASE WHEN s.is_return = 0 AND s.is_new_customer = 0
                                        THEN s.buyer_id END),
                    COUNT(CASE WHEN s.is_return = 0 AND s.source_id = 1 THEN 1 END),
                    COALESCE(SUM(CASE WHEN s.is_return = 0 AND s.source_id = 1
                                      THEN s.grand_total END), 0),
                    COUNT(CASE WHEN s.is_return = 0 AND s.source_id = 2 THEN 1 END),
                    COALESCE(SUM(CASE WHEN s.is_return = 0 AND s.source_id = 2
                                      THEN s.grand_total END), 0),
                    COUNT(CASE WHEN s.is_return = 0 AND s.source_id = 4 THEN 1 END),
                    COALESCE(SUM(CASE WHEN s.is_return = 0 AND s.source_id = 4
                                      THEN s.grand_total END), 0)
                 FROM silver_orders s
                 WHERE s.is_active_source = 1
                   AND s.order_date IS NOT NULL
                 GROUP BY s.order_date, s.sales_type",
                [],
            )?;
            Ok(inserted)
        })?;

        info!(rows = count, "refreshed gold_daily_revenue");
        Ok(count)
    }

    /// Rebuild `gold_daily_products`, one row per
    /// `(date, sales_type, source, product)`.
    ///
    /// `order_count` here counts orders containing the product on that day.
    /// Summing it across products double-counts multi-product orders, which
    /// is why filtered order counts always come from the Silver JOIN path.
    pub fn refresh_gold_daily_products(&self) -> Result<usize> {
        let count = self.with_tx(|conn| {
            conn.execute("DELETE FROM gold_daily_products", [])?;
            let inserted = conn.execute(
                "INSERT INTO gold_daily_products
                    (date, sales_type, source_id, product_id, product_name,
                     category_id, category_name, parent_category_name, brand,
                     quantity_sold, product_revenue, order_count)
                 SELECT
                    s.order_date,
                    s.sales_type,
                    s.source_id,
                    op.product_id,
                    op.name,
                    p.category_id,
                    c.name,
                    COALESCE(pc.name, c.name),
                    p.brand,
                    SUM(op.quantity),
                    COALESCE(SUM(op.price_sold * op.quantity), 0),
                    COUNT(DISTINCT s.id)
                 FROM silver_orders s
                 JOIN order_products op ON s.id = op.order_id
                 LEFT JOIN products p ON op.product_id = p.id
                 LEFT JOIN categories c ON p.category_id = c.id
                 LEFT JOIN categories pc ON c.parent_id = pc.id
                 WHERE s.is_return = 0
                   AND s.is_active_source = 1
                   AND s.order_date IS NOT NULL
                 GROUP BY s.order_date, s.sales_type, s.source_id,
                          op.product_id, op.name",
                [],
            )?;
            Ok(inserted)
        })?;

        info!(rows = count, "refreshed gold_daily_products");
        Ok(count)
    }

    /// Rebuild `gold_daily_traffic` from Silver orders joined with UTM
    /// attribution. Orders without attribution land in `unknown`/`other`.
    pub fn refresh_gold_daily_traffic(&self) -> Result<usize> {
        let count = self.with_tx(|conn| {
            conn.execute("DELETE FROM gold_daily_traffic", [])?;
            let inserted = conn.execute(
                "INSERT INTO gold_daily_traffic
                    (date, source_id, sales_type, platform, traffic_type,
                     orders_count, revenue)
                 SELECT
                    s.order_date,
                    s.source_id,
                    s.sales_type,
                    COALESCE(u.platform, 'other'),
                    COALESCE(u.traffic_type, 'unknown'),
                    COUNT(DISTINCT s.id),
                    COALESCE(SUM(s.grand_total), 0)
                 FROM silver_orders s
                 LEFT JOIN silver_order_utm u ON s.id = u.order_id
                 WHERE s.is_return = 0
                   AND s.is_active_source = 1
                   AND s.order_date IS NOT NULL
                 GROUP BY s.order_date, s.source_id, s.sales_type,
                          COALESCE(u.platform, 'other'),
                          COALESCE(u.traffic_type, 'unknown')",
                [],
            )?;
            Ok(inserted)
        })?;

        info!(rows = count, "refreshed gold_daily_traffic");
        Ok(count)
    }

    /// Run the whole Silver → Gold refresh chain after a Bronze write.
    pub fn refresh_analytics_layers(&self) -> Result<()> {
        self.refresh_silver_orders()?;
        self.refresh_silver_utm()?;
        self.refresh_gold_daily_revenue()?;
        self.refresh_gold_daily_products()?;
        self.refresh_gold_daily_traffic()?;
        Ok(())
    }
}
