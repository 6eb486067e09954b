//! Bronze upsert operations.
//!
//! Every batch runs in a single transaction: a failure rolls the whole batch
//! back and the cycle aborts. Individual rows violating data invariants
//! (negative totals, missing required fields) are dropped with a log line and
//! the rest of the batch continues.

use super::{fmt_ts, AnalyticsStore};
use crate::models::{
    SalesType, StockMovementType, UpstreamCategory, UpstreamExpense, UpstreamExpenseType,
    UpstreamManager, UpstreamOffer, UpstreamOrder, UpstreamProduct, UpstreamStock,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One order that actually changed the store during an upsert.
#[derive(Debug, Clone)]
pub struct AppliedOrder {
    pub id: i64,
    pub ordered_at: DateTime<Utc>,
    pub sales_type: SalesType,
}

#[derive(Debug, Default)]
pub struct OrdersUpsertOutcome {
    /// Orders whose row was inserted or updated (version guard passed).
    pub applied: Vec<AppliedOrder>,
    /// Rows dropped for violating invariants.
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub struct StocksUpsertOutcome {
    pub upserted: usize,
    pub movements: usize,
}

impl AnalyticsStore {
    /// Upsert an order batch with line-item replacement.
    ///
    /// Idempotent w.r.t. `(id, updated_at)`: a re-delivery of the same record
    /// applies the same state again; an older version is a no-op.
    pub fn upsert_orders(&self, orders: &[UpstreamOrder]) -> Result<OrdersUpsertOutcome> {
        if orders.is_empty() {
            return Ok(OrdersUpsertOutcome::default());
        }

        let outcome = self.with_tx(|conn| {
            let mut outcome = OrdersUpsertOutcome::default();

            for order in orders {
                let Some(valid) = validate_order(order) else {
                    outcome.dropped += 1;
                    continue;
                };

                let applied = upsert_order_row(conn, order, &valid)?;
                if !applied {
                    continue;
                }

                replace_order_products(conn, order)?;

                if let Some(buyer) = order.buyer.as_ref() {
                    conn.execute(
                        "INSERT INTO buyers (id, full_name, phone, synced_at)
                         VALUES (?1, ?2, ?3, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                         ON CONFLICT(id) DO UPDATE SET
                            full_name = COALESCE(excluded.full_name, full_name),
                            phone = COALESCE(excluded.phone, phone),
                            synced_at = excluded.synced_at",
                        params![buyer.id, buyer.full_name, buyer.phone],
                    )?;
                }

                outcome.applied.push(AppliedOrder {
                    id: order.id,
                    ordered_at: valid.ordered_at,
                    sales_type: SalesType::classify(order.manager(), valid.source_id),
                });
            }

            Ok(outcome)
        });

        match outcome {
            Ok(outcome) => {
                info!(
                    batch = orders.len(),
                    applied = outcome.applied.len(),
                    dropped = outcome.dropped,
                    "upserted orders"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    batch = orders.len(),
                    first_id = orders.first().map(|o| o.id),
                    last_id = orders.last().map(|o| o.id),
                    error = %e,
                    "order batch rolled back"
                );
                Err(e)
            }
        }
    }

    pub fn upsert_products(&self, products: &[UpstreamProduct]) -> Result<usize> {
        if products.is_empty() {
            return Ok(0);
        }

        let count = self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO products (id, name, category_id, brand, sku, price, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    category_id = excluded.category_id,
                    brand = excluded.brand,
                    sku = excluded.sku,
                    price = excluded.price,
                    synced_at = excluded.synced_at",
            )?;

            for product in products {
                stmt.execute(params![
                    product.id,
                    product.name.as_deref().unwrap_or("Unknown"),
                    product.category_id,
                    product.brand(),
                    product.sku,
                    product.price.unwrap_or(0.0),
                ])?;
            }
            Ok(products.len())
        })?;

        info!(count, "upserted products");
        Ok(count)
    }

    pub fn upsert_categories(&self, categories: &[UpstreamCategory]) -> Result<usize> {
        if categories.is_empty() {
            return Ok(0);
        }

        let count = self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO categories (id, name, parent_id, synced_at)
                 VALUES (?1, ?2, ?3, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    parent_id = excluded.parent_id,
                    synced_at = excluded.synced_at",
            )?;
            for cat in categories {
                stmt.execute(params![
                    cat.id,
                    cat.name.as_deref().unwrap_or("Unknown"),
                    cat.parent_id,
                ])?;
            }
            Ok(categories.len())
        })?;

        info!(count, "upserted categories");
        Ok(count)
    }

    pub fn upsert_managers(&self, managers: &[UpstreamManager]) -> Result<usize> {
        if managers.is_empty() {
            return Ok(0);
        }

        let count = self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO managers (id, name, email, status, synced_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    status = excluded.status,
                    synced_at = excluded.synced_at",
            )?;
            for m in managers {
                let name = m
                    .name
                    .as_deref()
                    .or(m.full_name.as_deref())
                    .unwrap_or("Unknown");
                stmt.execute(params![
                    m.id,
                    name,
                    m.email,
                    m.status.as_deref().unwrap_or("active"),
                ])?;
            }
            Ok(managers.len())
        })?;

        info!(count, "upserted managers");
        Ok(count)
    }

    pub fn upsert_offers(&self, offers: &[UpstreamOffer]) -> Result<usize> {
        if offers.is_empty() {
            return Ok(0);
        }

        let count = self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO offers (id, product_id, sku, synced_at)
                 VALUES (?1, ?2, ?3, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    product_id = excluded.product_id,
                    sku = excluded.sku,
                    synced_at = excluded.synced_at",
            )?;
            for offer in offers {
                stmt.execute(params![offer.id, offer.product_id, offer.sku])?;
            }
            Ok(offers.len())
        })?;

        info!(count, "upserted offers");
        Ok(count)
    }

    pub fn upsert_expense_types(&self, expense_types: &[UpstreamExpenseType]) -> Result<usize> {
        if expense_types.is_empty() {
            return Ok(0);
        }

        self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO expense_types (id, name, alias, is_active, synced_at)
                 VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    alias = excluded.alias,
                    is_active = excluded.is_active,
                    synced_at = excluded.synced_at",
            )?;
            for et in expense_types {
                stmt.execute(params![
                    et.id,
                    et.name.as_deref().unwrap_or("Unknown"),
                    et.alias,
                    et.is_active.unwrap_or(true),
                ])?;
            }
            Ok(expense_types.len())
        })
    }

    pub fn upsert_expenses(&self, order_id: i64, expenses: &[UpstreamExpense]) -> Result<usize> {
        if expenses.is_empty() {
            return Ok(0);
        }

        self.with_tx(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO expenses
                    (id, order_id, expense_type_id, amount, description, status,
                     payment_date, created_at, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    order_id = excluded.order_id,
                    expense_type_id = excluded.expense_type_id,
                    amount = excluded.amount,
                    description = excluded.description,
                    status = excluded.status,
                    payment_date = excluded.payment_date,
                    created_at = excluded.created_at,
                    synced_at = excluded.synced_at",
            )?;
            for exp in expenses {
                stmt.execute(params![
                    exp.id,
                    order_id,
                    exp.expense_type_id,
                    exp.amount.unwrap_or(0.0),
                    exp.description,
                    exp.status,
                    exp.payment_date.map(fmt_ts),
                    exp.created_at.map(fmt_ts),
                ])?;
            }
            Ok(expenses.len())
        })
    }

    /// Upsert offer stocks and record movement events for every detected
    /// quantity/reserve delta, in one transaction.
    pub fn upsert_stocks(&self, stocks: &[UpstreamStock]) -> Result<StocksUpsertOutcome> {
        if stocks.is_empty() {
            return Ok(StocksUpsertOutcome::default());
        }

        let outcome = self.with_tx(|conn| {
            // Current state for delta detection.
            let mut current: HashMap<i64, (i64, i64)> = HashMap::new();
            {
                let mut stmt =
                    conn.prepare_cached("SELECT id, quantity, reserve FROM offer_stocks")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, (row.get(1)?, row.get(2)?)))
                })?;
                for row in rows {
                    let (id, qr) = row?;
                    current.insert(id, qr);
                }
            }

            // offer_id → product_id for denormalized movement rows.
            let mut product_map: HashMap<i64, Option<i64>> = HashMap::new();
            {
                let mut stmt = conn.prepare_cached("SELECT id, product_id FROM offers")?;
                let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get(1)?)))?;
                for row in rows {
                    let (id, pid) = row?;
                    product_map.insert(id, pid);
                }
            }

            let mut upsert = conn.prepare_cached(
                "INSERT INTO offer_stocks
                    (id, sku, price, purchased_price, quantity, reserve, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%Y-%m-%d %H:%M:%S', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    sku = excluded.sku,
                    price = excluded.price,
                    purchased_price = excluded.purchased_price,
                    quantity = excluded.quantity,
                    reserve = excluded.reserve,
                    synced_at = excluded.synced_at",
            )?;
            let mut insert_movement = conn.prepare_cached(
                "INSERT INTO stock_movements
                    (offer_id, product_id, movement_type,
                     quantity_before, quantity_after, delta,
                     reserve_before, reserve_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            let mut outcome = StocksUpsertOutcome::default();
            for stock in stocks {
                let Some(offer_id) = stock.offer() else {
                    debug!("dropping stock row without offer id");
                    continue;
                };
                let new_qty = stock.quantity.unwrap_or(0);
                let new_rsv = stock.reserve.unwrap_or(0);
                if new_qty < 0 || new_rsv < 0 {
                    warn!(offer_id, new_qty, new_rsv, "dropping stock row with negative state");
                    continue;
                }

                let pid = product_map.get(&offer_id).copied().flatten();
                match current.get(&offer_id) {
                    None => {
                        if new_qty > 0 || new_rsv > 0 {
                            insert_movement.execute(params![
                                offer_id,
                                pid,
                                StockMovementType::Initial.as_str(),
                                0,
                                new_qty,
                                new_qty,
                                0,
                                new_rsv,
                            ])?;
                            outcome.movements += 1;
                        }
                    }
                    Some(&(old_qty, old_rsv)) if old_qty != new_qty || old_rsv != new_rsv => {
                        let delta = new_qty - old_qty;
                        let mtype = if delta < 0 {
                            StockMovementType::StockOut
                        } else if delta > 0 {
                            StockMovementType::StockIn
                        } else {
                            StockMovementType::ReserveChange
                        };
                        insert_movement.execute(params![
                            offer_id,
                            pid,
                            mtype.as_str(),
                            old_qty,
                            new_qty,
                            delta,
                            old_rsv,
                            new_rsv,
                        ])?;
                        outcome.movements += 1;
                    }
                    _ => {}
                }

                upsert.execute(params![
                    offer_id,
                    stock.sku,
                    stock.price.unwrap_or(0.0),
                    stock.purchased_price,
                    new_qty,
                    new_rsv,
                ])?;
                outcome.upserted += 1;
            }

            Ok(outcome)
        })?;

        info!(
            upserted = outcome.upserted,
            movements = outcome.movements,
            "upserted offer stocks"
        );
        Ok(outcome)
    }

    /// Recompute per-manager first/last order dates and order counts.
    pub fn update_manager_stats(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE managers SET
                    first_order_date = stats.first_order,
                    last_order_date = stats.last_order,
                    order_count = stats.order_count
                 FROM (
                    SELECT
                        manager_id,
                        MIN(kyiv_date(ordered_at)) AS first_order,
                        MAX(kyiv_date(ordered_at)) AS last_order,
                        COUNT(*) AS order_count
                    FROM orders
                    WHERE manager_id IS NOT NULL
                    GROUP BY manager_id
                 ) AS stats
                 WHERE managers.id = stats.manager_id",
                [],
            )?;
            Ok(updated)
        })
    }
}

struct ValidOrder {
    ordered_at: DateTime<Utc>,
    source_id: i64,
}

/// Enforce Bronze invariants; a `None` drops the row but keeps the batch.
fn validate_order(order: &UpstreamOrder) -> Option<ValidOrder> {
    let Some(ordered_at) = order.ordered_at else {
        warn!(order_id = order.id, "dropping order without ordered_at");
        return None;
    };
    let Some(source_id) = order.source_id else {
        warn!(order_id = order.id, "dropping order without source_id");
        return None;
    };
    if order.status_id.is_none() {
        warn!(order_id = order.id, "dropping order without status_id");
        return None;
    }
    if order.grand_total.unwrap_or(0.0) < 0.0 {
        warn!(
            order_id = order.id,
            grand_total = order.grand_total,
            "dropping order with negative grand_total"
        );
        return None;
    }
    if order.version().is_none() {
        warn!(order_id = order.id, "dropping order without any version timestamp");
        return None;
    }
    Some(ValidOrder {
        ordered_at,
        source_id,
    })
}

/// Returns true when the row was inserted or the version guard allowed the
/// update; false means an older re-delivery was ignored.
fn upsert_order_row(conn: &Connection, order: &UpstreamOrder, valid: &ValidOrder) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO orders
            (id, source_id, status_id, grand_total, ordered_at, created_at,
             updated_at, buyer_id, manager_id, manager_comment, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                 strftime('%Y-%m-%d %H:%M:%S', 'now'))
         ON CONFLICT(id) DO UPDATE SET
            source_id = excluded.source_id,
            status_id = excluded.status_id,
            grand_total = excluded.grand_total,
            ordered_at = excluded.ordered_at,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            buyer_id = excluded.buyer_id,
            manager_id = excluded.manager_id,
            manager_comment = excluded.manager_comment,
            synced_at = excluded.synced_at
         WHERE orders.updated_at IS NULL
            OR excluded.updated_at IS NULL
            OR excluded.updated_at >= orders.updated_at",
    )?;

    let changed = stmt.execute(params![
        order.id,
        valid.source_id,
        order.status_id.unwrap_or(0),
        order.grand_total.unwrap_or(0.0),
        fmt_ts(valid.ordered_at),
        order.created_at.map(fmt_ts),
        order.updated_at.map(fmt_ts),
        order.buyer(),
        order.manager(),
        order.manager_comment,
    ])?;

    Ok(changed > 0)
}

/// Line items are not individually versioned upstream: delete-then-insert
/// inside the same transaction as the order row.
fn replace_order_products(conn: &Connection, order: &UpstreamOrder) -> Result<()> {
    conn.execute(
        "DELETE FROM order_products WHERE order_id = ?1",
        params![order.id],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO order_products (id, order_id, product_id, name, quantity, price_sold)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for (i, prod) in order.products.iter().enumerate() {
        let quantity = prod.quantity.unwrap_or(1.0).round() as i64;
        if quantity < 1 {
            warn!(
                order_id = order.id,
                line = i,
                "dropping line item with quantity < 1"
            );
            continue;
        }
        stmt.execute(params![
            // Synthetic line-item id: stable per (order, position).
            order.id * 10_000 + i as i64,
            order.id,
            prod.product_id.or(prod.id),
            prod.name.as_deref().unwrap_or("Unknown"),
            quantity,
            prod.price.unwrap_or(0.0),
        ])?;
    }

    Ok(())
}
