//! Domain types shared across the engine.
//!
//! Classification results (sales type, traffic attribution, SKU status) are
//! closed sum types internally and stringify only at the API boundary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ─── Upstream feed records ───────────────────────────────────────────────────

/// One page of the upstream order feed.
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersPage {
    #[serde(default)]
    pub data: Vec<UpstreamOrder>,
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamRef {
    pub id: i64,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamOrder {
    pub id: i64,
    #[serde(default)]
    pub source_id: Option<i64>,
    #[serde(default)]
    pub status_id: Option<i64>,
    #[serde(default)]
    pub grand_total: Option<f64>,
    #[serde(default)]
    pub ordered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub buyer_id: Option<i64>,
    #[serde(default)]
    pub buyer: Option<UpstreamRef>,
    #[serde(default)]
    pub manager_id: Option<i64>,
    #[serde(default)]
    pub manager: Option<UpstreamRef>,
    #[serde(default)]
    pub manager_comment: Option<String>,
    #[serde(default)]
    pub products: Vec<UpstreamOrderProduct>,
}

impl UpstreamOrder {
    /// Upstream sends either a flat id or a nested object depending on `include`.
    pub fn buyer(&self) -> Option<i64> {
        self.buyer_id.or_else(|| self.buyer.as_ref().map(|b| b.id))
    }

    pub fn manager(&self) -> Option<i64> {
        self.manager_id
            .or_else(|| self.manager.as_ref().map(|m| m.id))
    }

    /// Version timestamp used by the idempotent upsert guard.
    pub fn version(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamOrderProduct {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamProduct {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub custom_fields: Vec<Value>,
}

impl UpstreamProduct {
    /// Brand lives in a custom-fields list keyed by uuid or display name.
    pub fn brand(&self) -> Option<String> {
        for field in &self.custom_fields {
            let uuid = field.get("uuid").and_then(|v| v.as_str());
            let name = field.get("name").and_then(|v| v.as_str());
            if uuid == Some(crate::config::BRAND_FIELD_UUID)
                || name == Some(crate::config::BRAND_FIELD_NAME)
            {
                return field
                    .get("value")
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
            }
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamCategory {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamManager {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamOffer {
    pub id: i64,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamStock {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub offer_id: Option<i64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub purchased_price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub reserve: Option<i64>,
}

impl UpstreamStock {
    pub fn offer(&self) -> Option<i64> {
        self.offer_id.or(self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamExpenseType {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamExpense {
    pub id: i64,
    #[serde(default)]
    pub expense_type_id: Option<i64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// ─── Sales type ──────────────────────────────────────────────────────────────

/// Derived classification of an order by manager assignment and source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SalesType {
    Retail,
    B2b,
    Other,
}

impl SalesType {
    pub fn classify(manager_id: Option<i64>, source_id: i64) -> Self {
        match manager_id {
            Some(id) if id == crate::config::B2B_MANAGER_ID => SalesType::B2b,
            Some(id) if crate::config::RETAIL_MANAGER_IDS.contains(&id) => SalesType::Retail,
            None if source_id == 4 => SalesType::Retail, // unassigned Shopify orders
            _ => SalesType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SalesType::Retail => "retail",
            SalesType::B2b => "b2b",
            SalesType::Other => "other",
        }
    }
}

impl fmt::Display for SalesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query-time sales-type filter. `All` has no stored counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SalesFilter {
    #[default]
    Retail,
    B2b,
    All,
}

impl SalesFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesFilter::Retail => "retail",
            SalesFilter::B2b => "b2b",
            SalesFilter::All => "all",
        }
    }

    /// The silver `sales_type` value this filter matches, if any.
    pub fn stored_value(&self) -> Option<&'static str> {
        match self {
            SalesFilter::Retail => Some("retail"),
            SalesFilter::B2b => Some("b2b"),
            SalesFilter::All => None,
        }
    }
}

impl FromStr for SalesFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retail" => Ok(SalesFilter::Retail),
            "b2b" => Ok(SalesFilter::B2b),
            "all" => Ok(SalesFilter::All),
            other => Err(format!("unknown sales_type '{other}'")),
        }
    }
}

// ─── Traffic attribution ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficType {
    PaidConfirmed,
    PaidLikely,
    Organic,
    PixelOnly,
    Unknown,
}

impl TrafficType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficType::PaidConfirmed => "paid_confirmed",
            TrafficType::PaidLikely => "paid_likely",
            TrafficType::Organic => "organic",
            TrafficType::PixelOnly => "pixel_only",
            TrafficType::Unknown => "unknown",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, TrafficType::PaidConfirmed | TrafficType::PaidLikely)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Facebook,
    Tiktok,
    Google,
    Instagram,
    Email,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Tiktok => "tiktok",
            Platform::Google => "google",
            Platform::Instagram => "instagram",
            Platform::Email => "email",
            Platform::Other => "other",
        }
    }
}

// ─── Inventory ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkuStatus {
    Active,
    Moderate,
    Slow,
    Dead,
}

impl SkuStatus {
    pub fn from_days_since_sale(days: i64) -> Self {
        if days > 180 {
            SkuStatus::Dead
        } else if days > 90 {
            SkuStatus::Slow
        } else if days > 30 {
            SkuStatus::Moderate
        } else {
            SkuStatus::Active
        }
    }

    pub fn priority(&self) -> i64 {
        match self {
            SkuStatus::Active => 1,
            SkuStatus::Moderate => 2,
            SkuStatus::Slow => 3,
            SkuStatus::Dead => 4,
        }
    }

    /// Share of stock value at risk for the recommended-actions view.
    pub fn loss_factor(&self) -> f64 {
        match self {
            SkuStatus::Dead => 0.3,
            SkuStatus::Slow => 0.15,
            _ => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkuStatus::Active => "active",
            SkuStatus::Moderate => "moderate",
            SkuStatus::Slow => "slow",
            SkuStatus::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockMovementType {
    Initial,
    StockIn,
    StockOut,
    ReserveChange,
}

impl StockMovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockMovementType::Initial => "initial",
            StockMovementType::StockIn => "stock_in",
            StockMovementType::StockOut => "stock_out",
            StockMovementType::ReserveChange => "reserve_change",
        }
    }
}

// ─── Events & sync status ────────────────────────────────────────────────────

/// Events pushed to dashboard WebSocket clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEvent {
    Connected,
    Pong,
    OrdersSynced,
    InventoryUpdated,
    ExpensesUpdated,
    GoalProgress,
    MilestoneReached,
    SyncStatus,
}

impl WsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsEvent::Connected => "connected",
            WsEvent::Pong => "pong",
            WsEvent::OrdersSynced => "orders_synced",
            WsEvent::InventoryUpdated => "inventory_updated",
            WsEvent::ExpensesUpdated => "expenses_updated",
            WsEvent::GoalProgress => "goal_progress",
            WsEvent::MilestoneReached => "milestone_reached",
            WsEvent::SyncStatus => "sync_status",
        }
    }
}

/// Snapshot of the sync engine state for /api/health.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SyncStats {
    pub last_sync_time: Option<String>,
    pub seconds_since_sync: Option<i64>,
    pub consecutive_empty_syncs: u32,
    pub current_backoff_seconds: u64,
    pub is_off_hours: bool,
    pub cycles_run: u64,
    pub last_cycle_upserted: u64,
}

/// A daily revenue observation, the forecaster's input series.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub revenue: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sales_type_classification() {
        assert_eq!(SalesType::classify(Some(15), 1), SalesType::B2b);
        assert_eq!(SalesType::classify(Some(4), 1), SalesType::Retail);
        assert_eq!(SalesType::classify(Some(22), 2), SalesType::Retail);
        // Shopify orders with no assigned manager are retail.
        assert_eq!(SalesType::classify(None, 4), SalesType::Retail);
        // Unknown manager on a non-Shopify source is neither retail nor b2b.
        assert_eq!(SalesType::classify(Some(100), 1), SalesType::Other);
        assert_eq!(SalesType::classify(None, 1), SalesType::Other);
    }

    #[test]
    fn sku_status_thresholds() {
        assert_eq!(SkuStatus::from_days_since_sale(0), SkuStatus::Active);
        assert_eq!(SkuStatus::from_days_since_sale(30), SkuStatus::Active);
        assert_eq!(SkuStatus::from_days_since_sale(31), SkuStatus::Moderate);
        assert_eq!(SkuStatus::from_days_since_sale(90), SkuStatus::Moderate);
        assert_eq!(SkuStatus::from_days_since_sale(91), SkuStatus::Slow);
        assert_eq!(SkuStatus::from_days_since_sale(180), SkuStatus::Slow);
        assert_eq!(SkuStatus::from_days_since_sale(181), SkuStatus::Dead);
        assert_eq!(SkuStatus::from_days_since_sale(999), SkuStatus::Dead);
    }

    #[test]
    fn brand_extracted_from_custom_fields() {
        let product: UpstreamProduct = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "Cream",
            "custom_fields": [
                {"uuid": "CT_9999", "name": "Color", "value": "red"},
                {"uuid": "CT_1002", "name": "Бренд", "value": "Acme"}
            ]
        }))
        .unwrap();
        assert_eq!(product.brand().as_deref(), Some("Acme"));

        let no_brand: UpstreamProduct = serde_json::from_value(serde_json::json!({
            "id": 8,
            "custom_fields": [{"uuid": "CT_9999", "value": "x"}]
        }))
        .unwrap();
        assert_eq!(no_brand.brand(), None);
    }

    #[test]
    fn order_version_falls_back_to_created_at() {
        let order: UpstreamOrder = serde_json::from_value(serde_json::json!({
            "id": 1,
            "created_at": "2024-06-01T10:00:00Z"
        }))
        .unwrap();
        assert!(order.updated_at.is_none());
        assert!(order.version().is_some());
    }
}
