//! Upstream CRM REST client.
//!
//! Paginated JSON feed behind a bearer token. Every call has a 30 s hard
//! timeout and an exponential retry budget of 3 attempts; 429s honor the
//! Retry-After hint.

use crate::config;
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    OrdersPage, UpstreamCategory, UpstreamExpenseType, UpstreamManager, UpstreamOffer,
    UpstreamProduct, UpstreamStock,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Generic `{data: [...]}` page wrapper used by all catalog endpoints.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Clone)]
pub struct KeyCrmClient {
    client: Client,
    base_url: String,
}

impl KeyCrmClient {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config::UPSTREAM_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", api_key)
                        .parse()
                        .context("Invalid upstream API key")?,
                );
                headers
            })
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            base_url: config::api_base(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> EngineResult<T> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_json_once(path, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < config::UPSTREAM_MAX_RETRIES => {
                    let sleep_secs = match &e {
                        EngineError::RateLimited { retry_after_secs } => *retry_after_secs,
                        _ => 2u64.pow(attempt),
                    };
                    warn!(
                        path,
                        attempt,
                        sleep_secs,
                        error = %e,
                        "upstream request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> EngineResult<T> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(format!("GET {path}"))
                } else {
                    EngineError::Upstream(format!("GET {path}: {e}"))
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(EngineError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Upstream(format!(
                "GET {path} {status}: {body}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| EngineError::Upstream(format!("GET {path}: bad body: {e}")))
    }

    /// One page of orders whose `created_between` window covers the range.
    pub async fn get_orders_page(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: u32,
    ) -> EngineResult<OrdersPage> {
        let query = vec![
            ("include".to_string(), "products,manager,buyer".to_string()),
            ("limit".to_string(), config::SYNC_PAGE_LIMIT.to_string()),
            ("page".to_string(), page.to_string()),
            (
                "filter[created_between]".to_string(),
                format!(
                    "{}, {}",
                    from.format("%Y-%m-%d %H:%M:%S"),
                    to.format("%Y-%m-%d %H:%M:%S")
                ),
            ),
        ];

        debug!(page, "fetching orders page");
        self.get_json("/order", &query).await
    }

    fn page_query(page: u32, extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut query = vec![
            ("limit".to_string(), config::SYNC_PAGE_LIMIT.to_string()),
            ("page".to_string(), page.to_string()),
        ];
        for (k, v) in extra {
            query.push((k.to_string(), v.to_string()));
        }
        query
    }

    pub async fn get_products_page(&self, page: u32) -> EngineResult<Page<UpstreamProduct>> {
        self.get_json("/products", &Self::page_query(page, &[("include", "custom_fields")]))
            .await
    }

    pub async fn get_categories_page(&self, page: u32) -> EngineResult<Page<UpstreamCategory>> {
        self.get_json("/products/categories", &Self::page_query(page, &[]))
            .await
    }

    pub async fn get_offers_page(&self, page: u32) -> EngineResult<Page<UpstreamOffer>> {
        self.get_json("/offers", &Self::page_query(page, &[]))
            .await
    }

    pub async fn get_stocks_page(&self, page: u32) -> EngineResult<Page<UpstreamStock>> {
        self.get_json("/offers/stocks", &Self::page_query(page, &[]))
            .await
    }

    pub async fn get_managers_page(&self, page: u32) -> EngineResult<Page<UpstreamManager>> {
        self.get_json("/users", &Self::page_query(page, &[]))
            .await
    }

    pub async fn get_expense_types_page(
        &self,
        page: u32,
    ) -> EngineResult<Page<UpstreamExpenseType>> {
        self.get_json("/expenses/types", &Self::page_query(page, &[]))
            .await
    }
}
