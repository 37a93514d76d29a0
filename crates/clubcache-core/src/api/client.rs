//! HTTP client for table reads.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::FutureExt;
use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::ApiError;
use crate::binding::Fetcher;
use crate::cache::CacheKey;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path prefix of the table endpoints.
const REST_PATH: &str = "rest/v1";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// A read against one table: selected columns, equality filters, ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    table: String,
    select: String,
    filters: Vec<(String, String)>,
    order: Option<String>,
}

impl TableQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// PostgREST order clause, e.g. `"date.desc"`.
    pub fn order(mut self, clause: impl Into<String>) -> Self {
        self.order = Some(clause.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Key for caching this query: the table followed by every parameter
    /// that changes the rows returned, e.g. `teams_club_id=abc` for `teams`
    /// filtered on `club_id = abc`. The default `select=*` is left out.
    pub fn cache_key(&self) -> CacheKey {
        let mut key = CacheKey::new(&self.table);
        if self.select != "*" {
            key = key.with(format!("select={}", self.select));
        }
        for (column, value) in &self.filters {
            key = key.with(format!("{}={}", column, value));
        }
        if let Some(ref order) = self.order {
            key = key.with(format!("order={}", order));
        }
        key
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.select.clone())];
        for (column, value) in &self.filters {
            pairs.push((column.clone(), format!("eq.{}", value)));
        }
        if let Some(ref order) = self.order {
            pairs.push(("order".to_string(), order.clone()));
        }
        pairs
    }
}

/// Client for the remote data service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Build a client from config values, failing when the URL is unset.
    pub fn from_config(api_url: Option<&str>, api_key: Option<&str>) -> Result<Self> {
        let url = api_url.ok_or(ApiError::NotConfigured("api_url"))?;
        let mut client = Self::new(url)?;
        if let Some(key) = api_key {
            client.set_api_key(key.to_string());
        }
        Ok(client)
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    fn request(&self, query: &TableQuery) -> RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, REST_PATH, query.table);
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .query(&query.query_pairs());
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }
        request
    }

    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            // Rate limited - signal to retry
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Run `query` and decode the rows.
    pub async fn get<T: DeserializeOwned>(&self, query: &TableQuery) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            debug!(table = %query.table, "Sending table read");
            let response = self
                .request(query)
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send GET request for {}", query.table))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response for {}", query.table));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(table = %query.table, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// Cache fetcher that runs `query` each time it is invoked.
    pub fn fetcher<T>(&self, query: TableQuery) -> Fetcher<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.clone();
        std::sync::Arc::new(move || {
            let client = client.clone();
            let query = query.clone();
            async move { client.get::<T>(&query).await }.boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_from_filters() {
        let query = TableQuery::new("teams").eq("club_id", "abc");
        assert_eq!(query.cache_key().as_str(), "teams_club_id=abc");

        let query = TableQuery::new("evaluations")
            .select("id,score")
            .eq("club_id", "abc")
            .eq("season", "2024")
            .order("score.desc");
        assert_eq!(
            query.cache_key().as_str(),
            "evaluations_select=id,score_club_id=abc_season=2024_order=score.desc"
        );
    }

    #[test]
    fn test_different_queries_get_different_keys() {
        let queries = [
            TableQuery::new("teams").eq("club_id", "abc"),
            TableQuery::new("teams").eq("coach_id", "abc"),
            TableQuery::new("teams").select("id").eq("club_id", "abc"),
            TableQuery::new("teams").eq("club_id", "abc").order("name.asc"),
            TableQuery::new("players").eq("club_id", "abc"),
        ];

        for (i, a) in queries.iter().enumerate() {
            for b in &queries[i + 1..] {
                assert_ne!(a.query_pairs(), b.query_pairs());
                assert_ne!(a.cache_key(), b.cache_key(), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_request_url_and_headers() {
        let mut client = RestClient::new("https://db.example.com/").unwrap();
        client.set_api_key("anon-key".to_string());
        let query = TableQuery::new("events")
            .select("id,title")
            .eq("club_id", "c 1")
            .order("date.desc");

        let request = client.request(&query).build().unwrap();
        assert_eq!(request.url().path(), "/rest/v1/events");
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "id,title".to_string()),
                ("club_id".to_string(), "eq.c 1".to_string()),
                ("order".to_string(), "date.desc".to_string()),
            ]
        );
        assert_eq!(request.headers()["apikey"], "anon-key");
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer anon-key");
    }

    #[test]
    fn test_from_config_requires_url() {
        assert!(RestClient::from_config(None, Some("k")).is_err());
        assert!(RestClient::from_config(Some("http://localhost:54321"), None).is_ok());
    }
}
