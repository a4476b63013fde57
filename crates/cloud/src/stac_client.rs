//! Async STAC client for searching spatio-temporal asset catalogs.
//!
//! Supports Planetary Computer and Earth Search out of the box, plus
//! arbitrary STAC API endpoints via [`StacCatalog::Custom`]. Planetary
//! Computer assets are signed with per-collection SAS tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CloudError, Result};
use crate::http::HttpClient;
use crate::stac_models::{StacItem, StacItemCollection, StacLink, StacSearchParams};

pub const PLANETARY_COMPUTER_SAS: &str = "https://planetarycomputer.microsoft.com/api/sas/v1";

/// Azure Blob Storage host suffix; only these hrefs take a SAS token.
const AZURE_BLOB_SUFFIX: &str = ".blob.core.windows.net";

// ---------------------------------------------------------------------------
// Catalog enum
// ---------------------------------------------------------------------------

/// Well-known STAC catalogs plus custom endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StacCatalog {
    /// Microsoft Planetary Computer STAC API.
    PlanetaryComputer,
    /// AWS Earth Search (Element 84).
    EarthSearch,
    /// Any STAC API root URL, e.g. `"https://my-stac.example.com/api/v1"`.
    Custom(String),
}

impl StacCatalog {
    /// The `/search` URL for this catalog.
    pub fn search_url(&self) -> String {
        match self {
            Self::PlanetaryComputer => {
                "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
            }
            Self::EarthSearch => "https://earth-search.aws.element84.com/v1/search".to_string(),
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{base}/search")
                }
            }
        }
    }

    /// Parse `"pc"`, `"planetary-computer"`, `"es"`, `"earth-search"`, or
    /// treat the string as a custom URL.
    pub fn from_str_or_url(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pc" | "planetary-computer" | "planetarycomputer" => Self::PlanetaryComputer,
            "es" | "earth-search" | "earthsearch" => Self::EarthSearch,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Whether asset hrefs need SAS token signing.
    pub fn needs_signing(&self) -> bool {
        matches!(self, Self::PlanetaryComputer)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`StacClient`].
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    /// Per-request timeout (default 30 s).
    pub request_timeout: Duration,
    /// Maximum retries on transient failures (default 3).
    pub max_retries: u32,
    /// First retry delay, doubled on each attempt (default 500 ms).
    pub retry_base: Duration,
    /// Maximum total items fetched across pages (default 1000).
    pub max_items: usize,
    /// Items requested per page (default 100).
    pub page_size: u32,
    /// SAS token service root (default: Planetary Computer).
    pub sas_endpoint: String,
    /// Sign asset hrefs even when the catalog is not Planetary Computer.
    pub force_signing: bool,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base: Duration::from_millis(500),
            max_items: 1000,
            page_size: 100,
            sas_endpoint: PLANETARY_COMPUTER_SAS.to_string(),
            force_signing: false,
        }
    }
}

/// Token returned by `{sas_endpoint}/token/{collection}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SasToken {
    pub token: String,
    #[serde(rename = "msft:expiry")]
    pub expiry: Option<DateTime<Utc>>,
}

impl SasToken {
    /// Expired, or expiring within a minute.
    pub fn is_expired(&self) -> bool {
        self.expiry
            .is_some_and(|exp| exp <= Utc::now() + chrono::Duration::seconds(60))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Async client for STAC Item Search.
pub struct StacClient {
    catalog: StacCatalog,
    http: HttpClient,
    options: StacClientOptions,
    tokens: Mutex<HashMap<String, SasToken>>,
}

impl StacClient {
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        let http = HttpClient::new(options.request_timeout, options.max_retries)?
            .retry_base(options.retry_base);
        Ok(Self {
            catalog,
            http,
            options,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    /// The underlying HTTP client, for reading assets with the same pool.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Execute a single search request and return one page of results.
    pub async fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection> {
        self.post_search(&self.catalog.search_url(), params).await
    }

    /// Search following `next` links, collecting up to `max_items` items.
    pub async fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let mut params = params.clone();
        if params.limit.is_none() {
            params.limit = Some(self.options.page_size);
        }

        let max = self.options.max_items;
        let mut items: Vec<StacItem> = Vec::new();
        let mut page = self.search(&params).await?;
        let mut pages = 1;

        loop {
            let next = page.next_link().cloned();
            items.append(&mut page.features);
            if items.len() >= max {
                warn!("search hit the {max} item limit, later pages were not fetched");
                break;
            }
            let Some(link) = next else { break };
            page = self.follow_next(&link, &params).await?;
            pages += 1;
            if page.is_empty() {
                break;
            }
        }

        items.truncate(max);
        debug!("search returned {} items over {pages} pages", items.len());
        Ok(items)
    }

    /// Append a SAS token to an asset href.
    ///
    /// Tokens are fetched once per collection and reused until they expire.
    /// Hrefs outside Azure Blob Storage, or already carrying a signature,
    /// are returned unchanged, as is everything for non-signing catalogs.
    pub async fn sign_asset_href(&self, href: &str, collection: &str) -> Result<String> {
        if !(self.catalog.needs_signing() || self.options.force_signing) || !is_signable(href) {
            return Ok(href.to_string());
        }

        let token = self.sas_token(collection).await?;
        let sep = if href.contains('?') { '&' } else { '?' };
        Ok(format!("{href}{sep}{}", token.token))
    }

    /// Cached or freshly fetched token for `collection`.
    pub async fn sas_token(&self, collection: &str) -> Result<SasToken> {
        if let Some(tok) = self.cached_token(collection) {
            return Ok(tok);
        }

        let url = format!(
            "{}/token/{collection}",
            self.options.sas_endpoint.trim_end_matches('/')
        );
        let resp = self.http.send(self.http.inner().get(&url)).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CloudError::Auth(format!(
                "SAS token request for {collection} returned HTTP {status}: {}",
                truncate(&body, 300)
            )));
        }
        let token: SasToken = resp
            .json()
            .await
            .map_err(|e| CloudError::Auth(format!("parsing SAS token response: {e}")))?;

        debug!("fetched SAS token for {collection}, expiry {:?}", token.expiry);
        if let Ok(mut cache) = self.tokens.lock() {
            cache.insert(collection.to_string(), token.clone());
        }
        Ok(token)
    }

    fn cached_token(&self, collection: &str) -> Option<SasToken> {
        let cache = self.tokens.lock().ok()?;
        cache.get(collection).filter(|t| !t.is_expired()).cloned()
    }

    // ── Private helpers ─────────────────────────────────────────────

    async fn post_search(&self, url: &str, params: &StacSearchParams) -> Result<StacItemCollection> {
        debug!("POST {url} {}", serde_json::to_string(params).unwrap_or_default());
        let resp = self.http.send(self.http.inner().post(url).json(params)).await?;
        parse_page(resp, "STAC search").await
    }

    /// Follow a pagination link. Handles both POST (body/merge) and GET links.
    async fn follow_next(
        &self,
        link: &StacLink,
        original: &StacSearchParams,
    ) -> Result<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();
        if method != "POST" {
            let resp = self.http.send(self.http.inner().get(&link.href)).await?;
            return parse_page(resp, "STAC pagination").await;
        }

        let original = serde_json::to_value(original)
            .map_err(|e| CloudError::Network(format!("serializing params: {e}")))?;
        let body = match (&link.body, link.merge.unwrap_or(false)) {
            (Some(body), true) => {
                let mut merged = original;
                if let (Some(base), Some(extra)) = (merged.as_object_mut(), body.as_object()) {
                    base.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                merged
            }
            (Some(body), false) => body.clone(),
            (None, _) => original,
        };

        let params: StacSearchParams = serde_json::from_value(body)
            .map_err(|e| CloudError::Network(format!("parsing pagination body: {e}")))?;
        self.post_search(&link.href, &params).await
    }
}

async fn parse_page(resp: reqwest::Response, what: &str) -> Result<StacItemCollection> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| CloudError::Network(format!("reading {what} body: {e}")))?;
    if !status.is_success() {
        return Err(CloudError::Network(format!(
            "{what} returned HTTP {status}: {}",
            truncate(&body, 500)
        )));
    }
    serde_json::from_str(&body).map_err(|e| CloudError::Network(format!("parsing {what} response: {e}")))
}

fn is_signable(href: &str) -> bool {
    let host = href
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?']).next())
        .unwrap_or_default();
    host.ends_with(AZURE_BLOB_SUFFIX) && !href.contains("sig=")
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_search_urls() {
        assert_eq!(
            StacCatalog::PlanetaryComputer.search_url(),
            "https://planetarycomputer.microsoft.com/api/stac/v1/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://example.com/stac/".into()).search_url(),
            "https://example.com/stac/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://example.com/stac/search".into()).search_url(),
            "https://example.com/stac/search"
        );
    }

    #[test]
    fn catalog_from_str_or_url() {
        assert_eq!(StacCatalog::from_str_or_url("PC"), StacCatalog::PlanetaryComputer);
        assert_eq!(StacCatalog::from_str_or_url("earth-search"), StacCatalog::EarthSearch);
        assert_eq!(
            StacCatalog::from_str_or_url("http://localhost:8080/STAC"),
            StacCatalog::Custom("http://localhost:8080/STAC".into())
        );
    }

    #[test]
    fn only_planetary_computer_signs() {
        assert!(StacCatalog::PlanetaryComputer.needs_signing());
        assert!(!StacCatalog::EarthSearch.needs_signing());
    }

    #[test]
    fn signable_hrefs() {
        assert!(is_signable(
            "https://io-lulc.blob.core.windows.net/io-lulc-annual-v02/2023/53L_20230101-20240101.tif"
        ));
        assert!(!is_signable("https://example.com/a.tif"));
        assert!(!is_signable("https://x.blob.core.windows.net/a.tif?st=1&sig=abc"));
        assert!(!is_signable("https://evil.com/x.blob.core.windows.net/a.tif"));
    }

    #[test]
    fn token_expiry() {
        let fresh = SasToken {
            token: "sig=a".into(),
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        let stale = SasToken {
            token: "sig=b".into(),
            expiry: Some(Utc::now() - chrono::Duration::minutes(1)),
        };
        assert!(!fresh.is_expired());
        assert!(stale.is_expired());
        assert!(!SasToken { token: String::new(), expiry: None }.is_expired());
    }
}
