//! HTTP client wrapper with Range request support and retry logic.

use std::time::Duration;

use futures::stream::{FuturesOrdered, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{CloudError, Result};

/// Delay before retry `attempt` (1-based): base, 2*base, 4*base, ...
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// HTTP client for fetching byte ranges from remote files.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_base: Duration,
}

/// Response from a HEAD request.
#[derive(Debug, Clone, Copy)]
pub struct HeadInfo {
    /// Total file size in bytes, if reported by the server.
    pub content_length: Option<u64>,
    /// Whether the server advertises Range support.
    pub accept_ranges: bool,
}

impl HttpClient {
    /// Create a client with its own connection pool.
    pub fn new(request_timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, max_retries))
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client, max_retries: u32) -> Self {
        Self {
            client,
            max_retries,
            retry_base: Duration::from_millis(200),
        }
    }

    /// Override the first retry delay.
    pub fn retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Send a HEAD request to discover file size and Range support.
    pub async fn head(&self, url: &str) -> Result<HeadInfo> {
        let resp = self.send(self.client.head(url)).await?;
        if !resp.status().is_success() {
            return Err(CloudError::Network(format!("HTTP {} for HEAD {url}", resp.status())));
        }

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        Ok(HeadInfo {
            content_length: header("content-length")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&n| n > 0),
            accept_ranges: header("accept-ranges").is_some_and(|v| v.contains("bytes")),
        })
    }

    /// Fetch `[offset, offset + length)` from a remote file.
    ///
    /// The result is shorter than `length` when the range runs past the end
    /// of the file. Servers that ignore `Range` and answer 200 with the whole
    /// body are tolerated by slicing the body.
    pub async fn fetch_range(&self, url: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let resp = self.send(self.client.get(url).header("Range", &range)).await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => Ok(resp.bytes().await?.to_vec()),
            StatusCode::OK => {
                debug!("server ignored Range for {url}, slicing full body");
                let body = resp.bytes().await?;
                let start = (offset as usize).min(body.len());
                let end = (offset.saturating_add(length) as usize).min(body.len());
                Ok(body[start..end].to_vec())
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Err(CloudError::RangeNotSupported {
                url: url.to_string(),
            }),
            status => Err(CloudError::Network(format!("HTTP {status} fetching {url}"))),
        }
    }

    /// Fetch several `(offset, length)` ranges concurrently, in order.
    pub async fn fetch_ranges(&self, url: &str, ranges: &[(u64, u64)]) -> Result<Vec<Vec<u8>>> {
        let mut futs: FuturesOrdered<_> = ranges
            .iter()
            .map(|&(offset, length)| self.fetch_range(url, offset, length))
            .collect();

        let mut results = Vec::with_capacity(ranges.len());
        while let Some(res) = futs.next().await {
            results.push(res?);
        }
        Ok(results)
    }

    /// Send a request, retrying transport failures and 5xx/429 responses
    /// with exponential backoff. Other statuses are returned to the caller.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let Some(req) = request.try_clone() else {
                return Ok(request.send().await?);
            };

            let outcome = req.send().await;
            let retryable = match &outcome {
                Ok(resp) => {
                    resp.status().is_server_error() || resp.status() == StatusCode::TOO_MANY_REQUESTS
                }
                Err(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            };

            if !retryable || attempt >= self.max_retries {
                return Ok(outcome?);
            }

            attempt += 1;
            let delay = backoff_delay(self.retry_base, attempt);
            match &outcome {
                Ok(resp) => warn!("HTTP {} from {}, retry {attempt} in {delay:?}", resp.status(), resp.url()),
                Err(e) => warn!("request failed ({e}), retry {attempt} in {delay:?}"),
            }
            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) fn inner(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(5), 2)
            .unwrap()
            .retry_base(Duration::from_millis(1))
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn partial_content_is_returned_as_is() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a.tif").header("Range", "bytes=2-5");
                then.status(206).body([2u8, 3, 4, 5]);
            })
            .await;

        let bytes = client().fetch_range(&server.url("/a.tif"), 2, 4).await.unwrap();
        assert_eq!(bytes, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn full_body_is_sliced() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a.tif");
                then.status(200).body((0u8..10).collect::<Vec<_>>());
            })
            .await;

        let c = client();
        let url = server.url("/a.tif");
        assert_eq!(c.fetch_range(&url, 3, 2).await.unwrap(), vec![3, 4]);
        assert_eq!(c.fetch_range(&url, 8, 10).await.unwrap(), vec![8, 9]);
        let many = c.fetch_ranges(&url, &[(0, 1), (9, 1)]).await.unwrap();
        assert_eq!(many, vec![vec![0], vec![9]]);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/busy.tif");
                then.status(503);
            })
            .await;

        let err = client()
            .fetch_range(&server.url("/busy.tif"), 0, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Network(_)));
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/gone.tif");
                then.status(404);
            })
            .await;

        assert!(client().fetch_range(&server.url("/gone.tif"), 0, 8).await.is_err());
        mock.assert_hits_async(1).await;
    }
}
