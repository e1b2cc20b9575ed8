//! REST plumbing shared by the venue clients.

use crate::error::{ExchangeError, ExchangeResult};
use reqwest::{Method, RequestBuilder, StatusCode};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

pub struct RestClient {
    exchange: &'static str,
    http: Option<reqwest::Client>,
    base_url: Url,
    throttle: Option<Throttle>,
}

/// Spaces consecutive requests by at least `interval`.
struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl RestClient {
    pub fn new(
        exchange: &'static str,
        base_url: &str,
        rate_limit: Duration,
        enable_rate_limit: bool,
    ) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("exchange-trading-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            exchange,
            http: Some(http),
            base_url: Url::parse(base_url)?,
            throttle: enable_rate_limit.then(|| Throttle {
                interval: rate_limit,
                last: Mutex::new(None),
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_base_url(&mut self, base_url: &str) -> ExchangeResult<()> {
        self.base_url = Url::parse(base_url)?;
        Ok(())
    }

    /// Absolute URL for `path` under the base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str, query: Option<&str>) -> ExchangeResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}{}", base, path))?;
        url.set_query(query.filter(|q| !q.is_empty()));
        Ok(url)
    }

    pub fn request(&self, method: Method, url: Url) -> ExchangeResult<RequestBuilder> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| ExchangeError::Other(format!("{} client is closed", self.exchange)))?;
        Ok(http.request(method, url))
    }

    /// Sends the request and returns the status with the raw body.
    ///
    /// Rate-limit and server-side statuses are mapped here; other non-success
    /// statuses are left to the venue, which knows its error body format.
    pub async fn send(&self, request: RequestBuilder) -> ExchangeResult<(StatusCode, String)> {
        if let Some(throttle) = &self.throttle {
            throttle.wait().await;
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(exchange = self.exchange, %status, "REST response received");

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited(format!(
                "{} {} {}",
                self.exchange,
                status,
                truncate(&body)
            )));
        }
        if status.is_server_error() {
            return Err(ExchangeError::Unavailable(format!(
                "{} {} {}",
                self.exchange,
                status,
                truncate(&body)
            )));
        }

        Ok((status, body))
    }

    /// Drops the connection pool; later requests fail.
    pub fn close(&mut self) {
        self.http = None;
    }

    pub fn is_closed(&self) -> bool {
        self.http.is_none()
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
