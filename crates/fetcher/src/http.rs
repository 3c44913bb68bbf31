use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use slog::{debug, warn, Logger};
use tokio::sync::Mutex;

use crate::{Result, SshError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest {
            method: Method::Get,
            url: url.into(),
            headers: vec![],
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        HttpRequest {
            method: Method::Post,
            url: url.into(),
            headers: vec![],
            json: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Error for any non-2xx status
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            let mut body = self.text();
            body.truncate(500);
            Err(SshError::HttpStatus {
                url: url.to_string(),
                status: self.status,
                body,
            })
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Everything the providers need from the network. Non-2xx statuses are
/// returned as responses; only transport failures are errors.
#[async_trait]
pub trait HttpSource: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct RateLimiter {
    capacity: usize,
    tokens: f64,
    last_refill: Instant,
    /// tokens per second
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: usize, refill_rate: f64) -> Self {
        RateLimiter {
            capacity,
            tokens: capacity as f64,
            last_refill: Instant::now(),
            refill_rate,
        }
    }

    fn refill_tokens(&mut self) {
        let now = Instant::now();
        let elapsed_time = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed_time * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Seconds until `tokens` are available, zero when they can be taken now
    fn wait_time(&self, tokens: f64) -> f64 {
        if tokens <= self.tokens || self.refill_rate <= 0.0 {
            0.0
        } else {
            (tokens - self.tokens) / self.refill_rate
        }
    }

    pub async fn acquire(&mut self, tokens: f64) -> bool {
        let mut retries = 0;

        loop {
            self.refill_tokens();

            if tokens <= self.tokens {
                self.tokens -= tokens;
                return true;
            }
            if retries >= 3 || self.refill_rate <= 0.0 {
                return false;
            }
            retries += 1;
            tokio::time::sleep(Duration::from_secs_f64(self.wait_time(tokens))).await;
        }
    }
}

pub struct HttpFetcher {
    logger: Logger,
    client: ClientWithMiddleware,
    timeout: Duration,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl HttpFetcher {
    pub fn new(
        logger: Logger,
        user_agent: &str,
        timeout: Duration,
        rate_limiter: Arc<Mutex<RateLimiter>>,
    ) -> Result<HttpFetcher> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(
            Client::builder()
                .user_agent(user_agent)
                .build()
                .map_err(|e| SshError::Transport(e.to_string()))?,
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Ok(Self {
            logger,
            client,
            timeout,
            rate_limiter,
        })
    }
}

#[async_trait]
impl HttpSource for HttpFetcher {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        {
            let mut limiter = self.rate_limiter.lock().await;
            if !limiter.acquire(1.0).await {
                return Err(SshError::Transport(
                    "rate limit exceeded after retries".to_string(),
                ));
            }
        }

        debug!(self.logger, "requesting: {:?} {}", request.method, request.url);
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SshError::Transport(format!("error sending request: {}", e)))?;
        let status = response.status().as_u16();
        if status >= 400 {
            warn!(self.logger, "{} answered {}", request.url, status);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| SshError::Transport(format!("error reading body of request: {}", e)))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_spends_capacity_then_refills() {
        let mut limiter = RateLimiter::new(2, 1000.0);
        assert!(limiter.acquire(1.0).await);
        assert!(limiter.acquire(1.0).await);
        // refills at 1000 tokens/s, the wait is about a millisecond
        assert!(limiter.acquire(1.0).await);
    }

    #[tokio::test]
    async fn limiter_without_refill_gives_up() {
        let mut limiter = RateLimiter::new(1, 0.0);
        assert!(limiter.acquire(1.0).await);
        assert!(!limiter.acquire(1.0).await);
    }

    #[test]
    fn non_success_status_is_error() {
        let response = HttpResponse::new(503, "busy");
        let err = response.error_for_status("https://example.org").unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(HttpResponse::new(204, "").error_for_status("u").is_ok());
    }
}
