//! REST command executor.
//!
//! Issues authenticated place / cancel / query calls through the venue
//! adapter, classifies failures, and owns the venue's shared resources: the
//! per-endpoint-class token buckets and the monotonic nonce.
//!
//! Nonce-bearing calls serialise through a single-slot gate held across
//! sign-and-send, so the venue receives them in issuance order even under
//! concurrent strategy requests.
//!
//! Retry policy: transient failures (network, 5xx, malformed bodies, rate
//! limits) retry with jittered exponential backoff under a per-call
//! deadline. `place` is the exception - it is never re-issued after a
//! transport failure, because the first attempt may have partially
//! transmitted; the caller marks the order `Indeterminate` instead.

use crate::error::ApiError;
use crate::ledger::AssetBalance;
use crate::order::{ClientOrderId, ExchangeOrderId, OrderIntent};
use crate::rules::TradingRule;
use crate::venue::{CancelOutcome, OrderSnapshot, QueryOutcome, SubmitOutcome, VenueAdapter};
use chrono::Utc;
use jacana_integration::backoff::ExponentialBackoff;
use jacana_integration::http::{HttpRequest, HttpResponse, HttpTransport};
use jacana_integration::ratelimit::TokenBucket;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate budget for one endpoint class.
#[derive(Debug, Copy, Clone)]
pub struct RateLimit {
    pub burst: u32,
    pub per_sec: f64,
}

/// Executor tunables.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for a single HTTP attempt.
    pub request_timeout: Duration,
    /// Total budget for a trade call (cancel retries).
    pub trade_deadline: Duration,
    /// Total budget for a query call.
    pub query_deadline: Duration,
    pub trade_rate: RateLimit,
    pub query_rate: RateLimit,
    pub rules_rate: RateLimit,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            trade_deadline: Duration::from_secs(60),
            query_deadline: Duration::from_secs(10),
            trade_rate: RateLimit {
                burst: 5,
                per_sec: 5.0,
            },
            query_rate: RateLimit {
                burst: 10,
                per_sec: 10.0,
            },
            rules_rate: RateLimit {
                burst: 2,
                per_sec: 0.5,
            },
        }
    }
}

/// Monotonic nonce: `last = max(last + 1, wall_clock_ms)`.
#[derive(Debug, Default)]
struct NonceGenerator {
    last: u64,
}

impl NonceGenerator {
    fn next(&mut self) -> u64 {
        let wall = Utc::now().timestamp_millis().max(0) as u64;
        self.last = (self.last + 1).max(wall);
        self.last
    }
}

/// Issues REST commands for one connector.
pub struct RestCommandExecutor<A> {
    adapter: Arc<A>,
    http: Arc<dyn HttpTransport>,
    trade_bucket: TokenBucket,
    query_bucket: TokenBucket,
    rules_bucket: TokenBucket,
    nonce_gate: tokio::sync::Mutex<NonceGenerator>,
    config: ExecutorConfig,
}

impl<A> fmt::Debug for RestCommandExecutor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestCommandExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A: VenueAdapter> RestCommandExecutor<A> {
    pub fn new(adapter: Arc<A>, http: Arc<dyn HttpTransport>, config: ExecutorConfig) -> Self {
        Self {
            trade_bucket: TokenBucket::new(config.trade_rate.burst, config.trade_rate.per_sec),
            query_bucket: TokenBucket::new(config.query_rate.burst, config.query_rate.per_sec),
            rules_bucket: TokenBucket::new(config.rules_rate.burst, config.rules_rate.per_sec),
            nonce_gate: tokio::sync::Mutex::new(NonceGenerator::default()),
            adapter,
            http,
            config,
        }
    }

    /// Submit an order. Single attempt: a transport failure here leaves the
    /// outcome unknown and the caller must reconcile.
    pub async fn place(&self, intent: &OrderIntent) -> Result<SubmitOutcome, ApiError> {
        self.trade_bucket.acquire().await;
        let request = self.adapter.place_request(intent);
        let response = self.send_signed(request, true).await?;
        if response.is_success() {
            self.adapter.parse_submit(&response)
        } else {
            Err(self.adapter.classify_error(&response))
        }
    }

    /// Cancel an order, retrying transient failures under the trade deadline.
    pub async fn cancel(
        &self,
        client_id: &ClientOrderId,
        exchange_id: Option<&ExchangeOrderId>,
    ) -> Result<CancelOutcome, ApiError> {
        let started = Instant::now();
        let mut backoff = ExponentialBackoff::default();
        loop {
            self.trade_bucket.acquire().await;
            let request = self.adapter.cancel_request(client_id, exchange_id);
            let outcome = match self.send_signed(request, true).await {
                Ok(response) if response.is_success() => self.adapter.parse_cancel(&response),
                Ok(response) => match self.adapter.classify_error(&response) {
                    ApiError::NotFound => Ok(CancelOutcome::NotFound),
                    ApiError::AlreadyClosed => Ok(CancelOutcome::AlreadyClosed),
                    error => Err(error),
                },
                Err(error) => Err(error),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(error) => {
                    self.backoff_or_bail(error, started, self.config.trade_deadline, &mut backoff)
                        .await?;
                }
            }
        }
    }

    /// Query one order's authoritative state.
    pub async fn query_order(
        &self,
        client_id: &ClientOrderId,
        exchange_id: Option<&ExchangeOrderId>,
    ) -> Result<QueryOutcome, ApiError> {
        self.retry_query(&self.query_bucket, || {
            self.adapter.query_order_request(client_id, exchange_id)
        })
        .await
        .map(QueryOutcome::Found)
        .or_else(|error| match error {
            ApiError::NotFound => Ok(QueryOutcome::NotFound),
            other => Err(other),
        })
    }

    pub async fn query_open_orders(&self) -> Result<Vec<OrderSnapshot>, ApiError> {
        self.retry_query_with(&self.query_bucket, || self.adapter.open_orders_request(), |r| {
            self.adapter.parse_open_orders(r)
        })
        .await
    }

    pub async fn query_balances(&self) -> Result<Vec<AssetBalance>, ApiError> {
        self.retry_query_with(&self.query_bucket, || self.adapter.balances_request(), |r| {
            self.adapter.parse_balances(r)
        })
        .await
    }

    pub async fn query_trading_rules(&self) -> Result<Vec<TradingRule>, ApiError> {
        self.retry_query_with(&self.rules_bucket, || self.adapter.trading_rules_request(), |r| {
            self.adapter.parse_trading_rules(r)
        })
        .await
    }

    async fn retry_query(
        &self,
        bucket: &TokenBucket,
        build: impl Fn() -> HttpRequest,
    ) -> Result<OrderSnapshot, ApiError> {
        self.retry_query_with(bucket, build, |response| {
            self.adapter
                .parse_order_snapshot(response)
                .and_then(|outcome| match outcome {
                    QueryOutcome::Found(snapshot) => Ok(snapshot),
                    QueryOutcome::NotFound => Err(ApiError::NotFound),
                })
        })
        .await
    }

    async fn retry_query_with<T>(
        &self,
        bucket: &TokenBucket,
        build: impl Fn() -> HttpRequest,
        parse: impl Fn(&HttpResponse) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let started = Instant::now();
        let mut backoff = ExponentialBackoff::default();
        loop {
            bucket.acquire().await;
            let outcome = match self.send_signed(build(), false).await {
                Ok(response) if response.is_success() => parse(&response),
                Ok(response) => Err(self.adapter.classify_error(&response)),
                Err(error) => Err(error),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(error) => {
                    self.backoff_or_bail(error, started, self.config.query_deadline, &mut backoff)
                        .await?;
                }
            }
        }
    }

    /// Sign and send. When `nonced` and the venue signs with a nonce, the
    /// gate is held across the HTTP call: issuance order is delivery order.
    async fn send_signed(
        &self,
        mut request: HttpRequest,
        nonced: bool,
    ) -> Result<HttpResponse, ApiError> {
        if nonced && self.adapter.uses_nonce() {
            let mut nonce = self.nonce_gate.lock().await;
            self.adapter.sign(&mut request, Some(nonce.next()))?;
            self.http
                .execute(request, self.config.request_timeout)
                .await
                .map_err(ApiError::from)
        } else {
            self.adapter.sign(&mut request, None)?;
            self.http
                .execute(request, self.config.request_timeout)
                .await
                .map_err(ApiError::from)
        }
    }

    /// Sleep before the next retry, or surface the error once it is
    /// non-retryable or the deadline would be exceeded.
    async fn backoff_or_bail(
        &self,
        error: ApiError,
        started: Instant,
        deadline: Duration,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), ApiError> {
        if !error.is_retryable() {
            return Err(error);
        }
        let delay = match &error {
            ApiError::RateLimited {
                retry_after: Some(retry_after),
            } => *retry_after,
            _ => backoff.next_delay(),
        };
        if started.elapsed() + delay >= deadline {
            return Err(error);
        }
        match &error {
            ApiError::MalformedResponse(detail) => {
                warn!(%detail, "malformed venue response, retrying");
            }
            _ => debug!(%error, ?delay, "transient venue failure, retrying"),
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
