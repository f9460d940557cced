//! The request orchestrator.
//!
//! [`Client::get`] runs the full pipeline: cooldown enforcement, cache
//! lookup and freshness classification, conditional revalidation,
//! single-flight ownership, rate-limit admission, the fetch itself (with
//! optional retry), post-processing, and write-back. Every phase elides
//! itself when its store is absent; the orchestrator owns all side effects.

use std::sync::Arc;
use std::time::Duration;

use fetchbox_core::{
    classify, fingerprint, freshness, infer_resource, now_ms, origin_of, parse_body, vary,
    CacheEntry, CacheOverrides, Fingerprint, Freshness, Payload,
};
use fetchbox_store::{CacheStore, DedupeStore, Priority, RateLimitStore};
use http::header::{HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::{RequestOptions, RetryOverride};
use crate::dedupe::{Claim, DedupeCoordinator};
use crate::error::{Error, HttpFailure};
use crate::limit::{RateGovernor, RateLimitHeaders, WaitBudget};
use crate::retry::RetryPolicy;
use crate::revalidate::RevalidationManager;
use crate::signal::{sleep_abortable, AbortSignal};
use crate::transport::{
    RequestInterceptor, ResponseInterceptor, Transport, TransportError, TransportRequest,
    TransportResponse,
};

/// Transforms the parsed payload before it is cached and returned.
pub type ResponseTransformer = Arc<dyn Fn(Payload) -> Result<Payload, Error> + Send + Sync>;

/// Observes the final payload; an error here propagates unchanged.
pub type ResponseHandler = Arc<dyn Fn(&Payload) -> Result<(), Error> + Send + Sync>;

/// Maps an HTTP failure context to a domain error. Consulted for HTTP
/// failures only, never for network-layer errors.
pub type ErrorHandler = Arc<dyn Fn(&HttpFailure) -> Error + Send + Sync>;

/// Marker type for unset builder fields.
pub struct NotSet;

struct ClientInner {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn CacheStore>>,
    dedupe: Option<DedupeCoordinator>,
    governor: RateGovernor,
    retry: Option<RetryPolicy>,
    default_headers: HeaderMap,
    default_cache_ttl: Duration,
    cache_overrides: CacheOverrides,
    transformer: Option<ResponseTransformer>,
    response_handler: Option<ResponseHandler>,
    error_handler: Option<ErrorHandler>,
    request_interceptors: Vec<RequestInterceptor>,
    response_interceptors: Vec<ResponseInterceptor>,
    revalidations: RevalidationManager,
}

/// The HTTP client middleware core.
///
/// Cheap to clone; clones share stores, cooldowns, and the revalidation
/// list. Construct via [`Client::builder`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cache", &self.inner.cache.is_some())
            .field("dedupe", &self.inner.dedupe.is_some())
            .field("governor", &self.inner.governor)
            .finish()
    }
}

/// Everything the pipeline needs about one request, computed up front.
#[derive(Clone, Debug)]
struct RequestCtx {
    url: Url,
    key: Fingerprint,
    resource: String,
    origin: String,
    headers: HeaderMap,
    overrides: CacheOverrides,
    priority: Priority,
    signal: Option<AbortSignal>,
    retry: Option<RetryPolicy>,
    default_ttl: Duration,
}

impl Client {
    /// Starts a builder; a transport must be supplied before `build`.
    pub fn builder() -> ClientBuilder<NotSet> {
        ClientBuilder::new()
    }

    /// Performs a GET through the full pipeline and returns the payload.
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Payload, Error> {
        let ctx = self.prepare(url, options)?;
        self.execute(ctx).await
    }

    /// [`Client::get`] followed by typed deserialization.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<T, Error> {
        let payload = self.get(url, options).await?;
        payload
            .json()
            .map_err(|error| Error::Serialization(error.to_string()))
    }

    /// Deletes the cache entry for `url` (with no extra params).
    pub async fn invalidate(&self, url: &str) -> Result<(), Error> {
        let parsed = Url::parse(url).map_err(|error| Error::InvalidUrl(error.to_string()))?;
        if let Some(cache) = &self.inner.cache {
            cache.delete(&fingerprint(&parsed, &[])).await?;
        }
        Ok(())
    }

    /// Clears the whole cache store.
    pub async fn clear_cache(&self) -> Result<(), Error> {
        if let Some(cache) = &self.inner.cache {
            cache.clear().await?;
        }
        Ok(())
    }

    /// The background revalidation list, for draining in tests and
    /// aborting at shutdown.
    pub fn revalidations(&self) -> &RevalidationManager {
        &self.inner.revalidations
    }

    fn prepare(&self, url: &str, options: RequestOptions) -> Result<RequestCtx, Error> {
        let mut parsed = Url::parse(url).map_err(|error| Error::InvalidUrl(error.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("not an http(s) url: {url}")));
        }

        // Programmatic params land in the URL itself, so the fingerprint,
        // the transport, and the cache all see the same request.
        if !options.params.is_empty() {
            let mut pairs = parsed.query_pairs_mut();
            for (name, value) in &options.params {
                match value.canonical() {
                    Some(value) => {
                        pairs.append_pair(name, &value);
                    }
                    None => {
                        pairs.append_key_only(name);
                    }
                }
            }
            drop(pairs);
        }

        let mut headers = self.inner.default_headers.clone();
        for (name, value) in options.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        let overrides = match &options.cache_overrides {
            Some(request_overrides) => self.inner.cache_overrides.merged_with(request_overrides),
            None => self.inner.cache_overrides.clone(),
        };

        let retry = match options.retry {
            RetryOverride::Inherit => self.inner.retry.clone(),
            RetryOverride::Disabled => None,
            RetryOverride::Policy(policy) => Some(policy),
        };

        Ok(RequestCtx {
            key: fingerprint(&parsed, &[]),
            resource: infer_resource(parsed.as_str()).to_string(),
            origin: origin_of(&parsed),
            url: parsed,
            headers,
            overrides,
            priority: options.priority,
            signal: options.signal,
            retry,
            default_ttl: options.cache_ttl.unwrap_or(self.inner.default_cache_ttl),
        })
    }

    async fn execute(&self, ctx: RequestCtx) -> Result<Payload, Error> {
        let budget = self.inner.governor.budget();

        self.inner
            .governor
            .enforce_cooldown(&ctx.origin, &ctx.resource, ctx.signal.as_ref(), false, &budget)
            .await?;

        // Cache phase.
        let mut held: Option<CacheEntry> = None;
        let mut allow_stale_on_error = false;
        if let Some(cache) = &self.inner.cache {
            if let Some(bytes) = cache.get(&ctx.key).await? {
                match CacheEntry::decode(&bytes) {
                    None => {
                        debug!(key = %ctx.key, "cached value is not an envelope; treating as miss");
                    }
                    Some(entry) => {
                        if !vary::vary_matches(
                            entry.vary_headers.as_deref(),
                            &entry.vary_values,
                            &ctx.headers,
                        ) {
                            debug!(key = %ctx.key, "vary mismatch; treating as miss");
                        } else {
                            match classify(&entry, now_ms(), &ctx.overrides) {
                                Freshness::Fresh => {
                                    debug!(key = %ctx.key, "cache hit");
                                    return Ok(entry.value);
                                }
                                Freshness::StaleWhileRevalidate => {
                                    debug!(key = %ctx.key, "serving stale while revalidating");
                                    let value = entry.value.clone();
                                    self.spawn_revalidation(&ctx, entry);
                                    return Ok(value);
                                }
                                Freshness::StaleIfError => {
                                    allow_stale_on_error = true;
                                    held = Some(entry);
                                }
                                Freshness::NoCache
                                | Freshness::MustRevalidate
                                | Freshness::Stale => {
                                    debug!(key = %ctx.key, "stale entry held for revalidation");
                                    held = Some(entry);
                                }
                            }
                        }
                    }
                }
            }
        }

        // Dedupe phase.
        let mut owner = false;
        if let Some(dedupe) = &self.inner.dedupe {
            match dedupe.claim(&ctx.key).await? {
                Claim::Shared(value) => return Ok(value),
                Claim::UpstreamFailed => return Err(Error::UpstreamFailed),
                Claim::Owner { job_id } => {
                    debug!(key = %ctx.key, job_id, "owning fetch");
                    owner = true;
                }
            }
        }

        let result = self.fetch_and_finish(&ctx, held.as_ref(), &budget).await;

        match result {
            Ok(value) => {
                if owner {
                    if let Some(dedupe) = &self.inner.dedupe {
                        dedupe.complete(&ctx.key, value.clone()).await?;
                    }
                }
                Ok(value)
            }
            Err(error) => {
                if allow_stale_on_error && error.is_stale_if_error_eligible() {
                    if let Some(stale) = held.map(|entry| entry.value) {
                        warn!(key = %ctx.key, error = %error, "serving stale value after upstream failure");
                        if owner {
                            if let Some(dedupe) = &self.inner.dedupe {
                                dedupe.complete(&ctx.key, stale.clone()).await?;
                            }
                        }
                        return Ok(stale);
                    }
                }
                if owner {
                    if let Some(dedupe) = &self.inner.dedupe {
                        // Settle joiners; an abort still propagates as-is.
                        let _ = dedupe.fail(&ctx.key, error.to_string()).await;
                    }
                }
                Err(error)
            }
        }
    }

    /// Rate admission, fetch (with retry), post-processing, rate record,
    /// and cache write-back.
    async fn fetch_and_finish(
        &self,
        ctx: &RequestCtx,
        held: Option<&CacheEntry>,
        budget: &WaitBudget,
    ) -> Result<Payload, Error> {
        let admission = self
            .inner
            .governor
            .admit(&ctx.resource, ctx.priority, ctx.signal.as_ref(), budget)
            .await?;

        let response = self.fetch_with_retry(ctx, held, budget).await?;
        let status = response.status.as_u16();

        if status == 304 {
            if let Some(entry) = held {
                debug!(key = %ctx.key, "304: refreshing cached entry");
                let refreshed = entry.refresh_from_304(&response.headers, now_ms());
                let value = refreshed.value.clone();
                if !admission.recorded {
                    self.inner.governor.record(&ctx.resource, ctx.priority).await?;
                }
                self.write_back(ctx, refreshed).await?;
                return Ok(value);
            }
        }

        let payload = parse_body(status, response.content_type(), &response.body);

        if !response.is_ok() {
            let failure = HttpFailure {
                url: ctx.url.to_string(),
                status,
                data: payload,
                headers: response.headers,
            };
            return Err(self.classify_http(&failure));
        }

        let transformed = match &self.inner.transformer {
            Some(transformer) => transformer(payload)?,
            None => payload,
        };
        if let Some(handler) = &self.inner.response_handler {
            handler(&transformed)?;
        }

        if !admission.recorded {
            self.inner.governor.record(&ctx.resource, ctx.priority).await?;
        }

        let entry = CacheEntry::from_response(transformed.clone(), &response.headers, status, now_ms());
        self.write_back(ctx, entry).await?;

        Ok(transformed)
    }

    /// The fetch attempt loop. Retry wraps only this phase; between
    /// attempts the server cooldown is re-evaluated in forced-wait mode so
    /// a retry can never bypass it.
    async fn fetch_with_retry(
        &self,
        ctx: &RequestCtx,
        held: Option<&CacheEntry>,
        budget: &WaitBudget,
    ) -> Result<TransportResponse, Error> {
        let mut attempt: u32 = 1;
        loop {
            let (error, server_hint) = match self.fetch_once(ctx, held, attempt).await {
                Ok((response, hint)) => {
                    let status = response.status.as_u16();
                    if response.is_ok() || status == 304 {
                        return Ok(response);
                    }
                    let payload =
                        parse_body(status, response.content_type(), &response.body);
                    let failure = HttpFailure {
                        url: ctx.url.to_string(),
                        status,
                        data: payload,
                        headers: response.headers.clone(),
                    };
                    (self.classify_http(&failure), hint)
                }
                Err(error) => (error, None),
            };

            if matches!(error, Error::Aborted) {
                return Err(error);
            }
            let Some(policy) = ctx.retry.as_ref() else {
                return Err(error);
            };
            if !policy.should_retry(&error, attempt) {
                return Err(error);
            }
            if let Some(on_retry) = &policy.on_retry {
                on_retry(attempt, &error);
            }
            let delay = policy.delay_for(attempt, server_hint);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying fetch"
            );
            sleep_abortable(delay, ctx.signal.as_ref()).await?;
            self.inner
                .governor
                .enforce_cooldown(&ctx.origin, &ctx.resource, ctx.signal.as_ref(), true, budget)
                .await?;
            attempt += 1;
        }
    }

    /// One transport exchange: conditional headers, interceptors, and
    /// server-hint application.
    async fn fetch_once(
        &self,
        ctx: &RequestCtx,
        held: Option<&CacheEntry>,
        attempt: u32,
    ) -> Result<(TransportResponse, Option<Duration>), Error> {
        let mut headers = ctx.headers.clone();
        if attempt == 1 {
            if let Some(entry) = held {
                // Conditional validators layer over user headers.
                if let Some(etag) = &entry.etag {
                    if let Ok(value) = HeaderValue::from_str(etag) {
                        headers.insert(IF_NONE_MATCH, value);
                    }
                }
                if let Some(last_modified) = &entry.last_modified {
                    if let Ok(value) = HeaderValue::from_str(last_modified) {
                        headers.insert(IF_MODIFIED_SINCE, value);
                    }
                }
            }
        }

        let mut request = TransportRequest {
            url: ctx.url.clone(),
            headers,
            signal: ctx.signal.clone(),
        };
        for interceptor in &self.inner.request_interceptors {
            interceptor(&mut request);
        }

        match self.inner.transport.fetch(request.clone()).await {
            Err(TransportError::Aborted) => Err(Error::Aborted),
            Err(TransportError::Network(message)) => Err(Error::Network(message)),
            Ok(mut response) => {
                for interceptor in &self.inner.response_interceptors {
                    interceptor(&request, &mut response);
                }
                let hint = self.inner.governor.apply_hints(
                    &ctx.origin,
                    response.status.as_u16(),
                    &response.headers,
                );
                Ok((response, hint))
            }
        }
    }

    /// Cache write-back: captures vary values from the merged request
    /// headers and computes the store TTL with clamping. `no-store`
    /// responses are skipped unless overridden.
    async fn write_back(&self, ctx: &RequestCtx, mut entry: CacheEntry) -> Result<(), Error> {
        let Some(cache) = &self.inner.cache else {
            return Ok(());
        };
        if entry.cache_control.no_store && !ctx.overrides.ignore_no_store {
            debug!(key = %ctx.key, "no-store: skipping cache write");
            return Ok(());
        }
        entry.capture_vary(&ctx.headers);
        let ttl = freshness::store_ttl_secs(&entry, ctx.default_ttl, &ctx.overrides);
        cache.set(&ctx.key, entry.encode(), ttl).await?;
        Ok(())
    }

    fn classify_http(&self, failure: &HttpFailure) -> Error {
        match &self.inner.error_handler {
            Some(handler) => handler(failure),
            None => Error::from_failure(failure),
        }
    }

    /// Registers a detached stale-while-revalidate refresh for `entry`.
    fn spawn_revalidation(&self, ctx: &RequestCtx, entry: CacheEntry) {
        let client = self.clone();
        // Detached task: no caller signal, no retry, background priority.
        let task_ctx = RequestCtx {
            signal: None,
            retry: None,
            priority: Priority::Background,
            ..ctx.clone()
        };
        let key = ctx.key.clone();
        self.inner.revalidations.spawn(key.clone(), async move {
            if let Err(error) = client.revalidate(task_ctx, entry).await {
                // Swallowed: the stale entry stays until it leaves its
                // tolerance window.
                warn!(key = %key, error = %error, "background revalidation failed");
            }
        });
    }

    /// The background revalidation body: a conditional request with the
    /// stale entry's validators, the same transform pipeline, and a write
    /// back on 200 or a metadata refresh on 304.
    async fn revalidate(&self, ctx: RequestCtx, entry: CacheEntry) -> Result<(), Error> {
        let (response, _hint) = self.fetch_once(&ctx, Some(&entry), 1).await?;
        let status = response.status.as_u16();

        if status == 304 {
            let refreshed = entry.refresh_from_304(&response.headers, now_ms());
            return self.write_back(&ctx, refreshed).await;
        }

        let payload = parse_body(status, response.content_type(), &response.body);
        if !response.is_ok() {
            let failure = HttpFailure {
                url: ctx.url.to_string(),
                status,
                data: payload,
                headers: response.headers,
            };
            return Err(self.classify_http(&failure));
        }

        let transformed = match &self.inner.transformer {
            Some(transformer) => transformer(payload)?,
            None => payload,
        };
        if let Some(handler) = &self.inner.response_handler {
            handler(&transformed)?;
        }

        let fresh = CacheEntry::from_response(transformed, &response.headers, status, now_ms());
        self.write_back(&ctx, fresh).await
    }
}

/// Builder for [`Client`]; the transport is required and tracked by
/// typestate.
pub struct ClientBuilder<T> {
    transport: T,
    cache: Option<Arc<dyn CacheStore>>,
    dedupe: Option<Arc<dyn DedupeStore>>,
    rate: Option<Arc<dyn RateLimitStore>>,
    retry: Option<RetryPolicy>,
    default_headers: HeaderMap,
    default_cache_ttl: Duration,
    cache_overrides: CacheOverrides,
    rate_limit_headers: RateLimitHeaders,
    throw_on_rate_limit: bool,
    max_wait_time: Duration,
    transformer: Option<ResponseTransformer>,
    response_handler: Option<ResponseHandler>,
    error_handler: Option<ErrorHandler>,
    request_interceptors: Vec<RequestInterceptor>,
    response_interceptors: Vec<ResponseInterceptor>,
}

impl ClientBuilder<NotSet> {
    /// Creates a builder with defaults and no transport.
    pub fn new() -> Self {
        ClientBuilder {
            transport: NotSet,
            cache: None,
            dedupe: None,
            rate: None,
            retry: Some(RetryPolicy::default()),
            default_headers: HeaderMap::new(),
            default_cache_ttl: Duration::from_secs(300),
            cache_overrides: CacheOverrides::default(),
            rate_limit_headers: RateLimitHeaders::default(),
            throw_on_rate_limit: false,
            max_wait_time: Duration::from_secs(30),
            transformer: None,
            response_handler: None,
            error_handler: None,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
        }
    }
}

impl Default for ClientBuilder<NotSet> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClientBuilder<T> {
    /// Sets the transport.
    pub fn transport<NT>(self, transport: NT) -> ClientBuilder<Arc<dyn Transport>>
    where
        NT: Transport + 'static,
    {
        ClientBuilder {
            transport: Arc::new(transport),
            cache: self.cache,
            dedupe: self.dedupe,
            rate: self.rate,
            retry: self.retry,
            default_headers: self.default_headers,
            default_cache_ttl: self.default_cache_ttl,
            cache_overrides: self.cache_overrides,
            rate_limit_headers: self.rate_limit_headers,
            throw_on_rate_limit: self.throw_on_rate_limit,
            max_wait_time: self.max_wait_time,
            transformer: self.transformer,
            response_handler: self.response_handler,
            error_handler: self.error_handler,
            request_interceptors: self.request_interceptors,
            response_interceptors: self.response_interceptors,
        }
    }

    /// Sets the cache store.
    pub fn cache_store<S: CacheStore + 'static>(mut self, store: S) -> Self {
        self.cache = Some(Arc::new(store));
        self
    }

    /// Sets the dedupe store.
    pub fn dedupe_store<S: DedupeStore + 'static>(mut self, store: S) -> Self {
        self.dedupe = Some(Arc::new(store));
        self
    }

    /// Sets the rate-limit store.
    pub fn rate_store<S: RateLimitStore + 'static>(mut self, store: S) -> Self {
        self.rate = Some(Arc::new(store));
        self
    }

    /// Sets a shared cache store.
    pub fn cache_store_shared(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    /// Sets a shared dedupe store.
    pub fn dedupe_store_shared(mut self, store: Arc<dyn DedupeStore>) -> Self {
        self.dedupe = Some(store);
        self
    }

    /// Sets a shared rate-limit store.
    pub fn rate_store_shared(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate = Some(store);
        self
    }

    /// Replaces the default retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Disables retries by default.
    pub fn no_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    /// Adds a default request header sent on every request.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Sets the cache TTL used when a response carries no explicit
    /// lifetime.
    pub fn default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = ttl;
        self
    }

    /// Sets construction-time cache overrides.
    pub fn cache_overrides(mut self, overrides: CacheOverrides) -> Self {
        self.cache_overrides = overrides;
        self
    }

    /// Prepends custom rate-limit header names to the defaults.
    pub fn rate_limit_headers(mut self, custom: RateLimitHeaders) -> Self {
        self.rate_limit_headers = RateLimitHeaders::with_custom(custom);
        self
    }

    /// Fail with a rate-limited error instead of waiting out cooldowns
    /// and admission.
    pub fn throw_on_rate_limit(mut self, throw: bool) -> Self {
        self.throw_on_rate_limit = throw;
        self
    }

    /// Cumulative per-request wait budget across cooldown and admission.
    pub fn max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time = max_wait;
        self
    }

    /// Sets the response transformer.
    pub fn response_transformer(mut self, transformer: ResponseTransformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Sets the response handler.
    pub fn response_handler(mut self, handler: ResponseHandler) -> Self {
        self.response_handler = Some(handler);
        self
    }

    /// Sets the error handler consulted for HTTP failures.
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Adds a pre-request interceptor.
    pub fn request_interceptor(mut self, interceptor: RequestInterceptor) -> Self {
        self.request_interceptors.push(interceptor);
        self
    }

    /// Adds a post-response interceptor.
    pub fn response_interceptor(mut self, interceptor: ResponseInterceptor) -> Self {
        self.response_interceptors.push(interceptor);
        self
    }
}

impl ClientBuilder<Arc<dyn Transport>> {
    /// Builds the client.
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                cache: self.cache,
                dedupe: self.dedupe.map(DedupeCoordinator::new),
                governor: RateGovernor::new(
                    self.rate,
                    self.rate_limit_headers,
                    self.throw_on_rate_limit,
                    self.max_wait_time,
                ),
                retry: self.retry,
                default_headers: self.default_headers,
                default_cache_ttl: self.default_cache_ttl,
                cache_overrides: self.cache_overrides,
                transformer: self.transformer,
                response_handler: self.response_handler,
                error_handler: self.error_handler,
                request_interceptors: self.request_interceptors,
                response_interceptors: self.response_interceptors,
                revalidations: RevalidationManager::new(),
            }),
        }
    }
}
