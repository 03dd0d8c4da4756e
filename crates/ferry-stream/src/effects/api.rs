//! HTTP-backed sink and source.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::{Counts, Dispatch, WriteOutcome};
use crate::effects::http::{HttpClient, HttpResponse};
use crate::effects::rate_queue::RateLimitingQueue;
use crate::effects::read_stream::{FetchRequest, Page, Source};
use crate::error::ApiError;

/// Characters of a response body kept in error messages.
const SNIPPET: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiSinkOptions {
    pub url: String,
    /// Extra request headers, e.g. authorization.
    pub headers: Vec<(String, String)>,
}

impl ApiSinkOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// POSTs every payload to one endpoint.
///
/// A 2xx answer accepts the whole payload. A 422 answer is read as a partial
/// rejection: the length of its `errors` array is the number of failed
/// records and the rest count as recovered. Any other status fails the whole
/// payload. Only transport errors surface as `Err`.
#[derive(Debug)]
pub struct ApiSink<C> {
    client: C,
    options: ApiSinkOptions,
}

impl<C: HttpClient> ApiSink<C> {
    pub fn new(client: C, options: ApiSinkOptions) -> Self { Self { client, options } }

    pub fn options(&self) -> &ApiSinkOptions { &self.options }
}

impl<C: HttpClient> crate::effects::Sink for ApiSink<C> {
    type Error = C::Error;

    async fn write(&self, dispatch: &Dispatch) -> std::result::Result<WriteOutcome, C::Error> {
        let response = self
            .client
            .post(&self.options.url, &self.options.headers, dispatch.payload.clone())
            .await?;
        Ok(interpret(dispatch, &response))
    }
}

fn interpret(dispatch: &Dispatch, response: &HttpResponse) -> WriteOutcome {
    if response.is_success() {
        return WriteOutcome::accepted(dispatch);
    }

    let message = format!("HTTP {}: {}", response.status, response.snippet(SNIPPET));
    if response.status != 422 {
        return WriteOutcome::rejected(dispatch, message);
    }

    let failed = rejected_records(response)
        .unwrap_or(dispatch.records)
        .min(dispatch.records);
    let successful = dispatch.records - failed;
    if successful == 0 {
        return WriteOutcome::rejected(dispatch, message);
    }

    let successful_bytes = dispatch.bytes * successful / dispatch.records;
    let successful = Counts::new(successful, successful_bytes);
    WriteOutcome {
        successful,
        failed: Counts::new(failed, dispatch.bytes - successful_bytes),
        recovered: Some(successful),
        errors: vec![message],
        ..WriteOutcome::default()
    }
}

fn rejected_records(response: &HttpResponse) -> Option<u64> {
    let body: Value = serde_json::from_slice(&response.body).ok()?;
    body.get("errors")?
        .as_array()
        .map(|errors| errors.len() as u64)
}

/// Where and how to page through a collection endpoint.
///
/// Defaults match WordPress-style REST collections: `?page=N&per_page=M`
/// with the total count in `X-WP-Total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiSourceOptions {
    pub url: String,
    pub headers: Vec<(String, String)>,

    /// Default: 100
    pub per_page: u64,

    /// Number of the first page.
    ///
    /// Default: 1
    pub first_page: u64,

    /// Default: `"page"`
    pub page_param: String,

    /// Default: `"per_page"`
    pub per_page_param: String,

    /// Response header carrying the collection size, if any.
    ///
    /// Default: `"x-wp-total"`
    pub total_header: Option<String>,

    /// Spaces out page fetches; unset means no spacing.
    pub requests_per_second: Option<f64>,
}

impl Default for ApiSourceOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: Vec::new(),
            per_page: 100,
            first_page: 1,
            page_param: "page".to_string(),
            per_page_param: "per_page".to_string(),
            total_header: Some("x-wp-total".to_string()),
            requests_per_second: None,
        }
    }
}

impl ApiSourceOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page;
        self
    }

    #[must_use]
    pub fn requests_per_second(mut self, rate: f64) -> Self {
        self.requests_per_second = Some(rate);
        self
    }

    /// URL of one page.
    pub fn page_url(&self, page: u64, per_page: u64) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}={}&{}={}",
            self.url, separator, self.page_param, page, self.per_page_param, per_page
        )
    }
}

/// Reads a paginated JSON array endpoint one page per fetch.
#[derive(Debug)]
pub struct ApiSource<C> {
    client: C,
    options: ApiSourceOptions,
    limiter: Option<Arc<RateLimitingQueue>>,
}

impl<C: HttpClient> ApiSource<C> {
    pub fn new(client: C, options: ApiSourceOptions) -> Self {
        let limiter = options
            .requests_per_second
            .map(|rate| Arc::new(RateLimitingQueue::new(rate)));
        Self {
            client,
            options,
            limiter,
        }
    }

    /// Shares a limiter with other sources hitting the same service.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<RateLimitingQueue>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn options(&self) -> &ApiSourceOptions { &self.options }
}

impl<C: HttpClient> Source for ApiSource<C> {
    type Record = Value;
    type Error = ApiError;

    fn request(&self, index: u64) -> FetchRequest {
        FetchRequest {
            index,
            page: self.options.first_page + index,
            records: self.options.per_page,
            exhaust: false,
        }
    }

    async fn get(&self, request: &FetchRequest) -> std::result::Result<Page<Value>, ApiError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let url = self.options.page_url(request.page, request.records);
        tracing::debug!(%url, "fetching page");
        let response = self
            .client
            .get(&url, &self.options.headers)
            .await
            .map_err(|err| ApiError::Http(err.to_string()))?;

        // past-the-end pages answer 400 on WordPress
        if response.status == 400 && request.page > self.options.first_page {
            return Ok(Page::new(Vec::new()).terminate());
        }
        if !response.is_success() {
            return Err(ApiError::Status {
                status: response.status,
                body: response.snippet(SNIPPET),
            });
        }

        let data: Vec<Value> = serde_json::from_slice(&response.body)?;
        let total = self
            .options
            .total_header
            .as_deref()
            .and_then(|name| response.header(name))
            .and_then(|value| value.trim().parse::<u64>().ok());

        let mut page = Page::new(data);
        page.total = total;
        Ok(page)
    }
}
