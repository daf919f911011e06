//! Paginated record sources.
//!
//! A [RecordSource] fetches one page at a time. [records] turns a source into
//! a sequential stream of records, and [prefetched] does the same while
//! fetching pages ahead of the consumer on a background task.

mod memory;
mod service;

pub use memory::MemorySource;
pub use service::{
    DEFAULT_POLL_INTERVAL, DEFAULT_URL, EXPORT_FORMAT, ExportServiceSource, JobStatus,
};

use crate::{Error, RawRecord, Result};
use async_stream::try_stream;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of pages fetched ahead of the consumer.
pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

/// A request for one page of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// The query expression.
    pub query: String,

    /// The number of records to request.
    pub page_size: usize,

    /// The token returned with the previous page, or `None` for the first.
    pub token: Option<String>,
}

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// The records, in backend order.
    pub records: Vec<RawRecord>,

    /// The token for the next page, or `None` if this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,

    /// The total number of matching records, if the backend reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_found: Option<u64>,
}

/// Something that can fetch pages of records.
///
/// [`RecordSource::fetch_page`] is the only required method. Retries,
/// timeouts, and prefetching are layered on top by [fetch_with_retry],
/// [records], and [prefetched].
pub trait RecordSource: Send + Sync {
    /// Fetches one page.
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<Page>> + Send;
}

/// How failed page fetches are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,

    /// Wait before the first retry.
    pub initial_backoff: Duration,

    /// The backoff doubles after each retry, up to this.
    pub max_backoff: Duration,

    /// How long a single fetch may take.
    pub timeout: Duration,
}

/// Aborts a spawned task when dropped.
#[derive(Debug)]
struct AbortOnDrop<T>(JoinHandle<T>);

impl PageRequest {
    /// Creates a request for the first page.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::source::PageRequest;
    ///
    /// let request = PageRequest::new("source:SESAR", 100);
    /// assert!(request.token.is_none());
    /// ```
    pub fn new(query: impl ToString, page_size: usize) -> PageRequest {
        PageRequest {
            query: query.to_string(),
            page_size,
            token: None,
        }
    }

    /// Returns a request for the page after this one.
    pub fn next(&self, token: String) -> PageRequest {
        PageRequest {
            query: self.query.clone(),
            page_size: self.page_size,
            token: Some(token),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets the number of retries.
    pub fn with_max_retries(mut self, max_retries: usize) -> RetryPolicy {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> RetryPolicy {
        self.initial_backoff = backoff;
        self
    }

    /// Sets the per-fetch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> RetryPolicy {
        self.timeout = timeout;
        self
    }

    /// Returns the wait before a retry, where `retry` counts from zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::source::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff(0), Duration::from_millis(500));
    /// assert_eq!(policy.backoff(1), Duration::from_secs(1));
    /// assert_eq!(policy.backoff(10), Duration::from_secs(10));
    /// ```
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry as u32).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fetches a page, retrying with exponential backoff.
///
/// Each attempt is bounded by the policy's timeout. Once the retries are
/// used up, the last failure is returned inside [Error::RetriesExhausted].
/// Failures that aren't [retryable](Error::is_retryable) are returned as is.
pub async fn fetch_with_retry<S>(
    source: &S,
    request: &PageRequest,
    policy: &RetryPolicy,
) -> Result<Page>
where
    S: RecordSource + ?Sized,
{
    let mut retry = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, source.fetch_page(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(policy.timeout)),
        };
        match result {
            Ok(page) => return Ok(page),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if retry < policy.max_retries => {
                let backoff = policy.backoff(retry);
                retry += 1;
                tracing::warn!(
                    "page fetch failed (attempt {retry} of {}), retrying in {backoff:?}: {err}",
                    policy.max_retries + 1
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                return Err(Error::RetriesExhausted {
                    attempts: retry + 1,
                    source: Box::new(err),
                });
            }
        }
    }
}

/// Streams every record matching a query, one page at a time.
///
/// Records come out in backend order, and the next page isn't requested
/// until the current one has been consumed.
///
/// # Examples
///
/// ```
/// use futures_util::TryStreamExt;
/// use isamples_export::source::{self, MemorySource, RetryPolicy};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let source = MemorySource::new((0..5).map(|i| json!({"sample_identifier": i})));
/// let records: Vec<_> = source::records(&source, "*:*", 2, RetryPolicy::none())
///     .try_collect()
///     .await
///     .unwrap();
/// assert_eq!(records.len(), 5);
/// # }
/// ```
pub fn records<'a, S>(
    source: &'a S,
    query: &str,
    page_size: usize,
    policy: RetryPolicy,
) -> impl Stream<Item = Result<RawRecord>> + Send + use<'a, S>
where
    S: RecordSource,
{
    let mut request = PageRequest::new(query, page_size);
    try_stream! {
        let mut pages = 0;
        loop {
            let page = fetch_with_retry(source, &request, &policy).await?;
            pages += 1;
            tracing::debug!("fetched page {pages} with {} records", page.records.len());
            for record in page.records {
                yield record;
            }
            match page.next_page_token {
                Some(token) => request = request.next(token),
                None => break,
            }
        }
    }
}

/// Streams every record matching a query, fetching pages ahead.
///
/// At most `depth` pages are buffered. Dropping the stream stops the
/// background fetch task.
pub fn prefetched<S>(
    source: Arc<S>,
    query: &str,
    page_size: usize,
    policy: RetryPolicy,
    depth: usize,
) -> impl Stream<Item = Result<RawRecord>> + Send + use<S>
where
    S: RecordSource + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Result<Page>>(depth.max(1));
    let mut request = PageRequest::new(query, page_size);
    let producer = tokio::spawn(async move {
        loop {
            let result = fetch_with_retry(source.as_ref(), &request, &policy).await;
            let next = match &result {
                Ok(page) => page.next_page_token.clone(),
                Err(_) => None,
            };
            if tx.send(result).await.is_err() {
                tracing::debug!("record stream dropped, stopping prefetch");
                break;
            }
            match next {
                Some(token) => request = request.next(token),
                None => break,
            }
        }
    });
    let producer = AbortOnDrop(producer);
    try_stream! {
        let _producer = producer;
        let mut last_page = false;
        while let Some(result) = rx.recv().await {
            let page = result?;
            last_page = page.next_page_token.is_none();
            tracing::debug!("received prefetched page with {} records", page.records.len());
            for record in page.records {
                yield record;
            }
        }
        if !last_page {
            Err::<(), Error>(Error::PrefetchClosed)?;
        }
    }
}
