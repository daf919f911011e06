use super::{Page, PageRequest, RecordSource};
use crate::{Error, Result};
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

const URL: &str = "memory://";

/// A record source backed by a list of records.
///
/// Page tokens are record offsets. Transient failures can be injected per
/// page, which makes this useful for exercising retries.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: Vec<Value>,
    failures: Mutex<HashMap<usize, usize>>,
    requests: AtomicUsize,
}

impl MemorySource {
    /// Creates a new source from some records.
    ///
    /// Values that aren't JSON objects make their page malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::source::MemorySource;
    /// use serde_json::json;
    ///
    /// let source = MemorySource::new([json!({"label": "a"}), json!({"label": "b"})]);
    /// ```
    pub fn new(records: impl IntoIterator<Item = Value>) -> MemorySource {
        MemorySource {
            records: records.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Makes the `page`th page (counting from zero) fail `times` times before
    /// it succeeds.
    pub fn with_failures(self, page: usize, times: usize) -> MemorySource {
        if let Ok(mut failures) = self.failures.lock() {
            let _ = failures.insert(page, times);
        }
        self
    }

    /// The number of pages that have been requested, including failed ones.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn page(&self, request: &PageRequest) -> Result<Page> {
        let _ = self.requests.fetch_add(1, Ordering::SeqCst);
        if request.page_size == 0 {
            return Err(Error::InvalidOption("page size must be positive".to_string()));
        }
        let start = match request.token.as_deref() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::MalformedPage(format!("invalid page token: {token}")))?,
            None => 0,
        };
        let page = start / request.page_size;
        if let Ok(mut failures) = self.failures.lock() {
            if let Some(remaining) = failures.get_mut(&page).filter(|remaining| **remaining > 0) {
                *remaining -= 1;
                return Err(Error::Backend {
                    status: 503,
                    url: format!("{URL}?page={page}"),
                });
            }
        }
        let end = (start + request.page_size).min(self.records.len());
        let records = self
            .records
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, value)| match value {
                Value::Object(record) => Ok(record.clone()),
                _ => Err(Error::MalformedPage(format!(
                    "record {} is not an object",
                    start + i
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            records,
            next_page_token: (end < self.records.len()).then(|| end.to_string()),
            num_found: Some(self.records.len() as u64),
        })
    }
}

impl RecordSource for MemorySource {
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<Page>> + Send {
        let result = self.page(request);
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySource;
    use crate::{
        Error,
        source::{PageRequest, RecordSource},
    };
    use serde_json::json;

    #[tokio::test]
    async fn pages() {
        let source = MemorySource::new((0..5).map(|i| json!({"i": i})));
        let request = PageRequest::new("*:*", 2);
        let page = source.fetch_page(&request).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.num_found, Some(5));
        let token = page.next_page_token.unwrap();
        assert_eq!(token, "2");
        let page = source
            .fetch_page(&request.next("4".to_string()))
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn malformed() {
        let source = MemorySource::new([json!({"i": 0}), json!("not a record")]);
        let error = source
            .fetch_page(&PageRequest::new("*:*", 10))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::MalformedPage(_)));
        let error = source
            .fetch_page(&PageRequest::new("*:*", 10).next("x".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::MalformedPage(_)));
    }

    #[tokio::test]
    async fn failures() {
        let source = MemorySource::new([json!({})]).with_failures(0, 1);
        let request = PageRequest::new("*:*", 1);
        assert!(source.fetch_page(&request).await.is_err());
        assert!(source.fetch_page(&request).await.is_ok());
        assert_eq!(source.requests(), 2);
    }
}
