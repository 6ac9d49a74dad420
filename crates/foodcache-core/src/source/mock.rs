//! Mock product source for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{FetchResult, ProductSource, SourceError};
use crate::record::ProductCandidate;

/// A configurable mock response for [`MockSource`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Upstream knows the product. `last_synced_at` is stamped at fetch time
    /// when the candidate leaves it empty, like the real adapter does.
    Found(ProductCandidate),
    /// Upstream has no such barcode.
    NotFound,
    /// Upstream answered with this HTTP status.
    Status(u16),
}

/// A hand-rolled mock implementing [`ProductSource`] for tests.
///
/// Supports:
/// - A fixed response (used for every call), **or**
/// - A sequence of responses (one per call, repeating the last if exhausted).
/// - Optional per-call latency.
/// - Call counting via [`call_count()`](MockSource::call_count).
pub struct MockSource {
    /// Remaining responses, stored reversed so `pop()` yields the next one.
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockSource {
    /// Create a mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    /// An empty sequence behaves like [`MockResponse::NotFound`].
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        let fallback = responses.last().cloned().unwrap_or(MockResponse::NotFound);
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `fetch()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        match self.responses.lock() {
            Ok(mut seq) => seq.pop().unwrap_or_else(|| self.fallback.clone()),
            Err(_) => self.fallback.clone(),
        }
    }
}

impl ProductSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch<'a>(
        &'a self,
        barcode: &'a str,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = FetchResult> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Found(mut candidate) => {
                    candidate.barcode = barcode.to_string();
                    candidate.last_synced_at.get_or_insert_with(chrono::Utc::now);
                    Ok(Some(candidate))
                }
                MockResponse::NotFound => Ok(None),
                MockResponse::Status(code) => Err(SourceError::Status(code)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_then_repeat_last() {
        let mock = MockSource::with_sequence(vec![
            MockResponse::Status(500),
            MockResponse::Found(ProductCandidate::new("", "Thing")),
        ]);
        let client = reqwest::Client::new();
        let t = Duration::from_secs(1);

        assert!(mock.fetch("1", &client, t).await.is_err());
        let first = mock.fetch("1", &client, t).await.unwrap().unwrap();
        assert_eq!(first.barcode, "1");
        assert!(first.last_synced_at.is_some());
        assert!(mock.fetch("1", &client, t).await.unwrap().is_some());
        assert_eq!(mock.call_count(), 3);
    }
}
