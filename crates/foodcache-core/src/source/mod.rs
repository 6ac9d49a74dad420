//! Upstream product sources.
//!
//! A source turns a barcode into a [`ProductCandidate`] or reports that the
//! upstream has never heard of it. It never touches the store.

pub mod mock;
pub mod openfoodfacts;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::record::ProductCandidate;

pub use openfoodfacts::OpenFoodFacts;

/// `Ok(None)` means the upstream answered and does not know the barcode.
pub type FetchResult = Result<Option<ProductCandidate>, SourceError>;

/// Failures other than "not found". These are surfaced, never swallowed.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("upstream rate limited (429){}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("invalid upstream payload: {0}")]
    Decode(String),
    /// The per-call deadline passed while waiting for a rate-limit permit.
    #[error("upstream lookup timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

/// An external database that can look up a product by barcode.
pub trait ProductSource: Send + Sync {
    /// Provenance name, used in logs.
    fn name(&self) -> &str;

    /// Fetch and normalize the product for `barcode`.
    fn fetch<'a>(
        &'a self,
        barcode: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = FetchResult> + Send + 'a>>;
}
