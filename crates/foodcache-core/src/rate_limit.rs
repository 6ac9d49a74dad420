//! Request pacing for the upstream nutrition database.
//!
//! Open Food Facts asks clients to stay under a fixed number of product reads
//! per minute. Each fetch waits for a governor permit before sending, which
//! spaces requests across all concurrent callers. A 429 that gets through
//! anyway is reported to the caller, never retried here.

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::source::SourceError;

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared limiter for all requests to one upstream host.
pub struct UpstreamLimiter {
    limiter: DirectLimiter,
    per_minute: NonZeroU32,
}

impl UpstreamLimiter {
    /// Allow `n` requests per minute. Returns `None` for zero, meaning
    /// "unlimited".
    pub fn per_minute(n: u32) -> Option<Self> {
        let per_minute = NonZeroU32::new(n)?;
        Some(Self {
            limiter: DirectLimiter::direct(Quota::per_minute(per_minute)),
            per_minute,
        })
    }

    /// Wait until the limiter allows a request.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.per_minute.get()
    }
}

impl std::fmt::Debug for UpstreamLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLimiter")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

/// Map a 429 response to [`SourceError::RateLimited`], carrying Retry-After.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SourceError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        Err(SourceError::RateLimited { retry_after })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value: delta seconds or an HTTP-date.
/// Dates in the past yield a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc).signed_duration_since(now);
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2015-10-21T07:27:30Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5", now()), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 0 ", now()), Some(Duration::ZERO));
    }

    #[test]
    fn parse_http_date() {
        let val = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(val, now()), Some(Duration::from_secs(30)));
    }

    #[test]
    fn past_http_date_is_zero() {
        let val = "Wed, 21 Oct 2015 07:00:00 GMT";
        assert_eq!(parse_retry_after(val, now()), Some(Duration::ZERO));
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("xyz", now()), None);
    }

    #[test]
    fn ok_on_200() {
        let resp = reqwest::Response::from(http::Response::builder().status(200).body("").unwrap());
        assert!(check_rate_limit_response(&resp).is_ok());
    }

    #[test]
    fn rate_limited_429_with_retry_after() {
        let http_resp = http::Response::builder()
            .status(429)
            .header("retry-after", "10")
            .body("")
            .unwrap();
        let resp = reqwest::Response::from(http_resp);
        match check_rate_limit_response(&resp).unwrap_err() {
            SourceError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(10)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn zero_disables_limiter() {
        assert!(UpstreamLimiter::per_minute(0).is_none());
        let limiter = UpstreamLimiter::per_minute(100).unwrap();
        assert_eq!(limiter.requests_per_minute(), 100);
    }

    #[tokio::test]
    async fn acquire_completes() {
        let limiter = UpstreamLimiter::per_minute(6000).unwrap();
        limiter.acquire().await;
        limiter.acquire().await;
    }
}
