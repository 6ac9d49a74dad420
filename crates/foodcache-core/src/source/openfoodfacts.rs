//! Open Food Facts product API (`/api/v2/product/{barcode}.json`).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{FetchResult, ProductSource, SourceError};
use crate::rate_limit::{UpstreamLimiter, check_rate_limit_response};
use crate::record::{DEFAULT_SOURCE, MAX_TEXT_LEN, Macros, Micros, ProductCandidate};

pub const DEFAULT_BASE_URL: &str = "https://world.openfoodfacts.org";

/// Used when the upstream has neither a product nor a generic name.
pub const UNKNOWN_PRODUCT: &str = "Unknown product";

/// Suffix of per-100g nutrient keys, the only ones kept as micros.
const PER_100G: &str = "_100g";

// Fallback chains, first present value wins. Per-serving figures are
// preferred over per-100g figures.
const NAME_FIELDS: &[&str] = &["product_name", "generic_name"];
const CALORIE_FIELDS: &[&str] = &["energy-kcal_serving", "energy-kcal_100g"];

type MacroSlot = fn(&mut Macros) -> &mut f64;

fn protein(m: &mut Macros) -> &mut f64 {
    &mut m.protein
}
fn carbs(m: &mut Macros) -> &mut f64 {
    &mut m.carbs
}
fn fat(m: &mut Macros) -> &mut f64 {
    &mut m.fat
}

const MACRO_FIELDS: [(MacroSlot, &[&str]); 3] = [
    (protein, &["proteins_serving", "proteins_100g"]),
    (carbs, &["carbohydrates_serving", "carbohydrates_100g"]),
    (fat, &["fat_serving", "fat_100g"]),
];

pub struct OpenFoodFacts {
    base_url: String,
    user_agent: String,
    limiter: Option<UpstreamLimiter>,
}

impl OpenFoodFacts {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            limiter: None,
        }
    }

    /// Pace requests through `limiter` (shared by every fetch on this source).
    pub fn with_limiter(mut self, limiter: Option<UpstreamLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    fn product_url(&self, barcode: &str) -> String {
        format!(
            "{}/api/v2/product/{}.json",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(barcode)
        )
    }
}

impl std::fmt::Debug for OpenFoodFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFoodFacts")
            .field("base_url", &self.base_url)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl ProductSource for OpenFoodFacts {
    fn name(&self) -> &str {
        "Open Food Facts"
    }

    fn fetch<'a>(
        &'a self,
        barcode: &'a str,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = FetchResult> + Send + 'a>> {
        Box::pin(async move {
            // One deadline covers both the limiter wait and the request.
            let started = tokio::time::Instant::now();
            if let Some(ref limiter) = self.limiter {
                tokio::time::timeout(timeout, limiter.acquire())
                    .await
                    .map_err(|_| SourceError::Timeout(timeout))?;
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(SourceError::Timeout(timeout));
            }

            let resp = client
                .get(self.product_url(barcode))
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .timeout(remaining)
                .send()
                .await?;

            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            check_rate_limit_response(&resp)?;
            if !status.is_success() {
                return Err(SourceError::Status(status.as_u16()));
            }

            let payload: Value = resp
                .json()
                .await
                .map_err(|e| SourceError::Decode(e.to_string()))?;
            Ok(normalize(barcode, &payload, Utc::now()))
        })
    }
}

/// Translate a product API payload into a candidate.
///
/// Returns `None` when the payload reports an unsuccessful lookup
/// (`status` other than 1).
pub fn normalize(barcode: &str, payload: &Value, now: DateTime<Utc>) -> Option<ProductCandidate> {
    if payload.get("status").and_then(Value::as_f64) != Some(1.0) {
        return None;
    }

    let empty = Map::new();
    let product = payload
        .get("product")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let nutriments = product
        .get("nutriments")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let name = NAME_FIELDS
        .iter()
        .find_map(|key| text(product, key))
        .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string());

    let mut macros = Macros::default();
    for (slot, keys) in MACRO_FIELDS {
        *slot(&mut macros) = first_number(nutriments, keys).unwrap_or(0.0);
    }

    Some(ProductCandidate {
        barcode: barcode.to_string(),
        name,
        brand: text(product, "brands"),
        serving_size: text(product, "serving_size"),
        calories: first_number(nutriments, CALORIE_FIELDS),
        macros,
        micros: per_100g_micros(nutriments),
        source: DEFAULT_SOURCE.to_string(),
        last_synced_at: Some(now),
    })
}

/// First key in `keys` whose value coerces to a number.
fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| map.get(*key).and_then(coerce_number))
}

/// Permissive numeric coercion: numbers and numeric strings are accepted,
/// everything else (including NaN and infinities) is treated as absent.
fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Non-blank string field, trimmed and capped at the column width.
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    let s = map.get(key)?.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    Some(s.chars().take(MAX_TEXT_LEN).collect())
}

/// Keys ending in `_100g` whose value is a JSON number. String values are
/// dropped here even if they look numeric.
fn per_100g_micros(nutriments: &Map<String, Value>) -> Micros {
    nutriments
        .iter()
        .filter(|(key, _)| key.ends_with(PER_100G))
        .filter_map(|(key, value)| {
            let n = value.as_f64().filter(|n| n.is_finite())?;
            Some((key.clone(), n))
        })
        .collect()
}
