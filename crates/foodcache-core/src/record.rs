//! Product records and the candidates that produce them.
//!
//! A [`ProductCandidate`] is what the upstream adapter and the bulk-ingest
//! endpoint hand to the store. The store turns it into a [`ProductRecord`] by
//! assigning an id and filling in the timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance tag for records fetched from Open Food Facts.
pub const DEFAULT_SOURCE: &str = "open_food_facts";

pub const MAX_BARCODE_LEN: usize = 64;
pub const MAX_TEXT_LEN: usize = 255;
pub const MAX_SOURCE_LEN: usize = 64;

/// Macronutrients in grams. Always carries all three keys on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Macros {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Macros {
    fn all_finite(&self) -> bool {
        self.protein.is_finite() && self.carbs.is_finite() && self.fat.is_finite()
    }
}

/// Free-form micronutrients keyed by upstream nutrient name (e.g. `sugars_100g`).
pub type Micros = BTreeMap<String, f64>;

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// A record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub barcode: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub serving_size: Option<String>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub macros: Macros,
    #[serde(default)]
    pub micros: Micros,
    #[serde(default = "default_source")]
    pub source: String,
    /// When the nutritional content was last confirmed. The store substitutes
    /// the write time when this is `None`.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ProductCandidate {
    /// Minimal candidate with zeroed nutrition, mostly useful in tests.
    pub fn new(barcode: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            barcode: barcode.into(),
            name: name.into(),
            brand: None,
            serving_size: None,
            calories: None,
            macros: Macros::default(),
            micros: Micros::new(),
            source: default_source(),
            last_synced_at: None,
        }
    }

    /// Check the field constraints the store's schema relies on.
    pub fn validate(&self) -> Result<(), String> {
        validate_barcode(&self.barcode)?;
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        check_len("name", &self.name, MAX_TEXT_LEN)?;
        if let Some(ref brand) = self.brand {
            check_len("brand", brand, MAX_TEXT_LEN)?;
        }
        if let Some(ref serving) = self.serving_size {
            check_len("serving_size", serving, MAX_TEXT_LEN)?;
        }
        if self.source.trim().is_empty() {
            return Err("source must not be empty".into());
        }
        check_len("source", &self.source, MAX_SOURCE_LEN)?;
        if self.calories.is_some_and(|c| !c.is_finite()) {
            return Err("calories must be a finite number".into());
        }
        if !self.macros.all_finite() {
            return Err("macros must be finite numbers".into());
        }
        if let Some((key, _)) = self.micros.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("micro '{key}' must be a finite number"));
        }
        Ok(())
    }
}

/// A persisted product as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub barcode: String,
    pub name: String,
    pub brand: Option<String>,
    pub serving_size: Option<String>,
    pub calories: Option<f64>,
    pub macros: Macros,
    pub micros: Micros,
    pub source: String,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reject barcodes that could not have come from a scanner or would break
/// the upstream URL path.
pub fn validate_barcode(barcode: &str) -> Result<(), String> {
    if barcode.is_empty() {
        return Err("barcode must not be empty".into());
    }
    check_len("barcode", barcode, MAX_BARCODE_LEN)?;
    if barcode
        .chars()
        .any(|c| c == '/' || c.is_whitespace() || c.is_control())
    {
        return Err(format!("barcode '{barcode}' contains invalid characters"));
    }
    Ok(())
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len > max {
        return Err(format!("{field} is {len} characters, maximum is {max}"));
    }
    Ok(())
}
