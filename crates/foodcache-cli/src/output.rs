use std::io::Write;

use chrono::{DateTime, Utc};
use foodcache_core::{ProductRecord, Settings};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print one record with its nutrition table and cache age.
pub fn print_record(
    w: &mut dyn Write,
    record: &ProductRecord,
    ttl_hours: i64,
    now: DateTime<Utc>,
    color: ColorMode,
) -> std::io::Result<()> {
    let title = match record.brand {
        Some(ref brand) => format!("{} ({})", record.name, brand),
        None => record.name.clone(),
    };
    if color.enabled() {
        writeln!(w, "{}  {}", title.bold(), record.barcode.dimmed())?;
    } else {
        writeln!(w, "{}  {}", title, record.barcode)?;
    }

    if let Some(ref serving) = record.serving_size {
        writeln!(w, "  Serving:  {serving}")?;
    }
    match record.calories {
        Some(kcal) => writeln!(w, "  Calories: {kcal} kcal")?,
        None => writeln!(w, "  Calories: unknown")?,
    }
    writeln!(
        w,
        "  Protein {}g | Carbs {}g | Fat {}g",
        record.macros.protein, record.macros.carbs, record.macros.fat
    )?;
    for (key, value) in &record.micros {
        writeln!(w, "  {key}: {value}")?;
    }

    let age_hours = record.age(now).num_hours();
    let synced = format!(
        "Synced {} ({}h ago) from {}",
        record.last_synced_at.format("%Y-%m-%d %H:%M UTC"),
        age_hours,
        record.source
    );
    if record.is_stale(ttl_hours, now) {
        let msg = format!("{synced}, stale");
        if color.enabled() {
            writeln!(w, "  {}", msg.yellow())?;
        } else {
            writeln!(w, "  {msg}")?;
        }
    } else if color.enabled() {
        writeln!(w, "  {}", synced.dimmed())?;
    } else {
        writeln!(w, "  {synced}")?;
    }
    Ok(())
}

/// One line per match, most recently updated first.
pub fn print_search_results(
    w: &mut dyn Write,
    query: &str,
    records: &[ProductRecord],
    color: ColorMode,
) -> std::io::Result<()> {
    if records.is_empty() {
        writeln!(w, "No cached products match \"{query}\"")?;
        return Ok(());
    }
    for record in records {
        let kcal = record
            .calories
            .map(|c| format!("{c} kcal"))
            .unwrap_or_else(|| "? kcal".to_string());
        if color.enabled() {
            writeln!(w, "{:<16} {} {}", record.barcode.dimmed(), record.name, kcal.cyan())?;
        } else {
            writeln!(w, "{:<16} {} {}", record.barcode, record.name, kcal)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} result(s)", records.len())?;
    Ok(())
}

pub fn print_import_summary(
    w: &mut dyn Write,
    records: &[ProductRecord],
    color: ColorMode,
) -> std::io::Result<()> {
    let msg = format!("Imported {} product(s)", records.len());
    if color.enabled() {
        writeln!(w, "{}", msg.green())
    } else {
        writeln!(w, "{msg}")
    }
}

/// Print resolved settings. The service key is never shown.
pub fn print_settings(w: &mut dyn Write, settings: &Settings) -> std::io::Result<()> {
    writeln!(w, "database_path                = {}", settings.database_path.display())?;
    writeln!(w, "cache_ttl_hours              = {}", settings.cache_ttl_hours)?;
    writeln!(w, "upstream_base_url            = {}", settings.upstream_base_url)?;
    writeln!(w, "upstream_timeout_secs        = {}", settings.upstream_timeout_secs)?;
    writeln!(
        w,
        "upstream_requests_per_minute = {}",
        settings.upstream_requests_per_minute
    )?;
    writeln!(w, "user_agent                   = {}", settings.user_agent)?;
    writeln!(
        w,
        "service_api_key              = {}",
        if settings.service_api_key.is_some() {
            "*** (set)"
        } else {
            "(not set)"
        }
    )?;
    writeln!(
        w,
        "allowed_origins              = {}",
        settings.allowed_origins.join(", ")
    )?;
    writeln!(w, "bind_addr                    = {}", settings.bind_addr)?;
    writeln!(w, "search_default_limit         = {}", settings.search_default_limit)?;
    writeln!(w, "search_max_limit             = {}", settings.search_max_limit)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use foodcache_core::Macros;

    fn record(synced_hours_ago: i64, now: DateTime<Utc>) -> ProductRecord {
        ProductRecord {
            id: "0b8c".into(),
            barcode: "3017620422003".into(),
            name: "Nutella".into(),
            brand: Some("Ferrero".into()),
            serving_size: Some("15 g".into()),
            calories: Some(80.0),
            macros: Macros {
                protein: 0.9,
                carbs: 8.6,
                fat: 4.6,
            },
            micros: [("sugars_100g".to_string(), 56.3)].into_iter().collect(),
            source: "open_food_facts".into(),
            last_synced_at: now - Duration::hours(synced_hours_ago),
            created_at: now - Duration::hours(synced_hours_ago),
            updated_at: now - Duration::hours(synced_hours_ago),
        }
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn record_shows_nutrition_and_freshness() {
        let now = Utc::now();
        let out = render(|w| print_record(w, &record(2, now), 72, now, ColorMode(false)));
        assert!(out.starts_with("Nutella (Ferrero)  3017620422003\n"));
        assert!(out.contains("Calories: 80 kcal"));
        assert!(out.contains("Protein 0.9g | Carbs 8.6g | Fat 4.6g"));
        assert!(out.contains("sugars_100g: 56.3"));
        assert!(out.contains("(2h ago)"));
        assert!(!out.contains("stale"));
    }

    #[test]
    fn stale_record_is_flagged() {
        let now = Utc::now();
        let out = render(|w| print_record(w, &record(100, now), 72, now, ColorMode(false)));
        assert!(out.contains(", stale"));
    }

    #[test]
    fn empty_search_says_so() {
        let out = render(|w| print_search_results(w, "kale", &[], ColorMode(false)));
        assert_eq!(out, "No cached products match \"kale\"\n");
    }

    #[test]
    fn settings_never_print_the_key() {
        let settings = Settings {
            service_api_key: Some("hunter2".into()),
            ..Settings::default()
        };
        let out = render(|w| print_settings(w, &settings));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("*** (set)"));
    }
}
