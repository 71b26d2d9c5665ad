//! Reference Dataset and Crop Query Engine
//!
//! The crop reference table lists, per region, the soils known there and
//! the crop options for a soil/season/temperature-band combination. It is
//! loaded once with Polars, flattened into typed rows with an FxHashMap
//! region index, and read concurrently for the process lifetime.
//!
//! Query semantics worth calling out:
//! - soil columns are compared through the fuzzy matching contract in
//!   `normalize`, never by raw string equality;
//! - the temperature predicate narrows but never widens: if no row in the
//!   region/soil/season set passes it, the un-narrowed set is kept;
//! - a missing or unloadable dataset degrades query results to "no match"
//!   instead of failing the request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use polars::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::AdvisorError;
use crate::normalize::{soil_matches, title_case};
use crate::season::Season;

/// One reference row: a region/soil/season combination with its
/// temperature band and up to three recommended crop options.
#[derive(Debug, Clone)]
pub struct CropRow {
    pub region: String,
    pub soil_type: String,
    pub season: Option<String>,
    pub temperature_range: Option<String>,
    pub options: SmallVec<[String; 3]>,
}

/// Result of a crop query. Crop names are de-duplicated with first-seen
/// order preserved; `no_match` is set when nothing survived the filters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CropQueryResult {
    pub crops: Vec<String>,
    pub no_match: bool,
}

/// A region-agnostic crop hit with the season its row was recorded for.
#[derive(Debug, Clone)]
pub struct CropEntry {
    pub crop: String,
    pub season: Option<Season>,
}

/// In-memory reference table with a by-region index.
#[derive(Debug, Default)]
pub struct ReferenceDataset {
    rows: Vec<CropRow>,
    by_region: FxHashMap<String, Vec<usize>>,
}

/// Parse a temperature-range cell like "20–30°C", "18 to 25 C" or "22".
///
/// Degree symbols and C suffixes are stripped, en/em dashes and "to" are
/// treated as the separator, commas become whitespace. A single bare
/// number yields a degenerate `[v, v]` range. Returns None when the cell
/// doesn't parse.
pub fn parse_temp_range(cell: &str) -> Option<(f64, f64)> {
    let cleaned = cell
        .replace('°', "")
        .replace(['C', 'c'], "")
        .replace(['–', '—'], "-")
        .replace("to", "-")
        .replace(',', " ");
    let parts: Vec<&str> = cleaned
        .split('-')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 2 {
        let lo = parts[0].parse::<f64>().ok()?;
        let hi = parts[1].parse::<f64>().ok()?;
        return Some((lo, hi));
    }
    let v = cleaned.trim().parse::<f64>().ok()?;
    Some((v, v))
}

/// Normalize a raw header: trim, fold the degree symbol, collapse
/// whitespace runs to underscores, lowercase.
fn normalize_header(name: &str) -> String {
    let folded = name.trim().replace('°', "c");
    let mut out = String::with_capacity(folded.len());
    let mut in_ws = false;
    for ch in folded.chars() {
        if ch.is_whitespace() {
            if !in_ws && !out.is_empty() {
                out.push('_');
            }
            in_ws = true;
        } else {
            in_ws = false;
            out.extend(ch.to_lowercase());
        }
    }
    out.trim_end_matches('_').to_string()
}

/// Fetch a column as strings by its normalized header name, casting
/// non-string columns when needed.
fn utf8_column(
    df: &DataFrame,
    headers: &FxHashMap<String, String>,
    key: &str,
) -> Option<StringChunked> {
    let name = headers.get(key)?;
    let col = df.column(name.as_str()).ok()?;
    match col.str() {
        Ok(s) => Some(s.clone()),
        Err(_) => {
            let cast = col.cast(&DataType::String).ok()?;
            cast.str().ok().cloned()
        }
    }
}

impl ReferenceDataset {
    /// Build from already-materialized rows (tests, preloaded tables).
    pub fn from_rows(rows: Vec<CropRow>) -> Self {
        let mut by_region: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (idx, row) in rows.iter().enumerate() {
            let key = row.region.trim().to_lowercase();
            if !key.is_empty() {
                by_region.entry(key).or_default().push(idx);
            }
        }
        ReferenceDataset { rows, by_region }
    }

    /// Load the reference CSV and flatten it into typed rows.
    ///
    /// Headers are normalized before lookup, so "Temperature Range °C" and
    /// "temperature_range_c" address the same column.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("Failed to create CSV reader: {}", path.display()))?
            .finish()
            .with_context(|| format!("Failed to load reference CSV: {}", path.display()))?;

        let mut headers: FxHashMap<String, String> = FxHashMap::default();
        for name in df.get_column_names() {
            headers.insert(normalize_header(name.as_str()), name.to_string());
        }

        let region_col = utf8_column(&df, &headers, "region")
            .or_else(|| utf8_column(&df, &headers, "state"))
            .context("reference dataset has no region/state column")?;
        let soil_col =
            utf8_column(&df, &headers, "soil_type").context("reference dataset has no soil_type column")?;
        let season_col = utf8_column(&df, &headers, "season");
        let temp_key = headers
            .keys()
            .find(|k| k.contains("temperature_range"))
            .cloned();
        let temp_col = temp_key.and_then(|k| utf8_column(&df, &headers, &k));
        let option_cols: Vec<StringChunked> = ["option_1", "option_2", "option_3"]
            .iter()
            .filter_map(|k| utf8_column(&df, &headers, k))
            .collect();

        let clean = |v: Option<&str>| -> Option<String> {
            v.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
        };

        let mut rows = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            let region = clean(region_col.get(idx)).unwrap_or_default();
            let soil_type = clean(soil_col.get(idx)).unwrap_or_default();
            let mut options = SmallVec::new();
            for col in &option_cols {
                if let Some(opt) = clean(col.get(idx)) {
                    options.push(opt);
                }
            }
            rows.push(CropRow {
                region,
                soil_type,
                season: season_col.as_ref().and_then(|c| clean(c.get(idx))),
                temperature_range: temp_col.as_ref().and_then(|c| clean(c.get(idx))),
                options,
            });
        }

        tracing::info!(rows = rows.len(), path = %path.display(), "reference dataset loaded");
        Ok(Self::from_rows(rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn region_rows(&self, region: &str) -> Vec<&CropRow> {
        self.by_region
            .get(&region.trim().to_lowercase())
            .map(|idxs| idxs.iter().map(|&i| &self.rows[i]).collect())
            .unwrap_or_default()
    }

    /// Distinct soil labels recorded for a region, title-cased for display,
    /// in dataset order.
    pub fn soils_for_region(&self, region: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for row in self.region_rows(region) {
            if row.soil_type.is_empty() {
                continue;
            }
            let label = title_case(&row.soil_type);
            if !out.contains(&label) {
                out.push(label);
            }
        }
        out
    }

    /// Whether a soil label matches any of the region's recorded soils
    /// under the fuzzy matching contract.
    pub fn region_has_soil(&self, region: &str, soil: &str) -> bool {
        self.soils_for_region(region)
            .iter()
            .any(|label| soil_matches(soil, label))
    }

    /// Filter rows by region, soil, optional season and optional
    /// temperature, and collect de-duplicated crop options.
    pub fn query_crops(
        &self,
        region: &str,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
    ) -> CropQueryResult {
        let mut filtered = self.region_rows(region);
        filtered.retain(|row| soil_matches(soil, &row.soil_type));
        if let Some(season) = season {
            filtered.retain(|row| {
                row.season
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(season.as_str()))
                    .unwrap_or(false)
            });
        }
        let filtered = narrow_by_temperature(filtered, temperature);
        let crops = collect_options(&filtered, usize::MAX);
        CropQueryResult {
            no_match: crops.is_empty(),
            crops,
        }
    }

    /// Like `query_crops` but across all regions, capped at `limit` names.
    pub fn query_crops_global(
        &self,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
        limit: usize,
    ) -> Vec<String> {
        let filtered = self.global_soil_rows(soil, temperature, season);
        collect_options(&filtered, limit)
    }

    /// Region-agnostic crop hits with each row's season attached, capped at
    /// `limit` distinct crops. Feeds the correction block so every crop can
    /// carry its own sowing/harvest window.
    pub fn crop_entries_for_soil(
        &self,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
        limit: usize,
    ) -> Vec<CropEntry> {
        let filtered = self.global_soil_rows(soil, temperature, season);
        let mut out: Vec<CropEntry> = Vec::new();
        for row in &filtered {
            for opt in &row.options {
                if out.len() >= limit {
                    return out;
                }
                if out.iter().any(|e| e.crop == *opt) {
                    continue;
                }
                out.push(CropEntry {
                    crop: opt.clone(),
                    season: row.season.as_deref().and_then(Season::parse),
                });
            }
        }
        out
    }

    fn global_soil_rows(
        &self,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
    ) -> Vec<&CropRow> {
        let mut filtered: Vec<&CropRow> = self
            .rows
            .iter()
            .filter(|row| soil_matches(soil, &row.soil_type))
            .collect();
        if let Some(season) = season {
            filtered.retain(|row| {
                row.season
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(season.as_str()))
                    .unwrap_or(false)
            });
        }
        narrow_by_temperature(filtered, temperature)
    }
}

/// Apply the temperature predicate, keeping the input set when it would
/// narrow to nothing. Rows whose range cell doesn't parse never pass the
/// predicate but stay eligible through the widening rule.
fn narrow_by_temperature(rows: Vec<&CropRow>, temperature: Option<f64>) -> Vec<&CropRow> {
    let Some(t) = temperature else {
        return rows;
    };
    if rows.is_empty() {
        return rows;
    }
    let narrowed: Vec<&CropRow> = rows
        .iter()
        .copied()
        .filter(|row| {
            row.temperature_range
                .as_deref()
                .and_then(parse_temp_range)
                .map(|(lo, hi)| lo <= t && t <= hi)
                .unwrap_or(false)
        })
        .collect();
    if narrowed.is_empty() {
        rows
    } else {
        narrowed
    }
}

/// Collect crop options in row order, de-duplicated, capped at `limit`.
fn collect_options(rows: &[&CropRow], limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for row in rows {
        for opt in &row.options {
            if out.len() >= limit {
                return out;
            }
            if !out.contains(opt) {
                out.push(opt.clone());
            }
        }
    }
    out
}

// ============================================================================
// Dataset Provider
// ============================================================================

/// Owns the process-wide dataset singleton: loaded lazily on first use,
/// cached until process restart. Injected wherever dataset rows are read.
#[derive(Debug)]
pub struct DatasetProvider {
    path: Option<PathBuf>,
    cell: OnceCell<ReferenceDataset>,
}

impl DatasetProvider {
    /// Provider that lazily loads from a CSV file on first access.
    pub fn from_csv_path(path: impl Into<PathBuf>) -> Self {
        DatasetProvider {
            path: Some(path.into()),
            cell: OnceCell::new(),
        }
    }

    /// Provider over an already-built in-memory table.
    pub fn preloaded(dataset: ReferenceDataset) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(dataset);
        DatasetProvider { path: None, cell }
    }

    /// Provider with no source at all; every dataset operation degrades to
    /// "no match".
    pub fn unavailable() -> Self {
        DatasetProvider {
            path: None,
            cell: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Force the dataset to load now.
    pub fn load(&self) -> Result<(), AdvisorError> {
        self.dataset().map(|_| ())
    }

    /// The cached dataset, loading it on first call.
    pub fn dataset(&self) -> Result<&ReferenceDataset, AdvisorError> {
        self.cell.get_or_try_init(|| {
            let path = self.path.as_deref().ok_or_else(|| {
                AdvisorError::DatasetUnavailable("no dataset source configured".to_string())
            })?;
            ReferenceDataset::load_csv(path)
                .map_err(|e| AdvisorError::DatasetUnavailable(format!("{:#}", e)))
        })
    }
}

// ============================================================================
// Query Engine
// ============================================================================

/// Read-only query surface over the provider. Dataset unavailability is
/// absorbed here: lookups log the condition and return empty/no-match
/// results so a request never aborts on a missing table.
#[derive(Clone)]
pub struct CropQueryEngine {
    provider: Arc<DatasetProvider>,
}

impl CropQueryEngine {
    pub fn new(provider: Arc<DatasetProvider>) -> Self {
        CropQueryEngine { provider }
    }

    pub fn provider(&self) -> &Arc<DatasetProvider> {
        &self.provider
    }

    fn dataset(&self) -> Option<&ReferenceDataset> {
        match self.provider.dataset() {
            Ok(ds) => Some(ds),
            Err(e) => {
                tracing::warn!(error = %e, "dataset query degraded to no-match");
                None
            }
        }
    }

    pub fn soils_for_region(&self, region: &str) -> Vec<String> {
        self.dataset()
            .map(|ds| ds.soils_for_region(region))
            .unwrap_or_default()
    }

    pub fn region_has_soil(&self, region: &str, soil: &str) -> bool {
        self.dataset()
            .map(|ds| ds.region_has_soil(region, soil))
            .unwrap_or(false)
    }

    pub fn query_crops(
        &self,
        region: &str,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
    ) -> CropQueryResult {
        self.dataset()
            .map(|ds| ds.query_crops(region, soil, temperature, season))
            .unwrap_or(CropQueryResult {
                crops: Vec::new(),
                no_match: true,
            })
    }

    pub fn query_crops_global(
        &self,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
        limit: usize,
    ) -> Vec<String> {
        self.dataset()
            .map(|ds| ds.query_crops_global(soil, temperature, season, limit))
            .unwrap_or_default()
    }

    pub fn crop_entries_for_soil(
        &self,
        soil: &str,
        temperature: Option<f64>,
        season: Option<Season>,
        limit: usize,
    ) -> Vec<CropEntry> {
        self.dataset()
            .map(|ds| ds.crop_entries_for_soil(soil, temperature, season, limit))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        region: &str,
        soil: &str,
        season: Option<&str>,
        temp: Option<&str>,
        options: &[&str],
    ) -> CropRow {
        CropRow {
            region: region.to_string(),
            soil_type: soil.to_string(),
            season: season.map(String::from),
            temperature_range: temp.map(String::from),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn sample() -> ReferenceDataset {
        ReferenceDataset::from_rows(vec![
            row(
                "Punjab",
                "Black",
                Some("Kharif"),
                Some("20–30°C"),
                &["Rice (Paddy)", "Maize"],
            ),
            row(
                "Punjab",
                "Black",
                Some("Kharif"),
                Some("25–35°C"),
                &["Cotton", "Maize"],
            ),
            row(
                "Punjab",
                "Alluvial",
                Some("Rabi"),
                Some("10 to 20 C"),
                &["Wheat", "Mustard"],
            ),
            row("Kerala", "Laterite", Some("Kharif"), None, &["Coconut"]),
            row(
                "Maharashtra",
                "Black",
                Some("Rabi"),
                Some("15-25"),
                &["Jowar", "Gram"],
            ),
        ])
    }

    #[test]
    fn test_parse_temp_range_shapes() {
        assert_eq!(parse_temp_range("20-30"), Some((20.0, 30.0)));
        assert_eq!(parse_temp_range("20–30°C"), Some((20.0, 30.0)));
        assert_eq!(parse_temp_range("18 to 25 C"), Some((18.0, 25.0)));
        assert_eq!(parse_temp_range("22"), Some((22.0, 22.0)));
        assert_eq!(parse_temp_range("20-30, 25-35"), None);
        assert_eq!(parse_temp_range("warm"), None);
        assert_eq!(parse_temp_range(""), None);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Temperature Range °C "), "temperature_range_cc");
        assert_eq!(normalize_header("Soil Type"), "soil_type");
        assert_eq!(normalize_header("option_1"), "option_1");
    }

    #[test]
    fn test_soils_for_region() {
        let ds = sample();
        assert_eq!(ds.soils_for_region("Punjab"), vec!["Black", "Alluvial"]);
        assert_eq!(ds.soils_for_region("punjab"), vec!["Black", "Alluvial"]);
        assert!(ds.soils_for_region("Mars").is_empty());
    }

    #[test]
    fn test_region_has_soil_uses_fuzzy_contract() {
        let ds = sample();
        assert!(ds.region_has_soil("Punjab", "Black"));
        // synonym folds to black
        assert!(ds.region_has_soil("Punjab", "Regur"));
        assert!(ds.region_has_soil("Punjab", "black cotton soil"));
        assert!(!ds.region_has_soil("Punjab", "Laterite"));
    }

    #[test]
    fn test_query_crops_dedup_and_order() {
        let ds = sample();
        let result = ds.query_crops("Punjab", "Black", None, Some(Season::Kharif));
        assert!(!result.no_match);
        assert_eq!(result.crops, vec!["Rice (Paddy)", "Maize", "Cotton"]);
    }

    #[test]
    fn test_query_crops_temperature_narrows() {
        let ds = sample();
        let result = ds.query_crops("Punjab", "Black", Some(33.0), Some(Season::Kharif));
        assert_eq!(result.crops, vec!["Cotton", "Maize"]);
    }

    #[test]
    fn test_query_crops_temperature_never_widens_to_zero() {
        let ds = sample();
        // 50°C passes no band; the un-narrowed set must be kept
        let narrowed = ds.query_crops("Punjab", "Black", Some(50.0), Some(Season::Kharif));
        let plain = ds.query_crops("Punjab", "Black", None, Some(Season::Kharif));
        assert_eq!(narrowed.crops, plain.crops);
        assert!(!narrowed.no_match);
    }

    #[test]
    fn test_query_crops_unparsable_range_stays_eligible() {
        let ds = sample();
        // Kerala row has no temperature range; it survives via widening
        let result = ds.query_crops("Kerala", "Laterite", Some(28.0), Some(Season::Kharif));
        assert_eq!(result.crops, vec!["Coconut"]);
    }

    #[test]
    fn test_query_crops_no_match() {
        let ds = sample();
        let result = ds.query_crops("Punjab", "Laterite", None, None);
        assert!(result.no_match);
        assert!(result.crops.is_empty());
        let result = ds.query_crops("Punjab", "Black", None, Some(Season::Zaid));
        assert!(result.no_match);
    }

    #[test]
    fn test_query_crops_global_cap() {
        let ds = sample();
        let crops = ds.query_crops_global("Black", None, None, 3);
        assert_eq!(crops, vec!["Rice (Paddy)", "Maize", "Cotton"]);
        let crops = ds.query_crops_global("Black", None, None, 10);
        assert_eq!(crops, vec!["Rice (Paddy)", "Maize", "Cotton", "Jowar", "Gram"]);
    }

    #[test]
    fn test_crop_entries_carry_seasons() {
        let ds = sample();
        let entries = ds.crop_entries_for_soil("Black", None, None, 10);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].crop, "Rice (Paddy)");
        assert_eq!(entries[0].season, Some(Season::Kharif));
        assert_eq!(entries[3].crop, "Jowar");
        assert_eq!(entries[3].season, Some(Season::Rabi));
    }

    #[test]
    fn test_provider_lifecycle() {
        let provider = DatasetProvider::preloaded(sample());
        assert!(provider.is_loaded());
        assert!(provider.load().is_ok());
        assert_eq!(provider.dataset().unwrap().len(), 5);

        let missing = DatasetProvider::unavailable();
        assert!(!missing.is_loaded());
        assert!(matches!(
            missing.dataset(),
            Err(AdvisorError::DatasetUnavailable(_))
        ));
    }

    #[test]
    fn test_engine_absorbs_unavailable_dataset() {
        let engine = CropQueryEngine::new(Arc::new(DatasetProvider::unavailable()));
        assert!(engine.soils_for_region("Punjab").is_empty());
        assert!(!engine.region_has_soil("Punjab", "Black"));
        let result = engine.query_crops("Punjab", "Black", None, None);
        assert!(result.no_match);
        assert!(engine.query_crops_global("Black", None, None, 3).is_empty());
    }

    #[test]
    fn test_from_rows_smallvec() {
        let r = row("X", "Clay", None, None, &["A", "B", "C"]);
        let _: &SmallVec<[String; 3]> = &r.options;
        assert_eq!(r.options.len(), 3);
    }
}
