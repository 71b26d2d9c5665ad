//! Soil Name Normalization and Fuzzy Matching
//!
//! Farmer-typed soil names arrive in every imaginable spelling ("Regur",
//! "black cotton soil", "sandy-loam"). This module canonicalizes them into
//! a small stable vocabulary and scores similarity between two names.
//!
//! The matching contract used everywhere soil labels are compared is
//! three-tiered: exact normalized equality, then substring containment,
//! then token-overlap similarity >= 0.5.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Synonym table applied after stopword removal, earlier entries preferred.
///
/// "sandy loam" maps to itself so the combined pattern consumes the whole
/// phrase before the bare "loam" entry can split it into "sandy loamy".
const SYNONYMS: &[(&str, &str)] = &[
    ("black cotton soil", "black"),
    ("black cotton", "black"),
    ("black soil", "black"),
    ("alluvial soil", "alluvial"),
    ("alluvium", "alluvial"),
    ("sandy-loam", "sandy loam"),
    ("sandyloam", "sandy loam"),
    ("sandy loam", "sandy loam"),
    ("red soil", "red"),
    ("red-soil", "red"),
    ("regur", "black"),
    ("clayey", "clay"),
    ("loam", "loamy"),
];

static STOPWORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:soil|soils|type)\b").unwrap());

/// Everything except lowercase alphanumerics, whitespace and hyphen.
static PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s\-]").unwrap());

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static SYNONYM_RE: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<String> = SYNONYMS
        .iter()
        .map(|(key, _)| regex::escape(key))
        .collect();
    Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).unwrap()
});

/// Canonicalize a free-form soil name.
///
/// Lowercases, strips punctuation except hyphen, removes the stopwords
/// "soil"/"soils"/"type", folds synonyms, and collapses whitespace.
/// Empty input yields the empty string. Idempotent.
pub fn normalize(s: &str) -> String {
    let lowered = s.trim().to_lowercase();
    if lowered.is_empty() {
        return String::new();
    }
    let no_stop = STOPWORD_RE.replace_all(&lowered, " ");
    let no_punct = PUNCT_RE.replace_all(&no_stop, " ");
    let collapsed = WS_RE.replace_all(no_punct.trim(), " ").into_owned();

    let folded = SYNONYM_RE.replace_all(&collapsed, |caps: &regex::Captures| {
        let key = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        SYNONYMS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or(key)
            .to_string()
    });

    WS_RE.replace_all(folded.trim(), " ").into_owned()
}

/// Token-overlap similarity in [0, 1]: intersection size over the larger
/// token-set size. Returns 0.0 if either input normalizes to empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    let ta: HashSet<&str> = na.split_whitespace().collect();
    let tb: HashSet<&str> = nb.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    inter as f64 / ta.len().max(tb.len()) as f64
}

/// Three-tier soil label comparison: exact normalized equality, substring
/// containment either way, or token similarity >= 0.5.
pub fn soil_matches(a: &str, b: &str) -> bool {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb {
        return true;
    }
    if na.contains(&nb) || nb.contains(&na) {
        return true;
    }
    similarity(a, b) >= 0.5
}

/// Title-case each whitespace-separated word for display.
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append the word "soil" to a label unless it is already present.
pub fn display_soil_label(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.to_lowercase().contains("soil") {
        trimmed.to_string()
    } else {
        format!("{} soil", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_synonym_folding() {
        assert_eq!(normalize("Black Cotton Soil"), "black");
        assert_eq!(normalize("Regur"), "black");
        assert_eq!(normalize("black soil"), "black");
        assert_eq!(normalize("Alluvium"), "alluvial");
        assert_eq!(normalize("alluvial soil"), "alluvial");
        assert_eq!(normalize("Loam"), "loamy");
        assert_eq!(normalize("Clayey"), "clay");
        assert_eq!(normalize("Red Soil"), "red");
    }

    #[test]
    fn test_normalize_sandy_loam_variants() {
        assert_eq!(normalize("Sandy Loam"), "sandy loam");
        assert_eq!(normalize("sandyloam"), "sandy loam");
        assert_eq!(normalize("sandy-loam"), "sandy loam");
    }

    #[test]
    fn test_normalize_empty_and_punctuation() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("Black, (cotton) soil!"), "black");
    }

    #[test]
    fn test_normalize_idempotent() {
        for input in [
            "Black Cotton Soil",
            "Regur",
            "sandyloam",
            "Sandy Loam",
            "Loam",
            "red-soil",
            "weird unknown dirt",
        ] {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_similarity_bounds() {
        assert_relative_eq!(similarity("", "black"), 0.0);
        assert_relative_eq!(similarity("black", "black"), 1.0);
        assert_relative_eq!(similarity("sandy loam", "sandy clay"), 0.5);
        assert_relative_eq!(similarity("clay", "sandy"), 0.0);
    }

    #[test]
    fn test_soil_matches_tiers() {
        // exact after normalization
        assert!(soil_matches("Regur", "Black"));
        // substring
        assert!(soil_matches("Sandy Loam", "sandyloam"));
        assert!(soil_matches("loamy", "sandy loamy"));
        // fuzzy: one shared token out of two on each side is exactly 0.5
        assert!(soil_matches("red sandy", "red clay"));
        assert!(!soil_matches("Clay", "Sandy"));
        assert!(!soil_matches("", "Clay"));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("black"), "Black");
        assert_eq!(title_case("sandy loam"), "Sandy Loam");
        assert_eq!(title_case("ALLUVIAL"), "Alluvial");
    }

    #[test]
    fn test_display_soil_label() {
        assert_eq!(display_soil_label("Black"), "Black soil");
        assert_eq!(display_soil_label("black soil"), "black soil");
        assert_eq!(display_soil_label(""), "");
    }
}
