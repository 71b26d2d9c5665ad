//! Soil Evidence Resolution
//!
//! Turns heterogeneous, unreliable evidence — a farmer-typed soil name, a
//! local image heuristic, geocoded composition samples, the reference
//! dataset — into one `SoilAssessment` with a provenance tag.
//!
//! The resolver is a strictly ordered fallback chain:
//!
//! 1. declared soil checked against the region's known soils (verified
//!    match terminates the chain),
//! 2. image heuristic (agreement with the declared soil also terminates;
//!    a lone image label is a hypothesis, not a verification),
//! 3. geocoded composition lookup (may overwrite an unverified declared
//!    label, never an image label),
//! 4. "Unknown".
//!
//! Every external source is a capability returning an absent value on
//! failure; a dead geocoder or composition provider silently drops its
//! step instead of failing the request.

use serde::Serialize;

use crate::composition::classify_composition;
use crate::dataset::CropQueryEngine;
use crate::image::{classify_soil_image, ImageDecoder};
use crate::normalize::normalize;

/// Tokens a farmer types when they do not actually know their soil.
const UNKNOWN_TOKENS: &[&str] = &["don't know", "dont know", "unknown", "na", "n/a"];

/// True when a declared soil string carries real information.
pub fn is_meaningful_soil(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !UNKNOWN_TOKENS.contains(&lowered.as_str())
}

/// Where the resolved soil label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoilSource {
    FarmerVerified,
    FarmerUnverified,
    Image,
    ImageFarmerVerified,
    CompositionInferred,
    Unknown,
    Error,
}

/// Geographic point from a geocoding collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Resolves a region code to a point. Two providers are normally
/// registered and tried in priority order.
pub trait Geocoder: Send + Sync {
    fn geocode(&self, region_code: &str) -> Option<LatLon>;
}

/// Raw composition percentiles for a point, each property possibly
/// reported at several depths.
#[derive(Debug, Clone, Default)]
pub struct CompositionSample {
    pub clay: Vec<f64>,
    pub sand: Vec<f64>,
    pub silt: Vec<f64>,
    pub ph: Vec<f64>,
    pub organic_carbon: Vec<f64>,
}

/// Queries gridded soil-composition data for a point.
pub trait CompositionProvider: Send + Sync {
    fn composition(&self, point: LatLon) -> Option<CompositionSample>;
}

/// Numeric evidence gathered along the way, all optional.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SoilDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clay_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sand_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silt_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organic_carbon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latlon: Option<LatLon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_guess: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farmer_reported: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One resolved soil classification per request. Immutable once built.
///
/// Invariant: `verified` is true only for the `FarmerVerified` and
/// `ImageFarmerVerified` sources.
#[derive(Debug, Clone, Serialize)]
pub struct SoilAssessment {
    pub soil_type: String,
    pub source: SoilSource,
    pub verified: bool,
    pub details: SoilDetails,
    pub expected_soils: Vec<String>,
}

impl SoilAssessment {
    /// Terminal containment state for a resolver-level failure: the error
    /// message is preserved but the request still gets an assessment.
    pub fn from_error(message: impl Into<String>) -> Self {
        SoilAssessment {
            soil_type: "Unknown".to_string(),
            source: SoilSource::Error,
            verified: false,
            details: SoilDetails {
                error: Some(message.into()),
                ..SoilDetails::default()
            },
            expected_soils: Vec::new(),
        }
    }
}

/// Inputs for one resolution run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoilEvidence<'a> {
    /// Administrative region (state) for dataset lookups.
    pub region: Option<&'a str>,
    /// Geocodable region code (pincode).
    pub region_code: Option<&'a str>,
    /// Farmer-typed soil name, if any.
    pub declared_soil: Option<&'a str>,
    /// Raw uploaded soil photo, if any.
    pub image: Option<&'a [u8]>,
}

/// Mean of the reported values for one property; None when empty.
fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// The fallback-chain orchestrator. Collaborators are optional; whatever
/// is missing simply contributes no evidence.
pub struct EvidenceResolver {
    query: CropQueryEngine,
    geocoders: Vec<Box<dyn Geocoder>>,
    composition: Option<Box<dyn CompositionProvider>>,
    decoder: Option<Box<dyn ImageDecoder>>,
}

impl EvidenceResolver {
    pub fn new(query: CropQueryEngine) -> Self {
        EvidenceResolver {
            query,
            geocoders: Vec::new(),
            composition: None,
            decoder: None,
        }
    }

    /// Register a geocoding provider; earlier registrations win.
    pub fn with_geocoder(mut self, geocoder: Box<dyn Geocoder>) -> Self {
        self.geocoders.push(geocoder);
        self
    }

    pub fn with_composition(mut self, provider: Box<dyn CompositionProvider>) -> Self {
        self.composition = Some(provider);
        self
    }

    pub fn with_image_decoder(mut self, decoder: Box<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Run the image heuristic on its own (used by the request layer to
    /// pre-classify an image when no soil was declared).
    pub fn classify_image(&self, bytes: &[u8]) -> Option<&'static str> {
        classify_soil_image(bytes, self.decoder.as_deref())
    }

    /// Resolve all supplied evidence into one assessment.
    pub fn resolve(&self, evidence: &SoilEvidence<'_>) -> SoilAssessment {
        let declared = evidence
            .declared_soil
            .map(str::trim)
            .filter(|s| is_meaningful_soil(s));

        let mut soil_type: Option<String> = None;
        let mut source: Option<SoilSource> = None;
        let mut details = SoilDetails::default();
        let mut expected_soils: Vec<String> = Vec::new();

        // Step 1: farmer-declared label, checked against the region's
        // known soils when a region is available.
        if let Some(declared) = declared {
            if let Some(region) = evidence.region {
                expected_soils = self.query.soils_for_region(region);
                if self.query.region_has_soil(region, declared) {
                    return SoilAssessment {
                        soil_type: declared.to_string(),
                        source: SoilSource::FarmerVerified,
                        verified: true,
                        details,
                        expected_soils,
                    };
                }
                tracing::debug!(declared, region, "declared soil not in region dataset");
            }
            soil_type = Some(declared.to_string());
            source = Some(SoilSource::FarmerUnverified);
        }

        // Step 2: image heuristic. Agreement with the declared label
        // verifies it; a lone image label is just the working hypothesis.
        if let Some(bytes) = evidence.image {
            if let Some(label) = self.classify_image(bytes) {
                if let Some(declared) = declared {
                    if normalize(declared) == normalize(label) {
                        return SoilAssessment {
                            soil_type: declared.to_string(),
                            source: SoilSource::ImageFarmerVerified,
                            verified: true,
                            details,
                            expected_soils,
                        };
                    }
                }
                details.image_guess = Some(label.to_string());
                soil_type = Some(label.to_string());
                source = Some(SoilSource::Image);
            } else {
                tracing::debug!("image supplied but heuristic produced no label");
            }
        }

        // Step 3: geocoded composition lookup.
        if let Some(code) = evidence.region_code {
            if let Some(point) = self.geocode(code) {
                if let Some(sample) = self
                    .composition
                    .as_ref()
                    .and_then(|p| p.composition(point))
                {
                    let clay = average(&sample.clay);
                    let sand = average(&sample.sand);
                    let silt = average(&sample.silt);
                    let inferred = classify_composition(clay, sand, silt);

                    if source == Some(SoilSource::FarmerUnverified) {
                        let current = soil_type.clone().unwrap_or_default();
                        if normalize(&current) != normalize(inferred) {
                            // Composition contradicts the unverified claim:
                            // the inferred label wins, the claim moves to
                            // the details for the correction block.
                            details.farmer_reported = Some(current);
                            soil_type = Some(inferred.to_string());
                            source = Some(SoilSource::CompositionInferred);
                            if let Some(region) = evidence.region {
                                expected_soils = self.query.soils_for_region(region);
                            }
                        }
                    } else if soil_type.is_none() {
                        soil_type = Some(inferred.to_string());
                        source = Some(SoilSource::CompositionInferred);
                    }
                    // An image-sourced label from step 2 is kept as-is.

                    details.clay_pct = clay;
                    details.sand_pct = sand;
                    details.silt_pct = silt;
                    details.ph = average(&sample.ph);
                    details.organic_carbon = average(&sample.organic_carbon);
                    details.latlon = Some(point);
                } else {
                    tracing::debug!(?point, "no composition data for point");
                }
            } else {
                tracing::debug!(code, "all geocoders declined the region code");
            }
        }

        // Step 4: nothing produced a label.
        let (soil_type, source) = match (soil_type, source) {
            (Some(soil), Some(source)) => (soil, source),
            _ => {
                if expected_soils.is_empty() {
                    if let Some(region) = evidence.region {
                        expected_soils = self.query.soils_for_region(region);
                    }
                }
                ("Unknown".to_string(), SoilSource::Unknown)
            }
        };

        SoilAssessment {
            soil_type,
            source,
            verified: false,
            details,
            expected_soils,
        }
    }

    fn geocode(&self, region_code: &str) -> Option<LatLon> {
        self.geocoders.iter().find_map(|g| g.geocode(region_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CropRow, DatasetProvider, ReferenceDataset};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn engine() -> CropQueryEngine {
        let rows = vec![
            CropRow {
                region: "Punjab".to_string(),
                soil_type: "Black".to_string(),
                season: Some("Kharif".to_string()),
                temperature_range: Some("20-30".to_string()),
                options: ["Rice (Paddy)", "Maize"].iter().map(|s| s.to_string()).collect(),
            },
            CropRow {
                region: "Punjab".to_string(),
                soil_type: "Alluvial".to_string(),
                season: Some("Rabi".to_string()),
                temperature_range: None,
                options: ["Wheat"].iter().map(|s| s.to_string()).collect(),
            },
        ];
        CropQueryEngine::new(Arc::new(DatasetProvider::preloaded(
            ReferenceDataset::from_rows(rows),
        )))
    }

    #[derive(Clone, Default)]
    struct CountingGeocoder {
        calls: Arc<AtomicUsize>,
        answer: Option<LatLon>,
    }

    impl CountingGeocoder {
        fn answering(lat: f64, lon: f64) -> Self {
            CountingGeocoder {
                calls: Arc::new(AtomicUsize::new(0)),
                answer: Some(LatLon { lat, lon }),
            }
        }
    }

    impl Geocoder for CountingGeocoder {
        fn geocode(&self, _code: &str) -> Option<LatLon> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    struct FixedComposition(CompositionSample);

    impl CompositionProvider for FixedComposition {
        fn composition(&self, _point: LatLon) -> Option<CompositionSample> {
            Some(self.0.clone())
        }
    }

    struct NoComposition;

    impl CompositionProvider for NoComposition {
        fn composition(&self, _point: LatLon) -> Option<CompositionSample> {
            None
        }
    }

    fn clayey_sample() -> CompositionSample {
        CompositionSample {
            clay: vec![42.0, 46.0],
            sand: vec![20.0],
            silt: vec![30.0],
            ph: vec![6.0, 7.0],
            organic_carbon: vec![1.25],
        }
    }

    #[test]
    fn test_meaningful_soil_tokens() {
        assert!(is_meaningful_soil("Black"));
        assert!(!is_meaningful_soil(""));
        assert!(!is_meaningful_soil("  "));
        assert!(!is_meaningful_soil("don't know"));
        assert!(!is_meaningful_soil("DONT KNOW"));
        assert!(!is_meaningful_soil("N/A"));
        assert!(!is_meaningful_soil("unknown"));
    }

    #[test]
    fn test_verified_farmer_claim_short_circuits() {
        let geocoder = CountingGeocoder::answering(30.9, 75.8);
        // "Regur" normalizes to "black", which Punjab's dataset lists
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(geocoder.clone()))
            .with_composition(Box::new(FixedComposition(clayey_sample())));
        let assessment = resolver.resolve(&SoilEvidence {
            region: Some("Punjab"),
            region_code: Some("141001"),
            declared_soil: Some("Regur"),
            image: None,
        });

        assert_eq!(assessment.source, SoilSource::FarmerVerified);
        assert!(assessment.verified);
        assert_eq!(assessment.soil_type, "Regur");
        assert_eq!(assessment.expected_soils, vec!["Black", "Alluvial"]);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0, "must short-circuit");
    }

    #[test]
    fn test_unverified_claim_overwritten_by_conflicting_composition() {
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(CountingGeocoder::answering(30.9, 75.8)))
            .with_composition(Box::new(FixedComposition(clayey_sample())));
        let assessment = resolver.resolve(&SoilEvidence {
            region: Some("Punjab"),
            region_code: Some("141001"),
            declared_soil: Some("Laterite"),
            image: None,
        });

        assert_eq!(assessment.source, SoilSource::CompositionInferred);
        assert_eq!(assessment.soil_type, "Clay");
        assert!(!assessment.verified);
        assert_eq!(assessment.details.farmer_reported.as_deref(), Some("Laterite"));
        assert_eq!(assessment.details.clay_pct, Some(44.0));
        assert_eq!(assessment.details.ph, Some(6.5));
        assert_eq!(
            assessment.details.latlon,
            Some(LatLon { lat: 30.9, lon: 75.8 })
        );
        assert_eq!(assessment.expected_soils, vec!["Black", "Alluvial"]);
    }

    #[test]
    fn test_unverified_claim_agreeing_with_composition_is_kept() {
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(CountingGeocoder::answering(30.9, 75.8)))
            .with_composition(Box::new(FixedComposition(clayey_sample())));
        // "Clayey" normalizes to "clay", agreeing with the inferred label
        let assessment = resolver.resolve(&SoilEvidence {
            region: Some("Punjab"),
            region_code: Some("141001"),
            declared_soil: Some("Clayey"),
            image: None,
        });

        assert_eq!(assessment.source, SoilSource::FarmerUnverified);
        assert_eq!(assessment.soil_type, "Clayey");
        assert!(assessment.details.farmer_reported.is_none());
        // composition details are recorded regardless of which label wins
        assert_eq!(assessment.details.clay_pct, Some(44.0));
    }

    #[test]
    fn test_secondary_geocoder_used_when_primary_declines() {
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(CountingGeocoder::default()))
            .with_geocoder(Box::new(CountingGeocoder::answering(10.0, 76.0)))
            .with_composition(Box::new(FixedComposition(CompositionSample {
                sand: vec![80.0],
                ..Default::default()
            })));
        let assessment = resolver.resolve(&SoilEvidence {
            region: None,
            region_code: Some("682001"),
            declared_soil: None,
            image: None,
        });

        assert_eq!(assessment.source, SoilSource::CompositionInferred);
        assert_eq!(assessment.soil_type, "Sandy");
    }

    struct LabelDecoder(&'static str);

    impl crate::image::ImageDecoder for LabelDecoder {
        fn decode_thumbnail(&self, _bytes: &[u8], _edge: u32) -> Option<Vec<[u8; 3]>> {
            // pixel buffers chosen so classify_pixels yields the label
            match self.0 {
                "Sandy" => Some(vec![[200, 195, 180]; 16]),
                "Clay" => Some(vec![[120, 80, 60]; 16]),
                _ => Some(vec![[90, 120, 80]; 16]),
            }
        }
    }

    #[test]
    fn test_image_agreeing_with_declared_soil_verifies() {
        let geocoder = CountingGeocoder::answering(30.9, 75.8);
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(geocoder.clone()))
            .with_composition(Box::new(FixedComposition(clayey_sample())))
            .with_image_decoder(Box::new(LabelDecoder("Clay")));
        // "Clayey" normalizes to "clay", matching the image label; Punjab's
        // dataset does not list clay, so step 1 leaves the claim unverified
        let assessment = resolver.resolve(&SoilEvidence {
            region: Some("Punjab"),
            region_code: Some("141001"),
            declared_soil: Some("Clayey"),
            image: Some(b"photo"),
        });

        assert_eq!(assessment.source, SoilSource::ImageFarmerVerified);
        assert!(assessment.verified);
        assert_eq!(assessment.soil_type, "Clayey");
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0, "must short-circuit");
    }

    #[test]
    fn test_image_label_survives_composition_evidence() {
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(CountingGeocoder::answering(30.9, 75.8)))
            .with_composition(Box::new(FixedComposition(clayey_sample())))
            .with_image_decoder(Box::new(LabelDecoder("Sandy")));
        let assessment = resolver.resolve(&SoilEvidence {
            region: None,
            region_code: Some("141001"),
            declared_soil: None,
            image: Some(b"photo"),
        });

        // composition says clay but the image label from step 2 is kept;
        // the numeric details are still recorded
        assert_eq!(assessment.source, SoilSource::Image);
        assert_eq!(assessment.soil_type, "Sandy");
        assert!(!assessment.verified);
        assert_eq!(assessment.details.image_guess.as_deref(), Some("Sandy"));
        assert_eq!(assessment.details.clay_pct, Some(44.0));
    }

    #[test]
    fn test_failed_image_decode_contributes_nothing() {
        struct NoDecode;
        impl crate::image::ImageDecoder for NoDecode {
            fn decode_thumbnail(&self, _bytes: &[u8], _edge: u32) -> Option<Vec<[u8; 3]>> {
                None
            }
        }
        let resolver = EvidenceResolver::new(engine()).with_image_decoder(Box::new(NoDecode));
        let assessment = resolver.resolve(&SoilEvidence {
            region: Some("Punjab"),
            region_code: None,
            declared_soil: None,
            image: Some(b"corrupt"),
        });

        assert_eq!(assessment.source, SoilSource::Unknown);
        assert!(assessment.details.image_guess.is_none());
    }

    #[test]
    fn test_unknown_fallback_populates_expected_soils() {
        let resolver = EvidenceResolver::new(engine())
            .with_geocoder(Box::new(CountingGeocoder::default()))
            .with_composition(Box::new(NoComposition));
        let assessment = resolver.resolve(&SoilEvidence {
            region: Some("Punjab"),
            region_code: Some("141001"),
            declared_soil: Some("n/a"),
            image: None,
        });

        assert_eq!(assessment.source, SoilSource::Unknown);
        assert_eq!(assessment.soil_type, "Unknown");
        assert!(!assessment.verified);
        assert_eq!(assessment.expected_soils, vec!["Black", "Alluvial"]);

        let assessment = resolver.resolve(&SoilEvidence::default());
        assert_eq!(assessment.source, SoilSource::Unknown);
        assert!(assessment.expected_soils.is_empty());
    }

    #[test]
    fn test_error_assessment_shape() {
        let assessment = SoilAssessment::from_error("resolver blew up");
        assert_eq!(assessment.source, SoilSource::Error);
        assert_eq!(assessment.soil_type, "Unknown");
        assert!(!assessment.verified);
        assert_eq!(assessment.details.error.as_deref(), Some("resolver blew up"));
    }
}
