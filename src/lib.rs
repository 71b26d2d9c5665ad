//! Crop Advisor Core
//!
//! Advises a farmer on crops and fertilizer given a region, a reported or
//! inferred soil type, a date, and a free-text question.
//!
//! Module layout:
//! - `normalize`: soil-name canonicalization and fuzzy matching
//! - `composition`: particle-fraction soil classification
//! - `dataset`: reference dataset loading and crop queries (Polars)
//! - `evidence`: the soil evidence fallback chain
//! - `image`: color-heuristic image classification
//! - `season`: cropping-calendar derivation and query analysis
//! - `advice`: generative advice with a deterministic template fallback
//! - `service`: per-request orchestration
//!
//! External collaborators (geocoding, composition data, weather, the text
//! generator, chat persistence, image decoding) are traits; each absent or
//! failing collaborator degrades its pipeline step to "no evidence".

pub mod advice;
pub mod composition;
pub mod dataset;
pub mod error;
pub mod evidence;
pub mod image;
pub mod normalize;
pub mod season;
pub mod service;

// Re-export commonly used types
pub use advice::{AdviceSynthesizer, GenerativeModel};
pub use composition::classify_composition;
pub use dataset::{CropQueryEngine, CropQueryResult, DatasetProvider, ReferenceDataset};
pub use error::AdvisorError;
pub use evidence::{
    CompositionProvider, EvidenceResolver, Geocoder, LatLon, SoilAssessment, SoilSource,
};
pub use image::ImageDecoder;
pub use season::{Season, SeasonContext};
pub use service::{
    AdvisorService, ChatStore, Recommendation, RecommendRequest, WeatherProvider, WeatherReport,
};
