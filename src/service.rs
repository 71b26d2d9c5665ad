//! Request Orchestration
//!
//! Wires one recommendation request through the pipeline: validate input,
//! resolve the soil evidence, fetch a weather snapshot, derive the season
//! context, query candidate crops, synthesize advice, and best-effort
//! record the exchange. Everything past validation degrades instead of
//! failing: the caller always gets a response, at worst a low-confidence
//! one.

use serde::{Deserialize, Serialize};

use crate::advice::{AdviceRequest, AdviceSynthesizer};
use crate::dataset::{CropQueryEngine, CropQueryResult};
use crate::error::AdvisorError;
use crate::evidence::{
    is_meaningful_soil, EvidenceResolver, SoilAssessment, SoilEvidence, SoilSource,
};
use crate::season::{Season, SeasonContext};

/// One advisory request as handed over by the transport layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendRequest {
    /// Administrative region (state), the dataset's primary key.
    pub region: String,
    /// Geocodable region code (pincode), 6 digits.
    pub region_code: String,
    /// Request date in any of the accepted layouts.
    pub date: String,
    pub city: Option<String>,
    /// Farmer-typed soil name, if any.
    pub declared_soil: Option<String>,
    /// Raw uploaded soil photo, if any.
    pub soil_image: Option<Vec<u8>>,
    /// Free-text question.
    pub query: Option<String>,
}

/// Current conditions snapshot, all fields best-effort.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WeatherReport {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub conditions: Option<String>,
    pub ph: Option<f64>,
    pub moisture: Option<f64>,
    pub source: Option<String>,
}

/// Fetches current conditions for a region code. `None` means the
/// provider is unreachable or had nothing.
pub trait WeatherProvider: Send + Sync {
    fn weather(&self, region_code: &str) -> Option<WeatherReport>;
}

/// Persists one question/answer exchange. Strictly best-effort: a failure
/// is logged and never affects the response.
pub trait ChatStore: Send + Sync {
    fn record(&self, region: &str, query: &str, response: &str) -> anyhow::Result<()>;
}

/// The full response for one request.
#[derive(Debug, Serialize)]
pub struct Recommendation {
    pub soil_type: String,
    pub soil_details: SoilAssessment,
    pub image_inferred: Option<String>,
    pub season: Season,
    pub season_months: String,
    pub weather: WeatherReport,
    pub recommended_crops: CropQueryResult,
    pub advice: String,
}

/// Top-level advisory pipeline with its injected collaborators.
pub struct AdvisorService {
    query: CropQueryEngine,
    resolver: EvidenceResolver,
    synthesizer: AdviceSynthesizer,
    weather: Option<Box<dyn WeatherProvider>>,
    chat: Option<Box<dyn ChatStore>>,
}

impl AdvisorService {
    pub fn new(
        query: CropQueryEngine,
        resolver: EvidenceResolver,
        synthesizer: AdviceSynthesizer,
    ) -> Self {
        AdvisorService {
            query,
            resolver,
            synthesizer,
            weather: None,
            chat: None,
        }
    }

    pub fn with_weather(mut self, provider: Box<dyn WeatherProvider>) -> Self {
        self.weather = Some(provider);
        self
    }

    pub fn with_chat_store(mut self, store: Box<dyn ChatStore>) -> Self {
        self.chat = Some(store);
        self
    }

    /// Handle one request end to end.
    pub fn recommend(&self, request: &RecommendRequest) -> Result<Recommendation, AdvisorError> {
        let code = request.region_code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(AdvisorError::Validation(
                "pincode is required and must be 6 digits".to_string(),
            ));
        }
        let season = SeasonContext::from_date(&request.date)?;

        let declared = request
            .declared_soil
            .as_deref()
            .map(str::trim)
            .filter(|s| is_meaningful_soil(s));

        // No declared soil but a photo: run the local heuristic first and
        // let its label stand in as the reported soil. The image is then
        // not handed to the resolver a second time.
        let mut image_inferred: Option<&'static str> = None;
        if declared.is_none() {
            if let Some(bytes) = request.soil_image.as_deref() {
                image_inferred = self.resolver.classify_image(bytes);
            }
        }
        let reported = declared.or(image_inferred);
        let pass_image = if image_inferred.is_some() {
            None
        } else {
            request.soil_image.as_deref()
        };

        let mut assessment = self.resolver.resolve(&SoilEvidence {
            region: Some(request.region.as_str()),
            region_code: Some(code),
            declared_soil: reported,
            image: pass_image,
        });

        // A locally inferred image label beats a weak resolution outcome.
        if let Some(label) = image_inferred {
            assessment
                .details
                .image_guess
                .get_or_insert_with(|| label.to_string());
            let weak = assessment.soil_type == "Unknown"
                || matches!(
                    assessment.source,
                    SoilSource::FarmerUnverified | SoilSource::Unknown | SoilSource::Error
                );
            if weak {
                assessment.soil_type = label.to_string();
                assessment.source = SoilSource::Image;
                assessment.verified = false;
            }
        }

        let weather = self
            .weather
            .as_ref()
            .and_then(|w| w.weather(code))
            .unwrap_or_else(|| {
                tracing::debug!("weather provider absent or failed");
                WeatherReport {
                    source: Some("error".to_string()),
                    ..WeatherReport::default()
                }
            });
        let temperature = weather.temperature;

        let crops = self.query.query_crops(
            &request.region,
            &assessment.soil_type,
            temperature,
            Some(season.season),
        );

        let advice = self.synthesizer.synthesize(AdviceRequest {
            assessment: &assessment,
            season: season.clone(),
            crops: crops.clone(),
            temperature,
            query: request.query.as_deref(),
            region: &request.region,
            declared_soil: declared,
        });

        if let Some(store) = self.chat.as_ref() {
            let recorded_query = request
                .query
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .unwrap_or("General Recommendation");
            if let Err(e) = store.record(&request.region, recorded_query, &advice) {
                tracing::debug!(error = %e, "chat record failed, continuing");
            }
        }

        Ok(Recommendation {
            soil_type: assessment.soil_type.clone(),
            image_inferred: image_inferred.map(String::from),
            season: season.season,
            season_months: season.season_months.clone(),
            weather,
            recommended_crops: crops,
            advice,
            soil_details: assessment,
        })
    }
}
