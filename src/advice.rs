//! Advice Synthesis
//!
//! Builds the final farmer-facing advice text. A generative backend is
//! tried first with a structured fact bundle; when it is absent, errors,
//! or returns nothing, a deterministic template produces the same facts in
//! fixed phrasing. Whatever path produced the text, two guarantees are
//! enforced afterwards: the output mentions a fertilizer, and an
//! unverified soil claim gets a "but if you truly have ..." correction
//! block with crop guidance for the claimed soil.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::dataset::{CropEntry, CropQueryEngine, CropQueryResult};
use crate::evidence::SoilAssessment;
use crate::normalize::display_soil_label;
use crate::season::{extract_crop_name, Season, SeasonContext};

/// Generates advice text from a structured prompt. `None` covers every
/// degradation: backend not configured, transport error, empty output.
pub trait GenerativeModel: Send + Sync {
    fn generate(&self, prompt: &str) -> Option<String>;
}

/// Keywords that count as a fertilizer mention in generated text.
const FERTILIZER_KEYWORDS: &[&str] = &["fertil", "compost", "n-p-k", "cow dung", "dap", "urea"];

const FERTILIZER_SUFFIX: &str = "Fertilizer: Compost. Get a soil test for exact doses.";

const STYLE_INSTRUCTION: &str = "You are an agricultural assistant. Short, farmer-friendly, \
3-5 short paragraphs. Flow: (A) If match confirmed: one affirmation sentence mentioning the \
soil. (B) 1-2 crop choices + sowing/harvest months. (C) One short soil fact. (D) 1-2 \
fertilizer names (no units) + 'Get a soil test for exact doses.' If not confirmed: start \
with 'According to our data...' listing common soils for the state, then same flow. Always \
include current temperature and month. Avoid markdown and escaped quotes.";

static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static EXCESS_BLANKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static BUT_IF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bbut\s+if\b").unwrap());
static BUT_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)\bbut\b(.*)$").unwrap());
static SOWING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)sowing[:\s]*([A-Za-z0-9–\- ]+)").unwrap());
static HARVEST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)harvest(?:ing)?[:\s]*([A-Za-z0-9–\- ]+)").unwrap());

/// Strip markdown emphasis and escaped quotes, collapse blank-line runs.
pub fn clean_text(s: &str) -> String {
    let s = BOLD_RE.replace_all(s, "$1");
    let s = ITALIC_RE.replace_all(&s, "$1");
    let s = s.replace("\\\"", "\"").replace("\\'", "'");
    let s = EXCESS_BLANKS_RE.replace_all(&s, "\n\n");
    s.trim().to_string()
}

/// Fertilizer pair for a soil, pH-driven when pH is known.
fn choose_fertilizers(soil_type: &str, ph: Option<f64>) -> [&'static str; 2] {
    if let Some(ph) = ph {
        if ph < 6.0 {
            return ["Compost", "Lime"];
        }
        if ph > 7.5 {
            return ["Compost", "Micronutrient mix"];
        }
        return ["Compost", "N-P-K mix"];
    }
    let s = soil_type.to_lowercase();
    if s.contains("black") {
        return ["Compost", "N-P-K mix"];
    }
    if s.contains("alluvial") || s.contains("loamy") {
        return ["Compost", "N-P-K mix"];
    }
    if s.contains("sandy") {
        return ["Compost", "N-P-K mix"];
    }
    ["Compost", "N-P-K mix"]
}

/// One-line soil fact for the fixed soil→fact table.
fn soil_note(soil_label: &str) -> Option<&'static str> {
    let s = soil_label.to_lowercase();
    if s.contains("alluvial") {
        return Some("Alluvial soils are generally fertile and hold water well.");
    }
    if s.contains("black") || s.contains("regur") {
        return Some("Black soils hold water well because of high clay content.");
    }
    if s.contains("sandy") {
        return Some("Sandy soils drain fast — add organic matter.");
    }
    if s.contains("clay") {
        return Some("Clay soils can be heavy; organic matter helps.");
    }
    None
}

/// Sowing/harvest windows: from an explicit season token when known, else
/// parsed out of a season window display string, else just the month name.
fn sow_harvest(
    season_token: Option<Season>,
    season_months: &str,
    fallback_month: &str,
) -> (String, String) {
    if let Some(season) = season_token {
        return (
            season.sowing_window().to_string(),
            season.harvest_window().to_string(),
        );
    }
    if !season_months.is_empty() {
        let sow = SOWING_RE
            .captures(season_months)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let harvest = HARVEST_RE
            .captures(season_months)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        return (sow, harvest);
    }
    (fallback_month.to_string(), String::new())
}

/// Inputs for one synthesis run. Season context and crop list are owned
/// because the query may override/augment them.
pub struct AdviceRequest<'a> {
    pub assessment: &'a SoilAssessment,
    pub season: SeasonContext,
    pub crops: CropQueryResult,
    pub temperature: Option<f64>,
    pub query: Option<&'a str>,
    pub region: &'a str,
    /// The farmer's own (meaningful) soil claim, for the correction block.
    pub declared_soil: Option<&'a str>,
}

pub struct AdviceSynthesizer {
    query: CropQueryEngine,
    model: Option<Box<dyn GenerativeModel>>,
}

impl AdviceSynthesizer {
    pub fn new(query: CropQueryEngine) -> Self {
        AdviceSynthesizer { query, model: None }
    }

    pub fn with_model(mut self, model: Box<dyn GenerativeModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Produce the final advice text.
    pub fn synthesize(&self, request: AdviceRequest<'_>) -> String {
        let AdviceRequest {
            assessment,
            mut season,
            mut crops,
            temperature,
            query,
            region,
            declared_soil,
        } = request;

        if let Some(query) = query {
            // A "when do I grow X" question puts X at the front of the
            // candidate list so every template surfaces it.
            if let Some(crop) = extract_crop_name(query) {
                crops.crops.retain(|c| !c.eq_ignore_ascii_case(&crop));
                crops.crops.insert(0, crop);
                crops.no_match = false;
            }
            season.apply_query_override(query);
        }

        let declared = declared_soil.map(str::trim).filter(|s| !s.is_empty());
        let ph = assessment.details.ph;
        let oc = assessment.details.organic_carbon;

        let prompt = build_prompt(assessment, &season, &crops, temperature, query, region, declared);
        let generated = self
            .model
            .as_ref()
            .and_then(|m| m.generate(&prompt))
            .map(|t| clean_text(&t))
            .filter(|t| !t.is_empty());

        let body = match generated {
            Some(text) => ensure_fertilizer_mention(text),
            None => {
                tracing::debug!("generator absent or silent; using deterministic template");
                self.fallback_text(assessment, &season, &crops, temperature, region, ph, oc)
            }
        };

        self.ensure_correction_block(body, assessment.verified, declared, ph, temperature, &season)
    }

    /// Guarantee an unverified claim is answered with a hedged
    /// "but if you truly have <soil>" segment carrying crop windows and
    /// fertilizer names. Text that already has such a segment is left
    /// untouched.
    fn ensure_correction_block(
        &self,
        text: String,
        verified: bool,
        declared: Option<&str>,
        ph: Option<f64>,
        temperature: Option<f64>,
        season: &SeasonContext,
    ) -> String {
        if verified {
            return text;
        }
        let Some(declared) = declared else {
            return text;
        };

        let lower = text.to_lowercase();
        if BUT_IF_RE.is_match(&lower) && lower.contains(&declared.to_lowercase()) {
            if let Some(caps) = BUT_TAIL_RE.captures(&text) {
                let tail = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
                if ["sowing", "harvest", "fertil"].iter().any(|k| tail.contains(k)) {
                    return text;
                }
            }
        }

        let mut entries =
            self.query
                .crop_entries_for_soil(declared, temperature, Some(season.season), 3);
        if entries.is_empty() {
            entries = self
                .query
                .query_crops_global(declared, temperature, Some(season.season), 3)
                .into_iter()
                .map(|crop| CropEntry { crop, season: None })
                .collect();
        }
        let block = build_correction_block(declared, &entries, ph, season);
        format!("{}\n\n{}", text.trim_end(), block)
    }

    /// Deterministic template used when no generator is available.
    #[allow(clippy::too_many_arguments)]
    fn fallback_text(
        &self,
        assessment: &SoilAssessment,
        season: &SeasonContext,
        crops: &CropQueryResult,
        temperature: Option<f64>,
        region: &str,
        ph: Option<f64>,
        oc: Option<f64>,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();
        let soil_label = display_soil_label(&assessment.soil_type);
        let top = &crops.crops;

        if assessment.verified {
            parts.push(format!(
                "Based on our data, your reported {} is correct.",
                soil_label
            ));
            if !top.is_empty() {
                let choices = top.iter().take(2).cloned().collect::<Vec<_>>().join(", ");
                let (sow, harvest) =
                    sow_harvest(None, &season.season_months, &season.month_name);
                if !sow.is_empty() && !harvest.is_empty() {
                    parts.push(format!(
                        "For the {} season on {}, top choices: {}. Sowing: {}. Harvest: {}.",
                        season.season, soil_label, choices, sow, harvest
                    ));
                } else if !sow.is_empty() {
                    parts.push(format!(
                        "For the {} season on {}, top choices: {}. Sowing: {}.",
                        season.season, soil_label, choices, sow
                    ));
                } else {
                    parts.push(format!(
                        "For the {} season on {}, top choices: {}.",
                        season.season, soil_label, choices
                    ));
                }
            } else {
                parts.push(
                    "No clear DB crop match found; choose crops suited to the season and water availability."
                        .to_string(),
                );
            }
            if let Some(note) = soil_note(&soil_label) {
                parts.push(note.to_string());
            }
            let ferts = choose_fertilizers(&soil_label, ph);
            parts.push(format!(
                "Fertilizer: {}. Get a soil test for exact doses.",
                ferts.join(", ")
            ));
            push_conditions_line(&mut parts, temperature, &season.month_name);
            return clean_text(&parts.join("\n\n"));
        }

        // Unverified: open with the correction framing, then crops drawn
        // from the soils the region is actually known for.
        if !assessment.expected_soils.is_empty() {
            parts.push(format!(
                "According to our data, {} is not common in {}. Common soils in {}: {}.",
                soil_label,
                region,
                region,
                assessment.expected_soils.join(", ")
            ));
        } else {
            parts.push(format!(
                "According to our data, we could not find an exact match for {} in {}.",
                soil_label, region
            ));
        }

        let mut region_crops: Vec<String> = Vec::new();
        for soil in &assessment.expected_soils {
            let info = self
                .query
                .query_crops(region, soil, temperature, Some(season.season));
            for crop in info.crops {
                if !region_crops.contains(&crop) {
                    region_crops.push(crop);
                }
            }
            if region_crops.len() >= 3 {
                break;
            }
        }

        if !region_crops.is_empty() {
            let choices = region_crops
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            let (sow, harvest) = sow_harvest(None, &season.season_months, &season.month_name);
            if !sow.is_empty() && !harvest.is_empty() {
                parts.push(format!(
                    "For these soils, top choices: {}. Sowing: {}. Harvest: {}.",
                    choices, sow, harvest
                ));
            } else if !sow.is_empty() {
                parts.push(format!(
                    "For these soils, top choices: {}. Sowing: {}.",
                    choices, sow
                ));
            } else {
                parts.push(format!("For these soils, top choices: {}.", choices));
            }
        } else if !top.is_empty() {
            let choices = top.iter().take(2).cloned().collect::<Vec<_>>().join(", ");
            parts.push(format!("Top choices: {}.", choices));
        } else if season.season == Season::Kharif {
            parts.push(
                "Top choices: Rice (Paddy), Maize. Sowing: June–July. Harvest: Sept–Nov."
                    .to_string(),
            );
        } else {
            parts.push(format!(
                "Top choices: choose crops suited to {} and local water availability.",
                season.season
            ));
        }

        if let Some(note) = soil_note(&soil_label) {
            parts.push(note.to_string());
        }
        if ph.is_none() && oc.is_none() {
            parts.push("Fertilizer: Compost, Cow dung manure. Get a soil test for exact doses.".to_string());
        } else {
            parts.push("Fertilizer: N-P-K (balanced), Compost. Get a soil test for exact doses.".to_string());
        }
        push_conditions_line(&mut parts, temperature, &season.month_name);
        clean_text(&parts.join("\n\n"))
    }
}

/// Append the fixed fertilizer sentence when none of the keywords appear.
fn ensure_fertilizer_mention(text: String) -> String {
    let lower = text.to_lowercase();
    if FERTILIZER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return text;
    }
    format!("{}\n\n{}", text.trim_end(), FERTILIZER_SUFFIX)
}

/// Temperature/month closing line, omitted when neither fact is known.
fn push_conditions_line(parts: &mut Vec<String>, temperature: Option<f64>, month_name: &str) {
    if temperature.is_none() && month_name.is_empty() {
        return;
    }
    let t = temperature
        .map(|t| format!("Current temperature: {:.1}°C.", t))
        .unwrap_or_default();
    let m = if month_name.is_empty() {
        String::new()
    } else {
        format!("Month: {}.", month_name)
    };
    parts.push(format!("{} {}", t, m).trim().to_string());
}

/// The structured fact bundle plus the fixed style instruction.
fn build_prompt(
    assessment: &SoilAssessment,
    season: &SeasonContext,
    crops: &CropQueryResult,
    temperature: Option<f64>,
    query: Option<&str>,
    region: &str,
    declared: Option<&str>,
) -> String {
    let verification_context = assessment.details.farmer_reported.as_ref().map(|reported| {
        format!(
            "composition evidence suggests {} instead of the reported {}",
            assessment.soil_type, reported
        )
    });
    let bundle = json!({
        "state": region,
        "soil_type": assessment.soil_type,
        "confirmed": assessment.verified,
        "season": season.season.as_str(),
        "season_months": season.season_months,
        "month": season.month_name,
        "temperature": temperature,
        "candidate_crops": crops.crops,
        "expected_soils": assessment.expected_soils,
        "verification_context": verification_context,
        "farmer_reported_soil": declared,
        "query": query,
    });
    format!(
        "{}\n\nInput:\n{}\n\nProduce the short advice exactly in the flow.",
        STYLE_INSTRUCTION,
        serde_json::to_string_pretty(&bundle).unwrap_or_default()
    )
}

/// Build the "but if you truly have <soil>" segment from region-agnostic
/// crop hits for the claimed soil.
fn build_correction_block(
    declared: &str,
    entries: &[CropEntry],
    ph: Option<f64>,
    season: &SeasonContext,
) -> String {
    let soil_label = display_soil_label(declared);
    if entries.is_empty() {
        let ferts = choose_fertilizers(declared, ph);
        return format!(
            "But if you truly have {}: consider crops suited to that soil. Fertilizer: {}.",
            soil_label,
            ferts.join(", ")
        );
    }
    let mut segments = Vec::new();
    for entry in entries {
        let (sow, harvest) =
            sow_harvest(entry.season, &season.season_months, &season.month_name);
        let ferts = choose_fertilizers(declared, ph);
        let mut fields = Vec::new();
        if !sow.is_empty() {
            fields.push(format!("Sowing: {}", sow));
        }
        if !harvest.is_empty() {
            fields.push(format!("Harvest: {}", harvest));
        }
        fields.push(format!("Fertilizer: {}", ferts.join(", ")));
        segments.push(format!("{} — {}.", entry.crop, fields.join(". ")));
    }
    format!("But if you truly have {}: {}", soil_label, segments.join(" "))
}
