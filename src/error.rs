//! Error taxonomy for the advisory core.
//!
//! Only two conditions surface to callers: malformed request input and a
//! missing/unloadable reference dataset. Everything else (a geocoder that
//! times out, a composition provider that returns nothing, a silent text
//! generator) is modeled as an absent value and degrades to the next
//! fallback instead of erroring.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    /// A required request field is missing or malformed. The message names
    /// the specific rejection reason.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The reference dataset could not be loaded. Raised only by operations
    /// that need dataset rows; query paths absorb it into no-match results.
    #[error("reference dataset unavailable: {0}")]
    DatasetUnavailable(String),
}

pub type Result<T> = std::result::Result<T, AdvisorError>;
