//! Particle-Fraction Soil Classification
//!
//! Maps clay/sand/silt percentages (as returned by a gridded soil survey)
//! to a coarse soil-type label with fixed thresholds. Deliberately much
//! coarser than a full texture triangle: the downstream dataset only knows
//! a handful of soil labels, so four classes are all that is useful.

/// Classify a soil from particle-fraction percentages.
///
/// Missing fractions count as zero. First matching rule wins; the function
/// is total and never fails.
pub fn classify_composition(
    clay_pct: Option<f64>,
    sand_pct: Option<f64>,
    silt_pct: Option<f64>,
) -> &'static str {
    let clay = clay_pct.unwrap_or(0.0);
    let sand = sand_pct.unwrap_or(0.0);
    let silt = silt_pct.unwrap_or(0.0);

    if clay >= 40.0 {
        return "Clay";
    }
    if sand >= 70.0 {
        return "Sandy";
    }
    if sand >= 40.0 && silt >= 20.0 {
        return "Sandy Loam";
    }
    "Loamy"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clay_dominant() {
        assert_eq!(classify_composition(Some(45.0), Some(10.0), Some(10.0)), "Clay");
        assert_eq!(classify_composition(Some(40.0), Some(80.0), Some(0.0)), "Clay");
    }

    #[test]
    fn test_sand_dominant() {
        assert_eq!(classify_composition(Some(5.0), Some(80.0), Some(10.0)), "Sandy");
    }

    #[test]
    fn test_sandy_loam_band() {
        assert_eq!(
            classify_composition(Some(5.0), Some(50.0), Some(30.0)),
            "Sandy Loam"
        );
    }

    #[test]
    fn test_loamy_default() {
        assert_eq!(classify_composition(Some(10.0), Some(10.0), Some(10.0)), "Loamy");
        // sand in the loam band but too little silt
        assert_eq!(classify_composition(Some(10.0), Some(50.0), Some(10.0)), "Loamy");
    }

    #[test]
    fn test_missing_values_default_to_zero() {
        assert_eq!(classify_composition(None, None, None), "Loamy");
        assert_eq!(classify_composition(Some(50.0), None, None), "Clay");
        assert_eq!(classify_composition(None, Some(75.0), None), "Sandy");
    }
}
