//! Confidence scoring and probability normalization shared by both venue
//! sessions.

use crate::models::Probability;

/// Depth component: `min(log10(depth)*10, 60)` if `depth > 0`, else 0.
pub fn depth_component(depth_usd: f64) -> f64 {
    if depth_usd > 0.0 {
        (depth_usd.log10() * 10.0).min(60.0).max(0.0)
    } else {
        0.0
    }
}

/// Spread component: `max(0, 40 - spread_pct*2)` if spread known, else 20
/// (neutral, when the venue hasn't supplied a spread yet).
pub fn spread_component(spread_pct: Option<f64>) -> f64 {
    match spread_pct {
        Some(pct) => (40.0 - pct * 2.0).max(0.0),
        None => 20.0,
    }
}

/// Combined confidence score in `[0,100]`, rounded. Returns the score and
/// whether it crosses the `low_confidence` flag threshold (strictly < 50).
pub fn confidence_score(depth_usd: f64, spread_pct: Option<f64>) -> (f64, bool) {
    let raw = (depth_component(depth_usd) + spread_component(spread_pct)).clamp(0.0, 100.0);
    let rounded = raw.round();
    (rounded, rounded < 50.0)
}

pub fn confidence_flag(depth_usd: f64, spread_pct: Option<f64>) -> Option<String> {
    let (_, low) = confidence_score(depth_usd, spread_pct);
    low.then(|| "low_confidence".to_string())
}

/// Any raw value greater than 1 is treated as a percent and rescaled.
pub fn clamp_probability(raw: f64) -> Probability {
    Probability::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_zero_yields_zero_component() {
        assert_eq!(depth_component(0.0), 0.0);
    }

    #[test]
    fn missing_spread_is_neutral() {
        assert_eq!(spread_component(None), 20.0);
    }

    #[test]
    fn scenario_one_confidence_is_not_flagged_low() {
        // depth = 128, spread_pct ~= 3.125
        let (score, low) = confidence_score(128.0, Some(3.125));
        assert!((score - 55.0).abs() <= 1.0, "score was {score}");
        assert!(!low);
    }

    #[test]
    fn percent_like_input_is_rescaled_then_clamped() {
        assert_eq!(clamp_probability(1.5).value(), 0.015);
    }
}
