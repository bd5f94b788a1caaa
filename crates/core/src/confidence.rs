use serde::{Deserialize, Serialize};

/// Clamps a score into `[0, 1]`. NaN collapses to zero.
pub fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    VeryLow,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn from_score(score: f64, high: f64, medium: f64, low: f64) -> Self {
        let score = clamp_unit(score);
        if score >= high {
            ConfidenceTier::High
        } else if score >= medium {
            ConfidenceTier::Medium
        } else if score >= low {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::VeryLow
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceTier::High => write!(f, "HIGH"),
            ConfidenceTier::Medium => write!(f, "MEDIUM"),
            ConfidenceTier::Low => write!(f, "LOW"),
            ConfidenceTier::VeryLow => write!(f, "VERY_LOW"),
        }
    }
}
