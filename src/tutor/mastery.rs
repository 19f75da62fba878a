//! Mastery deltas from reasoning quality.
//!
//! A label maps to a fixed signed base value, scaled by how much the question
//! was worth (marks) and, optionally, by an explicit 1-3 difficulty level.
//! Everything here is pure.

use serde::{Deserialize, Serialize};

use super::types::QualityLabel;

pub const BASELINE_MASTERY: f64 = 50.0;
pub const MIN_MASTERY: f64 = 0.0;
pub const MAX_MASTERY: f64 = 100.0;

pub fn base_delta(label: QualityLabel) -> f64 {
    match label {
        QualityLabel::Correct => 8.0,
        QualityLabel::Partial => 3.0,
        QualityLabel::MildConfusion => -2.0,
        QualityLabel::Wrong => -5.0,
        QualityLabel::HighConfusion => -6.0,
        QualityLabel::Misconception => -8.0,
        QualityLabel::Good => 5.0,
        QualityLabel::Neutral => 0.0,
        QualityLabel::Confused => -4.0,
    }
}

/// Stakes of the question being answered. Missing inputs weigh 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stakes {
    pub marks: Option<f64>,
    pub difficulty: Option<u8>,
}

impl Stakes {
    pub fn new(marks: Option<f64>, difficulty: Option<u8>) -> Self {
        Self { marks, difficulty }
    }

    pub fn marks_weight(&self) -> f64 {
        match self.marks {
            Some(m) if m.is_finite() && m > 0.0 => {
                if m <= 1.0 {
                    0.75
                } else if m <= 3.0 {
                    1.0
                } else if m <= 6.0 {
                    1.25
                } else {
                    1.5
                }
            }
            _ => 1.0,
        }
    }

    pub fn difficulty_multiplier(&self) -> f64 {
        match self.difficulty {
            Some(1) => 0.8,
            Some(2) => 1.0,
            Some(3) => 1.2,
            _ => 1.0,
        }
    }

    pub fn weight(&self) -> f64 {
        self.marks_weight() * self.difficulty_multiplier()
    }
}

pub fn compute_delta(label: QualityLabel, stakes: Stakes) -> f64 {
    let raw = base_delta(label) * stakes.weight();
    (raw * 100.0).round() / 100.0
}

/// Clamps into [0, 100]. Non-finite inputs never leak into a stored score.
pub fn apply_delta(current: f64, delta: f64) -> f64 {
    let current = if current.is_finite() {
        current
    } else {
        BASELINE_MASTERY
    };
    let delta = if delta.is_finite() { delta } else { 0.0 };
    (current + delta).clamp(MIN_MASTERY, MAX_MASTERY)
}

pub fn describe_delta(label: QualityLabel, stakes: Stakes) -> String {
    format!("{} (weight {:.2})", label, stakes.weight())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_label_is_zero() {
        assert_eq!(compute_delta(QualityLabel::Neutral, Stakes::default()), 0.0);
        assert_eq!(
            compute_delta(QualityLabel::Neutral, Stakes::new(Some(10.0), Some(3))),
            0.0
        );
    }

    #[test]
    fn higher_stakes_grow_magnitude() {
        let low = compute_delta(QualityLabel::Wrong, Stakes::new(Some(1.0), None));
        let high = compute_delta(QualityLabel::Wrong, Stakes::new(Some(8.0), None));
        assert!(high.abs() > low.abs());
        assert!(high < 0.0);
    }

    #[test]
    fn difficulty_scales_delta() {
        let easy = compute_delta(QualityLabel::Correct, Stakes::new(None, Some(1)));
        let hard = compute_delta(QualityLabel::Correct, Stakes::new(None, Some(3)));
        assert_eq!(easy, 6.4);
        assert_eq!(hard, 9.6);
    }

    #[test]
    fn invalid_stakes_fall_back_to_neutral_weight() {
        let stakes = Stakes::new(Some(f64::NAN), Some(9));
        assert_eq!(stakes.weight(), 1.0);
        let negative = Stakes::new(Some(-4.0), Some(0));
        assert_eq!(negative.weight(), 1.0);
    }

    #[test]
    fn apply_delta_clamps() {
        assert_eq!(apply_delta(95.0, 12.0), 100.0);
        assert_eq!(apply_delta(3.0, -8.0), 0.0);
        assert_eq!(apply_delta(50.0, 8.0), 58.0);
        assert_eq!(apply_delta(50.0, f64::NAN), 50.0);
        assert_eq!(apply_delta(f64::INFINITY, 1.0), 51.0);
    }
}
