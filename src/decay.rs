//! Exponential confidence decay
//!
//! Relation confidence is decayed at read time only; stored rows keep the
//! confidence they were written with. A relation's age is measured from the
//! `valid_from` of its current version, so refreshing a relation resets the
//! decay clock.

use serde::{Deserialize, Serialize};

use crate::relation::Relation;
use crate::temporal::TimestampMs;

/// Milliseconds in one day
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Decay behavior knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// When false, confidences are returned as stored
    pub enabled: bool,

    /// Days for a confidence to halve
    pub half_life_days: f64,

    /// Floor below which decay never pushes a confidence
    pub min_confidence: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_days: 30.0,
            min_confidence: 0.1,
        }
    }
}

/// Continuous decay rate per millisecond for a given half-life
///
/// Negative by construction: `exp(rate * age)` shrinks as age grows and
/// equals 0.5 exactly at one half-life.
pub fn decay_rate(half_life_days: f64) -> f64 {
    0.5_f64.ln() / (half_life_days * MS_PER_DAY)
}

/// Decay a confidence by age
///
/// Intermediate math runs in f64 so long ages do not underflow the f32
/// surface type. Negative ages (clock skew) are treated as zero. The floor
/// clamps from below but never lifts the result above `initial`, so a
/// confidence that starts under the floor is returned unchanged.
pub fn decay(initial: f32, age_ms: i64, half_life_days: f64, floor: f32) -> f32 {
    let age = age_ms.max(0) as f64;
    let decayed = f64::from(initial) * (decay_rate(half_life_days) * age).exp();
    decayed.max(f64::from(floor)).min(f64::from(initial)) as f32
}

impl DecayConfig {
    /// Confidence of a relation as seen at `now`
    pub fn project(&self, confidence: Option<f32>, valid_from: TimestampMs, now: TimestampMs) -> Option<f32> {
        if !self.enabled {
            return confidence;
        }
        confidence.map(|c| decay(c, now - valid_from, self.half_life_days, self.min_confidence))
    }

    /// Rewrite a relation's confidence to its decayed projection
    pub fn apply(&self, relation: &mut Relation, now: TimestampMs) {
        relation.confidence = self.project(
            relation.confidence,
            relation.version_info.valid_from,
            now,
        );
    }
}
