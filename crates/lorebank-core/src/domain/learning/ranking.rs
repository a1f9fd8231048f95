//! Multi-signal ranking for retrieval
//!
//! Scores combine three signals:
//! - Relevance supplied by the similarity collaborator (0.0 to 1.0)
//! - Recency as exponential decay of the time since the last update
//! - Importance stored on the learning
//!
//! Ranking is a pure function of its inputs and never touches storage.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

use super::entity::Learning;

/// Default recency half-life: 30 days
pub const DEFAULT_HALF_LIFE_HOURS: f64 = 24.0 * 30.0;

/// Weights and decay parameters for ranking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
    /// Age at which the recency signal halves
    pub half_life: Duration,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            relevance: 1.0 / 3.0,
            recency: 1.0 / 3.0,
            importance: 1.0 / 3.0,
            half_life: Duration::days(30),
        }
    }
}

impl RankingWeights {
    /// Weights with the default half-life
    pub fn new(relevance: f64, recency: f64, importance: f64) -> Self {
        Self {
            relevance,
            recency,
            importance,
            ..Default::default()
        }
    }

    /// Favor the similarity collaborator's judgement
    pub fn relevance_focused() -> Self {
        Self::new(0.6, 0.2, 0.2)
    }

    pub fn with_half_life(mut self, half_life: Duration) -> Self {
        self.half_life = half_life;
        self
    }

    /// Fails unless `hours` is finite, positive and representable
    pub fn with_half_life_hours(self, hours: f64) -> Result<Self> {
        Ok(self.with_half_life(half_life_from_hours(hours)?))
    }

    /// Weights must be finite and non-negative, the half-life positive
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("relevance", self.relevance),
            ("recency", self.recency),
            ("importance", self.importance),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::ValidationError(format!(
                    "{} weight must be finite and non-negative, got {}",
                    name, weight
                )));
            }
        }
        if self.half_life <= Duration::zero() {
            return Err(Error::ValidationError("half-life must be positive".into()));
        }
        Ok(())
    }
}

/// Largest half-life accepted, about 114 years
const MAX_HALF_LIFE_HOURS: f64 = 1_000_000.0;

pub(crate) fn half_life_from_hours(hours: f64) -> Result<Duration> {
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_HALF_LIFE_HOURS {
        return Err(Error::ValidationError(format!(
            "half-life must be within (0, {}] hours, got {}",
            MAX_HALF_LIFE_HOURS, hours
        )));
    }
    let half_life = Duration::try_milliseconds((hours * 3_600_000.0).round() as i64)
        .filter(|d| *d > Duration::zero())
        .ok_or_else(|| {
            Error::ValidationError(format!("half-life of {} hours is too short", hours))
        })?;
    Ok(half_life)
}

/// Exponential decay `0.5^(elapsed / half_life)`; negative elapsed counts as zero
pub fn decay(elapsed: Duration, half_life: Duration) -> f64 {
    let elapsed_ms = elapsed.num_milliseconds().max(0) as f64;
    let half_life_ms = half_life.num_milliseconds() as f64;
    0.5_f64.powf(elapsed_ms / half_life_ms)
}

/// Individual signals feeding a score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Clamped relevance (0.0 to 1.0)
    pub relevance: f64,
    /// Decayed recency (0.0 to 1.0)
    pub recency: f64,
    pub importance: f64,
}

impl ScoreBreakdown {
    /// Combine signals into a single score
    pub fn combined(&self, weights: &RankingWeights) -> f64 {
        weights.relevance * self.relevance
            + weights.recency * self.recency
            + weights.importance * self.importance
    }
}

/// Signals for one learning at a point in time
pub fn breakdown(
    learning: &Learning,
    relevance: f64,
    now: DateTime<Utc>,
    weights: &RankingWeights,
) -> ScoreBreakdown {
    let relevance = if relevance.is_nan() {
        0.0
    } else {
        relevance.clamp(0.0, 1.0)
    };
    ScoreBreakdown {
        relevance,
        recency: decay(now - learning.updated_at, weights.half_life),
        importance: learning.importance,
    }
}

/// Score one learning
pub fn score(
    learning: &Learning,
    relevance: f64,
    now: DateTime<Utc>,
    weights: &RankingWeights,
) -> f64 {
    breakdown(learning, relevance, now, weights).combined(weights)
}

/// A learning with its score
#[derive(Debug, Clone, Serialize)]
pub struct RankedLearning {
    pub learning: Learning,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Map -0.0 to 0.0 so `total_cmp` treats the two zeros as equal
fn unsigned_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}

/// Total order: score desc, importance desc, created_at desc, id asc
fn ranking_order(a: &RankedLearning, b: &RankedLearning) -> Ordering {
    unsigned_zero(b.score)
        .total_cmp(&unsigned_zero(a.score))
        .then_with(|| {
            unsigned_zero(b.learning.importance).total_cmp(&unsigned_zero(a.learning.importance))
        })
        .then_with(|| b.learning.created_at.cmp(&a.learning.created_at))
        .then_with(|| a.learning.id.cmp(&b.learning.id))
}

/// Score and order candidates
///
/// Missing relevance entries count as 0.
pub fn rank(
    candidates: Vec<Learning>,
    relevance: &HashMap<String, f64>,
    now: DateTime<Utc>,
    weights: &RankingWeights,
) -> Vec<RankedLearning> {
    let mut ranked: Vec<RankedLearning> = candidates
        .into_iter()
        .map(|learning| {
            let signal = relevance.get(&learning.id).copied().unwrap_or(0.0);
            let signals = breakdown(&learning, signal, now, weights);
            RankedLearning {
                score: signals.combined(weights),
                breakdown: signals,
                learning,
            }
        })
        .collect();

    ranked.sort_by(ranking_order);
    ranked
}

/// Ranker bound to validated weights
#[derive(Debug, Clone, Default)]
pub struct RetrievalRanker {
    weights: RankingWeights,
}

impl RetrievalRanker {
    /// Create a ranker; fails on invalid weights
    pub fn new(weights: RankingWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    pub fn score(&self, learning: &Learning, relevance: f64, now: DateTime<Utc>) -> f64 {
        score(learning, relevance, now, &self.weights)
    }

    pub fn rank(
        &self,
        candidates: Vec<Learning>,
        relevance: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Vec<RankedLearning> {
        rank(candidates, relevance, now, &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::content::{LearningContent, ToneCalibration};
    use crate::domain::timestamp_now;

    fn tone(value: &str) -> LearningContent {
        LearningContent::ToneCalibration(ToneCalibration {
            dimension: "formality".into(),
            preferred_value: value.into(),
            note: None,
        })
    }

    fn ids(ranked: &[RankedLearning]) -> Vec<&str> {
        ranked.iter().map(|r| r.learning.id.as_str()).collect()
    }

    #[test]
    fn test_default_weights() {
        let weights = RankingWeights::default();
        assert!((weights.relevance + weights.recency + weights.importance - 1.0).abs() < 1e-9);
        assert_eq!(weights.half_life, Duration::days(30));
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_weight_validation() {
        assert!(RankingWeights::new(-0.1, 0.5, 0.5).validate().is_err());
        assert!(
            RankingWeights::new(f64::INFINITY, 0.5, 0.5)
                .validate()
                .is_err()
        );
        assert!(
            RankingWeights::default()
                .with_half_life(Duration::zero())
                .validate()
                .is_err()
        );
        assert!(RetrievalRanker::new(RankingWeights::new(0.0, 0.0, 1.0)).is_ok());
    }

    #[test]
    fn test_decay() {
        let half_life = Duration::days(30);
        assert_eq!(decay(Duration::zero(), half_life), 1.0);
        assert!((decay(Duration::days(30), half_life) - 0.5).abs() < 1e-9);
        assert!((decay(Duration::days(60), half_life) - 0.25).abs() < 1e-9);
        // Clock skew: future timestamps do not boost recency above 1
        assert_eq!(decay(Duration::days(-3), half_life), 1.0);
    }

    #[test]
    fn test_relevance_is_clamped() {
        let now = timestamp_now();
        let learning = Learning::app_wide("horizon", tone("casual")).with_importance(0.0);
        let weights = RankingWeights::new(1.0, 0.0, 0.0);

        assert_eq!(score(&learning, 3.0, now, &weights), 1.0);
        assert_eq!(score(&learning, -1.0, now, &weights), 0.0);
        assert_eq!(score(&learning, f64::NAN, now, &weights), 0.0);
    }

    #[test]
    fn test_importance_ordering_with_zero_relevance() {
        let now = timestamp_now();
        let x = Learning::app_wide("horizon", tone("formal"))
            .with_id("x")
            .with_importance(0.8)
            .with_created_at(now);
        let y = Learning::for_user("horizon", "richard", tone("casual"))
            .with_id("y")
            .with_importance(0.9)
            .with_created_at(now);

        let ranked = rank(vec![x, y], &HashMap::new(), now, &RankingWeights::default());
        assert_eq!(ids(&ranked), vec!["y", "x"]);
        assert!(ranked[0].score > ranked[1].score);
        assert_eq!(ranked[0].breakdown.relevance, 0.0);
        assert_eq!(ranked[0].breakdown.recency, 1.0);
    }

    #[test]
    fn test_relevance_can_outrank_importance() {
        let now = timestamp_now();
        let a = Learning::app_wide("horizon", tone("a"))
            .with_id("a")
            .with_importance(0.9)
            .with_created_at(now);
        let b = Learning::app_wide("horizon", tone("b"))
            .with_id("b")
            .with_importance(0.1)
            .with_created_at(now);
        let relevance = HashMap::from([("b".to_string(), 1.0)]);

        let ranked = rank(vec![a, b], &relevance, now, &RankingWeights::default());
        assert_eq!(ids(&ranked), vec!["b", "a"]);
    }

    #[test]
    fn test_tie_breaks_are_deterministic() {
        let now = timestamp_now();
        let earlier = now - Duration::hours(1);
        let weights = RankingWeights::new(1.0, 0.0, 0.0);

        let mut older = Learning::app_wide("horizon", tone("a"))
            .with_id("older")
            .with_created_at(earlier);
        older.updated_at = now;
        let newer = Learning::app_wide("horizon", tone("b"))
            .with_id("newer")
            .with_created_at(now);
        let twin_b = Learning::app_wide("horizon", tone("c"))
            .with_id("twin-b")
            .with_created_at(now);
        let twin_a = Learning::app_wide("horizon", tone("d"))
            .with_id("twin-a")
            .with_created_at(now);
        let important = Learning::app_wide("horizon", tone("e"))
            .with_id("important")
            .with_importance(0.9)
            .with_created_at(earlier);

        let candidates = vec![twin_b, older, important, newer, twin_a];
        let first = rank(candidates.clone(), &HashMap::new(), now, &weights);
        let mut reversed = candidates;
        reversed.reverse();
        let second = rank(reversed, &HashMap::new(), now, &weights);

        // Equal scores: importance desc, then created_at desc, then id asc
        assert_eq!(
            ids(&first),
            vec!["important", "newer", "twin-a", "twin-b", "older"]
        );
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_recency_prefers_recently_updated() {
        let now = timestamp_now();
        let weights = RankingWeights::new(0.0, 1.0, 0.0);
        let stale = Learning::app_wide("horizon", tone("a"))
            .with_id("stale")
            .with_created_at(now - Duration::days(90));
        let fresh = Learning::app_wide("horizon", tone("b"))
            .with_id("fresh")
            .with_created_at(now - Duration::days(1));

        let ranker = RetrievalRanker::new(weights).unwrap();
        let ranked = ranker.rank(vec![stale, fresh], &HashMap::new(), now);
        assert_eq!(ids(&ranked), vec!["fresh", "stale"]);
        assert!((ranked[1].breakdown.recency - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_half_life_hours_rejects_unusable_values() {
        for hours in [
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NAN,
            -2.0,
            0.0,
            1e-12,
            1e300,
        ] {
            assert!(
                matches!(
                    RankingWeights::default().with_half_life_hours(hours),
                    Err(Error::ValidationError(_))
                ),
                "{} hours should be rejected",
                hours
            );
        }

        let weights = RankingWeights::default()
            .with_half_life_hours(48.0)
            .unwrap();
        assert_eq!(weights.half_life, Duration::hours(48));
        assert_eq!(
            RankingWeights::default()
                .with_half_life_hours(DEFAULT_HALF_LIFE_HOURS)
                .unwrap(),
            RankingWeights::default()
        );
    }

    #[test]
    fn test_signed_zero_ties_fall_through_to_created_at() {
        let now = timestamp_now();
        let weights = RankingWeights::new(0.0, 0.0, 1.0);
        let older = Learning::app_wide("horizon", tone("a"))
            .with_id("a-older")
            .with_importance(0.0)
            .with_created_at(now - Duration::hours(1));
        let newer = Learning::app_wide("horizon", tone("b"))
            .with_id("b-newer")
            .with_importance(-0.0)
            .with_created_at(now);

        let ranked = rank(
            vec![older.clone(), newer.clone()],
            &HashMap::new(),
            now,
            &weights,
        );
        assert_eq!(ids(&ranked), vec!["b-newer", "a-older"]);

        let ranked = rank(vec![newer, older], &HashMap::new(), now, &weights);
        assert_eq!(ids(&ranked), vec!["b-newer", "a-older"]);
    }
}
