//! # Priority Model
//! Seven factor sub-scores on a common 0–10 scale, combined by a weighted sum into a
//! composite, rescaled to a 0–100 display score and bucketed into a level.
//!
//! Two factors (strategic alignment, effort) need a judgement call on the text and come
//! from the external service as `PriorityHints`; everything else is derived from the
//! counters. `compute_assessment` is pure and is what the tests exercise; `PriorityModel`
//! adds the external call. Vote count only feeds `reach`, through a non-decreasing curve,
//! so the composite never drops when votes go up.

use serde::{Deserialize, Serialize};

use crate::analyze::ai_adapter::{DynProvider, PriorityHints};
use crate::analyze::weights::PriorityWeights;
use crate::error::{Result, TriageError};
use crate::model::{
    BusinessContext, FactorScore, PriorityAssessment, PriorityLevel, RequesterContext,
    RequesterTier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    RevenueImpact,
    Reach,
    StrategicAlignment,
    InverseEffort,
    CompetitivePressure,
    Risk,
    SatisfactionImpact,
}

impl Factor {
    pub const ALL: [Factor; 7] = [
        Factor::RevenueImpact,
        Factor::Reach,
        Factor::StrategicAlignment,
        Factor::InverseEffort,
        Factor::CompetitivePressure,
        Factor::Risk,
        Factor::SatisfactionImpact,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Factor::RevenueImpact => "revenue impact",
            Factor::Reach => "reach",
            Factor::StrategicAlignment => "strategic alignment",
            Factor::InverseEffort => "low effort",
            Factor::CompetitivePressure => "competitive pressure",
            Factor::Risk => "churn risk",
            Factor::SatisfactionImpact => "satisfaction impact",
        }
    }
}

/// Engagement signals for one post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrioritySignals {
    pub vote_count: u32,
    pub comment_count: u32,
    pub unique_voters: u32,
    /// Share of the workspace's active users who voted, 0–100.
    pub percentage_of_active_users: f32,
    pub similar_posts_count: u32,
}

/// Log curve mapping `n` onto 0–10, reaching 10 at `saturation`.
fn log_scale(n: u32, saturation: u32) -> f32 {
    let v = (1.0 + n as f32).ln() / (1.0 + saturation as f32).ln();
    (10.0 * v).clamp(0.0, 10.0)
}

fn pct_scale(pct: f32) -> f32 {
    if !pct.is_finite() {
        return 0.0;
    }
    // 20% of active users is treated as full reach.
    (pct.clamp(0.0, 100.0) / 2.0).min(10.0)
}

fn revenue_impact(req: Option<&RequesterContext>) -> f32 {
    let Some(r) = req else {
        return 3.0;
    };
    let base = match r.tier {
        RequesterTier::Free => 1.0,
        RequesterTier::Starter => 3.0,
        RequesterTier::Pro => 5.0,
        RequesterTier::Business => 7.0,
        RequesterTier::Enterprise => 8.0,
    };
    let size = if r.company_size >= 1000 {
        2.0
    } else if r.company_size >= 200 {
        1.0
    } else {
        0.0
    };
    let champion = if r.is_champion { 1.0 } else { 0.0 };
    f32::min(base + size + champion, 10.0)
}

fn risk(req: Option<&RequesterContext>, s: &PrioritySignals) -> f32 {
    let tier_risk = match req.map(|r| r.tier) {
        None => 2.0,
        Some(RequesterTier::Free) => 1.0,
        Some(RequesterTier::Starter) => 2.0,
        Some(RequesterTier::Pro) => 3.0,
        Some(RequesterTier::Business) => 5.0,
        Some(RequesterTier::Enterprise) => 6.0,
    };
    f32::min(tier_risk + f32::min(0.4 * s.comment_count as f32, 4.0), 10.0)
}

/// Pure scoring: factor table → composite → level → action → justification.
pub fn compute_assessment(
    signals: &PrioritySignals,
    requester: Option<&RequesterContext>,
    business: &BusinessContext,
    hints: &PriorityHints,
    weights: &PriorityWeights,
) -> PriorityAssessment {
    let reach = 0.5 * log_scale(signals.vote_count, 100)
        + 0.3 * pct_scale(signals.percentage_of_active_users)
        + 0.2 * log_scale(signals.unique_voters, 50);
    let competitive = f32::min(
        2.0 * signals.similar_posts_count as f32 + 0.25 * signals.comment_count as f32,
        10.0,
    );
    let champion_boost = if requester.is_some_and(|r| r.is_champion) {
        2.0
    } else {
        0.0
    };
    let satisfaction = f32::min(0.8 * log_scale(signals.unique_voters, 50) + champion_boost, 10.0);

    let raw = [
        (Factor::RevenueImpact, revenue_impact(requester)),
        (Factor::Reach, reach),
        (Factor::StrategicAlignment, clamp10(hints.strategic_alignment)),
        (Factor::InverseEffort, 10.0 - clamp10(hints.effort)),
        (Factor::CompetitivePressure, competitive),
        (Factor::Risk, risk(requester, signals)),
        (Factor::SatisfactionImpact, satisfaction),
    ];

    let factors: Vec<FactorScore> = raw
        .iter()
        .map(|(factor, score)| FactorScore {
            factor: *factor,
            score: clamp10(*score),
            weight: weights.weight(*factor),
        })
        .collect();

    let denom = weights.sum().max(1e-6);
    let composite = (factors.iter().map(FactorScore::contribution).sum::<f32>() / denom)
        .clamp(0.0, 10.0);
    let score = (composite * 10.0).round().clamp(0.0, 100.0) as u8;
    let level = PriorityLevel::from_composite(composite);
    let suggested_action = level.suggested_action();
    let justification = justify(&factors, level, score, business, hints);

    PriorityAssessment {
        composite,
        score,
        level,
        suggested_action,
        justification,
        factors,
    }
}

fn clamp10(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

/// Factors ordered by dominance: weighted contribution desc, equal contributions
/// broken by the larger weight, then by declaration order.
pub fn dominant_factors(factors: &[FactorScore]) -> Vec<&FactorScore> {
    let mut ranked: Vec<&FactorScore> = factors.iter().collect();
    ranked.sort_by(|a, b| {
        contribution_key(b)
            .cmp(&contribution_key(a))
            .then_with(|| b.weight.total_cmp(&a.weight))
    });
    ranked
}

/// Contribution quantized to 1e-4 so near-equal values compare as equal ties.
fn contribution_key(f: &FactorScore) -> i64 {
    let c = f.contribution();
    if c.is_finite() {
        (c as f64 * 1e4).round() as i64
    } else {
        0
    }
}

fn justify(
    factors: &[FactorScore],
    level: PriorityLevel,
    score: u8,
    business: &BusinessContext,
    hints: &PriorityHints,
) -> String {
    let ranked = dominant_factors(factors);
    let mut drivers: Vec<String> = ranked
        .iter()
        .take(2)
        .filter(|f| f.score > 0.0)
        .map(|f| format!("{} ({:.1}/10)", f.factor.label(), f.score))
        .collect();
    if drivers.is_empty() {
        drivers.push("no strong signal".to_string());
    }

    let level_label = match level {
        PriorityLevel::Critical => "Critical",
        PriorityLevel::High => "High",
        PriorityLevel::Medium => "Medium",
        PriorityLevel::Low => "Low",
    };
    let period = if business.current_period_label.trim().is_empty() {
        String::new()
    } else {
        format!(" for {}", business.current_period_label.trim())
    };
    let mut out = format!(
        "{level_label} priority ({score}/100){period}, driven by {}. Suggested action: {}.",
        drivers.join(" and "),
        level.suggested_action()
    );
    if !hints.rationale.is_empty() {
        out.push_str(&format!(" Model note: {}.", hints.rationale.trim_end_matches('.')));
    }
    out
}

#[derive(Clone)]
pub struct PriorityModel {
    provider: DynProvider,
}

impl PriorityModel {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    /// External hints + pure scoring. A failed hint call yields no score at all.
    pub async fn assess(
        &self,
        text: &str,
        signals: &PrioritySignals,
        requester: Option<&RequesterContext>,
        business: &BusinessContext,
        weights: &PriorityWeights,
    ) -> Result<(PriorityAssessment, PriorityHints)> {
        let hints = self
            .provider
            .priority_hints(text, business)
            .await
            .map_err(|e| TriageError::PriorityScoringUnavailable(e.to_string()))?;
        let assessment = compute_assessment(signals, requester, business, &hints, weights);
        Ok((assessment, hints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn hints(alignment: f32, effort: f32) -> PriorityHints {
        PriorityHints {
            strategic_alignment: alignment,
            effort,
            rationale: String::new(),
        }
    }

    fn signals(votes: u32) -> PrioritySignals {
        PrioritySignals {
            vote_count: votes,
            comment_count: 4,
            unique_voters: votes / 2,
            percentage_of_active_users: 5.0,
            similar_posts_count: 1,
        }
    }

    #[test]
    fn composite_is_monotonic_in_votes() {
        let biz = BusinessContext::default();
        let h = hints(5.0, 5.0);
        let w = PriorityWeights::default();
        let mut rng = rand::rng();
        for _ in 0..200 {
            let mut s = signals(rng.random_range(0..5_000));
            let before = compute_assessment(&s, None, &biz, &h, &w).composite;
            s.vote_count += rng.random_range(1..500);
            let after = compute_assessment(&s, None, &biz, &h, &w).composite;
            assert!(after >= before, "votes up, composite down: {before} -> {after}");
        }
    }

    #[test]
    fn enterprise_champion_with_strong_signals_is_critical() {
        let req = RequesterContext {
            tier: RequesterTier::Enterprise,
            company_size: 5_000,
            is_champion: true,
        };
        let s = PrioritySignals {
            vote_count: 400,
            comment_count: 40,
            unique_voters: 300,
            percentage_of_active_users: 35.0,
            similar_posts_count: 6,
        };
        let biz = BusinessContext {
            current_period_label: "Q3 2026".into(),
            ..Default::default()
        };
        let a = compute_assessment(&s, Some(&req), &biz, &hints(9.0, 2.0), &PriorityWeights::default());
        assert_eq!(a.level, PriorityLevel::Critical);
        assert!(a.score >= 80);
        assert!(a.justification.contains("Q3 2026"));
        assert!(a.justification.contains("ship now"));
    }

    #[test]
    fn quiet_free_request_is_low() {
        let req = RequesterContext::default();
        let a = compute_assessment(
            &PrioritySignals::default(),
            Some(&req),
            &BusinessContext::default(),
            &hints(1.0, 9.0),
            &PriorityWeights::default(),
        );
        assert_eq!(a.level, PriorityLevel::Low);
        assert_eq!(a.suggested_action.to_string(), "monitor");
    }

    #[test]
    fn score_is_rescaled_composite() {
        let a = compute_assessment(
            &signals(20),
            None,
            &BusinessContext::default(),
            &hints(5.0, 5.0),
            &PriorityWeights::default(),
        );
        assert_eq!(a.score, (a.composite * 10.0).round() as u8);
        assert_eq!(a.factors.len(), 7);
        assert!(a.factors.iter().all(|f| (0.0..=10.0).contains(&f.score)));
    }

    #[test]
    fn equal_contributions_prefer_heavier_weight() {
        let factors = vec![
            FactorScore {
                factor: Factor::Risk,
                score: 10.0,
                weight: 0.1,
            },
            FactorScore {
                factor: Factor::Reach,
                score: 5.0,
                weight: 0.2,
            },
        ];
        let ranked = dominant_factors(&factors);
        assert_eq!(ranked[0].factor, Factor::Reach);
    }

    #[test]
    fn near_equal_contributions_rank_consistently_by_weight() {
        let f = |factor, score, weight| FactorScore {
            factor,
            score,
            weight,
        };
        let factors = vec![
            f(Factor::Risk, 10.0, 0.100_000_04),
            f(Factor::Reach, 5.0, 0.2),
            f(Factor::StrategicAlignment, 2.0, 0.499_999_8),
            f(Factor::CompetitivePressure, 1.0, 0.1),
        ];
        let order: Vec<Factor> = dominant_factors(&factors).iter().map(|f| f.factor).collect();
        assert_eq!(
            order,
            vec![
                Factor::StrategicAlignment,
                Factor::Reach,
                Factor::Risk,
                Factor::CompetitivePressure
            ]
        );
    }

    #[test]
    fn justification_names_dominant_factor() {
        let w = PriorityWeights {
            strategic_alignment: 0.9,
            ..PriorityWeights::default()
        };
        let a = compute_assessment(
            &PrioritySignals::default(),
            None,
            &BusinessContext::default(),
            &hints(10.0, 5.0),
            &w,
        );
        assert!(
            a.justification.contains("driven by strategic alignment"),
            "{}",
            a.justification
        );
    }
}
