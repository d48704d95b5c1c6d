//! Heuristic ranking of exclusion criteria by disqualification power.
//!
//! No model call here: the score is a keyword-category table plus structural
//! bonuses, cheap enough to run on every extraction. Ambiguous criteria are
//! downranked because they cannot be applied automatically anyway.
//!
//! Ranking is a pure transformation: it consumes an [`ExtractedCriteria`] and
//! returns a new one with powers assigned and `top_disqualifiers` populated,
//! so an unranked artifact is never observable in a half-mutated state.

use crate::model::{CriterionType, DisqualificationPower, EligibilityCriterion, ExtractedCriteria};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use tracing::info;

/// Scoring weights. The default table encodes the exclusion categories that
/// eliminate the most candidates in practice; callers with site-specific
/// populations can supply their own.
#[derive(Debug, Clone)]
pub struct RankPolicy {
    /// (pattern, score contribution) per category; every matching category
    /// contributes.
    pub categories: Vec<(Regex, f32)>,
    pub numeric_bonus: f32,
    pub temporal_bonus: f32,
    pub conditional_bonus: f32,
    /// Negative: ambiguous criteria need human interpretation.
    pub ambiguity_penalty: f32,
    /// Score cut points for very_high / high / medium; below medium is low.
    pub very_high_cut: f32,
    pub high_cut: f32,
    pub medium_cut: f32,
}

static DEFAULT_POLICY: Lazy<RankPolicy> = Lazy::new(RankPolicy::default);

impl Default for RankPolicy {
    fn default() -> Self {
        let table: &[(&str, f32)] = &[
            (r"(?i)\bpregnant|pregnancy|lactating|breastfeeding\b", 3.0),
            (r"(?i)\bprior\s+(malignancy|cancer|tumor|neoplasm)\b", 3.0),
            (r"(?i)\brenal\s+(failure|impairment)|eGFR|creatinine\b", 2.5),
            (r"(?i)\bhepatic|liver\s+(failure|impairment|disease)\b", 2.5),
            (r"(?i)\bcardiac|heart\s+(failure|disease)\b", 2.5),
            (r"(?i)\bage\s*[<>≤≥]\s*\d+|\b(under|over)\s+\d+\s+years?\b", 2.0),
            (r"(?i)\bHIV|hepatitis\s+[BC]|HBV|HCV\b", 2.0),
            (r"(?i)\bactive\s+(infection|tuberculosis|TB)\b", 2.0),
            (r"(?i)\bautoimmune\b", 1.5),
            (r"(?i)\bchemotherapy|immunotherapy|biologic\s+therapy\b", 1.5),
            (r"(?i)\bseizure|epilepsy\b", 1.5),
            (r"(?i)\bpsychiatric\b", 1.0),
        ];
        Self {
            categories: table
                .iter()
                .map(|(p, w)| (Regex::new(p).expect("rank pattern"), *w))
                .collect(),
            numeric_bonus: 1.0,
            temporal_bonus: 0.5,
            conditional_bonus: 0.5,
            ambiguity_penalty: -1.5,
            very_high_cut: 4.0,
            high_cut: 2.5,
            medium_cut: 1.0,
        }
    }
}

impl RankPolicy {
    /// Score one criterion. Higher means more disqualifying.
    pub fn score(&self, criterion: &EligibilityCriterion) -> f32 {
        let mut score = 0.0;
        for (pattern, weight) in &self.categories {
            if pattern.is_match(&criterion.text) {
                score += weight;
            }
        }
        if criterion.has_numeric_threshold {
            // measurable criteria can actually be applied automatically
            score += self.numeric_bonus;
        }
        if criterion.has_temporal_condition {
            score += self.temporal_bonus;
        }
        if criterion.has_conditional_logic {
            score += self.conditional_bonus;
        }
        if criterion.is_ambiguous {
            score += self.ambiguity_penalty;
        }
        score
    }

    fn band(&self, score: f32) -> DisqualificationPower {
        if score >= self.very_high_cut {
            DisqualificationPower::VeryHigh
        } else if score >= self.high_cut {
            DisqualificationPower::High
        } else if score >= self.medium_cut {
            DisqualificationPower::Medium
        } else {
            DisqualificationPower::Low
        }
    }
}

/// Rank with the default policy. See [`rank_with_policy`].
pub fn rank_disqualifiers(extracted: ExtractedCriteria, top_n: usize) -> ExtractedCriteria {
    rank_with_policy(extracted, top_n, &DEFAULT_POLICY)
}

/// Score every exclusion criterion, assign its power band, and populate
/// `top_disqualifiers` with the `top_n` highest scorers.
///
/// The sort is stable and descending, so equal scores keep extraction order.
/// Inclusion criteria are untouched and never appear in the top list.
pub fn rank_with_policy(
    mut extracted: ExtractedCriteria,
    top_n: usize,
    policy: &RankPolicy,
) -> ExtractedCriteria {
    let mut scored: Vec<(usize, f32)> = Vec::new();
    for (index, criterion) in extracted.criteria.iter_mut().enumerate() {
        if criterion.criterion_type != CriterionType::Exclusion {
            continue;
        }
        let score = policy.score(criterion);
        criterion.disqualification_power = policy.band(score);
        scored.push((index, score));
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    extracted.top_disqualifiers = scored
        .iter()
        .take(top_n)
        .map(|(index, _)| extracted.criteria[*index].clone())
        .collect();

    info!(
        exclusions = scored.len(),
        top_n = extracted.top_disqualifiers.len(),
        top_scores = ?scored.iter().take(top_n).map(|(_, s)| (s * 100.0).round() / 100.0).collect::<Vec<_>>(),
        "ranking done"
    );
    extracted
}
