//! Risk scorer - deterministic probe result -> verdict
//!
//! Pure function of its inputs: the same probe result and auxiliary signals
//! always produce the same verdict, with every point accounted for by a
//! named factor. A blocked sell path short-circuits everything else.

use tracing::debug;

use crate::models::config::ScoringWeights;
use crate::models::types::{AuxSignals, ProbeResult, RiskLevel, RiskVerdict, ScoreFactor};

const MAX_SCORE: f64 = 100.0;
const TAX_CEILING_BPS: f64 = 10_000.0;

/// Deterministic scorer. Holds only weights; no I/O, no clock, no state.
pub struct RiskScorer {
    weights: ScoringWeights,
}

impl RiskScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Score one probe result. Missing auxiliary signals contribute zero
    /// rather than being guessed at.
    pub fn score(&self, probe: &ProbeResult, aux: &AuxSignals) -> RiskVerdict {
        // A token that cannot be sold is a total loss regardless of how
        // flattering its other numbers look.
        if !probe.can_sell {
            let detail = probe
                .simulation_error
                .clone()
                .unwrap_or_else(|| format!("effective sell tax {}bps", probe.sell_tax_bps));
            return RiskVerdict {
                risk_score: MAX_SCORE,
                risk_level: RiskLevel::Critical,
                is_honeypot: true,
                contributing_factors: vec![ScoreFactor {
                    tag: "sell_blocked".to_string(),
                    points: MAX_SCORE,
                    detail,
                }],
            };
        }

        let mut factors = Vec::new();

        if let Some(factor) = self.sell_tax_factor(probe.sell_tax_bps) {
            factors.push(factor);
        }
        if let Some(factor) = self.concentration_factor(aux.top_holder_pct) {
            factors.push(factor);
        }
        if let Some(factor) = self.liquidity_factor(aux.liquidity_usd) {
            factors.push(factor);
        }

        let raw: f64 = factors.iter().map(|f| f.points).sum();
        let risk_score = raw.clamp(0.0, MAX_SCORE);
        let risk_level = RiskLevel::from_score(risk_score);

        factors.sort_by(|a, b| {
            b.points
                .partial_cmp(&a.points)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "{} Scored {} on chain {}: {:.1} ({}) from {} factors",
            risk_level.emoji(),
            probe.token_address,
            probe.chain_id,
            risk_score,
            risk_level.as_str(),
            factors.len()
        );

        RiskVerdict {
            risk_score,
            risk_level,
            is_honeypot: false,
            contributing_factors: factors,
        }
    }

    /// Sell tax scales linearly above the threshold, maxing out at the
    /// full ceiling. Tax at or below the threshold is normal DEX friction.
    fn sell_tax_factor(&self, sell_tax_bps: u64) -> Option<ScoreFactor> {
        let threshold = self.weights.tax_threshold_bps as f64;
        let tax = sell_tax_bps as f64;
        if tax <= threshold {
            return None;
        }
        let span = TAX_CEILING_BPS - threshold;
        let points = ((tax - threshold) / span * self.weights.max_factor_score)
            .min(self.weights.max_factor_score);
        Some(ScoreFactor {
            tag: "sell_tax".to_string(),
            points,
            detail: format!("effective sell tax {}bps", sell_tax_bps),
        })
    }

    /// Holder concentration scales linearly from the threshold share up to
    /// a single wallet holding everything.
    fn concentration_factor(&self, top_holder_pct: Option<f64>) -> Option<ScoreFactor> {
        let pct = top_holder_pct?;
        let threshold = self.weights.concentration_threshold_pct;
        if pct <= threshold {
            return None;
        }
        let span = 100.0 - threshold;
        let points = ((pct.min(100.0) - threshold) / span * self.weights.max_factor_score)
            .min(self.weights.max_factor_score);
        Some(ScoreFactor {
            tag: "holder_concentration".to_string(),
            points,
            detail: format!("top holder owns {:.1}% of supply", pct),
        })
    }

    /// Thin liquidity scores inversely below the floor: an empty pool is
    /// maximally suspicious, a pool at the floor is not suspicious at all.
    fn liquidity_factor(&self, liquidity_usd: Option<f64>) -> Option<ScoreFactor> {
        let liquidity = liquidity_usd?;
        let floor = self.weights.liquidity_floor_usd;
        if liquidity >= floor {
            return None;
        }
        let points = ((floor - liquidity.max(0.0)) / floor * self.weights.max_factor_score)
            .min(self.weights.max_factor_score);
        Some(ScoreFactor {
            tag: "thin_liquidity".to_string(),
            points,
            detail: format!("pool liquidity ${:.0}", liquidity),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn scorer() -> RiskScorer {
        RiskScorer::new(ScoringWeights::default())
    }

    fn sellable_probe(sell_tax_bps: u64) -> ProbeResult {
        ProbeResult {
            token_address: Address::ZERO,
            chain_id: 1,
            can_buy: true,
            can_sell: true,
            buy_tax_bps: 0,
            sell_tax_bps,
            simulation_error: None,
        }
    }

    #[test]
    fn test_blocked_sell_short_circuits() {
        let probe = ProbeResult {
            can_sell: false,
            sell_tax_bps: 10_000,
            simulation_error: Some("execution reverted: nope".to_string()),
            ..sellable_probe(0)
        };
        let verdict = scorer().score(&probe, &AuxSignals::default());

        assert_eq!(verdict.risk_score, 100.0);
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
        assert!(verdict.is_honeypot);
        assert_eq!(verdict.contributing_factors.len(), 1);
        assert_eq!(verdict.contributing_factors[0].tag, "sell_blocked");
    }

    #[test]
    fn test_clean_token_scores_zero() {
        let verdict = scorer().score(&sellable_probe(0), &AuxSignals::default());
        assert_eq!(verdict.risk_score, 0.0);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!(!verdict.is_honeypot);
        assert!(verdict.contributing_factors.is_empty());
    }

    #[test]
    fn test_tax_at_threshold_contributes_nothing() {
        let verdict = scorer().score(&sellable_probe(500), &AuxSignals::default());
        assert_eq!(verdict.risk_score, 0.0);
    }

    #[test]
    fn test_tax_above_threshold_scales_linearly() {
        let low = scorer().score(&sellable_probe(1_000), &AuxSignals::default());
        let high = scorer().score(&sellable_probe(5_000), &AuxSignals::default());
        assert!(low.risk_score > 0.0);
        assert!(high.risk_score > low.risk_score);
        assert!(high.risk_score <= 30.0);
        assert_eq!(high.contributing_factors[0].tag, "sell_tax");
    }

    #[test]
    fn test_factor_contribution_is_capped() {
        // Tax just under the unsellable ceiling still caps at one factor's worth
        let verdict = scorer().score(&sellable_probe(9_000), &AuxSignals::default());
        assert!(verdict.risk_score <= 30.0);
    }

    #[test]
    fn test_missing_aux_signals_contribute_zero() {
        let with_aux = scorer().score(
            &sellable_probe(0),
            &AuxSignals {
                top_holder_pct: Some(90.0),
                liquidity_usd: Some(1_000.0),
            },
        );
        let without = scorer().score(&sellable_probe(0), &AuxSignals::default());
        assert!(with_aux.risk_score > 0.0);
        assert_eq!(without.risk_score, 0.0);
    }

    #[test]
    fn test_all_factors_stack_and_clamp() {
        let verdict = scorer().score(
            &sellable_probe(9_000),
            &AuxSignals {
                top_holder_pct: Some(100.0),
                liquidity_usd: Some(0.0),
            },
        );
        // Three maxed factors: ~30 + 30 + 30, never above 100
        assert!(verdict.risk_score > 85.0);
        assert!(verdict.risk_score <= 100.0);
        assert_eq!(verdict.contributing_factors.len(), 3);
        assert!(!verdict.is_honeypot);
    }

    #[test]
    fn test_factors_sorted_by_contribution() {
        let verdict = scorer().score(
            &sellable_probe(1_000),
            &AuxSignals {
                top_holder_pct: Some(95.0),
                liquidity_usd: None,
            },
        );
        let points: Vec<f64> = verdict
            .contributing_factors
            .iter()
            .map(|f| f.points)
            .collect();
        assert!(points.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_determinism() {
        let probe = sellable_probe(2_500);
        let aux = AuxSignals {
            top_holder_pct: Some(40.0),
            liquidity_usd: Some(10_000.0),
        };
        let a = scorer().score(&probe, &aux);
        let b = scorer().score(&probe, &aux);
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.risk_level, b.risk_level);
    }
}
