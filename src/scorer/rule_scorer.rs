use tracing::debug;

use crate::config::ScoringConfig;
use crate::error::{AppError, Result};
use crate::scorer::category::CategoryScorer;
use crate::scorer::rules::ScoringRule;
use crate::types::{AnalysisResult, FilingData, RiskLevel, ScoringResult};

/// Deterministic second stage over analyzer output: an optional category
/// blend for the base score, then ordered additive rules, then a clamp.
#[derive(Debug, Clone)]
pub struct RuleScorer {
    cfg: ScoringConfig,
    category: CategoryScorer,
    rules: Vec<ScoringRule>,
}

impl RuleScorer {
    pub fn new(cfg: ScoringConfig) -> Result<Self> {
        if cfg.category_blend_pct > 100 {
            return Err(AppError::Config(format!(
                "category blend must be 0-100 percent, got {}",
                cfg.category_blend_pct
            )));
        }
        Ok(Self { cfg, category: CategoryScorer::new(), rules: ScoringRule::defaults() })
    }

    /// Appends a rule after the built-ins.
    pub fn add_rule(&mut self, rule: ScoringRule) {
        self.rules.push(rule);
    }

    pub fn scoring_method(&self) -> &'static str {
        if self.cfg.use_category_scoring {
            "Category-weighted scoring with rule adjustments"
        } else {
            "Rule-based adjustments"
        }
    }

    pub fn score(&self, analysis: &AnalysisResult, data: Option<&FilingData>) -> ScoringResult {
        let llm_score = u32::from(analysis.risk_score.min(100));

        let (base_score, category_score) = if self.cfg.use_category_scoring {
            let category = self.category.score(analysis).total;
            let blend = self.cfg.category_blend_pct;
            let base = (blend * u32::from(category) + (100 - blend) * llm_score) / 100;
            (base as i32, Some(category))
        } else {
            (llm_score as i32, None)
        };

        let mut total_adjustments = 0i32;
        let mut adjustment_reasons = Vec::new();
        for rule in &self.rules {
            let (adj, reason) = rule.apply(analysis, data, &self.cfg);
            if adj != 0 {
                total_adjustments += adj;
                if !reason.is_empty() {
                    adjustment_reasons.push(reason);
                }
            }
        }

        let risk_score = (base_score + total_adjustments).clamp(0, 100) as u8;
        debug!(
            base_score,
            total_adjustments,
            risk_score,
            "Scored {} rules",
            self.rules.len()
        );

        ScoringResult {
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            base_score,
            total_adjustments,
            adjustment_reasons,
            category_score,
        }
    }
}
