use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::types::{AnalysisResult, NetActivity, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Regulatory,
    Operational,
    Narrative,
    Insider,
    /// Reserved; nothing feeds it yet.
    Momentum,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        RiskCategory::Regulatory,
        RiskCategory::Operational,
        RiskCategory::Narrative,
        RiskCategory::Insider,
        RiskCategory::Momentum,
    ];

    /// Category of a red flag type. Unmapped types are operational.
    pub fn for_flag(signal_type: &str) -> Self {
        match signal_type {
            "AUDITOR_CHANGE" | "FINANCIAL_RESTATEMENT" | "MATERIAL_WEAKNESS" | "NON_RELIANCE"
            | "DELISTING_NOTICE" | "SEC_INVESTIGATION" => RiskCategory::Regulatory,
            "EARNINGS_MISS" | "GUIDANCE_LOWERED" | "MATERIAL_EVENT" | "REGULATORY_FD" => {
                RiskCategory::Narrative
            }
            _ => RiskCategory::Operational,
        }
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskCategory::Regulatory => "regulatory",
            RiskCategory::Operational => "operational",
            RiskCategory::Narrative => "narrative",
            RiskCategory::Insider => "insider",
            RiskCategory::Momentum => "momentum",
        };
        write!(f, "{s}")
    }
}

pub fn severity_points(severity: Severity) -> u32 {
    match severity {
        Severity::High => 25,
        Severity::Medium => 15,
        Severity::Low => 5,
    }
}

fn insider_activity_bonus(activity: NetActivity) -> u32 {
    match activity {
        NetActivity::HeavySelling => 20,
        NetActivity::NetSelling => 10,
        _ => 0,
    }
}

/// Category weights in integer percent. Must sum to exactly 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryWeights {
    pub regulatory: u32,
    pub operational: u32,
    pub narrative: u32,
    pub insider: u32,
    pub momentum: u32,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self { regulatory: 30, operational: 25, narrative: 20, insider: 15, momentum: 10 }
    }
}

impl CategoryWeights {
    pub fn get(&self, category: RiskCategory) -> u32 {
        match category {
            RiskCategory::Regulatory => self.regulatory,
            RiskCategory::Operational => self.operational,
            RiskCategory::Narrative => self.narrative,
            RiskCategory::Insider => self.insider,
            RiskCategory::Momentum => self.momentum,
        }
    }

    pub fn sum(&self) -> u32 {
        RiskCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBreakdown {
    /// Per-category points, each capped at 100.
    pub categories: BTreeMap<RiskCategory, u32>,
    /// Weighted total, floored and capped at 100.
    pub total: u8,
}

#[derive(Debug, Clone)]
pub struct CategoryScorer {
    weights: CategoryWeights,
}

impl Default for CategoryScorer {
    fn default() -> Self {
        Self { weights: CategoryWeights::default() }
    }
}

impl CategoryScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: CategoryWeights) -> Result<Self> {
        let sum = weights.sum();
        if sum != 100 {
            return Err(AppError::Config(format!("category weights must sum to 100, got {sum}")));
        }
        Ok(Self { weights })
    }

    pub fn score(&self, analysis: &AnalysisResult) -> CategoryBreakdown {
        let mut categories: BTreeMap<RiskCategory, u32> =
            RiskCategory::ALL.iter().map(|c| (*c, 0)).collect();

        for flag in &analysis.red_flags {
            *categories.entry(RiskCategory::for_flag(&flag.signal_type)).or_insert(0) +=
                severity_points(flag.severity);
        }
        for pattern in &analysis.insider_patterns {
            *categories.entry(RiskCategory::Insider).or_insert(0) += severity_points(pattern.severity);
        }
        *categories.entry(RiskCategory::Insider).or_insert(0) +=
            insider_activity_bonus(analysis.insider_summary.net_activity);

        for points in categories.values_mut() {
            *points = (*points).min(100);
        }

        let weighted: u32 =
            categories.iter().map(|(c, points)| points * self.weights.get(*c)).sum::<u32>() / 100;

        CategoryBreakdown { categories, total: weighted.min(100) as u8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InsiderPattern, InsiderSummary, RedFlag};

    fn flag(t: &str, severity: Severity) -> RedFlag {
        RedFlag {
            signal_type: t.into(),
            title: t.into(),
            severity,
            details: String::new(),
            evidence_url: None,
            filing_date: None,
        }
    }

    #[test]
    fn default_weights_sum_to_exactly_100() {
        assert_eq!(CategoryWeights::default().sum(), 100);
        assert!(CategoryScorer::with_weights(CategoryWeights::default()).is_ok());
    }

    #[test]
    fn bad_weights_rejected() {
        let w = CategoryWeights { momentum: 11, ..CategoryWeights::default() };
        assert!(matches!(CategoryScorer::with_weights(w), Err(AppError::Config(_))));
    }

    #[test]
    fn flag_type_mapping() {
        assert_eq!(RiskCategory::for_flag("NON_RELIANCE"), RiskCategory::Regulatory);
        assert_eq!(RiskCategory::for_flag("GUIDANCE_LOWERED"), RiskCategory::Narrative);
        assert_eq!(RiskCategory::for_flag("LAYOFF_ANNOUNCEMENT"), RiskCategory::Operational);
        assert_eq!(RiskCategory::for_flag("SOMETHING_NEW"), RiskCategory::Operational);
    }

    #[test]
    fn weighted_total() {
        let analysis = AnalysisResult {
            red_flags: vec![
                flag("AUDITOR_CHANGE", Severity::High),
                flag("FINANCIAL_RESTATEMENT", Severity::High),
                flag("RESTRUCTURING", Severity::Medium),
            ],
            insider_patterns: vec![InsiderPattern {
                signal_type: "CLUSTER_SELLING".into(),
                title: "Cluster".into(),
                severity: Severity::High,
                details: String::new(),
                evidence_url: None,
            }],
            insider_summary: InsiderSummary {
                net_activity: NetActivity::HeavySelling,
                ..Default::default()
            },
            ..Default::default()
        };
        let b = CategoryScorer::new().score(&analysis);
        assert_eq!(b.categories[&RiskCategory::Regulatory], 50);
        assert_eq!(b.categories[&RiskCategory::Operational], 15);
        assert_eq!(b.categories[&RiskCategory::Insider], 45);
        assert_eq!(b.categories[&RiskCategory::Momentum], 0);
        // 50*30 + 15*25 + 45*15 = 1500 + 375 + 675 = 2550 -> 25
        assert_eq!(b.total, 25);
    }

    #[test]
    fn categories_cap_at_100() {
        let analysis = AnalysisResult {
            red_flags: (0..10).map(|_| flag("SEC_INVESTIGATION", Severity::High)).collect(),
            ..Default::default()
        };
        let b = CategoryScorer::new().score(&analysis);
        assert_eq!(b.categories[&RiskCategory::Regulatory], 100);
        assert_eq!(b.total, 30);
    }
}
