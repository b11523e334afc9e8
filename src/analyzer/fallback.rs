use std::collections::HashSet;

use crate::types::{InsiderSummary, InsiderTransaction, NetActivity, RedFlag, RiskLevel, Severity};

pub const FALLBACK_REASONING: &str = "Fallback calculation - LLM unavailable";
pub const QUIET_REASONING: &str = "No significant red flags or concerning insider patterns detected.";

/// Score, level and reasoning as produced by the scoring step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub reasoning: String,
}

impl ScoreAssessment {
    /// Nothing was found.
    pub fn quiet() -> Self {
        Self { risk_score: 10, risk_level: RiskLevel::Low, reasoning: QUIET_REASONING.to_string() }
    }
}

/// Insider summary computed from raw open-market sales (S) and purchases (P).
pub fn insider_summary(transactions: &[InsiderTransaction]) -> InsiderSummary {
    let mut total_sold = 0i64;
    let mut total_bought = 0i64;
    let mut sellers = HashSet::new();
    let mut buyers = HashSet::new();

    for t in transactions {
        if t.is_sale() {
            total_sold += t.total_value;
            sellers.insert(t.insider_name.as_str());
        } else if t.is_purchase() {
            total_bought += t.total_value;
            buyers.insert(t.insider_name.as_str());
        }
    }

    let net_activity = if total_sold > total_bought * 2 {
        NetActivity::HeavySelling
    } else if total_sold > total_bought {
        NetActivity::NetSelling
    } else if total_bought > total_sold * 2 {
        NetActivity::HeavyBuying
    } else if total_bought > total_sold {
        NetActivity::NetBuying
    } else {
        NetActivity::Neutral
    };

    InsiderSummary {
        net_activity,
        total_sold,
        total_bought,
        insiders_selling: sellers.len() as u32,
        insiders_buying: buyers.len() as u32,
    }
}

pub fn score(red_flags: &[RedFlag], net_activity: NetActivity) -> ScoreAssessment {
    let mut score: u32 = 20;
    for flag in red_flags {
        score += match flag.severity {
            Severity::High => 20,
            Severity::Medium => 10,
            Severity::Low => 5,
        };
    }
    score += match net_activity {
        NetActivity::HeavySelling => 15,
        NetActivity::NetSelling => 8,
        _ => 0,
    };

    let risk_score = score.min(100) as u8;
    ScoreAssessment {
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
        reasoning: FALLBACK_REASONING.to_string(),
    }
}
