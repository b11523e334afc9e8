use std::sync::Arc;

use crate::config::ScoringConfig;
use crate::types::{AnalysisResult, FilingData, NetActivity, Severity};

pub type RuleFn = dyn Fn(&AnalysisResult, Option<&FilingData>) -> (i32, String) + Send + Sync;

/// One additive score adjustment. Returns `(0, "")` when it does not apply.
#[derive(Clone)]
pub enum ScoringRule {
    AuditorChange,
    FinancialRestatement,
    MultipleRedFlags,
    HighSeverityInsiderPatterns,
    RedFlagsWithInsiderSelling,
    /// Reads raw 8-K item codes rather than analyzer output.
    CriticalItems,
    Custom { name: String, apply: Arc<RuleFn> },
}

impl std::fmt::Debug for ScoringRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringRule::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl ScoringRule {
    /// Built-in rules in evaluation order.
    pub fn defaults() -> Vec<ScoringRule> {
        vec![
            ScoringRule::AuditorChange,
            ScoringRule::FinancialRestatement,
            ScoringRule::MultipleRedFlags,
            ScoringRule::HighSeverityInsiderPatterns,
            ScoringRule::RedFlagsWithInsiderSelling,
            ScoringRule::CriticalItems,
        ]
    }

    pub fn custom<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&AnalysisResult, Option<&FilingData>) -> (i32, String) + Send + Sync + 'static,
    {
        ScoringRule::Custom { name: name.into(), apply: Arc::new(apply) }
    }

    pub fn name(&self) -> &str {
        match self {
            ScoringRule::AuditorChange => "auditor_change",
            ScoringRule::FinancialRestatement => "financial_restatement",
            ScoringRule::MultipleRedFlags => "multiple_red_flags",
            ScoringRule::HighSeverityInsiderPatterns => "high_severity_insider_patterns",
            ScoringRule::RedFlagsWithInsiderSelling => "red_flags_with_insider_selling",
            ScoringRule::CriticalItems => "critical_8k_items",
            ScoringRule::Custom { name, .. } => name,
        }
    }

    pub fn apply(
        &self,
        analysis: &AnalysisResult,
        data: Option<&FilingData>,
        cfg: &ScoringConfig,
    ) -> (i32, String) {
        match self {
            ScoringRule::AuditorChange => {
                if has_flag(analysis, "AUDITOR_CHANGE") {
                    let adj = cfg.auditor_change_penalty;
                    (adj, format!("+{adj} for auditor change"))
                } else {
                    none()
                }
            }
            ScoringRule::FinancialRestatement => {
                if has_flag(analysis, "FINANCIAL_RESTATEMENT") {
                    let adj = cfg.financial_restatement_penalty;
                    (adj, format!("+{adj} for financial restatement"))
                } else {
                    none()
                }
            }
            ScoringRule::MultipleRedFlags => {
                let count = analysis.red_flags.len();
                if count >= cfg.multiple_flags_threshold {
                    let adj = cfg.multiple_flags_penalty;
                    (adj, format!("+{adj} for {count} red flags"))
                } else {
                    none()
                }
            }
            ScoringRule::HighSeverityInsiderPatterns => {
                let high = analysis
                    .insider_patterns
                    .iter()
                    .filter(|p| p.severity == Severity::High)
                    .count();
                if high >= cfg.high_severity_pattern_threshold {
                    let adj = cfg.high_severity_pattern_penalty;
                    (adj, format!("+{adj} for multiple high-severity insider patterns"))
                } else {
                    none()
                }
            }
            ScoringRule::RedFlagsWithInsiderSelling => {
                // Plain net selling only; heavy selling does not trigger this rule.
                if !analysis.red_flags.is_empty()
                    && analysis.insider_summary.net_activity == NetActivity::NetSelling
                {
                    let adj = cfg.insider_combo_penalty;
                    (adj, format!("+{adj} for red flags + insider selling combination"))
                } else {
                    none()
                }
            }
            ScoringRule::CriticalItems => {
                let Some(data) = data else {
                    return none();
                };
                let mut total = 0;
                let mut reasons = Vec::new();
                for filing in &data.filings_8k {
                    for item in &filing.items {
                        if item.contains("4.01") {
                            total += cfg.item_401_penalty;
                            reasons.push(format!("+{} for Item 4.01", cfg.item_401_penalty));
                        }
                        if item.contains("4.02") {
                            total += cfg.item_402_penalty;
                            reasons.push(format!("+{} for Item 4.02", cfg.item_402_penalty));
                        }
                    }
                }
                (total, reasons.join("; "))
            }
            ScoringRule::Custom { apply, .. } => apply(analysis, data),
        }
    }
}

fn has_flag(analysis: &AnalysisResult, signal_type: &str) -> bool {
    analysis.red_flags.iter().any(|f| f.signal_type == signal_type)
}

fn none() -> (i32, String) {
    (0, String::new())
}
