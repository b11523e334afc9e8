pub mod markdown;
pub mod webhook;

use std::collections::BTreeSet;

use chrono::Utc;

use crate::types::{
    AnalysisResult, FilingCounts, FilingData, RiskReport, ScoringDetails, ScoringResult,
};

/// Assembles the final report. The score and level come from the scoring
/// engine; everything else is carried over from the analysis.
pub fn build_report(
    ticker: &str,
    data: &FilingData,
    analysis: &AnalysisResult,
    scoring: &ScoringResult,
    scoring_method: &str,
) -> RiskReport {
    RiskReport {
        ticker: ticker.to_string(),
        risk_score: scoring.risk_score,
        risk_level: scoring.risk_level,
        red_flags: analysis.red_flags.clone(),
        red_flags_count: analysis.red_flags.len(),
        insider_patterns: analysis.insider_patterns.clone(),
        insider_summary: analysis.insider_summary.clone(),
        explanation: analysis.explanation.clone(),
        reasoning: analysis.reasoning.clone(),
        evidence_links: evidence_links(data, analysis),
        filings_analyzed: FilingCounts {
            eight_k_count: data.filings_8k.len(),
            form4_count: data.filings_form4.len(),
        },
        scoring_details: ScoringDetails {
            base_score: scoring.base_score,
            category_score: scoring.category_score,
            adjustments: scoring.total_adjustments,
            adjustment_reasons: scoring.adjustment_reasons.clone(),
            scoring_method: scoring_method.to_string(),
        },
        analyzed_at: Utc::now(),
        lookback_days: data.lookback_days,
    }
}

/// Sorted, de-duplicated URLs from filings, transactions, flags and patterns.
pub fn evidence_links(data: &FilingData, analysis: &AnalysisResult) -> Vec<String> {
    let filings = data.filings_8k.iter().map(|f| f.url.as_str());
    let trades = data.filings_form4.iter().map(|t| t.url.as_str());
    let flags = analysis.red_flags.iter().filter_map(|f| f.evidence_url.as_deref());
    let patterns = analysis.insider_patterns.iter().filter_map(|p| p.evidence_url.as_deref());

    filings
        .chain(trades)
        .chain(flags)
        .chain(patterns)
        .filter(|url| !url.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// `1234567` → `1,234,567`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}
