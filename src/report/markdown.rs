use crate::report::group_thousands;
use crate::types::{NetActivity, RiskLevel, RiskReport};

const EVIDENCE_LINKS: usize = 5;

pub fn format_report(report: &RiskReport) -> String {
    let mut lines = vec![
        format!("# Risk Report: {}", report.ticker),
        String::new(),
        format!(
            "**Risk Score: {}/100 ({})**",
            report.risk_score,
            report.risk_level.to_string().to_uppercase()
        ),
        String::new(),
    ];

    if !report.red_flags.is_empty() {
        lines.push("## Red Flags Detected".to_string());
        lines.push(String::new());
        for flag in &report.red_flags {
            lines.push(format!("- **{}** ({})", flag.title, flag.severity));
            if !flag.details.is_empty() {
                lines.push(format!("  - {}", flag.details));
            }
        }
        lines.push(String::new());
    }

    let insider = &report.insider_summary;
    if !insider.is_empty() {
        lines.push("## Insider Activity".to_string());
        lines.push(String::new());
        lines.push(format!("- **Net Activity**: {}", net_label(insider.net_activity)));
        if insider.total_sold > 0 {
            lines.push(format!("- **Total Sold**: ${}", group_thousands(insider.total_sold)));
        }
        if insider.total_bought > 0 {
            lines.push(format!("- **Total Bought**: ${}", group_thousands(insider.total_bought)));
        }
        if insider.insiders_selling > 0 {
            lines.push(format!("- **Insiders Selling**: {}", insider.insiders_selling));
        }
        if insider.insiders_buying > 0 {
            lines.push(format!("- **Insiders Buying**: {}", insider.insiders_buying));
        }
        lines.push(String::new());
    }

    if let Some(explanation) = &report.explanation {
        lines.extend(["## Analysis".to_string(), String::new(), explanation.clone(), String::new()]);
    }

    if !report.evidence_links.is_empty() {
        lines.push("## Evidence Links".to_string());
        lines.push(String::new());
        for link in report.evidence_links.iter().take(EVIDENCE_LINKS) {
            lines.push(format!("- [{link}]({link})"));
        }
        lines.push(String::new());
    }

    lines.push("---".to_string());
    lines.push(format!("*Analyzed: {} UTC*", report.analyzed_at.format("%Y-%m-%d %H:%M")));
    lines.join("\n")
}

/// One row per report, highest score first.
pub fn format_summary_table(reports: &[RiskReport]) -> String {
    if reports.is_empty() {
        return "No results to display.".to_string();
    }

    let mut sorted: Vec<&RiskReport> = reports.iter().collect();
    sorted.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));

    let mut lines = vec![
        "| Ticker | Risk Score | Level | Red Flags | Insider Activity |".to_string(),
        "|--------|------------|-------|-----------|------------------|".to_string(),
    ];
    for r in sorted {
        let net = match r.insider_summary.net_activity {
            NetActivity::Neutral => "-",
            other => net_label(other),
        };
        lines.push(format!(
            "| {} | {} | {} | {} | {} |",
            r.ticker,
            r.risk_score,
            level_label(r.risk_level),
            r.red_flags_count,
            net
        ));
    }
    lines.join("\n")
}

fn net_label(net: NetActivity) -> &'static str {
    match net {
        NetActivity::HeavySelling => "Heavy selling",
        NetActivity::NetSelling => "Selling",
        NetActivity::Neutral => "Neutral",
        NetActivity::NetBuying => "Buying",
        NetActivity::HeavyBuying => "Heavy buying",
    }
}

fn level_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "Low",
        RiskLevel::Moderate => "Moderate",
        RiskLevel::Elevated => "Elevated",
        RiskLevel::High => "High",
    }
}
