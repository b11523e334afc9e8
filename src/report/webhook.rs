//! Alert payloads for webhook delivery.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::config::WebhookFormat;
use crate::types::{RiskLevel, RiskReport};

const DISCORD_ANALYSIS_CHARS: usize = 1_000;
const SLACK_ANALYSIS_CHARS: usize = 500;

pub fn payload(report: &RiskReport, format: WebhookFormat) -> Value {
    match format {
        WebhookFormat::Generic => generic(report),
        WebhookFormat::Discord => discord(report),
        WebhookFormat::Slack => slack(report),
    }
}

pub fn generic(report: &RiskReport) -> Value {
    let top_signal = report
        .red_flags
        .first()
        .map(|f| json!({ "type": f.signal_type, "title": f.title }));
    json!({
        "alert_type": "risk_signal",
        "ticker": report.ticker,
        "risk_score": report.risk_score,
        "risk_level": report.risk_level,
        "title": format!("Risk Alert: {} - Score {}", report.ticker, report.risk_score),
        "message": report
            .explanation
            .clone()
            .unwrap_or_else(|| format!("{} triggered a risk alert", report.ticker)),
        "top_signal": top_signal,
        "red_flags_count": report.red_flags_count,
        "insider_summary": {
            "net_activity": report.insider_summary.net_activity,
            "total_sold": report.insider_summary.total_sold,
            "total_bought": report.insider_summary.total_bought,
        },
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

pub fn discord(report: &RiskReport) -> Value {
    let mut fields = vec![
        json!({ "name": "Risk Score", "value": format!("{}/100", report.risk_score), "inline": true }),
        json!({ "name": "Level", "value": report.risk_level.to_string().to_uppercase(), "inline": true }),
        json!({ "name": "Red Flags", "value": report.red_flags_count.to_string(), "inline": true }),
    ];
    if !report.red_flags.is_empty() {
        let top = report
            .red_flags
            .iter()
            .take(3)
            .map(|f| format!("- {}", f.title))
            .collect::<Vec<_>>()
            .join("\n");
        fields.push(json!({ "name": "Top Signals", "value": top, "inline": false }));
    }
    if let Some(text) = &report.explanation {
        fields.push(json!({
            "name": "Analysis",
            "value": truncate(text, DISCORD_ANALYSIS_CHARS),
            "inline": false,
        }));
    }

    json!({
        "embeds": [{
            "title": format!("Signal Alert: {}", report.ticker),
            "color": embed_color(report.risk_level),
            "fields": fields,
            "timestamp": report.analyzed_at.to_rfc3339(),
            "footer": { "text": "SEC Filing Risk Scanner" },
        }]
    })
}

pub fn slack(report: &RiskReport) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": format!("Risk Alert: {}", report.ticker), "emoji": true },
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Risk Score:*\n{}/100", report.risk_score) },
                { "type": "mrkdwn", "text": format!("*Level:*\n{}", report.risk_level.to_string().to_uppercase()) },
                { "type": "mrkdwn", "text": format!("*Red Flags:*\n{}", report.red_flags_count) },
                { "type": "mrkdwn", "text": format!("*Insider Activity:*\n{}", report.insider_summary.net_activity) },
            ],
        }),
    ];
    if let Some(text) = &report.explanation {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Analysis:*\n{}", truncate(text, SLACK_ANALYSIS_CHARS)) },
        }));
    }
    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!("Analyzed: {} UTC", report.analyzed_at.format("%Y-%m-%d %H:%M")),
        }],
    }));

    json!({ "blocks": blocks })
}

fn embed_color(level: RiskLevel) -> u32 {
    match level {
        RiskLevel::Low => 0x00FF00,
        RiskLevel::Moderate => 0xFFFF00,
        RiskLevel::Elevated => 0xFFA500,
        RiskLevel::High => 0xFF0000,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
