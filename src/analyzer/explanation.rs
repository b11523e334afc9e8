use std::sync::LazyLock;

use regex::Regex;

use crate::types::RiskLevel;

pub const MAX_EXPLANATION_CHARS: usize = 500;
const MIN_EXPLANATION_CHARS: usize = 50;

const ADVICE_PHRASES: &[&str] = &[
    "you should buy",
    "you should sell",
    "i recommend buying",
    "i recommend selling",
    "financial advice",
    "investment advice",
    "not financial advice",
];

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,2}([^*]+)\*{1,2}").expect("valid regex"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").expect("valid regex"));

/// Strips markdown, collapses whitespace, bounds the length and makes sure
/// the text ends like a sentence.
pub fn post_process(raw: &str, max_chars: usize) -> String {
    let text = EMPHASIS.replace_all(raw, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let mut text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        let last_period = truncated.chars().rev().position(|c| c == '.').map(|p| max_chars - 1 - p);
        text = match last_period {
            Some(idx) if idx > max_chars / 2 => truncated.chars().take(idx + 1).collect(),
            _ => format!("{}...", truncated.trim_end()),
        };
    }

    if !text.is_empty() && !text.ends_with(['.', '!', '?']) {
        text = format!("{}.", text.trim_end());
    }
    text
}

/// Length bounds, no advice language, and mentions the ticker.
pub fn validate(text: &str, ticker: &str) -> bool {
    let len = text.chars().count();
    if !(MIN_EXPLANATION_CHARS..=MAX_EXPLANATION_CHARS).contains(&len) {
        return false;
    }
    let lower = text.to_lowercase();
    if ADVICE_PHRASES.iter().any(|p| lower.contains(p)) {
        return false;
    }
    text.to_uppercase().contains(&ticker.to_uppercase())
}

pub fn fallback(ticker: &str, level: RiskLevel, score: u8) -> String {
    format!("{ticker} shows {level} risk (score: {score}/100). Detailed explanation unavailable.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_and_whitespace() {
        let raw = "## Summary\n**AAPL** shows  `elevated`\n\n*risk* today";
        assert_eq!(post_process(raw, 500), "Summary AAPL shows elevated risk today.");
    }

    #[test]
    fn keeps_terminal_punctuation() {
        assert_eq!(post_process("Watch closely!", 500), "Watch closely!");
        assert_eq!(post_process("Unclear?", 500), "Unclear?");
        assert_eq!(post_process("", 500), "");
    }

    #[test]
    fn truncates_at_late_sentence_end() {
        let first = "a".repeat(300);
        let raw = format!("{first}. {}", "b".repeat(400));
        let out = post_process(&raw, 500);
        assert_eq!(out, format!("{first}."));
    }

    #[test]
    fn truncates_with_ellipsis_when_no_late_period() {
        let raw = format!("Short. {}", "word ".repeat(200));
        let out = post_process(&raw, 500);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 503);
    }

    #[test]
    fn validation_rules() {
        let good = "AAPL filed an 8-K disclosing an auditor change, which investors should monitor.";
        assert!(validate(good, "aapl"));
        assert!(!validate("AAPL is risky.", "AAPL"));
        assert!(!validate(&format!("{good} This is not financial advice."), "AAPL"));
        assert!(!validate(good, "MSFT"));
        assert!(!validate(&format!("AAPL {}", "x".repeat(600)), "AAPL"));
    }

    #[test]
    fn fallback_sentence() {
        assert_eq!(
            fallback("TSLA", RiskLevel::Elevated, 55),
            "TSLA shows elevated risk (score: 55/100). Detailed explanation unavailable."
        );
    }
}
