use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::analyzer::fallback::{self, ScoreAssessment};
use crate::analyzer::{explanation, prompts, Analyzer};
use crate::config::{LlmConfig, LLM_CACHE_TTL_SECS, RETRY_BACKOFF_MS};
use crate::error::{AppError, Result};
use crate::report::group_thousands;
use crate::types::{
    AnalysisResult, FilingData, InsiderPattern, InsiderSummary, InsiderTransaction, NetActivity,
    RedFlag, RiskLevel,
};

const PROMPT_CONTENT_CHARS: usize = 3_000;
const PROMPT_TRANSACTIONS: usize = 20;
const EXPLANATION_FLAGS: usize = 5;
const EXPLANATION_TEMPERATURE: f64 = 0.3;
const EXPLANATION_MAX_TOKENS: u32 = 300;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid regex"));
static BRACED_JSON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Chat completions wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Analyzer backed by an OpenAI-compatible chat completions endpoint.
///
/// JSON responses are cached by prompt hash for 24 hours. Any call that fails
/// for a reason other than rate limiting falls back to a deterministic
/// calculation, so a scan still produces a report when the model is down.
pub struct LlmAnalyzer {
    client: reqwest::Client,
    cfg: LlmConfig,
    api_key: String,
    cache: DashMap<String, (Value, Instant)>,
    cache_ttl: Duration,
    backoff_ms: Vec<u64>,
}

impl LlmAnalyzer {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Config("GROQ_API_KEY is required".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            cfg,
            api_key,
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(LLM_CACHE_TTL_SECS),
            backoff_ms: RETRY_BACKOFF_MS.to_vec(),
        })
    }

    #[cfg(test)]
    /// Replaces the 429 backoff table. One retry per entry.
    pub fn with_backoff(mut self, backoff_ms: Vec<u64>) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    #[cfg(test)]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// One chat completion. `Ok(None)` means the call failed and the caller
    /// should fall back; only exhausted rate limiting is an error.
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<Option<String>> {
        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.cfg.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature,
            max_tokens,
        };

        let mut attempt = 0usize;
        loop {
            let resp = match self.client.post(&url).bearer_auth(&self.api_key).json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("LLM request failed: {e}");
                    return Ok(None);
                }
            };

            let status = resp.status();
            if status.as_u16() == 429 {
                let Some(&delay) = self.backoff_ms.get(attempt) else {
                    return Err(AppError::Analyzer(format!(
                        "{} rate limit exceeded after {attempt} retries",
                        self.provider_name()
                    )));
                };
                attempt += 1;
                warn!(attempt, delay_ms = delay, "LLM rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }
            if !status.is_success() {
                warn!(%status, "LLM call failed");
                return Ok(None);
            }

            return match resp.json::<ChatResponse>().await {
                Ok(parsed) => Ok(parsed.choices.into_iter().next().and_then(|c| c.message.content)),
                Err(e) => {
                    warn!("LLM response body unreadable: {e}");
                    Ok(None)
                }
            };
        }
    }

    async fn complete_json(&self, prompt: &str) -> Result<Option<Value>> {
        let key = cache_key(prompt);
        if let Some(hit) = self.cached(&key) {
            debug!(key = %key, "LLM cache hit");
            return Ok(Some(hit));
        }

        let Some(text) = self
            .complete(prompts::SYSTEM_PROMPT, prompt, self.cfg.temperature, self.cfg.max_tokens)
            .await?
        else {
            return Ok(None);
        };

        match parse_json_response(&text) {
            Some(value) => {
                self.cache.insert(key, (value.clone(), Instant::now()));
                Ok(Some(value))
            }
            None => {
                warn!("LLM response was not valid JSON");
                Ok(None)
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let expired = match self.cache.get(key) {
            Some(entry) if entry.1.elapsed() < self.cache_ttl => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.cache.remove(key);
        }
        None
    }

    async fn detect_red_flags(&self, data: &FilingData) -> Result<Vec<RedFlag>> {
        let mut flags = Vec::new();
        for filing in &data.filings_8k {
            if filing.content_snippet.is_none() && filing.items.is_empty() {
                continue;
            }
            let content = match &filing.content_snippet {
                Some(text) => text.chars().take(PROMPT_CONTENT_CHARS).collect(),
                None => "No content available".to_string(),
            };
            let items = if filing.items.is_empty() {
                "No items detected".to_string()
            } else {
                filing.items.join("\n")
            };
            let prompt =
                prompts::fill(prompts::RED_FLAG_DETECTION, &[("filing_content", &content), ("items", &items)]);

            let Some(value) = self.complete_json(&prompt).await? else {
                continue;
            };
            for mut flag in parse_list::<RedFlag>(&value, "red_flags") {
                if flag.title.is_empty() {
                    flag.title = "Unknown".to_string();
                }
                flag.evidence_url = Some(filing.url.clone());
                flag.filing_date = Some(filing.date.to_string());
                flags.push(flag);
            }
        }
        Ok(flags)
    }

    async fn analyze_insiders(&self, data: &FilingData) -> Result<(Vec<InsiderPattern>, InsiderSummary)> {
        let transactions = &data.filings_form4;
        if transactions.is_empty() {
            return Ok((Vec::new(), InsiderSummary::default()));
        }

        let listing = transactions
            .iter()
            .take(PROMPT_TRANSACTIONS)
            .map(format_transaction)
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts::fill(
            prompts::INSIDER_PATTERN_ANALYSIS,
            &[("ticker", &data.ticker), ("transactions", &listing)],
        );

        let Some(value) = self.complete_json(&prompt).await? else {
            info!(ticker = %data.ticker, "Using fallback insider summary");
            return Ok((Vec::new(), fallback::insider_summary(transactions)));
        };

        let evidence = transactions.first().map(|t| t.url.clone());
        let patterns = parse_list::<InsiderPattern>(&value, "patterns")
            .into_iter()
            .map(|mut p| {
                if p.title.is_empty() {
                    p.title = "Unknown".to_string();
                }
                p.evidence_url = evidence.clone();
                p
            })
            .collect();

        let summary = InsiderSummary {
            net_activity: value
                .get("net_activity")
                .and_then(Value::as_str)
                .map(|s| NetActivity::from(s.to_string()))
                .unwrap_or_default(),
            total_sold: lenient_number(value.get("total_sold")).unwrap_or(0.0) as i64,
            total_bought: lenient_number(value.get("total_bought")).unwrap_or(0.0) as i64,
            insiders_selling: lenient_number(value.get("insiders_selling")).unwrap_or(0.0).max(0.0) as u32,
            insiders_buying: lenient_number(value.get("insiders_buying")).unwrap_or(0.0).max(0.0) as u32,
        };
        Ok((patterns, summary))
    }

    async fn assess_risk(
        &self,
        ticker: &str,
        flags: &[RedFlag],
        patterns: &[InsiderPattern],
        summary: &InsiderSummary,
    ) -> Result<ScoreAssessment> {
        if flags.is_empty() && patterns.is_empty() {
            return Ok(ScoreAssessment::quiet());
        }

        let flag_list = if flags.is_empty() {
            "None detected".to_string()
        } else {
            let brief: Vec<Value> = flags
                .iter()
                .map(|f| json!({ "type": f.signal_type, "title": f.title, "severity": f.severity }))
                .collect();
            serde_json::to_string_pretty(&brief)?
        };
        let insider_data = serde_json::to_string_pretty(&json!({
            "patterns": patterns,
            "net_activity": summary.net_activity,
            "total_sold": summary.total_sold,
            "total_bought": summary.total_bought,
            "insiders_selling": summary.insiders_selling,
            "insiders_buying": summary.insiders_buying,
        }))?;
        let prompt = prompts::fill(
            prompts::RISK_SCORING,
            &[("ticker", ticker), ("red_flags", &flag_list), ("insider_patterns", &insider_data)],
        );

        let scored = self.complete_json(&prompt).await?.and_then(|value| {
            let score = lenient_number(value.get("risk_score"))?.round().clamp(0.0, 100.0) as u8;
            let level = value
                .get("risk_level")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<RiskLevel>().ok())
                .unwrap_or_else(|| RiskLevel::from_score(score));
            let reasoning = value.get("reasoning").and_then(Value::as_str).unwrap_or_default().to_string();
            Some(ScoreAssessment { risk_score: score, risk_level: level, reasoning })
        });

        Ok(scored.unwrap_or_else(|| {
            info!(ticker, "Using fallback risk score");
            fallback::score(flags, summary.net_activity)
        }))
    }

    /// Plain-text summary; never fails, the fallback sentence covers every error.
    async fn explain(
        &self,
        ticker: &str,
        assessment: &ScoreAssessment,
        flags: &[RedFlag],
        summary: &InsiderSummary,
    ) -> String {
        let flag_lines = if flags.is_empty() {
            "None".to_string()
        } else {
            flags
                .iter()
                .take(EXPLANATION_FLAGS)
                .map(|f| format!("- {}: {}", f.title, f.details))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let insider_line = format!(
            "Net: {}, Sold: ${}, Bought: ${}",
            summary.net_activity,
            group_thousands(summary.total_sold),
            group_thousands(summary.total_bought)
        );
        let score = assessment.risk_score.to_string();
        let level = assessment.risk_level.to_string();
        let prompt = prompts::fill(
            prompts::EXPLANATION_GENERATION,
            &[
                ("ticker", ticker),
                ("risk_score", &score),
                ("risk_level", &level),
                ("red_flags", &flag_lines),
                ("insider_summary", &insider_line),
            ],
        );

        let raw = self
            .complete(
                prompts::EXPLANATION_SYSTEM_PROMPT,
                &prompt,
                EXPLANATION_TEMPERATURE,
                EXPLANATION_MAX_TOKENS,
            )
            .await;
        if let Ok(Some(raw)) = raw {
            let text = explanation::post_process(&raw, explanation::MAX_EXPLANATION_CHARS);
            if explanation::validate(&text, ticker) {
                return text;
            }
            warn!(ticker, "Generated explanation failed validation");
        }
        explanation::fallback(ticker, assessment.risk_level, assessment.risk_score)
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(&self, data: &FilingData, include_explanation: bool) -> Result<AnalysisResult> {
        let red_flags = self.detect_red_flags(data).await?;
        let (insider_patterns, insider_summary) = self.analyze_insiders(data).await?;
        let assessment = self
            .assess_risk(&data.ticker, &red_flags, &insider_patterns, &insider_summary)
            .await?;

        let explanation = if include_explanation {
            Some(self.explain(&data.ticker, &assessment, &red_flags, &insider_summary).await)
        } else {
            None
        };

        debug!(
            ticker = %data.ticker,
            red_flags = red_flags.len(),
            patterns = insider_patterns.len(),
            score = assessment.risk_score,
            "Analysis complete"
        );

        Ok(AnalysisResult {
            red_flags,
            insider_patterns,
            insider_summary,
            risk_score: assessment.risk_score,
            risk_level: Some(assessment.risk_level),
            reasoning: assessment.reasoning,
            explanation,
        })
    }

    fn provider_name(&self) -> String {
        format!("Groq ({})", self.cfg.model)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cache_key(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Accepts a bare JSON object, a fenced code block, or the first `{...}` span.
pub fn parse_json_response(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(value);
        }
    }
    BRACED_JSON
        .find(text)
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
}

/// Items of `value[key]` that deserialize; malformed items are skipped.
fn parse_list<T: serde::de::DeserializeOwned>(value: &Value, key: &str) -> Vec<T> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| serde_json::from_value(item.clone()).ok()).collect())
        .unwrap_or_default()
}

fn lenient_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace([',', '$'], "").trim().parse().ok(),
        _ => None,
    }
}

fn format_transaction(t: &InsiderTransaction) -> String {
    let title = if t.insider_title.is_empty() { "Unknown" } else { &t.insider_title };
    let price = if t.price > 0.0 { format!("${:.2}", t.price) } else { "N/A".to_string() };
    let value = if t.total_value > 0 {
        format!("${}", group_thousands(t.total_value))
    } else {
        "N/A".to_string()
    };
    format!(
        "- {}: {} ({}) {} {} shares @ {} ({})",
        t.date,
        t.insider_name,
        title,
        t.code_description(),
        group_thousands(t.shares.round() as i64),
        price,
        value
    )
}
