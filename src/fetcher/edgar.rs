//! Pure parsers for EDGAR responses: Atom filing feeds, filing index pages,
//! 8-K documents and Form 4 ownership XML.
//!
//! Feed and XML markup is read with the HTML parser, so element names in
//! selectors are lowercase.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::config::FILING_SNIPPET_CHARS;
use crate::types::InsiderTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormType {
    EightK,
    Form4,
}

impl FormType {
    fn type_param(self) -> &'static str {
        match self {
            FormType::EightK => "8-K",
            FormType::Form4 => "4",
        }
    }

    fn owner_param(self) -> &'static str {
        match self {
            FormType::EightK => "include",
            FormType::Form4 => "only",
        }
    }
}

impl std::fmt::Display for FormType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormType::EightK => write!(f, "8-K"),
            FormType::Form4 => write!(f, "Form 4"),
        }
    }
}

pub fn feed_url(base_url: &str, cik: &str, form: FormType, count: u32) -> String {
    format!(
        "{}/cgi-bin/browse-edgar?action=getcompany&CIK={}&type={}&dateb=&owner={}&count={}&output=atom",
        base_url.trim_end_matches('/'),
        cik,
        form.type_param(),
        form.owner_param(),
        count
    )
}

// ---------------------------------------------------------------------------
// Atom feeds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub url: Option<String>,
    /// `filing-date`, else the date part of `updated`.
    pub date: Option<NaiveDate>,
}

static ENTRY: LazyLock<Selector> = LazyLock::new(|| sel("entry"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static LINK: LazyLock<Selector> = LazyLock::new(|| sel("link[href]"));
static FILING_DATE: LazyLock<Selector> = LazyLock::new(|| sel("filing-date"));
static UPDATED: LazyLock<Selector> = LazyLock::new(|| sel("updated"));

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("valid selector")
}

pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    let doc = Html::parse_document(xml);
    doc.select(&ENTRY)
        .map(|entry| {
            let date = first_text(entry, &FILING_DATE)
                .and_then(|t| parse_feed_date(&t))
                .or_else(|| first_text(entry, &UPDATED).and_then(|t| parse_feed_date(&t)));
            FeedEntry {
                title: first_text(entry, &TITLE),
                url: entry
                    .select(&LINK)
                    .next()
                    .and_then(|l| l.value().attr("href"))
                    .map(str::to_string),
                date,
            }
        })
        .collect()
}

/// Accepts `2024-01-10` and full timestamps like `2024-01-10T16:05:22-05:00`.
pub fn parse_feed_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()
}

fn first_text(el: ElementRef<'_>, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Filing index pages
// ---------------------------------------------------------------------------

const MAIN_DOC_PATTERNS: &[&str] = &["8-k", "8k", "d8k", "form8k"];
const MAIN_DOC_EXTENSIONS: &[&str] = &[".htm", ".html", ".txt"];

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| sel("a[href]"));
static FILE_TABLE_ROW: LazyLock<Selector> = LazyLock::new(|| sel("table.tableFile tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| sel("td"));

/// Link to the primary 8-K document on a filing index page.
pub fn find_main_document(index_html: &str, filing_url: &str) -> Option<String> {
    let doc = Html::parse_document(index_html);

    for link in doc.select(&ANCHOR) {
        let Some(href) = link.value().attr("href") else { continue };
        let href_lower = href.to_lowercase();
        let text_lower = link.text().collect::<String>().to_lowercase();
        let named = MAIN_DOC_PATTERNS
            .iter()
            .any(|p| href_lower.contains(p) || text_lower.contains(p));
        if named && MAIN_DOC_EXTENSIONS.iter().any(|e| href_lower.contains(e)) {
            return Some(build_full_url(href, filing_url));
        }
    }

    for row in doc.select(&FILE_TABLE_ROW).skip(1) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
        if cells.len() < 4 {
            continue;
        }
        let doc_type = cells[3].text().collect::<String>().trim().to_uppercase();
        if MAIN_DOC_PATTERNS.iter().any(|p| doc_type.contains(&p.to_uppercase())) {
            if let Some(href) = cells[2].select(&ANCHOR).next().and_then(|a| a.value().attr("href")) {
                return Some(build_full_url(href, filing_url));
            }
        }
    }

    None
}

/// Raw ownership XML on a Form 4 index page, skipping XSL-rendered copies.
pub fn find_form4_xml(index_html: &str, filing_url: &str) -> Option<String> {
    let doc = Html::parse_document(index_html);
    doc.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| !href.to_lowercase().contains("xsl") && href.ends_with(".xml"))
        .map(|href| build_full_url(href, filing_url))
}

pub fn build_full_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http") {
        return href.to_string();
    }
    if href.starts_with('/') {
        if let Ok(base) = reqwest::Url::parse(base_url) {
            if let Some(host) = base.host_str() {
                let port = base.port().map(|p| format!(":{p}")).unwrap_or_default();
                return format!("{}://{}{}{}", base.scheme(), host, port, href);
            }
        }
        return href.to_string();
    }
    let dir = base_url.rsplit_once('/').map(|(d, _)| d).unwrap_or(base_url);
    format!("{dir}/{href}")
}

// ---------------------------------------------------------------------------
// 8-K documents
// ---------------------------------------------------------------------------

const ITEM_LABELS: &[(&str, &str)] = &[
    ("1.01", "1.01 - Entry into Material Agreement"),
    ("1.02", "1.02 - Termination of Material Agreement"),
    ("2.01", "2.01 - Completion of Acquisition/Disposition"),
    ("2.02", "2.02 - Results of Operations"),
    ("2.05", "2.05 - Costs for Exit Activities"),
    ("2.06", "2.06 - Material Impairments"),
    ("3.01", "3.01 - Notice of Delisting"),
    ("4.01", "4.01 - Changes in Registrant's Certifying Accountant"),
    ("4.02", "4.02 - Non-Reliance on Financial Statements"),
    ("5.01", "5.01 - Changes in Control"),
    ("5.02", "5.02 - Departure/Appointment of Directors or Officers"),
    ("5.03", "5.03 - Amendments to Articles"),
    ("7.01", "7.01 - Regulation FD Disclosure"),
    ("8.01", "8.01 - Other Events"),
];

static ITEM_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    ITEM_LABELS
        .iter()
        .map(|(code, label)| {
            let pattern = format!(r"(?i)item\s*{}", regex::escape(code));
            (Regex::new(&pattern).expect("valid item pattern"), *label)
        })
        .collect()
});

/// Item labels mentioned in the document, in item-number order.
pub fn extract_8k_items(text: &str) -> Vec<String> {
    ITEM_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, label)| label.to_string())
        .collect()
}

/// Visible text, whitespace-separated.
pub fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn snippet(text: &str) -> String {
    text.chars().take(FILING_SNIPPET_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Form 4 XML
// ---------------------------------------------------------------------------

static OWNER_NAME: LazyLock<Selector> = LazyLock::new(|| sel("rptownername"));
static OFFICER_TITLE: LazyLock<Selector> = LazyLock::new(|| sel("officertitle"));
static IS_DIRECTOR: LazyLock<Selector> = LazyLock::new(|| sel("isdirector"));
static IS_OFFICER: LazyLock<Selector> = LazyLock::new(|| sel("isofficer"));
static NON_DERIVATIVE: LazyLock<Selector> = LazyLock::new(|| sel("nonderivativetransaction"));
static TXN_CODE: LazyLock<Selector> = LazyLock::new(|| sel("transactioncode"));
static TXN_SHARES: LazyLock<Selector> = LazyLock::new(|| sel("transactionshares value"));
static TXN_PRICE: LazyLock<Selector> = LazyLock::new(|| sel("transactionpricepershare value"));

/// Non-derivative transactions. Rows without a code or with zero shares are skipped.
pub fn parse_form4_xml(xml: &str, filing_date: NaiveDate, filing_url: &str) -> Vec<InsiderTransaction> {
    let doc = Html::parse_document(xml);
    let root = doc.root_element();

    let owner_name = first_text(root, &OWNER_NAME);
    let officer_title = first_text(root, &OFFICER_TITLE);
    let is_director = is_flag_set(first_text(root, &IS_DIRECTOR));
    let is_officer = is_flag_set(first_text(root, &IS_OFFICER));

    let insider_name = owner_name.unwrap_or_else(|| "Unknown".to_string());
    let insider_title = officer_title.unwrap_or_else(|| {
        if is_director { "Director".to_string() } else { String::new() }
    });

    root.select(&NON_DERIVATIVE)
        .filter_map(|txn| {
            let code = first_text(txn, &TXN_CODE)?;
            let shares = first_text(txn, &TXN_SHARES).and_then(|t| t.parse::<f64>().ok())?;
            if shares == 0.0 {
                return None;
            }
            let price = first_text(txn, &TXN_PRICE)
                .and_then(|t| t.parse::<f64>().ok())
                .unwrap_or(0.0);
            Some(InsiderTransaction {
                date: filing_date,
                insider_name: insider_name.clone(),
                insider_title: insider_title.clone(),
                transaction_code: code,
                shares: shares.trunc(),
                price,
                total_value: (shares * price) as i64,
                url: filing_url.to_string(),
                is_director,
                is_officer,
            })
        })
        .collect()
}

fn is_flag_set(text: Option<String>) -> bool {
    matches!(text.as_deref(), Some("1") | Some("true"))
}

// ---------------------------------------------------------------------------
// company_tickers.json
// ---------------------------------------------------------------------------

/// Ticker → zero-padded 10-digit CIK.
pub fn parse_company_tickers(json: &serde_json::Value) -> Vec<(String, String)> {
    let Some(entries) = json.as_object() else {
        return Vec::new();
    };
    entries
        .values()
        .filter_map(|entry| {
            let ticker = entry.get("ticker")?.as_str()?.trim().to_uppercase();
            let cik = match entry.get("cik_str")? {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.trim().to_string(),
                _ => return None,
            };
            if ticker.is_empty() || cik.is_empty() {
                return None;
            }
            Some((ticker, format!("{cik:0>10}")))
        })
        .collect()
}
