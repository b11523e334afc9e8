pub mod edgar;
pub mod sec;
pub mod universe;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::FilingData;

pub use sec::SecCollector;
pub use universe::StockUniverse;

/// Where filings come from. Probes are cheap existence checks; `collect` is
/// the full, slow fetch.
#[async_trait]
pub trait FilingSource: Send + Sync {
    async fn collect(&self, ticker: &str, lookback_days: u32) -> Result<FilingData>;

    /// Any 8-K filed strictly after `since`.
    async fn has_new_filings_8k(&self, ticker: &str, since: NaiveDate) -> Result<bool>;

    /// Any Form 4 filed strictly after `since`.
    async fn has_new_filings_form4(&self, ticker: &str, since: NaiveDate) -> Result<bool>;

    /// Most recent (8-K, Form 4) filing dates.
    async fn latest_filing_dates(
        &self,
        ticker: &str,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>)>;
}
