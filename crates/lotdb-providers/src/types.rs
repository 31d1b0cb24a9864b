//! Query, page, and record types shared by every provider, plus the raw
//! response shapes of the two auction APIs.

use chrono::{DateTime, Utc};
use lotdb_core::{CollectionJob, Provider};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What to search for. Built from a [`CollectionJob`]; providers never see
/// the job's priority or id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleQuery {
    pub make: String,
    pub model: Option<String>,
    pub year_from: u16,
    pub year_to: u16,
}

impl SaleQuery {
    #[must_use]
    pub fn from_job(job: &CollectionJob) -> Self {
        Self {
            make: job.make.clone(),
            model: job.model.clone(),
            year_from: job.year_from,
            year_to: job.year_to,
        }
    }
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct SalePage {
    pub records: Vec<SaleRecord>,
    /// False once the provider reports nothing after this page.
    pub has_more: bool,
    /// The next page to fetch, always the fetched page plus one.
    pub next_page: u32,
}

impl SalePage {
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.records.len() as u64
    }
}

/// A normalized auction sale, independent of which provider reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub provider: Provider,
    pub lot_id: String,
    pub vin: Option<String>,
    pub make: String,
    pub model: Option<String>,
    pub year: Option<u16>,
    pub sale_date: Option<DateTime<Utc>>,
    pub damage: Option<String>,
    pub odometer: Option<u32>,
    pub location: Option<String>,
    pub sale_price: Option<Decimal>,
    pub currency: String,
}

// ---------------------------------------------------------------------------
// Copart-like wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CopartSearchResponse {
    pub data: CopartSearchData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopartSearchData {
    pub results: CopartResults,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopartResults {
    #[serde(default)]
    pub content: Vec<CopartLot>,
    #[serde(default)]
    pub total_elements: Option<u64>,
    /// Copart sets this on the final page of a result set.
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopartLot {
    #[serde(rename = "lotNumberStr")]
    pub lot_number: String,
    #[serde(rename = "fv", default)]
    pub vin: Option<String>,
    #[serde(rename = "mkn", default)]
    pub make: Option<String>,
    #[serde(rename = "lm", default)]
    pub model: Option<String>,
    #[serde(rename = "lcy", default)]
    pub year: Option<u16>,
    /// Sale date as milliseconds since the Unix epoch.
    #[serde(rename = "ad", default)]
    pub sale_date_ms: Option<i64>,
    #[serde(rename = "dd", default)]
    pub damage: Option<String>,
    #[serde(rename = "orr", default)]
    pub odometer: Option<f64>,
    #[serde(rename = "yn", default)]
    pub yard: Option<String>,
    /// High bid in USD.
    #[serde(rename = "hb", default)]
    pub high_bid: Option<serde_json::Number>,
}

// ---------------------------------------------------------------------------
// IAAI-like wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IaaiSoldResponse {
    #[serde(default)]
    pub items: Vec<IaaiVehicle>,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IaaiVehicle {
    pub stock_number: String,
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub sale_date: Option<String>,
    #[serde(default)]
    pub primary_damage: Option<String>,
    #[serde(default)]
    pub odometer: Option<u32>,
    #[serde(default)]
    pub branch_name: Option<String>,
    /// Decimal string, e.g. `"4250.00"`.
    #[serde(default)]
    pub sale_price: Option<String>,
}
