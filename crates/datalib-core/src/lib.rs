//! Core record model, observation envelope and schema registry for the data library.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod schema;
mod subscription;

pub use schema::{data_type, DataType, DATA_TYPES};
pub use subscription::{
    partition_buckets, slugify, table_name, PartitionBucket, Subscription, DEFAULT_SCHEDULE,
    LEGACY_PARTITIONS, PARTITION_BUCKET_YEARS, PARTITION_START_YEAR,
};

pub const CRATE_NAME: &str = "datalib-core";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown data type `{0}`")]
    UnknownDataType(String),
    #[error("subscription {id} maps {types} data types onto {tables} tables")]
    TableMapMismatch { id: Uuid, types: usize, tables: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum AssetType {
    CommonStock,
    Etf,
    Etn,
    ClosedEndFund,
    MutualFund,
    AdrCommon,
    Fred,
    Synthetic,
    #[default]
    Unknown,
}

impl From<String> for AssetType {
    fn from(code: String) -> Self {
        AssetType::from_code(&code)
    }
}

impl From<AssetType> for String {
    fn from(asset_type: AssetType) -> Self {
        asset_type.code().to_string()
    }
}

impl AssetType {
    pub fn code(&self) -> &'static str {
        match self {
            AssetType::CommonStock => "CS",
            AssetType::Etf => "ETF",
            AssetType::Etn => "ETN",
            AssetType::ClosedEndFund => "CEF",
            AssetType::MutualFund => "MF",
            AssetType::AdrCommon => "ADRC",
            AssetType::Fred => "FRED",
            AssetType::Synthetic => "SYNTH",
            AssetType::Unknown => "Unknown",
        }
    }

    /// Codes outside the known set map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "CS" => AssetType::CommonStock,
            "ETF" => AssetType::Etf,
            "ETN" => AssetType::Etn,
            "CEF" => AssetType::ClosedEndFund,
            "MF" => AssetType::MutualFund,
            "ADRC" => AssetType::AdrCommon,
            "FRED" => AssetType::Fred,
            "SYNTH" => AssetType::Synthetic,
            _ => AssetType::Unknown,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A tradeable security. Tickers get reused after delisting, so the composite
/// FIGI is the half of the key that disambiguates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Asset {
    pub ticker: String,
    pub name: String,
    pub description: String,
    pub primary_exchange: String,
    pub asset_type: AssetType,
    pub composite_figi: String,
    pub share_class_figi: String,
    pub active: bool,
    pub cusips: Vec<String>,
    pub isins: Vec<String>,
    pub cik: String,
    pub sic_code: i32,
    /// `YYYY-MM-DD`, optionally followed by a `T...` time part; empty when unknown.
    pub listing_date: String,
    pub delisting_date: String,
    pub industry: String,
    pub sector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon: Vec<u8>,
    #[serde(default)]
    pub icon_mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logo: Vec<u8>,
    #[serde(default)]
    pub logo_mime_type: String,
    pub corporate_url: String,
    pub headquarters_location: String,
    pub other_identifiers: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub similar_tickers: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl Asset {
    /// Reconciliation key: `ticker:compositeFigi`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.ticker, self.composite_figi)
    }

    pub fn listed_on(&self) -> Option<NaiveDate> {
        parse_day(&self.listing_date)
    }

    pub fn delisted_on(&self) -> Option<NaiveDate> {
        parse_day(&self.delisting_date)
    }
}

/// Date part of an ISO-8601 string, i.e. everything before the first `T`.
pub fn date_part(value: &str) -> &str {
    value.split('T').next().unwrap_or(value)
}

pub fn parse_day(value: &str) -> Option<NaiveDate> {
    let day = date_part(value.trim());
    if day.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Whole currency units from a provider figure reported in millions.
pub fn millions_to_units(value: f64) -> i64 {
    (value * 1_000_000.0).round() as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EodQuote {
    pub ticker: String,
    pub composite_figi: String,
    pub event_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Defaults to `close` in the database when absent.
    pub adj_close: Option<f64>,
    pub volume: i64,
    pub dividend: f64,
    pub split_factor: f64,
}

/// Reporting dimension of a fundamentals row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    /// As reported, quarterly.
    #[serde(rename = "ARQ")]
    Arq,
    /// Most recent reported, quarterly (restatements included).
    #[serde(rename = "MRQ")]
    Mrq,
    #[serde(rename = "ARY")]
    Ary,
    #[serde(rename = "MRY")]
    Mry,
    /// Trailing twelve months.
    #[serde(rename = "ART")]
    Art,
    #[serde(rename = "MRT")]
    Mrt,
}

impl Dimension {
    pub fn code(&self) -> &'static str {
        match self {
            Dimension::Arq => "ARQ",
            Dimension::Mrq => "MRQ",
            Dimension::Ary => "ARY",
            Dimension::Mry => "MRY",
            Dimension::Art => "ART",
            Dimension::Mrt => "MRT",
        }
    }
}

/// Company fundamentals. Currency fields are whole units (providers reporting
/// in millions go through [`millions_to_units`]); ratios are plain floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fundamental {
    pub ticker: String,
    pub composite_figi: String,
    pub dimension: Dimension,
    pub event_date: NaiveDate,
    pub calendar_date: Option<NaiveDate>,
    pub report_period: Option<NaiveDate>,
    pub total_revenue: Option<i64>,
    pub cost_of_revenue: Option<i64>,
    pub gross_profit: Option<i64>,
    pub operating_income: Option<i64>,
    pub net_income: Option<i64>,
    pub ebit: Option<i64>,
    pub ebitda: Option<i64>,
    pub total_assets: Option<i64>,
    pub total_liabilities: Option<i64>,
    pub equity: Option<i64>,
    pub cash_equiv: Option<i64>,
    pub total_debt: Option<i64>,
    pub free_cash_flow: Option<i64>,
    pub shares_outstanding: Option<i64>,
    pub market_cap: Option<i64>,
    pub ev: Option<i64>,
    pub eps: Option<f64>,
    pub eps_diluted: Option<f64>,
    pub book_value_per_share: Option<f64>,
    pub dividend_per_share: Option<f64>,
    pub gross_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
}

impl Fundamental {
    pub fn new(ticker: &str, composite_figi: &str, dimension: Dimension, event_date: NaiveDate) -> Self {
        Self {
            ticker: ticker.to_string(),
            composite_figi: composite_figi.to_string(),
            dimension,
            event_date,
            calendar_date: None,
            report_period: None,
            total_revenue: None,
            cost_of_revenue: None,
            gross_profit: None,
            operating_income: None,
            net_income: None,
            ebit: None,
            ebitda: None,
            total_assets: None,
            total_liabilities: None,
            equity: None,
            cash_equiv: None,
            total_debt: None,
            free_cash_flow: None,
            shares_outstanding: None,
            market_cap: None,
            ev: None,
            eps: None,
            eps_diluted: None,
            book_value_per_share: None,
            dividend_per_share: None,
            gross_margin: None,
            net_margin: None,
            roe: None,
            roa: None,
            pe: None,
            pb: None,
            price_to_sales: None,
            debt_to_equity: None,
            current_ratio: None,
        }
    }
}

/// Daily valuation metrics. `market_cap` and `ev` are whole currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub ticker: String,
    pub composite_figi: String,
    pub event_date: NaiveDate,
    pub market_cap: i64,
    pub ev: i64,
    pub pe: f64,
    pub pb: f64,
    pub ps: f64,
    pub ev_ebit: f64,
    pub ev_ebitda: f64,
    pub sp500: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystRating {
    pub ticker: String,
    pub composite_figi: String,
    pub event_date: NaiveDate,
    pub analyst: String,
    /// 1 strong buy, 2 outperform, 3 hold, 4 underperform, 5 sell.
    pub rating: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicIndicator {
    pub series: String,
    pub event_date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHoliday {
    pub name: String,
    pub event_date: NaiveDate,
    pub market: String,
    pub early_close: bool,
    pub close_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    pub ticker: String,
    pub composite_figi: String,
    pub event_date: NaiveDate,
    pub key: String,
    pub value: serde_json::Value,
}

/// Exactly one record kind per observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum ObservationKind {
    Asset(Box<Asset>),
    MarketHoliday(MarketHoliday),
    Eod(EodQuote),
    Fundamental(Box<Fundamental>),
    Metric(Metric),
    AnalystRating(AnalystRating),
    EconomicIndicator(EconomicIndicator),
    Custom(Custom),
}

impl ObservationKind {
    /// Registry key of the table this record lands in.
    pub fn data_type(&self) -> &'static str {
        match self {
            ObservationKind::Asset(_) => schema::ASSET_KEY,
            ObservationKind::MarketHoliday(_) => schema::MARKET_HOLIDAYS_KEY,
            ObservationKind::Eod(_) => schema::EOD_KEY,
            ObservationKind::Fundamental(_) => schema::FUNDAMENTALS_KEY,
            ObservationKind::Metric(_) => schema::METRIC_KEY,
            ObservationKind::AnalystRating(_) => schema::ANALYST_RATING_KEY,
            ObservationKind::EconomicIndicator(_) => schema::ECONOMIC_INDICATOR_KEY,
            ObservationKind::Custom(_) => schema::CUSTOM_KEY,
        }
    }

    /// False when a column of the natural key is blank, e.g. an asset whose
    /// FIGI could not be resolved upstream.
    pub fn has_business_key(&self) -> bool {
        fn present(value: &str) -> bool {
            !value.trim().is_empty()
        }
        match self {
            ObservationKind::Asset(a) => present(&a.ticker) && present(&a.composite_figi),
            ObservationKind::MarketHoliday(h) => present(&h.market),
            ObservationKind::Eod(q) => present(&q.composite_figi),
            ObservationKind::Fundamental(f) => present(&f.composite_figi),
            ObservationKind::Metric(m) => present(&m.ticker) && present(&m.composite_figi),
            ObservationKind::AnalystRating(r) => present(&r.composite_figi) && present(&r.analyst),
            ObservationKind::EconomicIndicator(i) => present(&i.series),
            ObservationKind::Custom(c) => present(&c.composite_figi) && present(&c.key),
        }
    }

    pub fn event_date(&self) -> Option<NaiveDate> {
        match self {
            ObservationKind::Asset(_) => None,
            ObservationKind::MarketHoliday(h) => Some(h.event_date),
            ObservationKind::Eod(q) => Some(q.event_date),
            ObservationKind::Fundamental(f) => Some(f.event_date),
            ObservationKind::Metric(m) => Some(m.event_date),
            ObservationKind::AnalystRating(r) => Some(r.event_date),
            ObservationKind::EconomicIndicator(i) => Some(i.event_date),
            ObservationKind::Custom(c) => Some(c.event_date),
        }
    }
}

/// Envelope pushed onto the observation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub subscription_id: Uuid,
    pub subscription_name: String,
    /// Wall-clock time the fetch produced the record, not its event date.
    pub observed_at: DateTime<Utc>,
    pub kind: ObservationKind,
}

impl Observation {
    pub fn new(subscription: &Subscription, kind: ObservationKind) -> Self {
        Self {
            subscription_id: subscription.id,
            subscription_name: subscription.name.clone(),
            observed_at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        })
    }
}

/// Terminal report of one fetch invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub subscription_id: Uuid,
    pub subscription_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub num_observations: u64,
    pub status: RunStatus,
    pub error: Option<String>,
    pub first_event_date: Option<NaiveDate>,
    pub last_event_date: Option<NaiveDate>,
}

impl RunSummary {
    /// Summary for a run that failed before its dataset produced anything.
    pub fn failed(subscription: &Subscription, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: subscription.id,
            subscription_name: subscription.name.clone(),
            started_at: now,
            finished_at: now,
            num_observations: 0,
            status: RunStatus::Failed,
            error: Some(error.into()),
            first_event_date: None,
            last_event_date: None,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(ticker: &str, figi: &str) -> Asset {
        Asset {
            ticker: ticker.to_string(),
            composite_figi: figi.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn failed_summary_reports_nothing_published() {
        let sub = Subscription::new("synthetic", "Universe", &[], BTreeMap::new());
        let summary = RunSummary::failed(&sub, "partitions missing");
        assert_eq!(summary.subscription_id, sub.id);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.error.as_deref(), Some("partitions missing"));
        assert_eq!(summary.num_observations, 0);
        assert_eq!(summary.first_event_date, None);
    }

    #[test]
    fn asset_id_joins_ticker_and_figi() {
        assert_eq!(asset("AAPL", "BBG000B9XRY4").id(), "AAPL:BBG000B9XRY4");
    }

    #[test]
    fn delisting_date_drops_time_part() {
        let mut a = asset("OLD", "BBG000000001");
        a.delisting_date = "2020-01-01T00:00:00Z".to_string();
        assert_eq!(a.delisted_on(), NaiveDate::from_ymd_opt(2020, 1, 1));
        a.delisting_date.clear();
        assert_eq!(a.delisted_on(), None);
    }

    #[test]
    fn asset_type_codes_round_trip_and_fall_back() {
        for code in ["CS", "ETF", "ETN", "CEF", "MF", "ADRC", "FRED", "SYNTH"] {
            assert_eq!(AssetType::from_code(code).code(), code);
        }
        assert_eq!(AssetType::from_code("WARRANT"), AssetType::Unknown);
        let parsed: AssetType = serde_json::from_str("\"WARRANT\"").unwrap();
        assert_eq!(parsed, AssetType::Unknown);
    }

    #[test]
    fn blank_figi_means_no_business_key() {
        let kind = ObservationKind::Asset(Box::new(asset("AAPL", " ")));
        assert!(!kind.has_business_key());
        let kind = ObservationKind::EconomicIndicator(EconomicIndicator {
            series: String::new(),
            event_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            value: 1.0,
        });
        assert!(!kind.has_business_key());
        let kind = ObservationKind::Asset(Box::new(asset("AAPL", "BBG000B9XRY4")));
        assert!(kind.has_business_key());
        assert_eq!(kind.data_type(), schema::ASSET_KEY);
    }

    #[test]
    fn millions_scale_to_whole_units() {
        assert_eq!(millions_to_units(2_875.5), 2_875_500_000);
        assert_eq!(millions_to_units(0.25), 250_000);
    }
}
