//! polygon.io reference provider: the US stock universe and upcoming market
//! holidays.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use datalib_core::schema::{self, DataType};
use datalib_core::{date_part, Asset, AssetType, MarketHoliday, ObservationKind, Subscription};
use datalib_storage::{HttpClientConfig, HttpFetcher, TokenBucketConfig};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config::{self, ConfigError};
use crate::paginate::{collect_pages, for_each_page, Page, MAX_PAGES};
use crate::reconcile::{self, DETAIL_LOOKUP_CAP};
use crate::{Dataset, FetchContext, Provider, ProviderError, Publisher};

pub const PROVIDER_NAME: &str = "polygon";
pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

pub const API_KEY: &str = "apiKey";
pub const RATE_LIMIT: &str = "rateLimit";
pub const FILER: &str = "filer";

/// Listing types that make up the stock universe.
pub const ASSET_TYPES: [&str; 3] = ["CS", "ADRC", "ETF"];

const TICKERS_PATH: &str = "/v3/reference/tickers";
const UPCOMING_PATH: &str = "/v1/marketstatus/upcoming";
const PAGE_LIMIT: &str = "1000";

#[derive(Debug, Clone)]
pub struct Polygon {
    base_url: String,
}

impl Polygon {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Polygon {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for Polygon {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn description(&self) -> &'static str {
        "The Polygon.io Stocks API provides REST endpoints for market data from all US stock exchanges, including reference data, company branding and market holidays."
    }

    fn config_description(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([
            (API_KEY, "Enter your polygon.io API key:"),
            (RATE_LIMIT, "What is the maximum number of requests per minute?"),
            (FILER, "Where should logos and icons be saved? (e.g. file:///path/)"),
        ])
    }

    fn required_config(&self) -> &'static [&'static str] {
        &[API_KEY]
    }

    fn validate_config(&self, config: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        PolygonConfig::from_map(config).map(|_| ())
    }

    fn datasets(&self) -> Vec<Arc<dyn Dataset>> {
        vec![
            Arc::new(StockTickers {
                base_url: self.base_url.clone(),
            }),
            Arc::new(MarketHolidays {
                base_url: self.base_url.clone(),
            }),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonConfig {
    pub api_key: String,
    pub rate_limit: Option<i64>,
    pub filer: Option<String>,
}

impl PolygonConfig {
    pub fn from_map(config: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let filer = config.get(FILER).map(|v| v.trim()).filter(|v| !v.is_empty());
        if let Some(spec) = filer {
            if !spec.starts_with("file://") {
                return Err(ConfigError::Invalid {
                    key: FILER,
                    value: spec.to_string(),
                    reason: "only file:// locations are supported",
                });
            }
        }
        Ok(Self {
            api_key: config::required(config, API_KEY)?,
            rate_limit: config::rate_limit(config, RATE_LIMIT)?,
            filer: filer.map(str::to_string),
        })
    }

    fn fetcher(&self) -> Result<HttpFetcher, ProviderError> {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            token_bucket: TokenBucketConfig::per_minute(self.rate_limit),
            default_query: vec![(API_KEY.to_string(), self.api_key.clone())],
            ..HttpClientConfig::default()
        })?;
        Ok(fetcher)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    results: PolygonTicker,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolygonTicker {
    ticker: String,
    name: String,
    description: String,
    composite_figi: String,
    share_class_figi: String,
    primary_exchange: String,
    #[serde(rename = "type")]
    kind: String,
    active: bool,
    cik: String,
    sic_code: String,
    homepage_url: String,
    list_date: String,
    delisted_utc: String,
    branding: Option<Branding>,
    address: Option<Address>,
    last_updated_utc: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Branding {
    logo_url: String,
    icon_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Address {
    city: String,
    state: String,
}

/// Library tickers use `/` for share classes (`BRK/A`); polygon uses `.`.
pub fn library_ticker(ticker: &str) -> String {
    ticker.replace('.', "/")
}

pub fn polygon_ticker(ticker: &str) -> String {
    ticker.replace('/', ".")
}

/// Summary asset from one listing entry. Entries without a parseable
/// `last_updated_utc` are skipped.
fn listing_asset(raw: JsonValue) -> Option<Asset> {
    let entry: PolygonTicker = match serde_json::from_value(raw) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(error = %err, "skipping malformed ticker entry");
            return None;
        }
    };
    let last_updated = match DateTime::parse_from_rfc3339(&entry.last_updated_utc) {
        Ok(stamp) => stamp.with_timezone(&Utc),
        Err(err) => {
            warn!(ticker = %entry.ticker, error = %err, "skipping ticker with bad last_updated_utc");
            return None;
        }
    };
    Some(Asset {
        ticker: library_ticker(&entry.ticker),
        name: entry.name,
        composite_figi: entry.composite_figi,
        share_class_figi: entry.share_class_figi,
        primary_exchange: entry.primary_exchange,
        asset_type: AssetType::from_code(&entry.kind),
        active: entry.active,
        cik: entry.cik,
        delisting_date: entry.delisted_utc,
        last_updated,
        ..Asset::default()
    })
}

struct Client {
    http: HttpFetcher,
    base_url: String,
}

impl Client {
    fn new(base_url: &str, config: &PolygonConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: config.fetcher()?,
            base_url: base_url.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One page of `/v3/reference/tickers`. Later pages follow `next_url`
    /// verbatim; the api key rides along as a default query parameter.
    async fn ticker_page(
        &self,
        cursor: Option<String>,
        active: bool,
        asset_type: &str,
    ) -> Result<Page<Asset>, ProviderError> {
        let what = format!("{} tickers ({asset_type})", if active { "active" } else { "inactive" });
        let response: ListResponse = match cursor {
            Some(next) => self.http.get_json(&next, &[]).await,
            None if active => {
                self.http
                    .get_json(
                        &self.url(TICKERS_PATH),
                        &[
                            ("market", "stocks"),
                            ("active", "true"),
                            ("type", asset_type),
                            ("limit", PAGE_LIMIT),
                        ],
                    )
                    .await
            }
            None => {
                self.http
                    .get_json(
                        &self.url(TICKERS_PATH),
                        &[
                            ("active", "false"),
                            ("sort", "last_updated_utc"),
                            ("order", "desc"),
                            ("limit", PAGE_LIMIT),
                            ("type", asset_type),
                        ],
                    )
                    .await
            }
        }
        .map_err(|source| ProviderError::Page { what, source })?;

        debug!(received = response.results.len(), asset_type, active, "ticker page");
        Ok(Page {
            items: response.results.into_iter().filter_map(listing_asset).collect(),
            next: response.next_url,
        })
    }

    async fn active_universe(&self) -> Result<Vec<Asset>, ProviderError> {
        let mut assets = Vec::new();
        for asset_type in ASSET_TYPES {
            let page = collect_pages(MAX_PAGES, |cursor| self.ticker_page(cursor, true, asset_type)).await?;
            assets.extend(page);
        }
        info!(count = assets.len(), "fetched active tickers");
        Ok(assets)
    }

    /// Full record for one listed asset, branding images included. Keeps the
    /// listing's `last_updated` so the next run compares like with like.
    async fn detail(&self, listed: &Asset) -> anyhow::Result<Asset> {
        let url = self.url(&format!("{TICKERS_PATH}/{}", polygon_ticker(&listed.ticker)));
        let detail: DetailResponse = self.http.get_json(&url, &[]).await?;
        let entry = detail.results;

        let mut asset = Asset {
            ticker: library_ticker(&entry.ticker),
            composite_figi: entry.composite_figi,
            share_class_figi: entry.share_class_figi,
            name: entry.name,
            description: entry.description,
            active: entry.active,
            primary_exchange: entry.primary_exchange,
            asset_type: AssetType::from_code(&entry.kind),
            cik: entry.cik,
            sic_code: entry.sic_code.trim().parse().unwrap_or(0),
            corporate_url: entry.homepage_url,
            listing_date: entry.list_date,
            last_updated: listed.last_updated,
            ..Asset::default()
        };
        if let Some(address) = entry.address.filter(|a| !a.city.is_empty()) {
            asset.headquarters_location = format!("{}, {}", address.city, address.state);
        }
        if let Some(branding) = entry.branding {
            if !branding.icon_url.is_empty() {
                let icon = self.http.get_bytes(&branding.icon_url, &[]).await?;
                asset.icon_mime_type = icon.content_type.unwrap_or_default();
                asset.icon = icon.body;
            }
            if !branding.logo_url.is_empty() {
                let logo = self.http.get_bytes(&branding.logo_url, &[]).await?;
                asset.logo_mime_type = logo.content_type.unwrap_or_default();
                asset.logo = logo.body;
            }
        }
        Ok(asset)
    }
}

/// Assets the library cannot key are never published.
async fn publish_asset(out: &mut Publisher, asset: Asset) -> Result<(), ProviderError> {
    if asset.composite_figi.trim().is_empty() {
        debug!(ticker = %asset.ticker, "skipping asset without composite figi");
        return Ok(());
    }
    out.publish(ObservationKind::Asset(Box::new(asset))).await
}

struct StockTickers {
    base_url: String,
}

#[async_trait]
impl Dataset for StockTickers {
    fn name(&self) -> &'static str {
        "Stock Tickers"
    }

    fn description(&self) -> &'static str {
        "Details about tradeable stocks and ETFs."
    }

    fn data_types(&self) -> Vec<&'static DataType> {
        schema::data_types(&[schema::ASSET_KEY])
    }

    fn date_range(&self) -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(1949, 4, 19).unwrap_or(NaiveDate::MIN),
            Utc::now().date_naive(),
        )
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        subscription: &Subscription,
        out: &mut Publisher,
    ) -> Result<(), ProviderError> {
        let config = PolygonConfig::from_map(&subscription.config)?;
        let table = subscription
            .table_for(schema::ASSET_KEY)
            .ok_or(ProviderError::MissingTable(schema::ASSET_KEY))?;
        let client = Client::new(&self.base_url, &config)?;

        let universe = client.active_universe().await?;

        let stored = ctx.ledger.last_updated(table).await.map_err(ProviderError::Ledger)?;
        let lookups = reconcile::select_detail_lookups(&universe, &stored, DETAIL_LOOKUP_CAP);
        info!(count = lookups.len(), "querying asset details");
        for (idx, listed) in lookups.iter().enumerate() {
            match client.detail(listed).await {
                Ok(asset) => publish_asset(out, asset).await?,
                Err(err) => warn!(ticker = %listed.ticker, error = %err, "asset detail failed"),
            }
            if (idx + 1) % 100 == 0 {
                info!(completed = idx + 1, remaining = lookups.len() - idx - 1, "asset detail progress");
            }
        }

        let active = ctx.ledger.active_assets(table).await.map_err(ProviderError::Ledger)?;
        let mut candidates = reconcile::deactivation_candidates(&universe, active);
        if candidates.is_empty() {
            return Ok(());
        }

        let mut confirmed = Vec::new();
        for asset_type in ASSET_TYPES {
            if candidates.is_empty() {
                break;
            }
            for_each_page(
                MAX_PAGES,
                |cursor| client.ticker_page(cursor, false, asset_type),
                |inactive| {
                    confirmed.extend(reconcile::apply_confirmations(&mut candidates, &inactive));
                    if candidates.is_empty() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )
            .await?;
        }

        for asset in confirmed {
            publish_asset(out, asset).await?;
        }
        for asset in reconcile::expire_unconfirmed(candidates, Utc::now()) {
            publish_asset(out, asset).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolygonHoliday {
    date: String,
    exchange: String,
    name: String,
    close: String,
    status: String,
}

/// 16:00 New York on `day`, the regular close.
pub fn regular_close(day: NaiveDate) -> Option<DateTime<Utc>> {
    let local = day.and_hms_opt(16, 0, 0)?;
    New_York
        .from_local_datetime(&local)
        .single()
        .map(|close| close.with_timezone(&Utc))
}

fn market_holiday(raw: JsonValue) -> Option<MarketHoliday> {
    let entry: PolygonHoliday = match serde_json::from_value(raw) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(error = %err, "skipping malformed holiday entry");
            return None;
        }
    };
    let Ok(event_date) = NaiveDate::parse_from_str(date_part(&entry.date), "%Y-%m-%d") else {
        warn!(date = %entry.date, "skipping holiday with bad date");
        return None;
    };
    let close_time = if entry.close.is_empty() {
        regular_close(event_date)
    } else {
        match DateTime::parse_from_rfc3339(&entry.close) {
            Ok(close) => Some(close.with_timezone(&Utc)),
            Err(err) => {
                warn!(close = %entry.close, error = %err, "skipping holiday with bad close time");
                return None;
            }
        }
    };
    Some(MarketHoliday {
        name: entry.name,
        event_date,
        market: entry.exchange,
        early_close: entry.status == "early-close",
        close_time,
    })
}

struct MarketHolidays {
    base_url: String,
}

#[async_trait]
impl Dataset for MarketHolidays {
    fn name(&self) -> &'static str {
        "Market Holidays"
    }

    fn description(&self) -> &'static str {
        "Get upcoming market holidays and their open/close times."
    }

    fn data_types(&self) -> Vec<&'static DataType> {
        schema::data_types(&[schema::MARKET_HOLIDAYS_KEY])
    }

    fn date_range(&self) -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            Utc::now().date_naive(),
        )
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        subscription: &Subscription,
        out: &mut Publisher,
    ) -> Result<(), ProviderError> {
        let config = PolygonConfig::from_map(&subscription.config)?;
        let client = Client::new(&self.base_url, &config)?;
        let entries: Vec<JsonValue> = client
            .http
            .get_json(&client.url(UPCOMING_PATH), &[])
            .await
            .map_err(|source| ProviderError::Page {
                what: "upcoming market status".to_string(),
                source,
            })?;

        for holiday in entries.into_iter().filter_map(market_holiday) {
            out.publish(ObservationKind::MarketHoliday(holiday)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn only_required_keys_are_needed_to_validate() {
        let polygon = Polygon::new();
        let described = polygon.config_description();
        for key in polygon.required_config() {
            assert!(described.contains_key(key), "{key} has no prompt");
            let mut cfg: BTreeMap<String, String> =
                described.keys().map(|k| (k.to_string(), "file:///tmp".to_string())).collect();
            cfg.remove(*key);
            assert_eq!(polygon.validate_config(&cfg), Err(ConfigError::Missing(*key)));
        }
        let minimal = polygon
            .required_config()
            .iter()
            .map(|k| (k.to_string(), "k".to_string()))
            .collect();
        assert!(polygon.validate_config(&minimal).is_ok());
        assert!(described.len() > polygon.required_config().len());
    }

    #[test]
    fn config_requires_api_key_and_file_filer() {
        let polygon = Polygon::new();
        assert_eq!(
            polygon.validate_config(&config(&[("rateLimit", "10")])),
            Err(ConfigError::Missing(API_KEY))
        );
        assert!(polygon.validate_config(&config(&[("apiKey", "k")])).is_ok());
        assert!(matches!(
            polygon.validate_config(&config(&[("apiKey", "k"), ("filer", "s3://bucket")])),
            Err(ConfigError::Invalid { key: FILER, .. })
        ));
        let parsed = PolygonConfig::from_map(&config(&[("apiKey", "k"), ("rateLimit", "120")])).unwrap();
        assert_eq!(parsed.rate_limit, Some(120));
        assert_eq!(parsed.filer, None);
    }

    #[test]
    fn tickers_switch_share_class_separator() {
        assert_eq!(library_ticker("BRK.A"), "BRK/A");
        assert_eq!(polygon_ticker("BRK/A"), "BRK.A");
    }

    #[test]
    fn listing_entries_without_stamp_are_skipped() {
        let good = json!({
            "ticker": "BRK.B",
            "composite_figi": "BBG000DWG505",
            "type": "CS",
            "active": true,
            "last_updated_utc": "2026-10-01T00:00:00Z"
        });
        let asset = listing_asset(good).unwrap();
        assert_eq!(asset.ticker, "BRK/B");
        assert_eq!(asset.asset_type, AssetType::CommonStock);
        assert!(listing_asset(json!({"ticker": "X", "last_updated_utc": "yesterday"})).is_none());
        assert!(listing_asset(json!({"ticker": 5})).is_none());
    }

    #[test]
    fn holidays_default_to_regular_close_in_new_york() {
        let holiday = market_holiday(json!({
            "date": "2026-11-26",
            "exchange": "NYSE",
            "name": "Thanksgiving",
            "status": "closed"
        }))
        .unwrap();
        // EST is UTC-5 in late November
        assert_eq!(holiday.close_time.unwrap().hour(), 21);
        assert!(!holiday.early_close);

        let early = market_holiday(json!({
            "date": "2026-11-27",
            "exchange": "NASDAQ",
            "name": "Day After Thanksgiving",
            "status": "early-close",
            "close": "2026-11-27T18:00:00.000Z"
        }))
        .unwrap();
        assert!(early.early_close);
        assert_eq!(early.close_time.unwrap().hour(), 18);
        assert_eq!(early.market, "NASDAQ");

        assert!(market_holiday(json!({"date": "soon", "exchange": "NYSE"})).is_none());
    }
}
