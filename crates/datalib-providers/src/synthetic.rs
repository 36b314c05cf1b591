//! Fixed, offline provider for smoke tests of a library.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, Utc};
use datalib_core::schema::{self, DataType};
use datalib_core::{Asset, AssetType, EodQuote, ObservationKind, Subscription};

use crate::config::ConfigError;
use crate::{Dataset, FetchContext, Provider, ProviderError, Publisher};

pub const PROVIDER_NAME: &str = "synthetic";

#[derive(Debug, Clone, Copy, Default)]
pub struct Synthetic;

impl Provider for Synthetic {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn description(&self) -> &'static str {
        "Deterministic in-process data for exercising a library without network access."
    }

    fn config_description(&self) -> BTreeMap<&'static str, &'static str> {
        BTreeMap::new()
    }

    fn validate_config(&self, _config: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        Ok(())
    }

    fn datasets(&self) -> Vec<Arc<dyn Dataset>> {
        vec![Arc::new(Universe), Arc::new(DailyPrices)]
    }
}

/// `(ticker, composite figi, active, delisting date)`
const UNIVERSE: [(&str, &str, bool, &str); 3] = [
    ("AAPL", "BBG000B9XRY4", true, ""),
    ("XYZ", "BBG000000000", true, ""),
    ("OLD", "BBG000000001", false, "2020-01-01"),
];

pub fn universe() -> Vec<Asset> {
    let now = Utc::now();
    UNIVERSE
        .iter()
        .map(|(ticker, figi, active, delisted)| Asset {
            ticker: ticker.to_string(),
            name: format!("{ticker} Synthetic Corp"),
            composite_figi: figi.to_string(),
            primary_exchange: "XSYN".to_string(),
            asset_type: AssetType::CommonStock,
            active: *active,
            listing_date: "2010-01-04".to_string(),
            delisting_date: delisted.to_string(),
            last_updated: now,
            ..Asset::default()
        })
        .collect()
}

struct Universe;

#[async_trait]
impl Dataset for Universe {
    fn name(&self) -> &'static str {
        "Universe"
    }

    fn description(&self) -> &'static str {
        "Three assets, one of them delisted."
    }

    fn data_types(&self) -> Vec<&'static DataType> {
        schema::data_types(&[schema::ASSET_KEY])
    }

    fn date_range(&self) -> (NaiveDate, NaiveDate) {
        let today = Utc::now().date_naive();
        (today, today)
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        _subscription: &Subscription,
        out: &mut Publisher,
    ) -> Result<(), ProviderError> {
        for asset in universe() {
            out.publish(ObservationKind::Asset(Box::new(asset))).await?;
        }
        Ok(())
    }
}

/// Trading days of the first week of `year`, Monday to Friday.
pub fn first_week(year: i32) -> Vec<NaiveDate> {
    let Some(jan1) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    (0..7)
        .filter_map(|offset| jan1.checked_add_days(Days::new(offset)))
        .filter(|day| day.weekday().number_from_monday() <= 5)
        .collect()
}

struct DailyPrices;

#[async_trait]
impl Dataset for DailyPrices {
    fn name(&self) -> &'static str {
        "Daily Prices"
    }

    fn description(&self) -> &'static str {
        "End-of-day bars for AAPL in the first week of the current year."
    }

    fn data_types(&self) -> Vec<&'static DataType> {
        schema::data_types(&[schema::EOD_KEY])
    }

    fn date_range(&self) -> (NaiveDate, NaiveDate) {
        let days = first_week(Utc::now().year());
        match (days.first(), days.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                let today = Utc::now().date_naive();
                (today, today)
            }
        }
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        _subscription: &Subscription,
        out: &mut Publisher,
    ) -> Result<(), ProviderError> {
        for (idx, event_date) in first_week(Utc::now().year()).into_iter().enumerate() {
            let base = 180.0 + idx as f64;
            out.publish(ObservationKind::Eod(EodQuote {
                ticker: "AAPL".to_string(),
                composite_figi: "BBG000B9XRY4".to_string(),
                event_date,
                open: base,
                high: base + 2.0,
                low: base - 1.0,
                close: base + 1.0,
                adj_close: None,
                volume: 50_000_000,
                dividend: 0.0,
                split_factor: 1.0,
            }))
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn universe_has_one_delisted_asset() {
        let assets = universe();
        let ids: Vec<_> = assets.iter().map(Asset::id).collect();
        assert_eq!(ids, ["AAPL:BBG000B9XRY4", "XYZ:BBG000000000", "OLD:BBG000000001"]);
        let old = &assets[2];
        assert!(!old.active);
        assert_eq!(old.delisted_on(), NaiveDate::from_ymd_opt(2020, 1, 1));
    }

    #[test]
    fn first_week_skips_weekends() {
        // 2026-01-01 is a Thursday
        let days = first_week(2026);
        assert_eq!(days.len(), 5);
        assert_eq!(days[0].weekday(), Weekday::Thu);
        assert!(days.iter().all(|d| d.weekday() != Weekday::Sat && d.weekday() != Weekday::Sun));
    }

    #[test]
    fn datasets_resolve_by_name() {
        let provider = Synthetic;
        assert!(provider.dataset("Universe").is_some());
        assert_eq!(
            provider.dataset("Daily Prices").map(|d| d.data_types()[0].name),
            Some(schema::EOD_KEY)
        );
    }
}
