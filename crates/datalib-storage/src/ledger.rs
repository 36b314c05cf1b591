use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use datalib_core::{Asset, AssetType};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

/// Read side of an asset table, consulted by reconciliation before a fetch
/// publishes anything.
#[async_trait]
pub trait AssetLedger: Send + Sync {
    /// Every asset the table currently marks active.
    async fn active_assets(&self, table: &str) -> anyhow::Result<Vec<Asset>>;

    /// `last_updated` of every stored asset keyed by [`Asset::id`]. Assets
    /// that were never stamped are absent.
    async fn last_updated(&self, table: &str) -> anyhow::Result<HashMap<String, DateTime<Utc>>>;
}

#[derive(Debug, Clone)]
pub struct PgAssetLedger {
    pool: PgPool,
}

impl PgAssetLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn day_string(day: Option<NaiveDate>) -> String {
    day.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn asset_from_row(row: &PgRow) -> Result<Asset, sqlx::Error> {
    let text = |col: &str| -> Result<String, sqlx::Error> {
        Ok(row.try_get::<Option<String>, _>(col)?.unwrap_or_default())
    };
    let list = |col: &str| -> Result<Vec<String>, sqlx::Error> {
        Ok(row.try_get::<Option<Vec<String>>, _>(col)?.unwrap_or_default())
    };
    let other_identifiers: Option<Json<BTreeMap<String, String>>> =
        row.try_get("other_identifiers")?;

    Ok(Asset {
        ticker: row.try_get("ticker")?,
        composite_figi: row.try_get("composite_figi")?,
        share_class_figi: text("share_class_figi")?,
        primary_exchange: text("primary_exchange")?,
        asset_type: AssetType::from_code(&text("asset_type")?),
        active: row.try_get("active")?,
        name: text("name")?,
        description: text("description")?,
        corporate_url: text("corporate_url")?,
        headquarters_location: text("headquarters_location")?,
        sector: text("sector")?,
        industry: text("industry")?,
        sic_code: row.try_get::<Option<i32>, _>("sic_code")?.unwrap_or_default(),
        cik: text("cik")?,
        cusips: list("cusips")?,
        isins: list("isins")?,
        other_identifiers: other_identifiers.map(|j| j.0).unwrap_or_default(),
        similar_tickers: list("similar_tickers")?,
        tags: list("tags")?,
        listing_date: day_string(row.try_get("listed")?),
        delisting_date: day_string(row.try_get("delisted")?),
        last_updated: row
            .try_get::<Option<DateTime<Utc>>, _>("last_updated")?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        ..Default::default()
    })
}

#[async_trait]
impl AssetLedger for PgAssetLedger {
    async fn active_assets(&self, table: &str) -> anyhow::Result<Vec<Asset>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT ticker, composite_figi, share_class_figi, primary_exchange, asset_type,
                   active, name, description, corporate_url, headquarters_location, sector,
                   industry, sic_code, cik, cusips, isins, other_identifiers, similar_tickers,
                   tags, listed, delisted, last_updated
              FROM {table}
             WHERE active
             ORDER BY ticker, composite_figi
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading active assets from {table}"))?;

        rows.iter()
            .map(|row| asset_from_row(row).with_context(|| format!("decoding asset from {table}")))
            .collect()
    }

    async fn last_updated(&self, table: &str) -> anyhow::Result<HashMap<String, DateTime<Utc>>> {
        let rows = sqlx::query(&format!(
            "SELECT ticker, composite_figi, last_updated FROM {table} WHERE last_updated IS NOT NULL"
        ))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading last-updated stamps from {table}"))?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let ticker: String = row.try_get("ticker")?;
            let figi: String = row.try_get("composite_figi")?;
            out.insert(format!("{ticker}:{figi}"), row.try_get("last_updated")?);
        }
        Ok(out)
    }
}
