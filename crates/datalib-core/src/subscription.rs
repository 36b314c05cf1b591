use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::data_type;
use crate::{CoreError, DataType};

pub const DEFAULT_SCHEDULE: &str = "0 0 * * 1-5";

/// Width of every partition bucket from [`PARTITION_START_YEAR`] onward.
/// Creation, enumeration and teardown all use this one width.
pub const PARTITION_BUCKET_YEARS: i32 = 5;
pub const PARTITION_START_YEAR: i32 = 2015;
pub const LEGACY_PARTITIONS: [(i32, i32); 4] = [(1900, 2000), (2000, 2005), (2005, 2010), (2010, 2015)];

/// Leaves room for the `_YYYY_YYYY` partition suffix and `_pkey` inside
/// Postgres' 63 byte identifier limit.
const MAX_TABLE_NAME_LEN: usize = 48;

/// Half-open year range `[start_year-01-01, end_year-01-01)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionBucket {
    pub start_year: i32,
    pub end_year: i32,
}

impl PartitionBucket {
    pub fn table_name(&self, parent: &str) -> String {
        format!("{parent}_{}_{}", self.start_year, self.end_year)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() >= self.start_year && date.year() < self.end_year
    }

    pub fn create_sql(&self, parent: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} PARTITION OF {parent} FOR VALUES FROM ('{}-01-01') TO ('{}-01-01')",
            self.table_name(parent),
            self.start_year,
            self.end_year
        )
    }
}

/// Buckets covering 1900-01-01 through the end of `current_year + 1`.
pub fn partition_buckets(current_year: i32) -> Vec<PartitionBucket> {
    let mut buckets: Vec<PartitionBucket> = LEGACY_PARTITIONS
        .iter()
        .map(|&(start_year, end_year)| PartitionBucket { start_year, end_year })
        .collect();

    let mut start_year = PARTITION_START_YEAR;
    while start_year <= current_year + 1 {
        buckets.push(PartitionBucket {
            start_year,
            end_year: start_year + PARTITION_BUCKET_YEARS,
        });
        start_year += PARTITION_BUCKET_YEARS;
    }
    buckets
}

/// ASCII slug: lowercase alphanumerics separated by single dashes.
pub fn slugify(input: &str) -> String {
    input
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Deterministic physical table name for one (subscription, data type) pair.
pub fn table_name(provider: &str, dataset: &str, data_type: &str, subscription_id: Uuid) -> String {
    let id = subscription_id.simple().to_string();
    let suffix = &id[..5];
    let mut base = slugify(&format!("{provider} {dataset} {data_type}")).replace('-', "_");
    let budget = MAX_TABLE_NAME_LEN - suffix.len() - 1;
    if base.len() > budget {
        base.truncate(budget);
        base = base.trim_end_matches('_').to_string();
    }
    format!("{base}_{suffix}")
}

/// A persisted binding of provider + dataset + credentials + schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub dataset: String,
    pub config: BTreeMap<String, String>,
    pub data_types: Vec<String>,
    /// Parallel to `data_types`.
    pub data_tables: Vec<String>,
    pub total_records: i64,
    pub num_records_last_import: i64,
    pub total_securities: i64,
    pub num_securities_last_import: i64,
    pub first_obs_date: Option<NaiveDate>,
    pub last_obs_date: Option<NaiveDate>,
    pub schedule: String,
    pub health_check_id: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub active: bool,
    pub schema_version: i32,
    pub created_on: DateTime<Utc>,
    pub created_by: String,
}

impl Subscription {
    pub fn new(
        provider: &str,
        dataset: &str,
        data_types: &[&'static DataType],
        config: BTreeMap<String, String>,
    ) -> Self {
        let mut subscription = Self {
            id: Uuid::new_v4(),
            name: default_name(provider),
            provider: provider.to_string(),
            dataset: dataset.to_string(),
            config,
            data_types: data_types.iter().map(|dt| dt.name.to_string()).collect(),
            data_tables: Vec::new(),
            total_records: 0,
            num_records_last_import: 0,
            total_securities: 0,
            num_securities_last_import: 0,
            first_obs_date: None,
            last_obs_date: None,
            schedule: DEFAULT_SCHEDULE.to_string(),
            health_check_id: None,
            last_run: None,
            active: true,
            schema_version: data_types.iter().map(|dt| dt.version).max().unwrap_or(0),
            created_on: Utc::now(),
            created_by: String::new(),
        };
        subscription.compute_table_names();
        subscription
    }

    pub fn compute_table_names(&mut self) {
        self.data_tables = self
            .data_types
            .iter()
            .map(|dt| table_name(&self.provider, &self.dataset, dt, self.id))
            .collect();
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.data_types.len() != self.data_tables.len() {
            return Err(CoreError::TableMapMismatch {
                id: self.id,
                types: self.data_types.len(),
                tables: self.data_tables.len(),
            });
        }
        for name in &self.data_types {
            data_type(name)?;
        }
        Ok(())
    }

    pub fn table_for(&self, data_type: &str) -> Option<&str> {
        self.data_types
            .iter()
            .position(|dt| dt == data_type)
            .and_then(|idx| self.data_tables.get(idx))
            .map(String::as_str)
    }

    pub fn data_tables_map(&self) -> BTreeMap<&str, &str> {
        self.data_types
            .iter()
            .map(String::as_str)
            .zip(self.data_tables.iter().map(String::as_str))
            .collect()
    }

    /// (table, registry entry) pairs in declaration order.
    pub fn tables(&self) -> Result<Vec<(&str, &'static DataType)>, CoreError> {
        self.validate()?;
        self.data_types
            .iter()
            .zip(&self.data_tables)
            .map(|(dt, table)| Ok((table.as_str(), data_type(dt)?)))
            .collect()
    }

    /// Every partition child table this subscription owns in `current_year`.
    pub fn partition_tables(&self, current_year: i32) -> Result<Vec<String>, CoreError> {
        let buckets = partition_buckets(current_year);
        Ok(self
            .tables()?
            .into_iter()
            .filter(|(_, dt)| dt.is_partitioned)
            .flat_map(|(table, _)| buckets.iter().map(move |b| b.table_name(table)))
            .collect())
    }

    pub fn is_partitioned(&self) -> bool {
        self.data_types
            .iter()
            .any(|dt| data_type(dt).map(|dt| dt.is_partitioned).unwrap_or(false))
    }

    pub fn short_id(&self) -> String {
        self.id.to_string()[..6].to_string()
    }
}

fn default_name(provider: &str) -> String {
    let mut chars = provider.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ASSET_KEY, EOD_KEY, METRIC_KEY};

    fn subscription(types: &[&str]) -> Subscription {
        let dts: Vec<_> = types.iter().map(|t| data_type(t).unwrap()).collect();
        let mut sub = Subscription::new("polygon", "Stock Tickers", &dts, BTreeMap::new());
        sub.id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();
        sub.compute_table_names();
        sub
    }

    #[test]
    fn table_names_are_slugged_with_id_prefix() {
        let sub = subscription(&[ASSET_KEY]);
        assert_eq!(sub.data_tables, vec!["polygon_stock_tickers_asset_description_1a2b3"]);
        assert_eq!(sub.table_for(ASSET_KEY), Some("polygon_stock_tickers_asset_description_1a2b3"));
        assert_eq!(sub.table_for(EOD_KEY), None);
        assert_eq!(sub.name, "Polygon");
        assert_eq!(sub.schedule, DEFAULT_SCHEDULE);
    }

    #[test]
    fn long_names_stay_inside_identifier_limit() {
        let id = Uuid::new_v4();
        let name = table_name(
            "a-very-long-provider-name",
            "An Extremely Verbose Dataset Description",
            "economic-indicator",
            id,
        );
        assert!(name.len() <= MAX_TABLE_NAME_LEN);
        assert!(name.ends_with(&id.simple().to_string()[..5]));
        let partition = PartitionBucket { start_year: 2025, end_year: 2030 }.table_name(&name);
        assert!(format!("{partition}_pkey").len() <= 63);
    }

    #[test]
    fn buckets_cover_every_day_exactly_once() {
        for current_year in [2024, 2025, 2026, 2029, 2030] {
            let buckets = partition_buckets(current_year);
            for pair in buckets.windows(2) {
                assert_eq!(pair[0].end_year, pair[1].start_year, "gap or overlap");
            }
            assert_eq!(buckets[0].start_year, 1900);
            for year in 1900..=current_year + 1 {
                for (month, day) in [(1, 1), (6, 15), (12, 31)] {
                    let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
                    let hits = buckets.iter().filter(|b| b.contains(date)).count();
                    assert_eq!(hits, 1, "{date} in {hits} buckets for {current_year}");
                }
            }
        }
    }

    #[test]
    fn modern_buckets_are_five_years_wide() {
        let buckets = partition_buckets(2026);
        let modern: Vec<_> = buckets
            .iter()
            .filter(|b| b.start_year >= PARTITION_START_YEAR)
            .map(|b| (b.start_year, b.end_year))
            .collect();
        assert_eq!(modern, vec![(2015, 2020), (2020, 2025), (2025, 2030)]);
    }

    #[test]
    fn partition_tables_match_created_partitions() {
        let sub = subscription(&[ASSET_KEY, EOD_KEY, METRIC_KEY]);
        let tables = sub.partition_tables(2026).unwrap();
        assert_eq!(tables.len(), 2 * partition_buckets(2026).len());
        let eod = sub.table_for(EOD_KEY).unwrap();
        assert!(tables.contains(&format!("{eod}_2025_2030")));
        assert!(tables.contains(&format!("{eod}_1900_2000")));
        assert!(!tables.iter().any(|t| t.starts_with(sub.table_for(ASSET_KEY).unwrap())));
        let sql = PartitionBucket { start_year: 2025, end_year: 2030 }.create_sql(eod);
        assert_eq!(
            sql,
            format!("CREATE TABLE IF NOT EXISTS {eod}_2025_2030 PARTITION OF {eod} FOR VALUES FROM ('2025-01-01') TO ('2030-01-01')")
        );
    }

    #[test]
    fn mismatched_tables_fail_validation() {
        let mut sub = subscription(&[ASSET_KEY, EOD_KEY]);
        sub.data_tables.pop();
        assert!(matches!(
            sub.validate(),
            Err(CoreError::TableMapMismatch { types: 2, tables: 1, .. })
        ));
    }
}
