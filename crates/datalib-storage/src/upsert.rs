//! Idempotent `INSERT ... ON CONFLICT` writes for every record kind.
//!
//! Key columns only ever appear in the insert list; the conflict branch
//! rewrites the remaining columns from `EXCLUDED`.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use datalib_core::ObservationKind;
use sqlx::types::Json;
use sqlx::PgPool;

pub struct Columns {
    pub all: &'static [&'static str],
    pub key: &'static [&'static str],
}

pub const ASSET_COLUMNS: Columns = Columns {
    all: &[
        "ticker",
        "composite_figi",
        "share_class_figi",
        "primary_exchange",
        "asset_type",
        "active",
        "name",
        "description",
        "corporate_url",
        "headquarters_location",
        "sector",
        "industry",
        "sic_code",
        "cik",
        "cusips",
        "isins",
        "other_identifiers",
        "similar_tickers",
        "tags",
        "listed",
        "delisted",
        "last_updated",
    ],
    key: &["ticker", "composite_figi"],
};

pub const EOD_COLUMNS: Columns = Columns {
    all: &[
        "ticker",
        "composite_figi",
        "event_date",
        "open",
        "high",
        "low",
        "close",
        "adj_close",
        "volume",
        "dividend",
        "split_factor",
    ],
    key: &["composite_figi", "event_date"],
};

pub const FUNDAMENTAL_COLUMNS: Columns = Columns {
    all: &[
        "ticker",
        "composite_figi",
        "dim",
        "event_date",
        "calendar_date",
        "report_period",
        "total_revenue",
        "cost_of_revenue",
        "gross_profit",
        "opinc",
        "net_income",
        "ebit",
        "ebitda",
        "total_assets",
        "total_liabilities",
        "equity",
        "cash_equiv",
        "total_debt",
        "free_cash_flow",
        "shares_outstanding",
        "market_cap",
        "ev",
        "eps",
        "eps_diluted",
        "book_value_per_share",
        "dividend_per_share",
        "gross_margin",
        "net_margin",
        "roe",
        "roa",
        "pe",
        "pb",
        "price_to_sales",
        "debt_to_equity",
        "curr_ratio",
        "lastchanged",
    ],
    key: &["composite_figi", "dim", "event_date"],
};

pub const METRIC_COLUMNS: Columns = Columns {
    all: &[
        "ticker",
        "composite_figi",
        "event_date",
        "market_cap",
        "ev",
        "pe",
        "pb",
        "ps",
        "ev_ebit",
        "ev_ebitda",
        "sp500",
    ],
    key: &["composite_figi", "event_date"],
};

pub const MARKET_HOLIDAY_COLUMNS: Columns = Columns {
    all: &["holiday", "event_date", "market", "early_close", "close_time"],
    key: &["event_date", "market"],
};

pub const ANALYST_RATING_COLUMNS: Columns = Columns {
    all: &["ticker", "composite_figi", "event_date", "analyst", "rating"],
    key: &["composite_figi", "event_date", "analyst"],
};

pub const ECONOMIC_INDICATOR_COLUMNS: Columns = Columns {
    all: &["series", "event_date", "value"],
    key: &["series", "event_date"],
};

pub const CUSTOM_COLUMNS: Columns = Columns {
    all: &["ticker", "composite_figi", "event_date", "key", "value"],
    key: &["composite_figi", "event_date", "key"],
};

pub fn columns_for(kind: &ObservationKind) -> &'static Columns {
    match kind {
        ObservationKind::Asset(_) => &ASSET_COLUMNS,
        ObservationKind::MarketHoliday(_) => &MARKET_HOLIDAY_COLUMNS,
        ObservationKind::Eod(_) => &EOD_COLUMNS,
        ObservationKind::Fundamental(_) => &FUNDAMENTAL_COLUMNS,
        ObservationKind::Metric(_) => &METRIC_COLUMNS,
        ObservationKind::AnalystRating(_) => &ANALYST_RATING_COLUMNS,
        ObservationKind::EconomicIndicator(_) => &ECONOMIC_INDICATOR_COLUMNS,
        ObservationKind::Custom(_) => &CUSTOM_COLUMNS,
    }
}

pub fn upsert_sql(table: &str, columns: &Columns) -> String {
    let names = columns
        .all
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let params = (1..=columns.all.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .all
        .iter()
        .filter(|c| !columns.key.contains(c))
        .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} ({names}) VALUES ({params}) \
         ON CONFLICT ON CONSTRAINT {table}_pkey DO UPDATE SET {updates}"
    )
}

/// Where the sink writes records.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn upsert(&self, table: &str, record: &ObservationKind) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgObservationStore {
    pool: PgPool,
}

impl PgObservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObservationStore for PgObservationStore {
    async fn upsert(&self, table: &str, record: &ObservationKind) -> anyhow::Result<()> {
        let sql = upsert_sql(table, columns_for(record));
        let query = sqlx::query(&sql);
        let query = match record {
            ObservationKind::Asset(a) => query
                .bind(&a.ticker)
                .bind(&a.composite_figi)
                .bind(&a.share_class_figi)
                .bind(&a.primary_exchange)
                .bind(a.asset_type.code())
                .bind(a.active)
                .bind(&a.name)
                .bind(&a.description)
                .bind(&a.corporate_url)
                .bind(&a.headquarters_location)
                .bind(&a.sector)
                .bind(&a.industry)
                .bind(a.sic_code)
                .bind(&a.cik)
                .bind(&a.cusips)
                .bind(&a.isins)
                .bind(Json(&a.other_identifiers))
                .bind(&a.similar_tickers)
                .bind(&a.tags)
                .bind(a.listed_on())
                .bind(a.delisted_on())
                .bind(a.last_updated),
            ObservationKind::Eod(q) => query
                .bind(&q.ticker)
                .bind(&q.composite_figi)
                .bind(q.event_date)
                .bind(q.open)
                .bind(q.high)
                .bind(q.low)
                .bind(q.close)
                .bind(q.adj_close)
                .bind(q.volume)
                .bind(q.dividend)
                .bind(q.split_factor),
            ObservationKind::Fundamental(f) => query
                .bind(&f.ticker)
                .bind(&f.composite_figi)
                .bind(f.dimension.code())
                .bind(f.event_date)
                .bind(f.calendar_date)
                .bind(f.report_period)
                .bind(f.total_revenue)
                .bind(f.cost_of_revenue)
                .bind(f.gross_profit)
                .bind(f.operating_income)
                .bind(f.net_income)
                .bind(f.ebit)
                .bind(f.ebitda)
                .bind(f.total_assets)
                .bind(f.total_liabilities)
                .bind(f.equity)
                .bind(f.cash_equiv)
                .bind(f.total_debt)
                .bind(f.free_cash_flow)
                .bind(f.shares_outstanding)
                .bind(f.market_cap)
                .bind(f.ev)
                .bind(f.eps)
                .bind(f.eps_diluted)
                .bind(f.book_value_per_share)
                .bind(f.dividend_per_share)
                .bind(f.gross_margin)
                .bind(f.net_margin)
                .bind(f.roe)
                .bind(f.roa)
                .bind(f.pe)
                .bind(f.pb)
                .bind(f.price_to_sales)
                .bind(f.debt_to_equity)
                .bind(f.current_ratio)
                .bind(Utc::now()),
            ObservationKind::Metric(m) => query
                .bind(&m.ticker)
                .bind(&m.composite_figi)
                .bind(m.event_date)
                .bind(m.market_cap)
                .bind(m.ev)
                .bind(m.pe)
                .bind(m.pb)
                .bind(m.ps)
                .bind(m.ev_ebit)
                .bind(m.ev_ebitda)
                .bind(m.sp500),
            ObservationKind::MarketHoliday(h) => query
                .bind(&h.name)
                .bind(h.event_date)
                .bind(&h.market)
                .bind(h.early_close)
                .bind(h.close_time),
            ObservationKind::AnalystRating(r) => query
                .bind(&r.ticker)
                .bind(&r.composite_figi)
                .bind(r.event_date)
                .bind(&r.analyst)
                .bind(r.rating),
            ObservationKind::EconomicIndicator(i) => {
                query.bind(&i.series).bind(i.event_date).bind(i.value)
            }
            ObservationKind::Custom(c) => query
                .bind(&c.ticker)
                .bind(&c.composite_figi)
                .bind(c.event_date)
                .bind(&c.key)
                .bind(Json(&c.value)),
        };

        query
            .execute(&self.pool)
            .await
            .with_context(|| format!("upserting {} into {table}", record.data_type()))?;
        Ok(())
    }
}
