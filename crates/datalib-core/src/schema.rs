//! Registry of logical data types and the DDL used to stamp out per-subscription tables.

use crate::CoreError;

pub const ASSET_KEY: &str = "asset-description";
pub const EOD_KEY: &str = "eod";
pub const FUNDAMENTALS_KEY: &str = "fundamentals";
pub const METRIC_KEY: &str = "metric";
pub const MARKET_HOLIDAYS_KEY: &str = "market-holidays";
pub const ANALYST_RATING_KEY: &str = "analyst-rating";
pub const ECONOMIC_INDICATOR_KEY: &str = "economic-indicator";
pub const CUSTOM_KEY: &str = "custom";

/// Placeholder substituted with the physical table name.
pub const TABLE_PLACEHOLDER: &str = "%[1]s";

/// Immutable schema descriptor for one record kind.
#[derive(Debug, PartialEq, Eq)]
pub struct DataType {
    pub name: &'static str,
    pub schema: &'static str,
    pub migrations: &'static [&'static str],
    pub version: i32,
    pub is_partitioned: bool,
}

impl DataType {
    pub fn expanded_schema(&self, table_name: &str) -> String {
        self.schema.replace(TABLE_PLACEHOLDER, table_name)
    }
}

pub fn data_type(name: &str) -> Result<&'static DataType, CoreError> {
    DATA_TYPES
        .iter()
        .find(|dt| dt.name == name)
        .ok_or_else(|| CoreError::UnknownDataType(name.to_string()))
}

pub fn schema(data_type_name: &str, table_name: &str) -> Result<String, CoreError> {
    Ok(data_type(data_type_name)?.expanded_schema(table_name))
}

/// Registry entries for `names`, in the order given.
///
/// # Panics
///
/// On a name missing from the registry. Datasets only pass the `*_KEY`
/// constants, so an unknown name is a build defect.
pub fn data_types(names: &[&str]) -> Vec<&'static DataType> {
    names
        .iter()
        .map(|name| data_type(name).unwrap_or_else(|err| panic!("{err}")))
        .collect()
}

pub static DATA_TYPES: &[DataType] = &[
    DataType {
        name: ASSET_KEY,
        schema: ASSET_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: false,
    },
    DataType {
        name: EOD_KEY,
        schema: EOD_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: true,
    },
    DataType {
        name: FUNDAMENTALS_KEY,
        schema: FUNDAMENTALS_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: false,
    },
    DataType {
        name: METRIC_KEY,
        schema: METRIC_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: true,
    },
    DataType {
        name: MARKET_HOLIDAYS_KEY,
        schema: MARKET_HOLIDAYS_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: false,
    },
    DataType {
        name: ANALYST_RATING_KEY,
        schema: ANALYST_RATING_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: false,
    },
    DataType {
        name: ECONOMIC_INDICATOR_KEY,
        schema: ECONOMIC_INDICATOR_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: false,
    },
    DataType {
        name: CUSTOM_KEY,
        schema: CUSTOM_SCHEMA,
        migrations: &[],
        version: 1,
        is_partitioned: false,
    },
];

const ASSET_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    ticker                TEXT NOT NULL,
    composite_figi        TEXT NOT NULL,
    share_class_figi      TEXT,
    primary_exchange      TEXT,
    asset_type            TEXT,
    active                BOOLEAN NOT NULL DEFAULT true,
    name                  TEXT,
    description           TEXT,
    corporate_url         TEXT,
    headquarters_location TEXT,
    sector                TEXT,
    industry              TEXT,
    sic_code              INT,
    cik                   TEXT,
    cusips                TEXT[],
    isins                 TEXT[],
    other_identifiers     JSONB,
    similar_tickers       TEXT[],
    tags                  TEXT[],
    listed                DATE,
    delisted              DATE,
    last_updated          TIMESTAMPTZ,
    PRIMARY KEY (ticker, composite_figi)
);

CREATE INDEX %[1]s_active_idx ON %[1]s(active);

ALTER TABLE %[1]s
ADD COLUMN search tsvector
    GENERATED ALWAYS AS (
        setweight(to_tsvector('pg_catalog.english', coalesce(ticker, '')), 'A') ||
        setweight(to_tsvector('pg_catalog.english', coalesce(name, '')), 'B') ||
        setweight(to_tsvector('pg_catalog.english', coalesce(composite_figi, '')), 'C')
    ) STORED;

CREATE INDEX %[1]s_search_idx ON %[1]s USING GIN (search);"#;

const EOD_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    ticker         TEXT             NOT NULL,
    composite_figi CHARACTER(12)    NOT NULL,
    event_date     DATE             NOT NULL,
    open           DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    high           DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    low            DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    close          DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    adj_close      DOUBLE PRECISION,
    volume         BIGINT           NOT NULL DEFAULT 0,
    dividend       DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    split_factor   DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    CHECK (LENGTH(TRIM(BOTH composite_figi)) = 12),
    PRIMARY KEY (composite_figi, event_date)
) PARTITION BY RANGE (event_date);

CREATE INDEX %[1]s_event_date_idx ON %[1]s(event_date);
CREATE INDEX %[1]s_ticker_idx ON %[1]s(ticker);

CREATE TRIGGER %[1]s_adj_close_default
BEFORE INSERT ON %[1]s
FOR EACH ROW
WHEN (NEW.adj_close IS NULL AND NEW.close IS NOT NULL)
EXECUTE PROCEDURE adj_close_default();"#;

const FUNDAMENTALS_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    ticker                TEXT NOT NULL,
    composite_figi        TEXT NOT NULL,
    dim                   TEXT NOT NULL CHECK (dim IN ('ARQ', 'MRQ', 'ARY', 'MRY', 'ART', 'MRT')),
    event_date            DATE NOT NULL,
    calendar_date         DATE,
    report_period         DATE,
    total_revenue         BIGINT,
    cost_of_revenue       BIGINT,
    gross_profit          BIGINT,
    opinc                 BIGINT,
    net_income            BIGINT,
    ebit                  BIGINT,
    ebitda                BIGINT,
    total_assets          BIGINT,
    total_liabilities     BIGINT,
    equity                BIGINT,
    cash_equiv            BIGINT,
    total_debt            BIGINT,
    free_cash_flow        BIGINT,
    shares_outstanding    BIGINT,
    market_cap            BIGINT,
    ev                    BIGINT,
    eps                   DOUBLE PRECISION,
    eps_diluted           DOUBLE PRECISION,
    book_value_per_share  DOUBLE PRECISION,
    dividend_per_share    DOUBLE PRECISION,
    gross_margin          DOUBLE PRECISION,
    net_margin            DOUBLE PRECISION,
    roe                   DOUBLE PRECISION,
    roa                   DOUBLE PRECISION,
    pe                    DOUBLE PRECISION,
    pb                    DOUBLE PRECISION,
    price_to_sales        DOUBLE PRECISION,
    debt_to_equity        DOUBLE PRECISION,
    curr_ratio            DOUBLE PRECISION,
    created               TIMESTAMPTZ NOT NULL DEFAULT now(),
    lastchanged           TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (composite_figi, dim, event_date)
);

CREATE INDEX %[1]s_ticker_idx ON %[1]s(ticker, dim);
CREATE INDEX %[1]s_event_date_idx ON %[1]s(event_date, dim);
CREATE INDEX %[1]s_calendar_date_idx ON %[1]s(calendar_date, dim);"#;

const METRIC_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    ticker         TEXT             NOT NULL,
    composite_figi CHARACTER(12)    NOT NULL,
    event_date     DATE             NOT NULL,
    market_cap     BIGINT           NOT NULL DEFAULT 0,
    ev             BIGINT           NOT NULL DEFAULT 0,
    pe             DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    pb             DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    ps             DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    ev_ebit        DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    ev_ebitda      DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    sp500          BOOLEAN          DEFAULT false,
    CHECK (LENGTH(TRIM(BOTH composite_figi)) = 12),
    PRIMARY KEY (composite_figi, event_date)
) PARTITION BY RANGE (event_date);

CREATE INDEX %[1]s_event_date_idx ON %[1]s(event_date);
CREATE INDEX %[1]s_ticker_idx ON %[1]s(ticker);"#;

const MARKET_HOLIDAYS_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    holiday     TEXT        NOT NULL,
    event_date  DATE        NOT NULL,
    market      TEXT        NOT NULL,
    early_close BOOLEAN     NOT NULL DEFAULT false,
    close_time  TIMESTAMPTZ,
    PRIMARY KEY (event_date, market)
);"#;

const ANALYST_RATING_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    ticker         TEXT     NOT NULL,
    composite_figi TEXT     NOT NULL,
    event_date     DATE     NOT NULL,
    analyst        TEXT     NOT NULL,
    rating         SMALLINT NOT NULL CHECK (rating BETWEEN 1 AND 5),
    PRIMARY KEY (composite_figi, event_date, analyst)
);

CREATE INDEX %[1]s_analyst_idx ON %[1]s(analyst, event_date);"#;

const ECONOMIC_INDICATOR_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    series     TEXT             NOT NULL,
    event_date DATE             NOT NULL,
    value      DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (series, event_date)
);"#;

const CUSTOM_SCHEMA: &str = r#"CREATE TABLE %[1]s (
    ticker         TEXT  NOT NULL,
    composite_figi TEXT  NOT NULL,
    event_date     DATE  NOT NULL,
    key            TEXT  NOT NULL,
    value          JSONB,
    PRIMARY KEY (composite_figi, event_date, key)
);"#;
