//! Postgres library, subscription lifecycle, persistence sink and the
//! rate-limited HTTP plumbing providers fetch through.

pub mod filer;
pub mod healthcheck;
pub mod http;
pub mod ledger;
pub mod library;
pub mod lifecycle;
pub mod sink;
pub mod upsert;

pub use filer::{filer_from_spec, Filer, FilerError, FsFiler};
pub use healthcheck::{CheckSpec, HealthMonitor, HealthchecksClient, MonitorError};
pub use http::{
    FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, TokenBucket, TokenBucketConfig,
    DEFAULT_REQUESTS_PER_MINUTE,
};
pub use ledger::{AssetLedger, PgAssetLedger};
pub use library::{is_valid_id_prefix, mask_password, Library, LibraryStats};
pub use lifecycle::{check_spec, LifecycleError, SubscriptionManager};
pub use sink::{ObservationSink, SinkStats};
pub use upsert::{ObservationStore, PgObservationStore};

pub const CRATE_NAME: &str = "datalib-storage";
