//! Provider contract, registry and the fetch harness every dataset runs under.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use datalib_core::{DataType, Subscription};
use datalib_storage::{AssetLedger, FetchError};
use thiserror::Error;

mod cancel;
pub mod config;
mod harness;
pub mod paginate;
pub mod polygon;
mod publish;
pub mod reconcile;
pub mod synthetic;

pub use cancel::CancelToken;
pub use config::ConfigError;
pub use harness::{run_dataset, DONE_CHANNEL_CAPACITY, OBSERVATION_CHANNEL_CAPACITY};
pub use publish::Publisher;

pub const CRATE_NAME: &str = "datalib-providers";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("fetching {what}: {source}")]
    Page {
        what: String,
        #[source]
        source: FetchError,
    },
    #[error("subscription has no `{0}` table")]
    MissingTable(&'static str),
    #[error("reading stored assets: {0:#}")]
    Ledger(anyhow::Error),
    #[error("observation channel closed")]
    ChannelClosed,
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shared resources a dataset may use while fetching.
#[derive(Clone)]
pub struct FetchContext {
    pub cancel: CancelToken,
    pub ledger: Arc<dyn AssetLedger>,
}

/// One fetchable product of a provider.
#[async_trait]
pub trait Dataset: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn data_types(&self) -> Vec<&'static DataType>;
    /// Span of event dates the dataset can cover.
    fn date_range(&self) -> (NaiveDate, NaiveDate);

    /// Publishes every record of one run. Returning `Err` aborts the run;
    /// records already published stay published.
    async fn fetch(
        &self,
        ctx: &FetchContext,
        subscription: &Subscription,
        out: &mut Publisher,
    ) -> Result<(), ProviderError>;
}

pub trait Provider: Send + Sync {
    /// Stable registry key, also stored on every subscription.
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Config key -> prompt text for every key the provider reads.
    fn config_description(&self) -> BTreeMap<&'static str, &'static str>;
    /// The subset of [`config_description`](Self::config_description) keys
    /// that [`validate_config`](Self::validate_config) rejects when blank.
    fn required_config(&self) -> &'static [&'static str] {
        &[]
    }
    fn validate_config(&self, config: &BTreeMap<String, String>) -> Result<(), ConfigError>;
    fn datasets(&self) -> Vec<Arc<dyn Dataset>>;

    fn dataset(&self, name: &str) -> Option<Arc<dyn Dataset>> {
        self.datasets().into_iter().find(|d| d.name() == name)
    }
}

pub const PROVIDER_KEYS: [&str; 2] = [polygon::PROVIDER_NAME, synthetic::PROVIDER_NAME];

pub fn provider_for(key: &str) -> Option<Arc<dyn Provider>> {
    match key {
        polygon::PROVIDER_NAME => Some(Arc::new(polygon::Polygon::new())),
        synthetic::PROVIDER_NAME => Some(Arc::new(synthetic::Synthetic)),
        _ => None,
    }
}

pub fn providers() -> Vec<Arc<dyn Provider>> {
    PROVIDER_KEYS.iter().filter_map(|key| provider_for(key)).collect()
}

/// Resolves a subscription's provider and dataset, failing before any I/O.
pub fn resolve(subscription: &Subscription) -> Result<Arc<dyn Dataset>, ProviderError> {
    let provider = provider_for(&subscription.provider)
        .ok_or_else(|| ConfigError::UnknownProvider(subscription.provider.clone()))?;
    provider.validate_config(&subscription.config)?;
    provider.dataset(&subscription.dataset).ok_or_else(|| {
        ConfigError::UnknownDataset {
            provider: subscription.provider.clone(),
            dataset: subscription.dataset.clone(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_listed_provider() {
        let names: Vec<_> = providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, PROVIDER_KEYS);
        assert!(provider_for("tiingo").is_none());
    }

    #[test]
    fn unknown_dataset_fails_resolution() {
        let mut sub = Subscription::new("synthetic", "Nope", &[], BTreeMap::new());
        assert!(matches!(
            resolve(&sub),
            Err(ProviderError::Config(ConfigError::UnknownDataset { .. }))
        ));
        sub.provider = "nope".into();
        assert!(matches!(
            resolve(&sub),
            Err(ProviderError::Config(ConfigError::UnknownProvider(p))) if p == "nope"
        ));
    }
}
