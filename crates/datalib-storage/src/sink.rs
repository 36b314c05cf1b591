use std::collections::HashMap;
use std::sync::Arc;

use datalib_core::{Observation, ObservationKind, Subscription};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::filer::{filer_from_spec, save_branding, Filer};
use crate::upsert::ObservationStore;

/// Subscription config key naming where asset images go.
pub const FILER_CONFIG_KEY: &str = "filer";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub received: u64,
    pub saved: u64,
    /// Records whose business key was blank.
    pub dropped: u64,
    pub unknown_subscription: u64,
    pub failed: u64,
}

struct Target {
    subscription: Subscription,
    filer: Option<Box<dyn Filer>>,
}

/// The single consumer of the observation channel.
///
/// Subscriptions are fixed when the sink is built; observations for any
/// other subscription id are logged and skipped.
pub struct ObservationSink {
    store: Arc<dyn ObservationStore>,
    targets: HashMap<Uuid, Target>,
    rx: mpsc::Receiver<Observation>,
}

impl ObservationSink {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        subscriptions: Vec<Subscription>,
        rx: mpsc::Receiver<Observation>,
    ) -> Self {
        let targets = subscriptions
            .into_iter()
            .map(|subscription| {
                let filer = subscription
                    .config
                    .get(FILER_CONFIG_KEY)
                    .and_then(|spec| filer_from_spec(spec));
                (subscription.id, Target { subscription, filer })
            })
            .collect();
        Self { store, targets, rx }
    }

    /// Drains until every sender is dropped.
    pub async fn run(mut self) -> SinkStats {
        let mut stats = SinkStats::default();
        while let Some(observation) = self.rx.recv().await {
            stats.received += 1;
            self.save(observation, &mut stats).await;
        }
        info!(
            received = stats.received,
            saved = stats.saved,
            dropped = stats.dropped,
            failed = stats.failed,
            "observation sink drained"
        );
        stats
    }

    async fn save(&self, observation: Observation, stats: &mut SinkStats) {
        let Some(target) = self.targets.get(&observation.subscription_id) else {
            error!(
                subscription_id = %observation.subscription_id,
                subscription_name = %observation.subscription_name,
                "subscription not found"
            );
            stats.unknown_subscription += 1;
            return;
        };

        if !observation.kind.has_business_key() {
            debug!(
                subscription_id = %observation.subscription_id,
                data_type = observation.kind.data_type(),
                "dropping record without business key"
            );
            stats.dropped += 1;
            return;
        }

        let data_type = observation.kind.data_type();
        let Some(table) = target.subscription.table_for(data_type) else {
            warn!(
                subscription_id = %observation.subscription_id,
                data_type,
                "subscription has no table for data type"
            );
            stats.failed += 1;
            return;
        };

        if let (ObservationKind::Asset(asset), Some(filer)) = (&observation.kind, &target.filer) {
            if let Err(err) = save_branding(filer.as_ref(), asset).await {
                error!(
                    error = %err,
                    ticker = %asset.ticker,
                    composite_figi = %asset.composite_figi,
                    "cannot save asset files"
                );
                stats.failed += 1;
                return;
            }
        }

        match self.store.upsert(table, &observation.kind).await {
            Ok(()) => stats.saved += 1,
            Err(err) => {
                error!(
                    error = %format!("{err:#}"),
                    subscription_id = %observation.subscription_id,
                    table,
                    "cannot save observation"
                );
                stats.failed += 1;
            }
        }
    }
}
