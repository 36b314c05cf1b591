use std::sync::Arc;

use anyhow::{Context, Result};
use datalib_core::{Observation, RunSummary, Subscription};
use datalib_providers::{
    resolve, run_dataset, CancelToken, Dataset, FetchContext, DONE_CHANNEL_CAPACITY,
    OBSERVATION_CHANNEL_CAPACITY,
};
use datalib_storage::{
    AssetLedger, HealthMonitor, Library, ObservationSink, ObservationStore, PgAssetLedger,
    PgObservationStore, SinkStats, SubscriptionManager,
};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

/// Concurrent runs one [`Runner`] admits, daemon jobs included.
const MAX_CONCURRENT_RUNS: u32 = 64;

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub summaries: Vec<RunSummary>,
    pub sink: SinkStats,
}

/// Executes subscriptions against one library: a fresh sink per call, the
/// subscriptions one after another, bookkeeping once the sink has drained.
pub struct Runner {
    library: Library,
    manager: SubscriptionManager,
    store: Arc<dyn ObservationStore>,
    ledger: Arc<dyn AssetLedger>,
    cancel: CancelToken,
    slots: Arc<Semaphore>,
}

impl Runner {
    pub fn new(library: Library, monitor: Option<Arc<dyn HealthMonitor>>) -> Self {
        let pool = library.pool().clone();
        Self {
            manager: SubscriptionManager::new(pool.clone(), monitor),
            store: Arc::new(PgObservationStore::new(pool.clone())),
            ledger: Arc::new(PgAssetLedger::new(pool)),
            library,
            cancel: CancelToken::new(),
            slots: Arc::new(Semaphore::new(MAX_CONCURRENT_RUNS as usize)),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Cancelling it ends every in-flight and future run of this runner.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Resolves as soon as no run is in progress.
    pub async fn idle(&self) {
        let _all = self.slots.acquire_many(MAX_CONCURRENT_RUNS).await;
    }

    /// Every subscription is resolved before anything is fetched, so a bad
    /// provider, dataset or config key fails the whole call up front.
    ///
    /// Past that point each subscription yields exactly one summary: one
    /// that cannot start (its partitions cannot be managed) reports
    /// `Failed` and the rest still run and are recorded.
    pub async fn run(&self, subscriptions: Vec<Subscription>) -> Result<RunReport> {
        let _slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .context("runner is shut down")?;

        let mut datasets: Vec<Arc<dyn Dataset>> = Vec::with_capacity(subscriptions.len());
        for sub in &subscriptions {
            let dataset = resolve(sub).with_context(|| format!("resolving subscription {}", sub.id))?;
            datasets.push(dataset);
        }

        let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_CAPACITY);
        let sink = ObservationSink::new(self.store.clone(), subscriptions.clone(), rx);
        let sink = tokio::spawn(sink.run());

        let ctx = FetchContext {
            cancel: self.cancel.clone(),
            ledger: self.ledger.clone(),
        };
        let mut summaries = Vec::with_capacity(subscriptions.len());
        for idx in 0..subscriptions.len() {
            let summary = self
                .run_subscription(&ctx, &subscriptions[idx], datasets[idx].clone(), tx.clone())
                .await;
            summaries.push(summary);
        }

        drop(tx);
        let sink = sink.await.context("observation sink task panicked")?;

        for idx in 0..subscriptions.len() {
            let (sub, summary) = (&subscriptions[idx], &summaries[idx]);
            if let Err(err) = self.library.record_run(sub, summary).await {
                warn!(subscription_id = %sub.id, error = %format!("{err:#}"), "run bookkeeping failed");
            }
            info!(
                subscription_id = %sub.id,
                status = %summary.status,
                observations = summary.num_observations,
                elapsed_s = summary.elapsed().num_seconds(),
                "run recorded"
            );
        }

        Ok(RunReport { summaries, sink })
    }

    async fn run_subscription(
        &self,
        ctx: &FetchContext,
        sub: &Subscription,
        dataset: Arc<dyn Dataset>,
        out: mpsc::Sender<Observation>,
    ) -> RunSummary {
        if sub.is_partitioned() {
            if let Err(err) = self.manager.manage_partitions(sub).await {
                error!(subscription_id = %sub.id, error = %err, "cannot manage partitions; skipping run");
                return RunSummary::failed(sub, format!("managing partitions: {err}"));
            }
        }
        info!(subscription_id = %sub.id, provider = %sub.provider, dataset = %sub.dataset, "starting run");

        let (done_tx, mut done_rx) = mpsc::channel(DONE_CHANNEL_CAPACITY);
        run_dataset(dataset.as_ref(), ctx, sub, out, done_tx).await;
        match done_rx.recv().await {
            Some(summary) => summary,
            None => RunSummary::failed(sub, "run ended without a summary"),
        }
    }
}
