use chrono::Utc;
use datalib_core::{Observation, RunStatus, RunSummary, Subscription};
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::{Dataset, FetchContext, ProviderError, Publisher};

/// Bound on observations in flight between fetchers and the sink.
pub const OBSERVATION_CHANNEL_CAPACITY: usize = 1000;
pub const DONE_CHANNEL_CAPACITY: usize = 5;

/// Runs one fetch and sends exactly one [`RunSummary`] on `done`, whether
/// the fetch completes, fails or is cancelled.
pub async fn run_dataset(
    dataset: &dyn Dataset,
    ctx: &FetchContext,
    subscription: &Subscription,
    out: mpsc::Sender<Observation>,
    done: mpsc::Sender<RunSummary>,
) {
    let span = info_span!(
        "subscription_run",
        subscription_id = %subscription.id,
        dataset = dataset.name()
    );
    async {
        let started_at = Utc::now();
        let mut publisher = Publisher::new(subscription, out);

        let result = if ctx.cancel.is_cancelled() {
            Err(ProviderError::Cancelled)
        } else {
            tokio::select! {
                result = dataset.fetch(ctx, subscription, &mut publisher) => result,
                _ = ctx.cancel.cancelled() => Err(ProviderError::Cancelled),
            }
        };

        let (status, error) = match result {
            Ok(()) => (RunStatus::Completed, None),
            Err(ProviderError::Cancelled) => {
                warn!("run cancelled");
                (RunStatus::Cancelled, Some(ProviderError::Cancelled.to_string()))
            }
            Err(err) => {
                error!(error = %err, "run failed");
                (RunStatus::Failed, Some(err.to_string()))
            }
        };

        let (first_event_date, last_event_date) = publisher.event_date_range();
        let summary = RunSummary {
            subscription_id: subscription.id,
            subscription_name: subscription.name.clone(),
            started_at,
            finished_at: Utc::now(),
            num_observations: publisher.published(),
            status,
            error,
            first_event_date,
            last_event_date,
        };
        drop(publisher);
        info!(
            status = %summary.status,
            observations = summary.num_observations,
            elapsed_ms = summary.elapsed().num_milliseconds(),
            "run finished"
        );

        if done.send(summary).await.is_err() {
            warn!("run summary receiver dropped");
        }
    }
    .instrument(span)
    .await
}
