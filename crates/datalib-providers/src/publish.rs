use chrono::{NaiveDate, Utc};
use datalib_core::{Observation, ObservationKind, Subscription};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ProviderError;

/// Sending half of the observation channel, tagged with the producing
/// subscription. Tracks what the run summary reports.
#[derive(Debug)]
pub struct Publisher {
    subscription_id: Uuid,
    subscription_name: String,
    tx: mpsc::Sender<Observation>,
    published: u64,
    first_event_date: Option<NaiveDate>,
    last_event_date: Option<NaiveDate>,
}

impl Publisher {
    pub fn new(subscription: &Subscription, tx: mpsc::Sender<Observation>) -> Self {
        Self {
            subscription_id: subscription.id,
            subscription_name: subscription.name.clone(),
            tx,
            published: 0,
            first_event_date: None,
            last_event_date: None,
        }
    }

    /// Waits for channel capacity; a full channel is ordinary backpressure.
    pub async fn publish(&mut self, kind: ObservationKind) -> Result<(), ProviderError> {
        let event_date = kind.event_date();
        let observation = Observation {
            subscription_id: self.subscription_id,
            subscription_name: self.subscription_name.clone(),
            observed_at: Utc::now(),
            kind,
        };
        self.tx
            .send(observation)
            .await
            .map_err(|_| ProviderError::ChannelClosed)?;

        self.published += 1;
        if let Some(date) = event_date {
            self.first_event_date = Some(self.first_event_date.map_or(date, |d| d.min(date)));
            self.last_event_date = Some(self.last_event_date.map_or(date, |d| d.max(date)));
        }
        Ok(())
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn event_date_range(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.first_event_date, self.last_event_date)
    }
}
