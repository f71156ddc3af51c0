//! Periodic forecast fan-out to every enrolled user.
//!
//! Each recipient is handled independently: fetch, deliver silently,
//! replace the tracked message, clean up. A failure for one user never
//! stops the run.
//!
//! The dialog may act on a user while their forecast is in flight. The
//! tracked id is only swapped with a compare-and-set against the id read
//! at listing time, and only while the row is still enrolled, so a user
//! who restarted or opted out meanwhile keeps whatever the dialog left.
//! A forecast that loses that race is deleted again.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::{Messenger, PhotoMessage};
use crate::config::BroadcastConfig;
use crate::error::{DatabaseError, DeliveryError, WeatherError};
use crate::model::{EnrolledUser, MessageId, UserId};
use crate::store::UserStore;
use crate::tracker::MessageTracker;
use crate::weather::{ForecastArtifact, WeatherService};

/// Tells the scheduler which users are in the middle of onboarding.
pub trait SessionProbe: Send + Sync {
    fn is_onboarding(&self, user: UserId) -> bool;

    /// Changes whenever the user restarts or stops the dialog.
    fn generation(&self, _user: UserId) -> u64 {
        0
    }
}

/// What happened to one recipient during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { retried: bool },
    /// Nothing changed for this user this cycle.
    Failed,
    /// Permanently unreachable; the user row was deleted.
    Removed,
    /// Mid-onboarding; left for the next run.
    Skipped,
}

/// Tally of one broadcast run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Of `delivered`, how many went through only on the rate-limit retry.
    pub retried: usize,
    pub failed: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl BroadcastReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
            DeliveryOutcome::Delivered { retried } => {
                self.delivered += 1;
                if retried {
                    self.retried += 1;
                }
            }
            DeliveryOutcome::Failed => self.failed += 1,
            DeliveryOutcome::Removed => self.removed += 1,
        }
        self.attempted += 1;
    }
}

/// Result of the send step, before cleanup.
enum SendResult {
    Sent(MessageId),
    Failed,
    Removed,
}

pub struct BroadcastScheduler {
    config: BroadcastConfig,
    store: Arc<dyn UserStore>,
    weather: Arc<dyn WeatherService>,
    messenger: Arc<dyn Messenger>,
    tracker: MessageTracker,
    probe: Option<Arc<dyn SessionProbe>>,
}

impl BroadcastScheduler {
    pub fn new(
        config: BroadcastConfig,
        store: Arc<dyn UserStore>,
        weather: Arc<dyn WeatherService>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let tracker = MessageTracker::new(store.clone(), messenger.clone());
        Self {
            config,
            store,
            weather,
            messenger,
            tracker,
            probe: None,
        }
    }

    /// Skip users the probe reports as mid-onboarding.
    pub fn with_session_probe(mut self, probe: Arc<dyn SessionProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn schedule(&self) -> &str {
        &self.config.schedule
    }

    /// Deliver to every enrolled user once.
    ///
    /// Fails only when the recipient list cannot be loaded.
    pub async fn run_once(&self) -> Result<BroadcastReport, DatabaseError> {
        let users = self.store.list_enrolled_users().await?;
        info!(recipients = users.len(), "Broadcast run starting");

        let limit = self.config.max_concurrent_deliveries.max(1);
        let outcomes: Vec<DeliveryOutcome> = futures::stream::iter(users)
            .map(|user| async move { self.deliver_to(&user).await })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = BroadcastReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            retried = report.retried,
            failed = report.failed,
            removed = report.removed,
            skipped = report.skipped,
            "Broadcast run finished"
        );
        Ok(report)
    }

    /// Full per-recipient sequence: fetch, deliver (with one retry on rate
    /// limiting), replace the tracked id, clean up.
    pub async fn deliver_to(&self, user: &EnrolledUser) -> DeliveryOutcome {
        let generation = self.generation(user.id);
        if self.is_onboarding(user.id) {
            debug!(user_id = %user.id, "User is onboarding, skipping this cycle");
            return DeliveryOutcome::Skipped;
        }

        let (artifact, caption) = match self.fetch(user).await {
            Ok(content) => content,
            Err(e) => {
                warn!(user_id = %user.id, "Forecast fetch failed, keeping previous message: {e}");
                return DeliveryOutcome::Failed;
            }
        };

        if self.session_moved(user.id, generation) {
            debug!(user_id = %user.id, "Dialog restarted during fetch, skipping this cycle");
            artifact.release().await;
            return DeliveryOutcome::Skipped;
        }

        let message = PhotoMessage::new(artifact.path(), caption).silent();
        let (result, retried) = self.send_with_retry(user.id, message).await;

        let outcome = match result {
            SendResult::Sent(new_id) => self.track(user, new_id, generation, retried).await,
            SendResult::Failed => {
                self.cleanup_previous(user, None).await;
                DeliveryOutcome::Failed
            }
            SendResult::Removed => {
                self.cleanup_previous(user, None).await;
                DeliveryOutcome::Removed
            }
        };

        artifact.release().await;
        outcome
    }

    /// Make `new_id` the tracked message, or withdraw it when the dialog
    /// took over the chat while it was being sent.
    async fn track(
        &self,
        user: &EnrolledUser,
        new_id: MessageId,
        generation: u64,
        retried: bool,
    ) -> DeliveryOutcome {
        if self.session_moved(user.id, generation) {
            debug!(user_id = %user.id, message_id = %new_id, "Dialog restarted during delivery, withdrawing forecast");
            self.tracker.delete(user.id, new_id).await;
            return DeliveryOutcome::Failed;
        }

        match self
            .tracker
            .replace(user.id, user.dialog_message_id, new_id)
            .await
        {
            Ok(true) => {
                self.cleanup_previous(user, Some(new_id)).await;
                // A restart that read the tracked id after the swap has
                // already moved on without this forecast.
                if self.session_moved(user.id, generation) {
                    self.tracker.delete(user.id, new_id).await;
                    return DeliveryOutcome::Failed;
                }
                DeliveryOutcome::Delivered { retried }
            }
            Ok(false) => {
                // Stopped or restarted; the dialog already cleaned up the
                // message we listed.
                info!(user_id = %user.id, message_id = %new_id, "Tracked message changed during delivery, withdrawing forecast");
                self.tracker.delete(user.id, new_id).await;
                DeliveryOutcome::Failed
            }
            Err(e) => {
                // The old message stays tracked, so the new one must go.
                warn!(user_id = %user.id, "Failed to record delivered message: {e}");
                self.tracker.delete(user.id, new_id).await;
                DeliveryOutcome::Failed
            }
        }
    }

    fn generation(&self, user: UserId) -> u64 {
        self.probe.as_ref().map_or(0, |probe| probe.generation(user))
    }

    fn is_onboarding(&self, user: UserId) -> bool {
        self.probe
            .as_ref()
            .is_some_and(|probe| probe.is_onboarding(user))
    }

    fn session_moved(&self, user: UserId, generation: u64) -> bool {
        self.is_onboarding(user) || self.generation(user) != generation
    }

    async fn fetch(&self, user: &EnrolledUser) -> Result<(ForecastArtifact, String), WeatherError> {
        let artifact = self.weather.forecast_artifact(user).await?;
        match self.weather.current_conditions_text(user).await {
            Ok(caption) => Ok((artifact, caption)),
            Err(e) => {
                artifact.release().await;
                Err(e)
            }
        }
    }

    /// Send, waiting out one rate limit. Returns the result and whether a
    /// retry happened.
    async fn send_with_retry(&self, user: UserId, message: PhotoMessage) -> (SendResult, bool) {
        match self.messenger.send_photo(user, message.clone()).await {
            Ok(id) => (SendResult::Sent(id), false),
            Err(DeliveryError::RateLimited { retry_after }) => {
                debug!(user_id = %user, wait_ms = retry_after.as_millis() as u64, "Rate limited, retrying once");
                tokio::time::sleep(retry_after).await;
                let result = match self.messenger.send_photo(user, message).await {
                    Ok(id) => SendResult::Sent(id),
                    Err(e) => self.handle_failure(user, e).await,
                };
                (result, true)
            }
            Err(e) => (self.handle_failure(user, e).await, false),
        }
    }

    async fn handle_failure(&self, user: UserId, error: DeliveryError) -> SendResult {
        if !error.is_permanent() {
            warn!(user_id = %user, "Broadcast delivery failed: {error}");
            return SendResult::Failed;
        }

        info!(user_id = %user, "Recipient unreachable, removing user: {error}");
        match self.store.delete_user(user).await {
            Ok(_) => SendResult::Removed,
            Err(e) => {
                warn!(user_id = %user, "Failed to remove unreachable user: {e}");
                SendResult::Failed
            }
        }
    }

    /// Best-effort deletion of the message the user had before this run.
    async fn cleanup_previous(&self, user: &EnrolledUser, current: Option<MessageId>) {
        if let Some(previous) = user.dialog_message_id
            && Some(previous) != current
        {
            self.tracker.delete(user.id, previous).await;
        }
    }
}
