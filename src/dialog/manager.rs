//! Dialog session manager: drives each user through onboarding while
//! keeping a single visible bot message in the chat.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::broadcast::SessionProbe;
use crate::channels::{Markup, Messenger, PhotoMessage, Update};
use crate::config::{AdminConfig, DialogConfig};
use crate::dialog::state::{InputShape, Session, SessionState};
use crate::dialog::texts;
use crate::error::{DatabaseError, DialogError, WeatherError};
use crate::model::{EnrolledUser, MessageId, UnitSystem, UserId};
use crate::store::UserStore;
use crate::tracker::{MessageTracker, PendingDeletion};
use crate::weather::format::sanitize_city_query;
use crate::weather::{ApiUsage, CityCandidate, CityQuery, ForecastArtifact, WeatherService};

/// Owns the per-user session cache and runs every dialog step.
pub struct DialogManager {
    config: DialogConfig,
    admin: AdminConfig,
    store: Arc<dyn UserStore>,
    weather: Arc<dyn WeatherService>,
    messenger: Arc<dyn Messenger>,
    usage: ApiUsage,
    tracker: MessageTracker,
    sessions: Mutex<HashMap<UserId, Session>>,
    /// Source of session epochs. Never reused, so a session rebuilt after
    /// its entry was dropped cannot collide with an older one.
    next_epoch: AtomicU64,
    /// Self-deleting messages that have not fired yet.
    pending: Mutex<HashMap<UserId, Vec<PendingDeletion>>>,
}

impl DialogManager {
    pub fn new(
        config: DialogConfig,
        admin: AdminConfig,
        store: Arc<dyn UserStore>,
        weather: Arc<dyn WeatherService>,
        messenger: Arc<dyn Messenger>,
        usage: ApiUsage,
    ) -> Self {
        let tracker = MessageTracker::new(store.clone(), messenger.clone());
        Self {
            config,
            admin,
            store,
            weather,
            messenger,
            usage,
            tracker,
            sessions: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &MessageTracker {
        &self.tracker
    }

    // ── Session cache ───────────────────────────────────────────────

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().expect("Session cache mutex poisoned")
    }

    /// Cached state, without touching the store.
    pub fn cached_state(&self, user: UserId) -> Option<SessionState> {
        self.sessions().get(&user).map(|s| s.state)
    }

    /// Number of users with a cached session.
    pub fn cached_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Current state, recovered from the stored row on a cache miss.
    pub async fn state(&self, user: UserId) -> Result<SessionState, DatabaseError> {
        if let Some(state) = self.cached_state(user) {
            return Ok(state);
        }
        let row = self.store.get_user(user).await?;
        let recovered = SessionState::recover(row.as_ref());
        let state = self
            .sessions()
            .entry(user)
            .or_insert_with(|| {
                debug!(user_id = %user, state = %recovered, "Session recovered from store");
                Session::new(recovered)
            })
            .state;
        Ok(state)
    }

    /// Apply `shape` to the user's session under the lock.
    ///
    /// Returns the session before and after. Start and stop take a fresh
    /// epoch so lookups and broadcasts still in flight are discarded.
    fn transition(&self, user: UserId, shape: InputShape) -> Result<(Session, Session), DialogError> {
        let mut sessions = self.sessions();
        let session = sessions.entry(user).or_insert(Session::new(SessionState::Idle));
        let before = *session;

        let Some(next) = before.state.next(shape) else {
            return Err(DialogError::Rejected {
                state: before.state.to_string(),
                shape: shape.to_string(),
            });
        };
        session.state = next;
        if matches!(shape, InputShape::Start | InputShape::Stop) {
            session.epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        }
        debug!(user_id = %user, from = %before.state, to = %next, input = %shape, "Session transition");
        Ok((before, *session))
    }

    /// Put the session back to `before` if nothing else moved it since.
    fn restore(&self, user: UserId, before: Session, after: Session) {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get_mut(&user)
            && *session == after
        {
            *session = before;
        }
    }

    /// Leave `SearchingCity`. Returns `false` when the search went stale.
    fn resolve_search(&self, user: UserId, epoch: u64) -> bool {
        let mut sessions = self.sessions();
        match sessions.get_mut(&user) {
            Some(session)
                if session.epoch == epoch && session.state == SessionState::SearchingCity =>
            {
                session.state = SessionState::AwaitingCityName;
                true
            }
            _ => false,
        }
    }

    /// Validate `shape` against the current state, loading it first if
    /// needed, and discard the input when it is not accepted.
    async fn enter(&self, update: &Update, shape: InputShape) -> Result<(Session, Session), DialogError> {
        self.state(update.user_id).await?;
        match self.transition(update.user_id, shape) {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                self.discard(update).await;
                Err(e)
            }
        }
    }

    // ── Pending self-deletions ──────────────────────────────────────

    fn remember_pending(&self, user: UserId, deletion: PendingDeletion) {
        let mut pending = self.pending.lock().expect("Pending deletion mutex poisoned");
        pending.retain(|_, list| {
            list.retain(|d| !d.is_finished());
            !list.is_empty()
        });
        pending.entry(user).or_default().push(deletion);
    }

    /// Number of users with remembered self-deletions.
    pub fn pending_users(&self) -> usize {
        self.pending
            .lock()
            .expect("Pending deletion mutex poisoned")
            .len()
    }

    /// Delete every self-destructing message of the user right away.
    async fn flush_pending(&self, user: UserId) {
        let deletions = self
            .pending
            .lock()
            .expect("Pending deletion mutex poisoned")
            .remove(&user)
            .unwrap_or_default();
        for deletion in deletions {
            deletion.flush().await;
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Remove the user's own message and stop the button spinner.
    async fn consume_input(&self, update: &Update) {
        if let Some(message) = update.message_id {
            self.tracker.delete(update.user_id, message).await;
        }
        if let Some(query_id) = update.callback_query_id()
            && let Err(e) = self.messenger.answer_callback(query_id).await
        {
            warn!(user_id = %update.user_id, "Failed to answer callback: {e}");
        }
    }

    /// Drop an input the dialog does not accept in the current state.
    pub async fn discard(&self, update: &Update) {
        debug!(user_id = %update.user_id, "Discarding input");
        self.consume_input(update).await;
    }

    fn logo(&self, caption: impl Into<String>) -> PhotoMessage {
        PhotoMessage::new(&self.config.logo_path, caption)
    }

    /// Send `message` as the new dialog message and track it.
    async fn show(&self, user: UserId, message: PhotoMessage) -> Result<MessageId, DialogError> {
        let id = self.messenger.send_photo(user, message).await?;
        self.tracker.set(user, id).await?;
        Ok(id)
    }

    /// Send a logo message that deletes itself after `delay`.
    async fn show_transient(
        &self,
        user: UserId,
        caption: impl Into<String>,
        delay: std::time::Duration,
    ) -> Result<(), DialogError> {
        let id = self.messenger.send_photo(user, self.logo(caption)).await?;
        self.remember_pending(user, self.tracker.delete_later(user, id, delay));
        Ok(())
    }

    fn city_prompt(&self, caption: &str) -> PhotoMessage {
        self.logo(caption)
            .with_markup(Markup::request_location(texts::SHARE_LOCATION))
    }

    // ── Dialog steps ────────────────────────────────────────────────

    /// Begin (or restart) onboarding. Wipes everything stored for the user.
    pub async fn start(&self, update: &Update) -> Result<(), DialogError> {
        let user = update.user_id;
        self.transition(user, InputShape::Start)?;
        self.flush_pending(user).await;
        self.consume_input(update).await;
        self.tracker.discard_previous(user).await?;

        self.store.create_or_reset_user(user).await?;
        self.show(user, self.city_prompt(texts::CITY_PROMPT)).await?;
        self.store.set_awaiting_city(user, true).await?;

        info!(user_id = %user, "Onboarding started");
        Ok(())
    }

    /// Free-text city name.
    pub async fn submit_city_name(&self, update: &Update, raw: &str) -> Result<(), DialogError> {
        let query = sanitize_city_query(raw, self.config.max_city_query_len);
        self.search(update, InputShape::CityText, CityQuery::Name(query))
            .await
    }

    /// Shared location.
    pub async fn submit_location(
        &self,
        update: &Update,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DialogError> {
        self.search(
            update,
            InputShape::Location,
            CityQuery::Location {
                latitude,
                longitude,
            },
        )
        .await
    }

    async fn search(&self, update: &Update, shape: InputShape, query: CityQuery) -> Result<(), DialogError> {
        let user = update.user_id;
        // SearchingCity is entered under the lock, before the lookup suspends.
        let (_, searching) = self.enter(update, shape).await?;

        self.consume_input(update).await;
        if let Err(e) = self.tracker.discard_previous(user).await {
            self.resolve_search(user, searching.epoch);
            return Err(e.into());
        }

        let outcome = match &query {
            CityQuery::Name(name) if name.is_empty() => Ok(Vec::new()),
            _ => self.weather.lookup_cities(&query, update.lang()).await,
        };

        if !self.resolve_search(user, searching.epoch) {
            debug!(user_id = %user, "Session changed during city lookup, dropping result");
            return Ok(());
        }

        match outcome {
            Ok(candidates) if !candidates.is_empty() => {
                debug!(user_id = %user, count = candidates.len(), "City candidates found");
                self.show(user, self.candidate_list(&candidates)).await?;
                Ok(())
            }
            Ok(_) => {
                debug!(user_id = %user, "No city matched");
                self.show(user, self.city_prompt(texts::CITY_NOT_FOUND)).await?;
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %user, "City lookup failed: {e}");
                self.show(user, self.city_prompt(texts::SETUP_ERROR)).await?;
                Err(DialogError::LookupFailed(e))
            }
        }
    }

    fn candidate_list(&self, candidates: &[CityCandidate]) -> PhotoMessage {
        self.logo(texts::SELECT_CITY).with_markup(Markup::city_selection(
            candidates,
            self.config.max_candidate_name_len,
            texts::ANOTHER_CITY,
        ))
    }

    /// A city picked from the candidate list.
    pub async fn pick_candidate(
        &self,
        update: &Update,
        latitude: f64,
        longitude: f64,
        name: &str,
    ) -> Result<(), DialogError> {
        let user = update.user_id;
        let (before, after) = self.enter(update, InputShape::PickCandidate).await?;

        let result: Result<(), DialogError> = async {
            self.consume_input(update).await;
            self.store
                .set_city_and_coords(user, name, latitude, longitude)
                .await?;
            self.store.set_awaiting_city(user, false).await?;
            self.tracker.discard_previous(user).await?;
            self.show(
                user,
                self.logo(texts::SELECT_UNITS)
                    .with_markup(Markup::unit_selection()),
            )
            .await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            self.restore(user, before, after);
        } else {
            debug!(user_id = %user, city = name, "City selected");
        }
        result
    }

    /// Back from the candidate list to the city prompt.
    pub async fn choose_another_city(&self, update: &Update) -> Result<(), DialogError> {
        let user = update.user_id;
        self.enter(update, InputShape::ChooseAnotherCity).await?;

        self.consume_input(update).await;
        self.tracker.discard_previous(user).await?;
        self.show(user, self.city_prompt(texts::CITY_REPROMPT)).await?;
        Ok(())
    }

    /// Final step: persist units, show the first forecast, confirm.
    ///
    /// Stored units make the user enrolled. Once they are written the
    /// session stays `Enrolled` even if the rest fails; the next broadcast
    /// replaces whatever message is left.
    pub async fn choose_units(&self, update: &Update, units: UnitSystem) -> Result<(), DialogError> {
        let user = update.user_id;
        let (before, after) = self.enter(update, InputShape::UnitChoice).await?;

        self.consume_input(update).await;
        if let Err(e) = self
            .store
            .set_language_and_units(user, update.lang(), units)
            .await
        {
            self.restore(user, before, after);
            return Err(e.into());
        }

        let result = self.finish(user, units).await;
        if let Err(e) = &result {
            warn!(user_id = %user, "Enrolled, but the first forecast was not shown: {e}");
        }
        result
    }

    async fn finish(&self, user: UserId, units: UnitSystem) -> Result<(), DialogError> {
        self.tracker.discard_previous(user).await?;

        let enrolled = self
            .store
            .get_user(user)
            .await?
            .and_then(|row| row.enrolled())
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "enrolled user".into(),
                id: user.to_string(),
            })?;

        let sent = match self.fetch_forecast(&enrolled).await {
            Ok((artifact, caption)) => {
                let sent = self
                    .messenger
                    .send_photo(user, PhotoMessage::new(artifact.path(), caption))
                    .await;
                artifact.release().await;
                sent
            }
            Err(e) => {
                warn!(user_id = %user, "Forecast unavailable at enrollment: {e}");
                self.messenger
                    .send_photo(user, self.logo(texts::FORECAST_UNAVAILABLE))
                    .await
            }
        }?;
        self.tracker.set(user, sent).await?;

        let confirmation = self.messenger.send_text(user, texts::SETUP_COMPLETE).await?;
        self.remember_pending(
            user,
            self.tracker
                .delete_later(user, confirmation, self.config.confirmation_delay),
        );

        info!(user_id = %user, units = %units, city = %enrolled.city, "User enrolled");
        Ok(())
    }

    async fn fetch_forecast(
        &self,
        user: &EnrolledUser,
    ) -> Result<(ForecastArtifact, String), WeatherError> {
        let artifact = self.weather.forecast_artifact(user).await?;
        match self.weather.current_conditions_text(user).await {
            Ok(text) => Ok((artifact, text)),
            Err(e) => {
                artifact.release().await;
                Err(e)
            }
        }
    }

    /// Opt out: delete everything stored for the user.
    ///
    /// The row and its tracked message id go in one statement, so a
    /// broadcast finishing meanwhile either lands before it (and its
    /// message is the one deleted here) or finds no row to track into.
    pub async fn stop(&self, update: &Update) -> Result<(), DialogError> {
        let user = update.user_id;
        let (_, stopped) = self.transition(user, InputShape::Stop)?;
        self.flush_pending(user).await;
        self.consume_input(update).await;
        if let Some(previous) = self.store.delete_user(user).await? {
            self.tracker.delete(user, previous).await;
        }

        let notice = self
            .show_transient(user, texts::DATA_DELETED, self.config.stop_notice_delay)
            .await;
        self.forget(user, stopped);
        notice?;
        info!(user_id = %user, "User opted out");
        Ok(())
    }

    /// Drop the cached session unless another input already moved it on.
    fn forget(&self, user: UserId, expected: Session) {
        let mut sessions = self.sessions();
        if sessions.get(&user) == Some(&expected) {
            sessions.remove(&user);
        }
    }

    /// Informational message; does not touch the session.
    pub async fn about(&self, update: &Update) -> Result<(), DialogError> {
        self.consume_input(update).await;
        self.show_transient(update.user_id, texts::ABOUT, self.config.confirmation_delay)
            .await
    }

    /// API usage and user count for admins. Anyone else gets the
    /// unrecognized-input treatment.
    pub async fn stats(&self, update: &Update) -> Result<(), DialogError> {
        let user = update.user_id;
        if !self.admin.is_admin(user.0) {
            self.discard(update).await;
            return Err(DialogError::Rejected {
                state: self.state(user).await?.to_string(),
                shape: InputShape::Stats.to_string(),
            });
        }

        self.consume_input(update).await;
        let users = self.store.count_users().await?;
        let usage = self.usage.current().await?;
        self.show_transient(user, texts::stats(users, &usage), self.config.confirmation_delay)
            .await
    }
}

impl SessionProbe for DialogManager {
    fn is_onboarding(&self, user: UserId) -> bool {
        self.cached_state(user)
            .is_some_and(|state| state.is_onboarding())
    }

    fn generation(&self, user: UserId) -> u64 {
        self.sessions().get(&user).map_or(0, |s| s.epoch)
    }
}
