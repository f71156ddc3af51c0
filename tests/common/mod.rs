//! In-process doubles for the messaging platform and the weather service.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Notify;

use weather_bot::channels::{Markup, Messenger, PhotoMessage};
use weather_bot::error::{DatabaseError, DeliveryError, WeatherError};
use weather_bot::model::{EnrolledUser, MessageId, UnitSystem, User, UserId};
use weather_bot::store::{LibSqlBackend, UserStore};
use weather_bot::weather::{CityCandidate, CityQuery, ForecastArtifact, WeatherService};

// ── Messenger ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Sent {
    Photo {
        chat: UserId,
        id: MessageId,
        photo: PathBuf,
        caption: String,
        markup: Option<Markup>,
        silent: bool,
    },
    Text {
        chat: UserId,
        id: MessageId,
        text: String,
    },
}

impl Sent {
    pub fn id(&self) -> MessageId {
        match self {
            Self::Photo { id, .. } | Self::Text { id, .. } => *id,
        }
    }

    pub fn chat(&self) -> UserId {
        match self {
            Self::Photo { chat, .. } | Self::Text { chat, .. } => *chat,
        }
    }

    pub fn caption(&self) -> &str {
        match self {
            Self::Photo { caption, .. } => caption,
            Self::Text { text, .. } => text,
        }
    }
}

/// Records every call; send failures can be scripted per user.
#[derive(Default)]
pub struct FakeMessenger {
    next_id: AtomicI64,
    sent: Mutex<Vec<Sent>>,
    deleted: Mutex<Vec<(UserId, MessageId)>>,
    answered: Mutex<Vec<String>>,
    attempts: Mutex<Vec<(UserId, Instant)>>,
    send_failures: Mutex<HashMap<UserId, VecDeque<DeliveryError>>>,
}

impl FakeMessenger {
    pub fn new() -> Arc<Self> {
        let messenger = Self::default();
        messenger.next_id.store(100, Ordering::SeqCst);
        Arc::new(messenger)
    }

    /// Fail the next sends to `user` with these errors, in order.
    pub fn fail_next_sends(&self, user: UserId, errors: Vec<DeliveryError>) {
        self.send_failures
            .lock()
            .unwrap()
            .entry(user)
            .or_default()
            .extend(errors);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, user: UserId) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.chat() == user).collect()
    }

    pub fn last_sent_to(&self, user: UserId) -> Option<Sent> {
        self.sent_to(user).pop()
    }

    pub fn deleted(&self) -> Vec<(UserId, MessageId)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn was_deleted(&self, user: UserId, message: MessageId) -> bool {
        self.deleted().contains(&(user, message))
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, user: UserId) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, at)| *at)
            .collect()
    }

    fn attempt(&self, chat: UserId) -> Result<MessageId, DeliveryError> {
        self.attempts.lock().unwrap().push((chat, Instant::now()));
        if let Some(error) = self
            .send_failures
            .lock()
            .unwrap()
            .get_mut(&chat)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }
        Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_photo(&self, chat: UserId, message: PhotoMessage) -> Result<MessageId, DeliveryError> {
        let id = self.attempt(chat)?;
        self.sent.lock().unwrap().push(Sent::Photo {
            chat,
            id,
            photo: message.photo,
            caption: message.caption,
            markup: message.markup,
            silent: message.silent,
        });
        Ok(id)
    }

    async fn send_text(&self, chat: UserId, text: &str) -> Result<MessageId, DeliveryError> {
        let id = self.attempt(chat)?;
        self.sent.lock().unwrap().push(Sent::Text {
            chat,
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn delete_message(&self, chat: UserId, message: MessageId) -> Result<(), DeliveryError> {
        let mut deleted = self.deleted.lock().unwrap();
        if deleted.contains(&(chat, message)) {
            return Err(DeliveryError::MessageGone);
        }
        deleted.push((chat, message));
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> Result<(), DeliveryError> {
        self.answered.lock().unwrap().push(query_id.to_string());
        Ok(())
    }
}

// ── Weather ─────────────────────────────────────────────────────────

pub fn candidate(name: &str, latitude: f64, longitude: f64) -> CityCandidate {
    CityCandidate {
        name: name.to_string(),
        display_name: format!("{name}, Country"),
        latitude,
        longitude,
    }
}

/// Runs inside the next forecast fetch, before it returns.
pub type ForecastHook = Box<dyn FnOnce(UserId) -> BoxFuture<'static, ()> + Send>;

/// Canned geocoding and forecasts. Forecast images are real files in a
/// temporary directory so their cleanup can be checked.
pub struct FakeWeather {
    cities: HashMap<String, Vec<CityCandidate>>,
    artifact_dir: tempfile::TempDir,
    lookups: AtomicUsize,
    lookup_fails: Mutex<bool>,
    lookup_gate: Mutex<Option<Arc<Notify>>>,
    failing_users: Mutex<HashSet<UserId>>,
    artifacts: Mutex<Vec<PathBuf>>,
    forecast_hook: Mutex<Option<ForecastHook>>,
}

impl FakeWeather {
    pub fn new() -> Arc<Self> {
        let mut cities = HashMap::new();
        cities.insert(
            "paris".to_string(),
            vec![candidate("Paris", 48.8566, 2.3522), candidate("Paris", 33.6609, -95.5555)],
        );
        cities.insert("lyon".to_string(), vec![candidate("Lyon", 45.764, 4.8357)]);
        Arc::new(Self {
            cities,
            artifact_dir: tempfile::tempdir().unwrap(),
            lookups: AtomicUsize::new(0),
            lookup_fails: Mutex::new(false),
            lookup_gate: Mutex::new(None),
            failing_users: Mutex::new(HashSet::new()),
            artifacts: Mutex::new(Vec::new()),
            forecast_hook: Mutex::new(None),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn fail_lookups(&self) {
        *self.lookup_fails.lock().unwrap() = true;
    }

    /// Make lookups wait until the returned handle is notified.
    pub fn gate_lookups(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.lookup_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_forecasts_for(&self, user: UserId) {
        self.failing_users.lock().unwrap().insert(user);
    }

    /// Run `hook` in the middle of the next forecast fetch, to act on the
    /// user while their forecast is in flight.
    pub fn on_next_forecast(
        &self,
        hook: impl FnOnce(UserId) -> BoxFuture<'static, ()> + Send + 'static,
    ) {
        *self.forecast_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Every forecast file handed out so far.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WeatherService for FakeWeather {
    async fn lookup_cities(
        &self,
        query: &CityQuery,
        _lang: &str,
    ) -> Result<Vec<CityCandidate>, WeatherError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let gate = self.lookup_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if *self.lookup_fails.lock().unwrap() {
            return Err(WeatherError::Status { status: 503 });
        }
        Ok(match query {
            CityQuery::Name(name) => self
                .cities
                .get(&name.to_lowercase())
                .cloned()
                .unwrap_or_default(),
            CityQuery::Location {
                latitude,
                longitude,
            } => vec![candidate("Somewhere", *latitude, *longitude)],
        })
    }

    async fn forecast_artifact(&self, user: &EnrolledUser) -> Result<ForecastArtifact, WeatherError> {
        let hook = self.forecast_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(user.id).await;
        }
        if self.failing_users.lock().unwrap().contains(&user.id) {
            return Err(WeatherError::RequestFailed {
                reason: "gateway down".into(),
            });
        }
        let mut artifacts = self.artifacts.lock().unwrap();
        let path = self
            .artifact_dir
            .path()
            .join(format!("forecast_{}_{}.png", user.id, artifacts.len()));
        std::fs::write(&path, b"png")?;
        artifacts.push(path.clone());
        Ok(ForecastArtifact::temporary(path))
    }

    async fn current_conditions_text(&self, user: &EnrolledUser) -> Result<String, WeatherError> {
        let units = match user.units {
            UnitSystem::Metric => "°C",
            UnitSystem::Imperial => "°F",
        };
        Ok(format!("{}: 20{units}", user.city))
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Wraps the in-memory backend; writes of the tracked message id, or the
/// recipient listing, can be made to fail.
pub struct FlakyStore {
    inner: Arc<LibSqlBackend>,
    failing_writes: Mutex<HashSet<UserId>>,
    failing_listing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<LibSqlBackend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_writes: Mutex::new(HashSet::new()),
            failing_listing: AtomicBool::new(false),
        })
    }

    /// Fail every dialog message id write for `user`.
    pub fn fail_message_writes_for(&self, user: UserId) {
        self.failing_writes.lock().unwrap().insert(user);
    }

    pub fn fail_listing(&self) {
        self.failing_listing.store(true, Ordering::SeqCst);
    }

    fn check_write(&self, user: UserId) -> Result<(), DatabaseError> {
        if self.failing_writes.lock().unwrap().contains(&user) {
            return Err(DatabaseError::Query("disk I/O error".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for FlakyStore {
    async fn create_or_reset_user(&self, id: UserId) -> Result<(), DatabaseError> {
        self.inner.create_or_reset_user(id).await
    }

    async fn set_dialog_message_id(
        &self,
        id: UserId,
        message_id: MessageId,
    ) -> Result<(), DatabaseError> {
        self.check_write(id)?;
        self.inner.set_dialog_message_id(id, message_id).await
    }

    async fn get_dialog_message_id(&self, id: UserId) -> Result<Option<MessageId>, DatabaseError> {
        self.inner.get_dialog_message_id(id).await
    }

    async fn replace_dialog_message_id(
        &self,
        id: UserId,
        expected: Option<MessageId>,
        message_id: MessageId,
    ) -> Result<bool, DatabaseError> {
        self.check_write(id)?;
        self.inner
            .replace_dialog_message_id(id, expected, message_id)
            .await
    }

    async fn set_city_and_coords(
        &self,
        id: UserId,
        city: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), DatabaseError> {
        self.inner
            .set_city_and_coords(id, city, latitude, longitude)
            .await
    }

    async fn set_language_and_units(
        &self,
        id: UserId,
        lang: &str,
        units: UnitSystem,
    ) -> Result<(), DatabaseError> {
        self.inner.set_language_and_units(id, lang, units).await
    }

    async fn set_awaiting_city(&self, id: UserId, awaiting: bool) -> Result<(), DatabaseError> {
        self.inner.set_awaiting_city(id, awaiting).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError> {
        self.inner.get_user(id).await
    }

    async fn list_enrolled_users(&self) -> Result<Vec<EnrolledUser>, DatabaseError> {
        if self.failing_listing.load(Ordering::SeqCst) {
            return Err(DatabaseError::Pool("database is locked".into()));
        }
        self.inner.list_enrolled_users().await
    }

    async fn delete_user(&self, id: UserId) -> Result<Option<MessageId>, DatabaseError> {
        self.inner.delete_user(id).await
    }

    async fn count_users(&self) -> Result<i64, DatabaseError> {
        self.inner.count_users().await
    }

    async fn increase_api_counter(&self, month: &str) -> Result<(), DatabaseError> {
        self.inner.increase_api_counter(month).await
    }

    async fn get_api_counter_value(&self, month: &str) -> Result<i64, DatabaseError> {
        self.inner.get_api_counter_value(month).await
    }
}

// ── Store helpers ───────────────────────────────────────────────────

pub async fn memory_store() -> Arc<LibSqlBackend> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

/// Insert a fully enrolled user directly, with a tracked dialog message.
pub async fn seed_enrolled(store: &LibSqlBackend, id: i64, dialog_message: Option<i64>) {
    let user = UserId(id);
    store.create_or_reset_user(user).await.unwrap();
    store
        .set_city_and_coords(user, &format!("City{id}"), 50.0, 10.0)
        .await
        .unwrap();
    store
        .set_language_and_units(user, "en", UnitSystem::Metric)
        .await
        .unwrap();
    if let Some(message) = dialog_message {
        store
            .set_dialog_message_id(user, MessageId(message))
            .await
            .unwrap();
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
