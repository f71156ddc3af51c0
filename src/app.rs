//! Host wiring: builds the dialog and the broadcast around a transport's
//! [`Messenger`] and starts the background pieces.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;

use crate::admin::{AdminRouteState, admin_routes};
use crate::broadcast::{BroadcastScheduler, SessionProbe, register_scheduled_job};
use crate::channels::{Messenger, Update};
use crate::config::{AdminConfig, BotConfig, BroadcastConfig, DialogConfig};
use crate::dialog::{DialogManager, DialogRouter, register_handlers};
use crate::store::{LibSqlBackend, UserStore};
use crate::weather::{ApiUsage, HttpWeatherService, WeatherService};

/// Everything a transport needs to drive the bot.
pub struct BotApp {
    pub store: Arc<dyn UserStore>,
    pub manager: Arc<DialogManager>,
    pub router: DialogRouter,
    pub scheduler: Arc<BroadcastScheduler>,
    pub usage: ApiUsage,
    admin: AdminConfig,
}

impl BotApp {
    /// Open the database, connect the weather gateway, and wire the rest.
    pub async fn build(config: &BotConfig, messenger: Arc<dyn Messenger>) -> anyhow::Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store: Arc<dyn UserStore> = Arc::new(
            LibSqlBackend::new_local(&config.db_path)
                .await
                .with_context(|| format!("opening database at {}", config.db_path.display()))?,
        );
        let usage = ApiUsage::new(store.clone(), config.admin.monthly_request_quota);
        let weather: Arc<dyn WeatherService> = Arc::new(
            HttpWeatherService::new(config.weather.clone())
                .context("building weather client")?
                .with_usage(usage),
        );

        tracing::info!(db = %config.db_path.display(), weather = %config.weather.base_url, "Bot wired");
        Ok(Self::from_parts(
            config.dialog.clone(),
            config.broadcast.clone(),
            config.admin.clone(),
            store,
            weather,
            messenger,
        ))
    }

    /// Wire already-constructed collaborators.
    pub fn from_parts(
        dialog: DialogConfig,
        broadcast: BroadcastConfig,
        admin: AdminConfig,
        store: Arc<dyn UserStore>,
        weather: Arc<dyn WeatherService>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let usage = ApiUsage::new(store.clone(), admin.monthly_request_quota);
        let manager = Arc::new(DialogManager::new(
            dialog,
            admin.clone(),
            store.clone(),
            weather.clone(),
            messenger.clone(),
            usage.clone(),
        ));
        let mut router = DialogRouter::new(manager.clone());
        register_handlers(&mut router, manager.clone());

        let probe: Arc<dyn SessionProbe> = manager.clone();
        let scheduler = Arc::new(
            BroadcastScheduler::new(broadcast, store.clone(), weather, messenger)
                .with_session_probe(probe),
        );

        Self {
            store,
            manager,
            router,
            scheduler,
            usage,
            admin,
        }
    }

    /// Feed one transport update into the dialog.
    pub async fn handle_update(&self, update: Update) {
        self.router.dispatch(update).await;
    }

    /// Start the cron-driven broadcast.
    pub fn start_broadcasts(&self) -> anyhow::Result<JoinHandle<()>> {
        let schedule = self.scheduler.schedule().to_string();
        let handle = register_scheduled_job(self.scheduler.clone(), &schedule)
            .context("starting broadcast ticker")?;
        tracing::info!(schedule = %schedule, "Broadcast ticker started");
        Ok(handle)
    }

    /// Bind the admin HTTP server on the configured port and serve it in
    /// the background. Returns the bound address.
    pub async fn serve_admin(&self) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.admin.http_port))
            .await
            .with_context(|| format!("binding admin port {}", self.admin.http_port))?;
        let addr = listener.local_addr()?;
        let app = admin_routes(AdminRouteState {
            store: self.store.clone(),
            usage: self.usage.clone(),
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Admin server stopped: {e}");
            }
        });
        tracing::info!(%addr, "Admin server started");
        Ok((addr, handle))
    }
}
