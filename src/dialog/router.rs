//! Routes inbound updates to dialog steps by (input shape, session state).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::channels::{CallbackData, Input, Update};
use crate::dialog::manager::DialogManager;
use crate::dialog::state::{InputShape, SessionState};
use crate::error::DialogError;

/// A registered dialog step.
pub type Handler = Arc<dyn Fn(Update, Input) -> BoxFuture<'static, Result<(), DialogError>> + Send + Sync>;

/// Table of handlers keyed by input shape and, optionally, session state.
///
/// A handler registered without a state matches every state. Updates with
/// no matching handler are discarded.
pub struct DialogRouter {
    manager: Arc<DialogManager>,
    routes: HashMap<(InputShape, Option<SessionState>), Handler>,
}

impl DialogRouter {
    pub fn new(manager: Arc<DialogManager>) -> Self {
        Self {
            manager,
            routes: HashMap::new(),
        }
    }

    /// Register `handler` for `shape` in `state` (or in any state when
    /// `None`). A later registration for the same key replaces the earlier.
    pub fn on(&mut self, shape: InputShape, state: Option<SessionState>, handler: Handler) -> &mut Self {
        self.routes.insert((shape, state), handler);
        self
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn lookup(&self, shape: InputShape, state: SessionState) -> Option<Handler> {
        self.routes
            .get(&(shape, Some(state)))
            .or_else(|| self.routes.get(&(shape, None)))
            .cloned()
    }

    /// Handle one update. Failures are logged here and never returned.
    pub async fn dispatch(&self, update: Update) {
        let user = update.user_id;
        let input = update.input();
        let shape = InputShape::of(&input);

        let state = match self.manager.state(user).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(user_id = %user, "Failed to load session: {e}");
                return;
            }
        };

        let Some(step) = self.lookup(shape, state) else {
            tracing::debug!(user_id = %user, input = %shape, state = %state, "No route, discarding");
            self.manager.discard(&update).await;
            return;
        };

        match step(update, input).await {
            Ok(()) => {}
            Err(e @ DialogError::Rejected { .. }) => {
                tracing::debug!(user_id = %user, "{e}");
            }
            Err(e) => {
                tracing::error!(user_id = %user, input = %shape, "Dialog step failed: {e}");
            }
        }
    }
}

/// Wrap a manager method into a [`Handler`].
fn handler<F>(manager: &Arc<DialogManager>, step: F) -> Handler
where
    F: for<'a> Fn(&'a DialogManager, &'a Update, Input) -> BoxFuture<'a, Result<(), DialogError>>
        + Send
        + Sync
        + 'static,
{
    let manager = manager.clone();
    let step = Arc::new(step);
    Arc::new(move |update, input| {
        let manager = manager.clone();
        let step = step.clone();
        Box::pin(async move { step(&manager, &update, input).await })
    })
}

/// Register every dialog step on `router`, one per row of the transition
/// table.
pub fn register_handlers(router: &mut DialogRouter, manager: Arc<DialogManager>) {
    use InputShape as I;
    use SessionState as S;

    router
        .on(I::Start, None, handler(&manager, |m, u, _| Box::pin(m.start(u))))
        .on(I::Stop, None, handler(&manager, |m, u, _| Box::pin(m.stop(u))))
        .on(I::About, None, handler(&manager, |m, u, _| Box::pin(m.about(u))))
        .on(I::Stats, None, handler(&manager, |m, u, _| Box::pin(m.stats(u))))
        .on(
            I::CityText,
            Some(S::AwaitingCityName),
            handler(&manager, |m, u, input| {
                Box::pin(async move {
                    match input {
                        Input::CityName(text) => m.submit_city_name(u, &text).await,
                        _ => {
                            m.discard(u).await;
                            Ok(())
                        }
                    }
                })
            }),
        )
        .on(
            I::Location,
            Some(S::AwaitingCityName),
            handler(&manager, |m, u, input| {
                Box::pin(async move {
                    match input {
                        Input::Coordinates {
                            latitude,
                            longitude,
                        } => m.submit_location(u, latitude, longitude).await,
                        _ => {
                            m.discard(u).await;
                            Ok(())
                        }
                    }
                })
            }),
        )
        .on(
            I::PickCandidate,
            Some(S::AwaitingCityName),
            handler(&manager, |m, u, input| {
                Box::pin(async move {
                    match input {
                        Input::Button(CallbackData::PickCity {
                            latitude,
                            longitude,
                            name,
                        }) => m.pick_candidate(u, latitude, longitude, &name).await,
                        _ => {
                            m.discard(u).await;
                            Ok(())
                        }
                    }
                })
            }),
        )
        .on(
            I::ChooseAnotherCity,
            Some(S::AwaitingCityName),
            handler(&manager, |m, u, _| Box::pin(m.choose_another_city(u))),
        )
        .on(
            I::UnitChoice,
            Some(S::AwaitingUnitSelection),
            handler(&manager, |m, u, input| {
                Box::pin(async move {
                    match input {
                        Input::Button(CallbackData::Units(units)) => m.choose_units(u, units).await,
                        _ => {
                            m.discard(u).await;
                            Ok(())
                        }
                    }
                })
            }),
        );

    tracing::debug!(routes = router.route_count(), "Dialog handlers registered");
}
