//! Widget orchestration: mount sequencing, event routing, transient UI state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use map_engine::{ClickHandler, MapContainer, MapEngine};
use shared::{
    domain::{Coordinate, LngLat, LocationProps},
    error::{ErrorKind, PickerError},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    geocoding::{GeocodeOutcome, Geocoder},
    map_lifecycle::{MapLifecycleManager, ViewDefaults},
    script_loader::ScriptLoader,
    settings::{PickerSettings, WidgetConfig},
};

pub type LocationCallback = Arc<dyn Fn(Coordinate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Unloaded,
    Loading,
    Ready,
    /// Load or creation failed; terminal until the host remounts.
    Failed,
    Destroyed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetState {
    pub is_loading: bool,
    pub error: Option<String>,
    pub is_geocoding: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    StateChanged(WidgetState),
    LocationChanged(Coordinate),
}

pub struct WidgetDependencies {
    pub engine: Arc<dyn MapEngine>,
    pub loader: Arc<ScriptLoader>,
    pub geocoder: Arc<dyn Geocoder>,
}

#[derive(Clone)]
pub struct WidgetController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    engine: Arc<dyn MapEngine>,
    loader: Arc<ScriptLoader>,
    geocoder: Arc<dyn Geocoder>,
    settings: PickerSettings,
    on_location_change: Option<LocationCallback>,
    core: Mutex<ControllerCore>,
    events: broadcast::Sender<WidgetEvent>,
}

struct ControllerCore {
    phase: LifecyclePhase,
    state: WidgetState,
    config: WidgetConfig,
    address: Option<String>,
    location: Option<Coordinate>,
    map: MapLifecycleManager,
    dismiss_generation: u64,
    dismiss_task: Option<JoinHandle<()>>,
}

/// Keeps the widget mounted; dropping it runs [`WidgetController::stop`].
#[must_use = "dropping the guard unmounts the widget"]
pub struct MountGuard {
    controller: WidgetController,
}

impl MountGuard {
    pub fn controller(&self) -> &WidgetController {
        &self.controller
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        self.controller.stop();
    }
}

impl WidgetController {
    pub fn new(
        settings: PickerSettings,
        dependencies: WidgetDependencies,
        config: WidgetConfig,
        initial: Option<Coordinate>,
    ) -> Self {
        Self::build(settings, dependencies, config, initial, None)
    }

    pub fn new_with_callback(
        settings: PickerSettings,
        dependencies: WidgetDependencies,
        config: WidgetConfig,
        initial: Option<Coordinate>,
        on_location_change: LocationCallback,
    ) -> Self {
        Self::build(
            settings,
            dependencies,
            config,
            initial,
            Some(on_location_change),
        )
    }

    fn build(
        settings: PickerSettings,
        dependencies: WidgetDependencies,
        config: WidgetConfig,
        initial: Option<Coordinate>,
        on_location_change: Option<LocationCallback>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let core = ControllerCore {
            phase: LifecyclePhase::Unloaded,
            state: WidgetState::default(),
            address: config.geo_address.clone(),
            config,
            location: initial,
            map: MapLifecycleManager::new(ViewDefaults::from(&settings)),
            dismiss_generation: 0,
            dismiss_task: None,
        };
        Self {
            inner: Arc::new(ControllerInner {
                engine: dependencies.engine,
                loader: dependencies.loader,
                geocoder: dependencies.geocoder,
                settings,
                on_location_change,
                core: Mutex::new(core),
                events,
            }),
        }
    }

    pub fn state(&self) -> WidgetState {
        self.inner.lock_core().state.clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.inner.lock_core().phase
    }

    pub fn marker_position(&self) -> Option<Coordinate> {
        self.inner.lock_core().map.marker_position()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WidgetEvent> {
        self.inner.events.subscribe()
    }

    /// Starts the widget and returns a guard that unmounts it on drop.
    ///
    /// The guard exists before the first suspension point, so cancelling this
    /// future also unmounts.
    pub async fn mount(&self, container: Arc<dyn MapContainer>) -> MountGuard {
        let guard = MountGuard {
            controller: self.clone(),
        };
        self.start(container).await;
        guard
    }

    /// Loads the engine, then creates the map. Failures end up in `WidgetState::error`.
    pub async fn start(&self, container: Arc<dyn MapContainer>) {
        {
            let mut core = self.inner.lock_core();
            if core.phase != LifecyclePhase::Unloaded {
                warn!(phase = ?core.phase, "start ignored; widget already started");
                return;
            }
            core.phase = LifecyclePhase::Loading;
            core.state.is_loading = true;
            self.inner.publish_state(&core);
        }

        let loaded = self
            .inner
            .loader
            .ensure_engine_loaded(&self.inner.settings.script)
            .await;

        let mut guard = self.inner.lock_core();
        let core = &mut *guard;
        if core.phase == LifecyclePhase::Destroyed {
            debug!("engine load settled after unmount; discarding");
            return;
        }

        let created = loaded.and_then(|()| {
            core.map.create(
                self.inner.engine.as_ref(),
                container.as_ref(),
                &core.config,
                core.location,
            )?;
            if core.config.readonly {
                Ok(())
            } else {
                core.map.on_click(self.click_handler())
            }
        });

        core.state.is_loading = false;
        match created {
            Ok(()) => {
                core.phase = LifecyclePhase::Ready;
                info!(
                    container = container.id(),
                    readonly = core.config.readonly,
                    "location map ready"
                );
            }
            Err(err) => {
                core.map.destroy();
                core.phase = LifecyclePhase::Failed;
                self.inner.show_error(core, &err);
                if err == PickerError::ContainerNotReady {
                    error!(
                        container = container.id(),
                        "map container not attached at creation; host mounted out of order"
                    );
                } else {
                    error!(error = %err, "map initialization failed");
                }
            }
        }
        self.inner.publish_state(core);
    }

    /// Unmounts: cancels the dismiss timer and destroys native handles. Idempotent.
    pub fn stop(&self) {
        let mut core = self.inner.lock_core();
        if core.phase == LifecyclePhase::Destroyed {
            return;
        }
        core.phase = LifecyclePhase::Destroyed;
        if let Some(task) = core.dismiss_task.take() {
            task.abort();
        }
        core.map.destroy();
        info!("location map unmounted");
    }

    pub fn handle_map_click(&self, at: Coordinate) {
        {
            let mut core = self.inner.lock_core();
            if core.config.readonly {
                debug!("click ignored on readonly map");
                return;
            }
            if core.phase != LifecyclePhase::Ready {
                debug!(phase = ?core.phase, "click ignored; map not ready");
                return;
            }
            let moved = core
                .map
                .set_marker(at)
                .and_then(|()| core.map.recenter(at, None));
            if let Err(err) = moved {
                error!(error = %err, "failed to move marker on click");
                return;
            }
            core.location = Some(at);
        }
        self.inner.notify_location(at);
    }

    /// Resolves the current address hint and moves the marker to the first match.
    pub async fn geocode(&self) {
        let (address, api_key) = {
            let mut core = self.inner.lock_core();
            if matches!(
                core.phase,
                LifecyclePhase::Destroyed | LifecyclePhase::Failed
            ) {
                return;
            }
            let Some(address) = core
                .address
                .clone()
                .filter(|address| !address.trim().is_empty())
            else {
                debug!("geocode skipped; no address");
                return;
            };
            if core.config.api_key.trim().is_empty() {
                debug!("geocode skipped; no api key");
                return;
            }
            if core.state.is_geocoding {
                debug!("geocode skipped; a lookup is already outstanding");
                return;
            }
            core.state.is_geocoding = true;
            self.inner.publish_state(&core);
            (address, core.config.api_key.clone())
        };

        let outcome = self.inner.geocoder.resolve(&address, &api_key).await;

        let found = {
            let mut core = self.inner.lock_core();
            if core.phase == LifecyclePhase::Destroyed {
                debug!(address = %address, "discarding geocode response after unmount");
                return;
            }
            core.state.is_geocoding = false;
            let found = match outcome {
                GeocodeOutcome::Found(coordinate) => {
                    match self.inner.move_marker(&mut core, coordinate) {
                        Ok(()) => Some(coordinate),
                        Err(err) => {
                            self.inner.show_error(&mut core, &err);
                            None
                        }
                    }
                }
                GeocodeOutcome::NotFound => {
                    info!(address = %address, "address not found");
                    self.inner
                        .show_error(&mut core, &PickerError::GeocodeNotFound);
                    None
                }
                GeocodeOutcome::Failed(reason) => {
                    warn!(address = %address, reason = %reason, "geocoding failed");
                    self.inner
                        .show_error(&mut core, &PickerError::GeocodeFailed(reason));
                    None
                }
            };
            self.inner.publish_state(&core);
            found
        };

        if let Some(coordinate) = found {
            self.inner.notify_location(coordinate);
        }
    }

    /// Applies coordinates or an address hint changed by the host.
    pub fn update_props(&self, props: LocationProps) {
        let mut core = self.inner.lock_core();
        if core.phase == LifecyclePhase::Destroyed {
            return;
        }
        core.address = props.geo_address.clone();

        let Some(coordinate) = props.coordinate() else {
            return;
        };
        core.location = Some(coordinate);
        if core.phase == LifecyclePhase::Ready {
            if let Err(err) = self.inner.move_marker(&mut core, coordinate) {
                error!(error = %err, "failed to apply external coordinate");
            }
        }
    }

    fn click_handler(&self) -> ClickHandler {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |point: LngLat| {
            if let Some(inner) = Weak::upgrade(&inner) {
                WidgetController { inner }.handle_map_click(Coordinate::from(point));
            }
        })
    }
}

impl ControllerInner {
    fn lock_core(&self) -> MutexGuard<'_, ControllerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_state(&self, core: &ControllerCore) {
        let _ = self
            .events
            .send(WidgetEvent::StateChanged(core.state.clone()));
    }

    fn notify_location(&self, at: Coordinate) {
        debug!(
            latitude = at.latitude,
            longitude = at.longitude,
            "location changed"
        );
        if let Some(callback) = &self.on_location_change {
            callback(at);
        }
        let _ = self.events.send(WidgetEvent::LocationChanged(at));
    }

    fn move_marker(&self, core: &mut ControllerCore, at: Coordinate) -> Result<(), PickerError> {
        core.map.set_marker(at)?;
        core.map.recenter(at, Some(self.settings.close_zoom))?;
        core.location = Some(at);
        Ok(())
    }

    /// Surfaces `err` according to its kind: persistent errors stay, geocode
    /// errors auto-dismiss, internal misuse is only logged.
    fn show_error(self: &Arc<Self>, core: &mut ControllerCore, err: &PickerError) {
        match err.kind() {
            ErrorKind::Persistent => {
                core.state.error = err.user_message().map(str::to_string);
            }
            ErrorKind::AutoDismiss => self.show_transient_error(core, err),
            ErrorKind::Internal => error!(error = %err, "internal map misuse"),
        }
    }

    /// Shows `err` until the dismiss window passes; a newer error restarts the window.
    fn show_transient_error(self: &Arc<Self>, core: &mut ControllerCore, err: &PickerError) {
        core.state.error = err.user_message().map(str::to_string);
        core.dismiss_generation += 1;
        if let Some(previous) = core.dismiss_task.take() {
            previous.abort();
        }

        let generation = core.dismiss_generation;
        let delay = self.settings.error_dismiss;
        let inner = Arc::downgrade(self);
        core.dismiss_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.dismiss_error(generation);
            }
        }));
    }

    fn dismiss_error(&self, generation: u64) {
        let mut core = self.lock_core();
        if core.phase == LifecyclePhase::Destroyed || core.dismiss_generation != generation {
            return;
        }
        core.state.error = None;
        core.dismiss_task = None;
        self.publish_state(&core);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
