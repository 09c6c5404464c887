//! In-memory engine and page used by the command-line host and tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use shared::domain::LngLat;
use tracing::debug;
use url::Url;

use crate::{
    ClickHandler, ListenerId, MapContainer, MapEngine, MapHandle, MapOptions, MarkerHandle,
    ScriptHost,
};

#[derive(Default)]
struct EngineState {
    next_id: u64,
    maps: HashMap<u64, MapRecord>,
    markers: HashMap<u64, MarkerRecord>,
    maps_created: usize,
    markers_created: usize,
    fail_markers: bool,
}

impl EngineState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct MapRecord {
    container: String,
    center: LngLat,
    zoom: f64,
    listeners: Vec<(ListenerId, ClickHandler)>,
}

struct MarkerRecord {
    map: u64,
    at: LngLat,
}

/// Observable view of a live headless map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapView {
    pub container: String,
    pub center: LngLat,
    pub zoom: f64,
    pub listeners: usize,
}

#[derive(Clone, Default)]
pub struct HeadlessEngine {
    state: Arc<Mutex<EngineState>>,
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `add_marker` call fail.
    pub fn fail_marker_creation(&self, fail: bool) {
        lock(&self.state).fail_markers = fail;
    }

    pub fn live_maps(&self) -> usize {
        lock(&self.state).maps.len()
    }

    pub fn live_markers(&self) -> usize {
        lock(&self.state).markers.len()
    }

    pub fn maps_created(&self) -> usize {
        lock(&self.state).maps_created
    }

    pub fn markers_created(&self) -> usize {
        lock(&self.state).markers_created
    }

    pub fn marker_positions(&self) -> Vec<LngLat> {
        lock(&self.state)
            .markers
            .values()
            .map(|marker| marker.at)
            .collect()
    }

    /// View of the most recently created live map.
    pub fn view(&self) -> Option<MapView> {
        let state = lock(&self.state);
        state
            .maps
            .iter()
            .max_by_key(|(id, _)| **id)
            .map(|(_, map)| MapView {
                container: map.container.clone(),
                center: map.center,
                zoom: map.zoom,
                listeners: map.listeners.len(),
            })
    }

    /// Dispatches a click to every listener of every live map and returns how many ran.
    pub fn click(&self, at: LngLat) -> usize {
        let handlers = {
            let state = lock(&self.state);
            state
                .maps
                .values()
                .flat_map(|map| map.listeners.iter().map(|(_, handler)| Arc::clone(handler)))
                .collect::<Vec<_>>()
        };
        for handler in &handlers {
            handler(at);
        }
        handlers.len()
    }
}

impl MapEngine for HeadlessEngine {
    fn create_map(
        &self,
        container: &dyn MapContainer,
        options: MapOptions,
    ) -> Result<Box<dyn MapHandle>> {
        if !container.is_attached() {
            bail!("container {} is detached", container.id());
        }
        let mut state = lock(&self.state);
        let id = state.allocate_id();
        state.maps.insert(
            id,
            MapRecord {
                container: container.id().to_string(),
                center: options.center,
                zoom: options.zoom,
                listeners: Vec::new(),
            },
        );
        state.maps_created += 1;
        debug!(map = id, container = container.id(), "headless map created");
        Ok(Box::new(HeadlessMap {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

struct HeadlessMap {
    id: u64,
    state: Arc<Mutex<EngineState>>,
}

impl HeadlessMap {
    fn with_record(&self, apply: impl FnOnce(&mut MapRecord)) {
        if let Some(record) = lock(&self.state).maps.get_mut(&self.id) {
            apply(record);
        }
    }
}

impl MapHandle for HeadlessMap {
    fn add_marker(&self, at: LngLat) -> Result<Box<dyn MarkerHandle>> {
        let mut state = lock(&self.state);
        if state.fail_markers {
            bail!("marker creation rejected by engine");
        }
        if !state.maps.contains_key(&self.id) {
            return Err(anyhow!("map {} is destroyed", self.id));
        }
        let id = state.allocate_id();
        state.markers.insert(id, MarkerRecord { map: self.id, at });
        state.markers_created += 1;
        Ok(Box::new(HeadlessMarker {
            id,
            at,
            state: Arc::clone(&self.state),
        }))
    }

    fn set_center(&self, center: LngLat) {
        self.with_record(|record| record.center = center);
    }

    fn set_zoom(&self, zoom: f64) {
        self.with_record(|record| record.zoom = zoom);
    }

    fn on_click(&self, handler: ClickHandler) -> ListenerId {
        let mut state = lock(&self.state);
        let listener = ListenerId(state.allocate_id());
        if let Some(record) = state.maps.get_mut(&self.id) {
            record.listeners.push((listener, handler));
        }
        listener
    }

    fn off_click(&self, listener: ListenerId) {
        self.with_record(|record| record.listeners.retain(|(id, _)| *id != listener));
    }

    fn destroy(self: Box<Self>) {
        let mut state = lock(&self.state);
        state.maps.remove(&self.id);
        let orphaned = state
            .markers
            .values()
            .filter(|marker| marker.map == self.id)
            .count();
        debug!(map = self.id, orphaned, "headless map destroyed");
    }
}

struct HeadlessMarker {
    id: u64,
    at: LngLat,
    state: Arc<Mutex<EngineState>>,
}

impl MarkerHandle for HeadlessMarker {
    fn position(&self) -> LngLat {
        self.at
    }

    fn destroy(self: Box<Self>) {
        lock(&self.state).markers.remove(&self.id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBehavior {
    /// The script loads and installs the named global.
    Provides(String),
    /// The script loads but installs nothing.
    LoadsWithoutGlobal,
    /// The script fires its error event.
    FailsToLoad,
}

#[derive(Default)]
struct PageState {
    globals: HashSet<String>,
    injected: Vec<Url>,
}

pub struct HeadlessPage {
    state: Mutex<PageState>,
    behavior: ScriptBehavior,
    latency: Duration,
}

impl HeadlessPage {
    pub fn new(behavior: ScriptBehavior) -> Self {
        Self {
            state: Mutex::new(PageState::default()),
            behavior,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Pre-installs a global, as if another page script already loaded the engine.
    pub fn with_global(self, name: impl Into<String>) -> Self {
        self.lock_state().globals.insert(name.into());
        self
    }

    pub fn injected_scripts(&self) -> Vec<Url> {
        self.lock_state().injected.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScriptHost for HeadlessPage {
    fn has_global(&self, name: &str) -> bool {
        self.lock_state().globals.contains(name)
    }

    async fn inject_script(&self, url: &Url) -> Result<()> {
        self.lock_state().injected.push(url.clone());
        debug!(url = %url, "headless script tag appended");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &self.behavior {
            ScriptBehavior::Provides(global) => {
                self.lock_state().globals.insert(global.clone());
                Ok(())
            }
            ScriptBehavior::LoadsWithoutGlobal => Ok(()),
            ScriptBehavior::FailsToLoad => Err(anyhow!("failed to load script {url}")),
        }
    }
}

pub struct HeadlessContainer {
    id: String,
    attached: AtomicBool,
}

impl HeadlessContainer {
    pub fn attached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: AtomicBool::new(true),
        }
    }

    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: AtomicBool::new(false),
        }
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }
}

impl MapContainer for HeadlessContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "tests/headless_tests.rs"]
mod tests;
