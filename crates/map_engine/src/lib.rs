//! Capability traits for the third-party map engine and the page that hosts it.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::LngLat;
use url::Url;

pub mod headless;

pub type ClickHandler = Arc<dyn Fn(LngLat) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    pub center: LngLat,
    pub zoom: f64,
    pub api_key: String,
}

/// Script resource that provides the engine, and the global it installs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineScript {
    pub url: Url,
    pub global: String,
}

/// DOM element the host hands over at mount time.
pub trait MapContainer: Send + Sync {
    fn id(&self) -> &str;
    fn is_attached(&self) -> bool;
}

pub trait MapEngine: Send + Sync {
    fn create_map(
        &self,
        container: &dyn MapContainer,
        options: MapOptions,
    ) -> anyhow::Result<Box<dyn MapHandle>>;
}

/// Native map instance. Consumed by `destroy`.
pub trait MapHandle: Send + Sync {
    fn add_marker(&self, at: LngLat) -> anyhow::Result<Box<dyn MarkerHandle>>;
    fn set_center(&self, center: LngLat);
    fn set_zoom(&self, zoom: f64);
    /// Listeners stack; callers remove stale ones with `off_click`.
    fn on_click(&self, handler: ClickHandler) -> ListenerId;
    fn off_click(&self, listener: ListenerId);
    fn destroy(self: Box<Self>);
}

pub trait MarkerHandle: Send + Sync {
    fn position(&self) -> LngLat;
    fn destroy(self: Box<Self>);
}

#[async_trait]
pub trait ScriptHost: Send + Sync {
    fn has_global(&self, name: &str) -> bool;
    /// Appends a script tag and resolves on its load event, or fails on its error event.
    async fn inject_script(&self, url: &Url) -> anyhow::Result<()>;
}
