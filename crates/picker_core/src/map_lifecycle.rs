//! Ownership of the native map and its single marker.

use map_engine::{
    ClickHandler, ListenerId, MapContainer, MapEngine, MapHandle, MapOptions, MarkerHandle,
};
use shared::{
    domain::{Coordinate, LngLat},
    error::PickerError,
};
use tracing::{debug, error};

use crate::settings::{PickerSettings, WidgetConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefaults {
    pub default_center: Coordinate,
    pub wide_zoom: f64,
    pub close_zoom: f64,
}

impl From<&PickerSettings> for ViewDefaults {
    fn from(settings: &PickerSettings) -> Self {
        Self {
            default_center: settings.default_center,
            wide_zoom: settings.wide_zoom,
            close_zoom: settings.close_zoom,
        }
    }
}

pub struct MapLifecycleManager {
    defaults: ViewDefaults,
    map: Option<Box<dyn MapHandle>>,
    marker: Option<Box<dyn MarkerHandle>>,
    click_listener: Option<ListenerId>,
}

impl MapLifecycleManager {
    pub fn new(defaults: ViewDefaults) -> Self {
        Self {
            defaults,
            map: None,
            marker: None,
            click_listener: None,
        }
    }

    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }

    pub fn marker_position(&self) -> Option<Coordinate> {
        self.marker
            .as_ref()
            .map(|marker| Coordinate::from(marker.position()))
    }

    /// Creates the map, and a marker when `initial` is present.
    ///
    /// A map that already exists is destroyed first. If marker creation fails the
    /// fresh map is destroyed before returning, so no partial handle survives.
    pub fn create(
        &mut self,
        engine: &dyn MapEngine,
        container: &dyn MapContainer,
        config: &WidgetConfig,
        initial: Option<Coordinate>,
    ) -> Result<(), PickerError> {
        if !container.is_attached() {
            return Err(PickerError::ContainerNotReady);
        }
        self.destroy();

        let (center, zoom) = match initial {
            Some(coordinate) => (coordinate, self.defaults.close_zoom),
            None => (self.defaults.default_center, self.defaults.wide_zoom),
        };

        let map = engine
            .create_map(
                container,
                MapOptions {
                    center: LngLat::from(center),
                    zoom,
                    api_key: config.api_key.clone(),
                },
            )
            .map_err(|err| PickerError::EngineUnavailable(err.to_string()))?;
        debug!(container = container.id(), zoom, "map created");
        self.map = Some(map);

        if let Some(coordinate) = initial {
            if let Err(err) = self.set_marker(coordinate) {
                self.destroy();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Replaces the marker; the old one is destroyed before the new one exists.
    pub fn set_marker(&mut self, at: Coordinate) -> Result<(), PickerError> {
        let Some(map) = self.map.as_ref() else {
            error!("set_marker called without an active map");
            return Err(PickerError::NoActiveMap);
        };

        if let Some(previous) = self.marker.take() {
            previous.destroy();
        }
        let marker = map
            .add_marker(LngLat::from(at))
            .map_err(|err| PickerError::EngineUnavailable(err.to_string()))?;
        debug!(
            latitude = at.latitude,
            longitude = at.longitude,
            "marker placed"
        );
        self.marker = Some(marker);
        Ok(())
    }

    /// Moves the view; the marker is left alone.
    pub fn recenter(&mut self, at: Coordinate, zoom: Option<f64>) -> Result<(), PickerError> {
        let Some(map) = self.map.as_ref() else {
            error!("recenter called without an active map");
            return Err(PickerError::NoActiveMap);
        };
        map.set_center(LngLat::from(at));
        if let Some(zoom) = zoom {
            map.set_zoom(zoom);
        }
        Ok(())
    }

    /// Installs the click listener, replacing any previous one.
    pub fn on_click(&mut self, handler: ClickHandler) -> Result<(), PickerError> {
        let Some(map) = self.map.as_ref() else {
            error!("on_click called without an active map");
            return Err(PickerError::NoActiveMap);
        };
        if let Some(previous) = self.click_listener.take() {
            map.off_click(previous);
        }
        self.click_listener = Some(map.on_click(handler));
        Ok(())
    }

    /// Destroys the marker, then the map. Repeated calls do nothing.
    pub fn destroy(&mut self) {
        if let Some(marker) = self.marker.take() {
            marker.destroy();
        }
        if let Some(map) = self.map.take() {
            if let Some(listener) = self.click_listener.take() {
                map.off_click(listener);
            }
            map.destroy();
            debug!("map destroyed");
        }
        self.click_listener = None;
    }
}

impl Drop for MapLifecycleManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
#[path = "tests/map_lifecycle_tests.rs"]
mod tests;
