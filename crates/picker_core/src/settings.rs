use std::time::Duration;

use map_engine::EngineScript;
use shared::domain::Coordinate;
use url::Url;

pub const MAPGL_SCRIPT_URL: &str = "https://mapgl.2gis.com/api/js/v1";
pub const MAPGL_GLOBAL: &str = "mapgl";
pub const GEOCODER_URL: &str = "https://catalog.api.2gis.com/3.0/items/geocode";
pub const DEFAULT_CENTER: Coordinate = Coordinate {
    latitude: 43.2385,
    longitude: 76.9453,
};
pub const WIDE_ZOOM: f64 = 12.0;
pub const CLOSE_ZOOM: f64 = 16.0;
pub const ERROR_DISMISS: Duration = Duration::from_secs(3);

/// Page-independent knobs shared by every widget instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PickerSettings {
    pub script: EngineScript,
    pub geocoder_url: Url,
    pub default_center: Coordinate,
    pub wide_zoom: f64,
    pub close_zoom: f64,
    pub error_dismiss: Duration,
    pub request_timeout: Option<Duration>,
}

impl Default for PickerSettings {
    fn default() -> Self {
        Self {
            script: EngineScript {
                url: Url::parse(MAPGL_SCRIPT_URL).expect("static script url"),
                global: MAPGL_GLOBAL.to_string(),
            },
            geocoder_url: Url::parse(GEOCODER_URL).expect("static geocoder url"),
            default_center: DEFAULT_CENTER,
            wide_zoom: WIDE_ZOOM,
            close_zoom: CLOSE_ZOOM,
            error_dismiss: ERROR_DISMISS,
            request_timeout: None,
        }
    }
}

/// Per-instance configuration supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetConfig {
    pub api_key: String,
    pub readonly: bool,
    pub geo_address: Option<String>,
}
