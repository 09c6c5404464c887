//! Location-picking widget core: engine loading, map/marker lifecycle,
//! geocoding, and the controller that ties them to a host UI.

pub mod controller;
pub mod geocoding;
pub mod map_lifecycle;
pub mod script_loader;
pub mod settings;

pub use controller::{
    LifecyclePhase, LocationCallback, MountGuard, WidgetController, WidgetDependencies,
    WidgetEvent, WidgetState,
};
pub use geocoding::{GeocodeOutcome, Geocoder, GeocodingClient};
pub use map_lifecycle::{MapLifecycleManager, ViewDefaults};
pub use script_loader::ScriptLoader;
pub use settings::{PickerSettings, WidgetConfig};
