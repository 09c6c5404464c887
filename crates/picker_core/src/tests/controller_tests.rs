use super::*;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use axum::{extract::Query, routing::get, Json, Router};
use map_engine::headless::{HeadlessContainer, HeadlessEngine, HeadlessPage, ScriptBehavior};
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot};

use crate::geocoding::GeocodingClient;

struct StaticGeocoder {
    outcome: GeocodeOutcome,
    calls: Arc<tokio::sync::Mutex<Vec<(String, String)>>>,
}

impl StaticGeocoder {
    fn new(outcome: GeocodeOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn resolve(&self, address: &str, api_key: &str) -> GeocodeOutcome {
        self.calls
            .lock()
            .await
            .push((address.to_string(), api_key.to_string()));
        self.outcome.clone()
    }
}

struct GatedGeocoder {
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<GeocodeOutcome>>>,
}

impl GatedGeocoder {
    fn new() -> (Self, oneshot::Sender<GeocodeOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                gate: tokio::sync::Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl Geocoder for GatedGeocoder {
    async fn resolve(&self, _address: &str, _api_key: &str) -> GeocodeOutcome {
        let Some(gate) = self.gate.lock().await.take() else {
            return GeocodeOutcome::Failed("gate already used".to_string());
        };
        gate.await
            .unwrap_or_else(|_| GeocodeOutcome::Failed("gate dropped".to_string()))
    }
}

struct Harness {
    engine: HeadlessEngine,
    page: Arc<HeadlessPage>,
    locations: Arc<Mutex<Vec<Coordinate>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_page(HeadlessPage::new(ScriptBehavior::Provides(
            "mapgl".to_string(),
        )))
    }

    fn with_page(page: HeadlessPage) -> Self {
        Self {
            engine: HeadlessEngine::new(),
            page: Arc::new(page),
            locations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn controller(
        &self,
        geocoder: Arc<dyn Geocoder>,
        config: WidgetConfig,
        initial: Option<Coordinate>,
    ) -> WidgetController {
        let locations = Arc::clone(&self.locations);
        WidgetController::new_with_callback(
            PickerSettings::default(),
            WidgetDependencies {
                engine: Arc::new(self.engine.clone()),
                loader: ScriptLoader::new(self.page.clone()),
                geocoder,
            },
            config,
            initial,
            Arc::new(move |at| locations.lock().expect("locations").push(at)),
        )
    }

    fn locations(&self) -> Vec<Coordinate> {
        self.locations.lock().expect("locations").clone()
    }
}

fn editable(address: Option<&str>) -> WidgetConfig {
    WidgetConfig {
        api_key: "secret".to_string(),
        readonly: false,
        geo_address: address.map(str::to_string),
    }
}

fn container() -> Arc<dyn MapContainer> {
    Arc::new(HeadlessContainer::attached("location-map"))
}

fn not_found() -> Arc<dyn Geocoder> {
    Arc::new(StaticGeocoder::new(GeocodeOutcome::NotFound))
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn mount_with_coordinate_becomes_ready_with_marker() {
    let harness = Harness::new();
    let at = Coordinate::new(43.25, 76.95);
    let controller = harness.controller(not_found(), editable(None), Some(at));

    controller.start(container()).await;

    assert_eq!(controller.phase(), LifecyclePhase::Ready);
    assert_eq!(controller.state(), WidgetState::default());
    assert_eq!(controller.marker_position(), Some(at));
    let view = harness.engine.view().expect("view");
    assert_eq!(view.container, "location-map");
    assert_eq!(view.zoom, 16.0);
    assert_eq!(view.listeners, 1);
}

#[tokio::test(start_paused = true)]
async fn loading_flag_is_set_until_script_resolves() {
    let harness = Harness::with_page(
        HeadlessPage::new(ScriptBehavior::Provides("mapgl".to_string()))
            .with_latency(Duration::from_secs(1)),
    );
    let controller = harness.controller(not_found(), editable(None), None);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start(container()).await }
    });
    settle().await;

    assert_eq!(controller.phase(), LifecyclePhase::Loading);
    assert!(controller.state().is_loading);
    assert_eq!(harness.engine.maps_created(), 0);

    task.await.expect("start task");
    assert_eq!(controller.phase(), LifecyclePhase::Ready);
    assert!(!controller.state().is_loading);
}

#[tokio::test(start_paused = true)]
async fn script_failure_is_a_persistent_error() {
    let harness = Harness::with_page(HeadlessPage::new(ScriptBehavior::FailsToLoad));
    let controller = harness.controller(not_found(), editable(None), None);

    controller.start(container()).await;

    assert_eq!(controller.phase(), LifecyclePhase::Failed);
    let state = controller.state();
    assert!(!state.is_loading);
    assert_eq!(state.error.as_deref(), Some("Failed to load the map"));
    assert_eq!(harness.engine.maps_created(), 0);

    tokio::time::advance(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(
        controller.state().error.as_deref(),
        Some("Failed to load the map")
    );
}

#[tokio::test]
async fn detached_container_fails_mount_without_handles() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(None), None);

    controller
        .start(Arc::new(HeadlessContainer::detached("location-map")))
        .await;

    assert_eq!(controller.phase(), LifecyclePhase::Failed);
    assert_eq!(
        controller.state().error.as_deref(),
        Some("Failed to load the map")
    );
    assert_eq!(harness.engine.maps_created(), 0);
}

#[tokio::test]
async fn partial_creation_failure_releases_map() {
    let harness = Harness::new();
    harness.engine.fail_marker_creation(true);
    let controller =
        harness.controller(not_found(), editable(None), Some(Coordinate::new(1.0, 2.0)));

    controller.start(container()).await;

    assert_eq!(controller.phase(), LifecyclePhase::Failed);
    assert_eq!(harness.engine.maps_created(), 1);
    assert_eq!(harness.engine.live_maps(), 0);
}

#[tokio::test]
async fn start_twice_creates_one_map() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(None), None);

    controller.start(container()).await;
    controller.start(container()).await;

    assert_eq!(harness.engine.maps_created(), 1);
}

#[tokio::test]
async fn click_moves_marker_and_notifies_host_once() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(None), None);
    controller.start(container()).await;
    let mut events = controller.subscribe_events();

    assert_eq!(harness.engine.click(LngLat::new(76.9, 43.2)), 1);

    let expected = Coordinate::new(43.2, 76.9);
    assert_eq!(harness.locations(), vec![expected]);
    assert_eq!(controller.marker_position(), Some(expected));
    let view = harness.engine.view().expect("view");
    assert_eq!(view.center, LngLat::new(76.9, 43.2));
    assert_eq!(view.zoom, 12.0);
    assert_eq!(
        events.try_recv().expect("event"),
        WidgetEvent::LocationChanged(expected)
    );
}

#[tokio::test]
async fn readonly_map_has_no_click_listener() {
    let harness = Harness::new();
    let config = WidgetConfig {
        readonly: true,
        ..editable(None)
    };
    let controller = harness.controller(not_found(), config, Some(Coordinate::new(1.0, 2.0)));
    controller.start(container()).await;

    assert_eq!(harness.engine.view().expect("view").listeners, 0);
    assert_eq!(harness.engine.click(LngLat::new(76.9, 43.2)), 0);

    controller.handle_map_click(Coordinate::new(43.2, 76.9));
    assert!(harness.locations().is_empty());
    assert_eq!(controller.marker_position(), Some(Coordinate::new(1.0, 2.0)));
}

#[tokio::test]
async fn geocode_round_trip_inverts_axis_order() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(
        "/geocode",
        get(|Query(_): Query<HashMap<String, String>>| async {
            Json(json!({ "result": { "items": [ { "point": { "lon": 76.9, "lat": 43.2 } } ] } }))
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let endpoint = url::Url::parse(&format!("http://{addr}/geocode")).expect("url");

    let harness = Harness::new();
    let controller = harness.controller(
        Arc::new(GeocodingClient::new(endpoint)),
        editable(Some("Almaty, Abay Ave 10")),
        None,
    );
    controller.start(container()).await;

    controller.geocode().await;
    settle().await;

    let expected = Coordinate {
        latitude: 43.2,
        longitude: 76.9,
    };
    assert_eq!(harness.locations(), vec![expected]);
    assert_eq!(harness.engine.marker_positions(), vec![LngLat::new(76.9, 43.2)]);
    let view = harness.engine.view().expect("view");
    assert_eq!(view.center, LngLat::new(76.9, 43.2));
    assert_eq!(view.zoom, 16.0);
    assert!(!controller.state().is_geocoding);
}

#[tokio::test(start_paused = true)]
async fn not_found_error_clears_after_dismiss_window() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(Some("nowhere")), None);
    controller.start(container()).await;

    controller.geocode().await;
    settle().await;
    let state = controller.state();
    assert_eq!(state.error.as_deref(), Some("Address not found"));
    assert!(!state.is_geocoding);
    assert!(harness.locations().is_empty());

    tokio::time::advance(Duration::from_millis(2_999)).await;
    settle().await;
    assert_eq!(controller.state().error.as_deref(), Some("Address not found"));

    tokio::time::advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(controller.state().error, None);
}

#[tokio::test(start_paused = true)]
async fn failed_geocode_shows_distinct_message() {
    let harness = Harness::new();
    let controller = harness.controller(
        Arc::new(StaticGeocoder::new(GeocodeOutcome::Failed(
            "connection refused".to_string(),
        ))),
        editable(Some("Almaty")),
        None,
    );
    controller.start(container()).await;

    controller.geocode().await;
    settle().await;
    assert_eq!(controller.state().error.as_deref(), Some("Geocoding error"));

    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(controller.state().error, None);
}

#[tokio::test(start_paused = true)]
async fn newer_error_gets_a_full_dismiss_window() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(Some("nowhere")), None);
    controller.start(container()).await;

    controller.geocode().await;
    settle().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    controller.geocode().await;
    settle().await;

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(controller.state().error.as_deref(), Some("Address not found"));

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(controller.state().error, None);
}

#[tokio::test]
async fn geocode_without_address_or_key_is_a_no_op() {
    let harness = Harness::new();
    let geocoder = Arc::new(StaticGeocoder::new(GeocodeOutcome::NotFound));
    let calls = Arc::clone(&geocoder.calls);

    let no_address = harness.controller(geocoder.clone(), editable(Some("   ")), None);
    no_address.start(container()).await;
    no_address.geocode().await;

    let no_key = harness.controller(
        geocoder,
        WidgetConfig {
            api_key: String::new(),
            ..editable(Some("Almaty"))
        },
        None,
    );
    no_key.start(container()).await;
    no_key.geocode().await;

    assert!(calls.lock().await.is_empty());
    assert_eq!(no_address.state(), WidgetState::default());
    assert_eq!(no_key.state(), WidgetState::default());
}

#[tokio::test]
async fn geocode_response_after_unmount_is_discarded() {
    let harness = Harness::new();
    let (geocoder, release) = GatedGeocoder::new();
    let controller = harness.controller(Arc::new(geocoder), editable(Some("Almaty")), None);
    controller.start(container()).await;

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.geocode().await }
    });
    settle().await;
    assert!(controller.state().is_geocoding);

    controller.stop();
    release
        .send(GeocodeOutcome::Found(Coordinate::new(43.2, 76.9)))
        .expect("release");
    task.await.expect("geocode task");

    assert_eq!(controller.phase(), LifecyclePhase::Destroyed);
    assert!(controller.state().is_geocoding);
    assert!(harness.locations().is_empty());
    assert_eq!(harness.engine.live_maps(), 0);
    assert_eq!(harness.engine.live_markers(), 0);
}

#[tokio::test(start_paused = true)]
async fn unmount_cancels_pending_dismiss() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(Some("nowhere")), None);
    controller.start(container()).await;
    controller.geocode().await;
    settle().await;

    controller.stop();
    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;

    assert_eq!(controller.state().error.as_deref(), Some("Address not found"));
}

#[tokio::test(start_paused = true)]
async fn unmount_during_script_load_creates_nothing() {
    let harness = Harness::with_page(
        HeadlessPage::new(ScriptBehavior::Provides("mapgl".to_string()))
            .with_latency(Duration::from_secs(1)),
    );
    let controller = harness.controller(not_found(), editable(None), None);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start(container()).await }
    });
    settle().await;
    controller.stop();
    task.await.expect("start task");

    assert_eq!(controller.phase(), LifecyclePhase::Destroyed);
    assert_eq!(harness.engine.maps_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_mount_still_unmounts() {
    let harness = Harness::with_page(
        HeadlessPage::new(ScriptBehavior::Provides("mapgl".to_string()))
            .with_latency(Duration::from_secs(5)),
    );
    let controller = harness.controller(not_found(), editable(None), None);

    let mounted =
        tokio::time::timeout(Duration::from_millis(10), controller.mount(container())).await;

    assert!(mounted.is_err());
    assert_eq!(controller.phase(), LifecyclePhase::Destroyed);
    assert_eq!(harness.engine.maps_created(), 0);
}

#[tokio::test]
async fn dropping_mount_guard_destroys_handles() {
    let harness = Harness::new();
    let controller =
        harness.controller(not_found(), editable(None), Some(Coordinate::new(1.0, 2.0)));

    let guard = controller.mount(container()).await;
    assert_eq!(guard.controller().phase(), LifecyclePhase::Ready);
    assert_eq!(harness.engine.live_maps(), 1);

    drop(guard);
    assert_eq!(controller.phase(), LifecyclePhase::Destroyed);
    assert_eq!(harness.engine.live_maps(), 0);
    assert_eq!(harness.engine.live_markers(), 0);

    controller.stop();
    assert_eq!(harness.engine.live_maps(), 0);
}

#[tokio::test]
async fn external_update_moves_marker_without_notifying() {
    let harness = Harness::new();
    let controller = harness.controller(not_found(), editable(None), None);
    controller.start(container()).await;

    controller.update_props(LocationProps {
        latitude: Some(43.2),
        longitude: Some(76.9),
        geo_address: None,
    });

    assert_eq!(
        controller.marker_position(),
        Some(Coordinate::new(43.2, 76.9))
    );
    let view = harness.engine.view().expect("view");
    assert_eq!(view.center, LngLat::new(76.9, 43.2));
    assert_eq!(view.zoom, 16.0);
    assert!(harness.locations().is_empty());
}

#[tokio::test]
async fn external_update_with_missing_axis_is_skipped() {
    let harness = Harness::new();
    let at = Coordinate::new(1.0, 2.0);
    let controller = harness.controller(not_found(), editable(None), Some(at));
    controller.start(container()).await;

    controller.update_props(LocationProps {
        latitude: Some(43.2),
        longitude: None,
        geo_address: None,
    });

    assert_eq!(controller.marker_position(), Some(at));
    assert_eq!(harness.engine.markers_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn external_update_during_load_is_used_at_creation() {
    let harness = Harness::with_page(
        HeadlessPage::new(ScriptBehavior::Provides("mapgl".to_string()))
            .with_latency(Duration::from_secs(1)),
    );
    let controller = harness.controller(not_found(), editable(None), None);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start(container()).await }
    });
    settle().await;
    controller.update_props(LocationProps {
        latitude: Some(43.2),
        longitude: Some(76.9),
        geo_address: None,
    });
    task.await.expect("start task");

    assert_eq!(
        controller.marker_position(),
        Some(Coordinate::new(43.2, 76.9))
    );
    assert_eq!(harness.engine.view().expect("view").zoom, 16.0);
}

#[tokio::test]
async fn updated_address_is_used_by_next_geocode() {
    let harness = Harness::new();
    let geocoder = Arc::new(StaticGeocoder::new(GeocodeOutcome::Found(Coordinate::new(
        43.2, 76.9,
    ))));
    let calls = Arc::clone(&geocoder.calls);
    let controller = harness.controller(geocoder, editable(Some("old")), None);
    controller.start(container()).await;

    controller.update_props(LocationProps {
        geo_address: Some("Almaty, Abay Ave 10".to_string()),
        ..LocationProps::default()
    });
    controller.geocode().await;
    settle().await;

    assert_eq!(
        *calls.lock().await,
        vec![("Almaty, Abay Ave 10".to_string(), "secret".to_string())]
    );
    assert_eq!(harness.locations(), vec![Coordinate::new(43.2, 76.9)]);
}

#[tokio::test(start_paused = true)]
async fn geocode_before_map_ready_does_not_notify() {
    let harness = Harness::with_page(
        HeadlessPage::new(ScriptBehavior::Provides("mapgl".to_string()))
            .with_latency(Duration::from_secs(1)),
    );
    let controller = harness.controller(
        Arc::new(StaticGeocoder::new(GeocodeOutcome::Found(Coordinate::new(
            43.2, 76.9,
        )))),
        editable(Some("Almaty")),
        None,
    );
    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start(container()).await }
    });
    settle().await;

    controller.geocode().await;
    settle().await;

    assert!(harness.locations().is_empty());
    let state = controller.state();
    assert!(!state.is_geocoding);
    assert_eq!(state.error, None);
    task.await.expect("start task");
}

#[tokio::test]
async fn overlapping_geocode_is_skipped_while_one_is_outstanding() {
    let harness = Harness::new();
    let (geocoder, release) = GatedGeocoder::new();
    let controller = harness.controller(Arc::new(geocoder), editable(Some("Almaty")), None);
    controller.start(container()).await;

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.geocode().await }
    });
    settle().await;
    assert!(controller.state().is_geocoding);

    controller.geocode().await;
    assert!(controller.state().is_geocoding);
    assert!(harness.locations().is_empty());

    release
        .send(GeocodeOutcome::Found(Coordinate::new(43.2, 76.9)))
        .expect("release");
    first.await.expect("geocode task");

    assert!(!controller.state().is_geocoding);
    assert_eq!(controller.state().error, None);
    assert_eq!(harness.locations(), vec![Coordinate::new(43.2, 76.9)]);
}

#[tokio::test(start_paused = true)]
async fn container_detached_during_load_fails_mount() {
    let harness = Harness::with_page(
        HeadlessPage::new(ScriptBehavior::Provides("mapgl".to_string()))
            .with_latency(Duration::from_secs(1)),
    );
    let controller = harness.controller(not_found(), editable(None), None);
    let element = Arc::new(HeadlessContainer::attached("location-map"));

    let task = tokio::spawn({
        let controller = controller.clone();
        let element: Arc<dyn MapContainer> = element.clone();
        async move { controller.start(element).await }
    });
    settle().await;
    element.set_attached(false);
    task.await.expect("start task");

    assert_eq!(controller.phase(), LifecyclePhase::Failed);
    assert_eq!(
        controller.state().error.as_deref(),
        Some("Failed to load the map")
    );
    assert_eq!(harness.engine.maps_created(), 0);

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(
        controller.state().error.as_deref(),
        Some("Failed to load the map")
    );
}
