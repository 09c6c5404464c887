use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use map_engine::headless::{HeadlessContainer, HeadlessEngine, HeadlessPage, ScriptBehavior};
use picker_core::{
    GeocodeOutcome, Geocoder, GeocodingClient, ScriptLoader, WidgetConfig, WidgetController,
    WidgetDependencies,
};
use shared::domain::{AddressParts, Coordinate};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "picker.toml")]
    config: PathBuf,
    #[arg(long)]
    api_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an address to a coordinate.
    Geocode {
        #[arg(long)]
        address: String,
    },
    /// Mount a widget on the headless engine and run a geocode action.
    Session {
        /// Full address hint; takes precedence over the address parts.
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        district: Option<String>,
        #[arg(long)]
        street: Option<String>,
        #[arg(long)]
        house: Option<String>,
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
        #[arg(long)]
        readonly: bool,
    },
}

/// An explicit address wins; otherwise the record-style parts are joined.
fn address_hint(address: Option<String>, parts: AddressParts) -> Option<String> {
    address
        .filter(|address| !address.trim().is_empty())
        .or_else(|| parts.to_geo_address())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(api_key) = args.api_key {
        settings.api_key = Some(api_key);
    }
    let Some(api_key) = settings.api_key.clone() else {
        bail!("an api key is required (--api-key, PICKER_API_KEY or picker.toml)");
    };
    let picker_settings = settings.picker_settings()?;
    let geocoder = Arc::new(GeocodingClient::with_timeout(
        picker_settings.geocoder_url.clone(),
        picker_settings.request_timeout,
    )?);

    match args.command {
        Command::Geocode { address } => {
            match geocoder.resolve(&address, &api_key).await {
                GeocodeOutcome::Found(at) => println!("{}", serde_json::to_string(&at)?),
                GeocodeOutcome::NotFound => println!("Address not found: {address}"),
                GeocodeOutcome::Failed(reason) => bail!("geocoding failed: {reason}"),
            }
        }
        Command::Session {
            address,
            city,
            district,
            street,
            house,
            lat,
            lon,
            readonly,
        } => {
            let geo_address = address_hint(
                address,
                AddressParts {
                    city,
                    district,
                    street,
                    house_number: house,
                },
            );
            let engine = HeadlessEngine::new();
            let page = Arc::new(HeadlessPage::new(ScriptBehavior::Provides(
                picker_settings.script.global.clone(),
            )));
            let controller = WidgetController::new_with_callback(
                picker_settings,
                WidgetDependencies {
                    engine: Arc::new(engine.clone()),
                    loader: ScriptLoader::new(page),
                    geocoder,
                },
                WidgetConfig {
                    api_key,
                    readonly: readonly || settings.readonly,
                    geo_address,
                },
                Coordinate::from_parts(lat, lon),
                Arc::new(|at: Coordinate| {
                    println!(
                        "location changed: latitude={} longitude={}",
                        at.latitude, at.longitude
                    );
                }),
            );

            let guard = controller
                .mount(Arc::new(HeadlessContainer::attached("location-map")))
                .await;
            controller.geocode().await;

            let state = controller.state();
            println!(
                "phase={:?} loading={} geocoding={} error={}",
                controller.phase(),
                state.is_loading,
                state.is_geocoding,
                state.error.as_deref().unwrap_or("-")
            );
            match controller.marker_position() {
                Some(at) => println!("marker: {}", serde_json::to_string(&at)?),
                None => println!("marker: none"),
            }
            drop(guard);
            println!("live maps after unmount: {}", engine.live_maps());
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
