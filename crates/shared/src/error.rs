use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failure is presented in the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stays visible for the rest of the mount.
    Persistent,
    /// Cleared after the dismiss window.
    AutoDismiss,
    /// Misuse of the core; logged, never shown.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickerError {
    #[error("map engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("map container is not attached to the document")]
    ContainerNotReady,
    #[error("address not found")]
    GeocodeNotFound,
    #[error("geocoding request failed: {0}")]
    GeocodeFailed(String),
    #[error("no active map")]
    NoActiveMap,
}

impl PickerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EngineUnavailable(_) | Self::ContainerNotReady => ErrorKind::Persistent,
            Self::GeocodeNotFound | Self::GeocodeFailed(_) => ErrorKind::AutoDismiss,
            Self::NoActiveMap => ErrorKind::Internal,
        }
    }

    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::EngineUnavailable(_) | Self::ContainerNotReady => Some("Failed to load the map"),
            Self::GeocodeNotFound => Some("Address not found"),
            Self::GeocodeFailed(_) => Some("Geocoding error"),
            Self::NoActiveMap => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
