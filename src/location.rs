use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::geo::{geohash_for_location, Coordinate, DEFAULT_GEOHASH_PRECISION};
use crate::models::UserLocationUpdate;

pub const POSITION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable")]
    Unavailable,
    #[error("location request timed out after {0:?}")]
    Timeout(Duration),
}

impl LocationError {
    /// Inline message shown next to the location control.
    pub fn user_message(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => {
                "Location access was denied. Enable location permissions to use your position."
            }
            LocationError::Unavailable => "Location information is unavailable.",
            LocationError::Timeout(_) => "The request to get your location timed out.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    pub timeout: Duration,
    pub high_accuracy: bool,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            timeout: POSITION_TIMEOUT,
            high_accuracy: true,
        }
    }
}

/// One-shot position lookups.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self, options: &PositionOptions)
        -> Result<Coordinate, LocationError>;
}

/// Writes into the per-user record. Both writes merge and leave other
/// columns untouched.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn save_location(&self, update: &UserLocationUpdate) -> anyhow::Result<()>;
    async fn save_push_token(&self, user_id: &str, token: &str) -> anyhow::Result<()>;
}

/// Reports a coordinate supplied up front, e.g. from the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocationProvider {
    coordinate: Coordinate,
}

impl FixedLocationProvider {
    pub fn new(coordinate: Coordinate) -> Self {
        Self { coordinate }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        if self.coordinate.is_valid() {
            Ok(self.coordinate)
        } else {
            Err(LocationError::Unavailable)
        }
    }
}

/// Stand-in for a client without geolocation support.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLocationProvider;

#[async_trait]
impl LocationProvider for UnavailableLocationProvider {
    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        Err(LocationError::Unavailable)
    }
}

pub async fn request_position(
    provider: &dyn LocationProvider,
    options: &PositionOptions,
) -> Result<Coordinate, LocationError> {
    tracing::trace!(high_accuracy = options.high_accuracy, timeout = ?options.timeout, "requesting position");
    match tokio::time::timeout(options.timeout, provider.current_position(options)).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout(options.timeout)),
    }
}

/// Last position successfully fetched for the signed-in user.
#[derive(Debug, Clone, Default)]
pub struct LastLocation(Arc<RwLock<Option<Coordinate>>>);

impl LastLocation {
    pub async fn get(&self) -> Option<Coordinate> {
        *self.0.read().await
    }

    pub async fn set(&self, coordinate: Coordinate) {
        *self.0.write().await = Some(coordinate);
    }
}

pub struct LocationRefresher {
    user_id: String,
    provider: Arc<dyn LocationProvider>,
    store: Arc<dyn UserStore>,
    last_location: LastLocation,
    interval: Duration,
    options: PositionOptions,
}

impl LocationRefresher {
    pub fn new(
        user_id: impl Into<String>,
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn UserStore>,
        last_location: LastLocation,
        interval: Duration,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
            store,
            last_location,
            interval,
            options: PositionOptions::default(),
        }
    }

    /// Fetches a position, remembers it, and merges it into the user record.
    /// A failed store write is logged but the position is still kept.
    pub async fn refresh_once(&self) -> Result<Coordinate, LocationError> {
        let coordinate = request_position(self.provider.as_ref(), &self.options).await?;
        self.last_location.set(coordinate).await;

        let update = UserLocationUpdate {
            user_id: self.user_id.clone(),
            location: coordinate,
            geohash: geohash_for_location(&coordinate, DEFAULT_GEOHASH_PRECISION),
            updated_at: Utc::now(),
        };
        if let Err(err) = self.store.save_location(&update).await {
            tracing::error!(user_id = %self.user_id, error = %err, "failed to store location");
        } else {
            tracing::debug!(user_id = %self.user_id, geohash = %update.geohash, "location updated");
        }

        Ok(coordinate)
    }

    /// Refreshes immediately and then every `interval` until `shutdown`
    /// flips to true or its sender goes away.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh_once().await {
                            tracing::warn!(
                                user_id = %self.user_id,
                                error = %err,
                                message = err.user_message(),
                                "location refresh failed"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(user_id = %self.user_id, "location refresher stopped");
        })
    }
}
