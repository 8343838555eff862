//! Outdoor weather feed and its last-known-value cell
//!
//! The poller refreshes [`LastKnownWeather`] on its own interval; the control
//! cycle only ever reads the cell, so a slow or failing feed never delays a
//! cycle.

use crate::config::WeatherConfig;
use crate::error::{PlantError, Result};
use crate::services::{WeatherReading, WeatherSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// JSON weather endpoint returning `{"outdoor_temp": .., "wind_speed": ..}`
pub struct HttpWeatherSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpWeatherSource {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| PlantError::config("weather.url is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl WeatherSource for HttpWeatherSource {
    async fn fetch(&self) -> Result<WeatherReading> {
        let reading = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<WeatherReading>()
            .await?;
        debug!(
            outdoor = reading.outdoor_temp,
            wind = reading.wind_speed,
            "Weather fetched"
        );
        Ok(reading)
    }
}

/// Most recent successful weather reading
#[derive(Clone, Default)]
pub struct LastKnownWeather {
    inner: Arc<RwLock<Option<(WeatherReading, DateTime<Utc>)>>>,
}

impl LastKnownWeather {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<WeatherReading> {
        self.inner.read().await.map(|(reading, _)| reading)
    }

    pub async fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.map(|(_, at)| at)
    }

    pub async fn set(&self, reading: WeatherReading) {
        *self.inner.write().await = Some((reading, Utc::now()));
    }

    /// Fetch once and store the result; failures keep the previous value
    pub async fn refresh(&self, source: &dyn WeatherSource) -> Result<WeatherReading> {
        match source.fetch().await {
            Ok(reading) => {
                self.set(reading).await;
                Ok(reading)
            }
            Err(e) => {
                warn!(error = %e, "Weather fetch failed, keeping last known value");
                Err(e)
            }
        }
    }
}

/// Poll `source` every `config.poll_interval` until `cancel` fires
pub fn spawn_poller(
    source: Arc<dyn WeatherSource>,
    cell: LastKnownWeather,
    config: &WeatherConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = config.poll_interval;
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Weather poller started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let _ = cell.refresh(source.as_ref()).await;
                }
            }
        }
        info!("Weather poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Feed {}

        #[async_trait]
        impl WeatherSource for Feed {
            async fn fetch(&self) -> Result<WeatherReading>;
        }
    }

    #[tokio::test]
    async fn test_refresh_keeps_last_value_on_failure() {
        let mut feed = MockFeed::new();
        let mut calls = 0;
        feed.expect_fetch().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(WeatherReading {
                    outdoor_temp: 41.0,
                    wind_speed: 7.0,
                })
            } else {
                Err(PlantError::sensor("feed down"))
            }
        });

        let cell = LastKnownWeather::new();
        assert!(cell.refresh(&feed).await.is_ok());
        assert!(cell.refresh(&feed).await.is_err());
        assert_eq!(cell.get().await.map(|r| r.outdoor_temp), Some(41.0));
        assert!(cell.updated_at().await.is_some());
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancel() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().returning(|| {
            Ok(WeatherReading {
                outdoor_temp: 12.0,
                wind_speed: 0.0,
            })
        });

        let cell = LastKnownWeather::new();
        let cancel = CancellationToken::new();
        let config = WeatherConfig {
            poll_interval: Duration::from_millis(10),
            ..WeatherConfig::default()
        };
        let handle = spawn_poller(Arc::new(feed), cell.clone(), &config, cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(cell.get().await.map(|r| r.outdoor_temp), Some(12.0));
    }
}
