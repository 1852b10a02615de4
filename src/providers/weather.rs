//! Weather provider adapters
//!
//! `OpenWeatherClient` speaks the OpenWeather current-conditions API and
//! normalises units for the evaluator: metric temperatures come back in
//! °C already, wind arrives in m/s and is converted to km/h here, and
//! rainfall is the `rain.1h` millimetre reading. The evaluator never
//! converts units itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EngineError;
use crate::geo::GeoPoint;
use crate::types::WeatherSnapshot;

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const HTTP_TIMEOUT_SECS: u64 = 10;

/// HTTP client for the OpenWeather current-conditions endpoint.
#[derive(Clone)]
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(api_key: &str) -> Result<Self, EngineError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Override the endpoint (test servers, regional mirrors).
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| EngineError::Provider(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// Wire shape of the provider response — only the fields we read.
#[derive(Debug, Deserialize)]
struct ApiConditions {
    #[serde(default)]
    main: Option<ApiMain>,
    #[serde(default)]
    wind: Option<ApiWind>,
    #[serde(default)]
    rain: Option<HashMap<String, f64>>,
    #[serde(default)]
    weather: Vec<ApiWeather>,
}

#[derive(Debug, Deserialize)]
struct ApiMain {
    #[serde(default)]
    temp: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiWind {
    #[serde(default)]
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiWeather {
    #[serde(default)]
    description: Option<String>,
}

impl ApiConditions {
    fn into_snapshot(self) -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: self.main.as_ref().and_then(|m| m.temp),
            // m/s → km/h; the evaluator consumes km/h only.
            wind_speed: self
                .wind
                .as_ref()
                .and_then(|w| w.speed)
                .map(|mps| mps * 3.6),
            humidity: self.main.as_ref().and_then(|m| m.humidity),
            // Preceding-hour rainfall. A missing rain block means the
            // provider reported no measurement, not zero rain.
            rainfall: self.rain.as_ref().and_then(|r| r.get("1h").copied()),
            description: self
                .weather
                .into_iter()
                .next()
                .and_then(|w| w.description),
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn snapshot(&self, point: GeoPoint) -> Result<WeatherSnapshot, EngineError> {
        let url = format!("{}/weather", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("lat", point.lat.to_string()),
                ("lon", point.lon.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "weather provider returned {} for {point}",
                response.status()
            )));
        }

        let conditions: ApiConditions = response
            .json()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;
        Ok(conditions.into_snapshot())
    }
}

/// Scripted provider for tests: serves canned snapshots per tree
/// location, or a fixed error.
#[derive(Default)]
pub struct ScriptedWeatherProvider {
    snapshots: std::sync::RwLock<Vec<(GeoPoint, WeatherSnapshot)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl ScriptedWeatherProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `snapshot` for the point closest to `point`.
    pub fn script(&self, point: GeoPoint, snapshot: WeatherSnapshot) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.push((point, snapshot));
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl WeatherProvider for ScriptedWeatherProvider {
    async fn snapshot(&self, point: GeoPoint) -> Result<WeatherSnapshot, EngineError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::Provider("scripted outage".to_string()));
        }
        let snapshots = self
            .snapshots
            .read()
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        snapshots
            .iter()
            .min_by(|(a, _), (b, _)| {
                let da = a.distance_m(&point);
                let db = b.distance_m(&point);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| EngineError::Provider(format!("no scripted weather for {point}")))
    }
}
