// src/geocoding/nominatim.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, FROM};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ReverseGeocodeResult, ReverseGeocoder};
use crate::config::engine::GeocodingConfig;

/// Enforces a minimum interval between requests.
///
/// Holds the time of the last request; callers queue on the lock and sleep
/// until the interval since that request has elapsed.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct NominatimReverseResponse {
    display_name: Option<String>,
    address: Option<NominatimAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    house_number: Option<String>,
    road: Option<String>,
    neighbourhood: Option<String>,
    suburb: Option<String>,
    city_district: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    state: Option<String>,
    postcode: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl NominatimGeocoder {
    pub fn new(cfg: &GeocodingConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(email) = cfg.email.as_deref().filter(|e| !e.trim().is_empty()) {
            headers.insert(
                FROM,
                HeaderValue::from_str(email.trim()).context("invalid NOMINATIM_EMAIL")?,
            );
        }
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("building nominatim client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(Duration::from_millis(cfg.rate_limit_ms)),
        })
    }

    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<NominatimReverseResponse> {
        let url = format!("{}/reverse", self.base_url);
        let lat = latitude.to_string();
        let lon = longitude.to_string();
        self.client
            .get(&url)
            .query(&[
                ("format", "jsonv2"),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("zoom", "18"),
                ("addressdetails", "1"),
                ("extratags", "0"),
                ("namedetails", "0"),
                ("accept-language", "en"),
            ])
            .send()
            .await
            .context("nominatim reverse request")?
            .error_for_status()
            .context("nominatim non-2xx")?
            .json::<NominatimReverseResponse>()
            .await
            .context("nominatim reverse body")
    }
}

fn to_result(resp: NominatimReverseResponse) -> Option<ReverseGeocodeResult> {
    if let Some(err) = resp.error {
        tracing::debug!(error = %err, "nominatim returned error");
        return None;
    }
    let Some(a) = resp.address else {
        tracing::debug!("nominatim response missing address details");
        return None;
    };
    Some(ReverseGeocodeResult {
        formatted_address: resp.display_name,
        house_number: a.house_number,
        road: a.road,
        neighbourhood: a
            .neighbourhood
            .or(a.suburb)
            .or(a.city_district)
            .or_else(|| a.county.clone()),
        city: a.city.or(a.town).or(a.village),
        county: a.county,
        state: a.state,
        postcode: a.postcode,
        country: a.country,
        country_code: a.country_code.map(|c| c.to_uppercase()),
    })
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<ReverseGeocodeResult> {
        self.limiter.acquire().await;
        counter!("geocode_requests_total").increment(1);
        match self.lookup(latitude, longitude).await {
            Ok(resp) => to_result(resp),
            Err(e) => {
                counter!("geocode_errors_total").increment(1);
                tracing::warn!(error = ?e, latitude, longitude, "reverse geocoding failed");
                None
            }
        }
    }
}
