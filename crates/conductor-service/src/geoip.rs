//! GeoIP client.
//!
//! Looks up the coordinates of a public IP address through a freegeoip
//! compatible API (`GET {base}/json/{ip}`).

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::ConductorConfig;
use crate::retry::{with_retry_if, RetryPolicy};

/// GeoIP errors.
#[derive(Debug, Error)]
pub enum GeoIpError {
    /// The request failed or the API answered with an error status.
    #[error("Request to geoip API {url} failed: {message}")]
    RequestFailed {
        /// Requested URL.
        url: String,
        /// Failure description.
        message: String,
        /// Whether another attempt may succeed.
        transient: bool,
    },

    /// The API answered with an unexpected body.
    #[error("Invalid geoip API response from {url}: {message}")]
    InvalidResponse {
        /// Requested URL.
        url: String,
        /// Parse error.
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl GeoIpError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GeoIpError::RequestFailed { transient: true, .. })
    }
}

/// Latitude and longitude of an address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

/// GeoIP API client.
#[derive(Debug, Clone)]
pub struct GeoIpClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GeoIpClient {
    /// Create a client for the API at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GeoIpError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeoIpError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Create a client from the service configuration.
    pub fn from_config(config: &ConductorConfig) -> Result<Self, GeoIpError> {
        Ok(Self::new(&config.geoip_url, config.http_timeout())?.with_retry(RetryPolicy::from_config(config)))
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lookup URL of an address.
    pub fn url_for(&self, ip: IpAddr) -> String {
        format!("{}/json/{}", self.base_url, ip)
    }

    /// Coordinates of an address.
    ///
    /// Transport failures and server errors are retried; client errors are not.
    #[instrument(skip(self), fields(ip = %ip))]
    pub async fn coordinates(&self, ip: IpAddr) -> Result<Coordinates, GeoIpError> {
        let url = self.url_for(ip);
        with_retry_if(&self.retry, || self.fetch(&url), GeoIpError::is_transient).await
    }

    async fn fetch(&self, url: &str) -> Result<Coordinates, GeoIpError> {
        debug!(url, "Requesting coordinates");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GeoIpError::RequestFailed {
                url: url.to_string(),
                message: e.to_string(),
                transient: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeoIpError::RequestFailed {
                url: url.to_string(),
                message: format!("{} {}", status.as_u16(), body),
                transient: status.is_server_error(),
            });
        }

        response
            .json::<Coordinates>()
            .await
            .map_err(|e| GeoIpError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for() {
        let client = GeoIpClient::new("http://geo.example.com/", Duration::from_secs(1)).unwrap();
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(client.url_for(ip), "http://geo.example.com/json/8.8.8.8");
    }

    #[test]
    fn test_error_message() {
        let err = GeoIpError::RequestFailed {
            url: "http://geo.example.com/json/8.8.8.8".to_string(),
            message: "404 not found".to_string(),
            transient: false,
        };
        assert_eq!(
            err.to_string(),
            "Request to geoip API http://geo.example.com/json/8.8.8.8 failed: 404 not found"
        );
        assert!(!err.is_transient());
    }
}
