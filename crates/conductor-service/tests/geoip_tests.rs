//! GeoIP client tests against a mock API.

use std::net::IpAddr;
use std::time::Duration;

use conductor_service::{GeoIpClient, GeoIpError, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        exponential_base: 2.0,
    }
}

fn ip() -> IpAddr {
    "8.8.8.8".parse().unwrap()
}

async fn client(server: &MockServer, max_attempts: u32) -> GeoIpClient {
    GeoIpClient::new(server.uri(), Duration::from_secs(5))
        .unwrap()
        .with_retry(fast_retry(max_attempts))
}

#[tokio::test]
async fn test_coordinates_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ip": "8.8.8.8",
            "country_code": "US",
            "latitude": 37.751,
            "longitude": -97.822
        })))
        .expect(1)
        .mount(&server)
        .await;

    let coordinates = client(&server, 3).await.coordinates(ip()).await.unwrap();
    assert_eq!(coordinates.latitude, 37.751);
    assert_eq!(coordinates.longitude, -97.822);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 3).await.coordinates(ip()).await.unwrap_err();
    assert!(!err.is_transient());
    assert!(matches!(err, GeoIpError::RequestFailed { .. }));
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server, 3).await.coordinates(ip()).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json/8.8.8.8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server, 3).await.coordinates(ip()).await.unwrap_err();
    assert!(matches!(err, GeoIpError::InvalidResponse { .. }));
}
