//! HTTP surface tests

#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use flate2::read::GzDecoder;
use http::{header, Method, Request, StatusCode};
use serde_json::Value;
use std::io::Read;
use telescope::server::{router, ServerConfig};
use tower::ServiceExt;

async fn send(method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
  let app = router(&ServerConfig::default());
  let response = app
    .oneshot(
      Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  let status = response.status();
  let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  (status, body.to_vec())
}

fn json(body: &[u8]) -> Value {
  serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_hello_envelope() {
  let (status, body) = send(Method::GET, "/api/hello").await;
  assert_eq!(status, StatusCode::OK);
  let body = json(&body);
  assert_eq!(body["code"], 0);
  assert_eq!(body["msg"], "OK");
  assert_eq!(body["data"], "hello world!");
}

#[tokio::test]
async fn test_hello_head_is_no_content() {
  let (status, body) = send(Method::HEAD, "/api/hello").await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  assert!(body.is_empty());
}

#[tokio::test]
async fn test_robots() {
  let (status, body) = send(Method::GET, "/robots.txt").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, b"User-agent: *\nDisallow: /");
}

#[tokio::test]
async fn test_version() {
  let (status, body) = send(Method::GET, "/api/version").await;
  assert_eq!(status, StatusCode::OK);
  let body = json(&body);
  assert_eq!(body["data"]["name"], "telescope");
  assert_eq!(body["data"]["version"], telescope::version::VERSION);
}

#[tokio::test]
async fn test_unknown_route_is_enveloped_404() {
  let (status, body) = send(Method::GET, "/api/nowhere").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let body = json(&body);
  assert_eq!(body["code"], 404);
  assert_eq!(body["msg"], "Not Found");
  assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_wrong_method_is_enveloped_405() {
  let (status, body) = send(Method::POST, "/api/hello").await;
  assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
  let body = json(&body);
  assert_eq!(body["code"], 405);
  assert_eq!(body["msg"], "Method Not Allowed");
}

#[tokio::test]
async fn test_robots_head_is_no_content() {
  let (status, body) = send(Method::HEAD, "/robots.txt").await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  assert!(body.is_empty());
}

#[tokio::test]
async fn test_declared_oversized_body_is_enveloped_413() {
  let mut config = ServerConfig::default();
  config.server.max_body_size = 16;
  let response = router(&config)
    .oneshot(
      Request::builder()
        .method(Method::POST)
        .uri("/api/hello")
        .header(header::CONTENT_LENGTH, "1024")
        .body(Body::from(vec![b'x'; 1024]))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
  let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let body = json(&body);
  assert_eq!(body["code"], 413);
  assert_eq!(body["msg"], "Payload Too Large");
}

#[tokio::test]
async fn test_responses_are_gzipped_on_request() {
  let app = router(&ServerConfig::default());
  let response = app
    .oneshot(
      Request::builder()
        .uri("/api/version")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

  let packed = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let mut unpacked = Vec::new();
  GzDecoder::new(&packed[..]).read_to_end(&mut unpacked).unwrap();
  assert_eq!(json(&unpacked)["data"]["name"], "telescope");
}

#[tokio::test]
async fn test_cors_preflight() {
  let app = router(&ServerConfig::default());
  let response = app
    .oneshot(
      Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/hello")
        .header("origin", "https://example.org")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert!(response
    .headers()
    .contains_key("access-control-allow-origin"));
}
