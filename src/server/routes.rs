use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::{header, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{self, CorsLayer};

use super::ServerConfig;
use crate::version;

pub const CODE_OK: i32 = 0;
/// Unclassified failure.
pub const CODE_GENERAL_ERROR: i32 = 1;
/// The request body could not be bound to the handler's input.
pub const CODE_BAD_BINDING: i32 = 600001;
/// Umbrella code for any rejected credential.
pub const CODE_UNAUTHORIZED: i32 = 600401;
pub const CODE_PAYLOAD_TOO_LARGE: i32 = 413;

/// Paths too noisy for the audit log.
const QUIET_PATHS: &[&str] = &["/api/hello"];

/// JSON body of every API response.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
  pub code: i32,
  pub msg: String,
  pub data: Option<T>,
}

impl<T> Envelope<T> {
  pub fn ok(data: T) -> Self {
    Self {
      code: CODE_OK,
      msg: "OK".into(),
      data: Some(data),
    }
  }
}

/// An error rendered as an [`Envelope`] with a matching HTTP status.
#[derive(Debug)]
pub struct ApiError {
  status: StatusCode,
  code: i32,
  msg: String,
}

impl ApiError {
  pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
    Self {
      status,
      code,
      msg: msg.into(),
    }
  }

  /// Status-only error: the status doubles as the envelope code and its
  /// reason phrase as the message.
  pub fn status(status: StatusCode) -> Self {
    let msg = status.canonical_reason().unwrap_or_default();
    Self::new(status, status.as_u16() as i32, msg)
  }

  pub fn not_found() -> Self {
    Self::status(StatusCode::NOT_FOUND)
  }

  pub fn method_not_allowed() -> Self {
    Self::status(StatusCode::METHOD_NOT_ALLOWED)
  }

  pub fn internal() -> Self {
    Self::status(StatusCode::INTERNAL_SERVER_ERROR)
  }

  pub fn unauthorized() -> Self {
    Self::new(StatusCode::FORBIDDEN, CODE_UNAUTHORIZED, "Unauthorized")
  }

  pub fn bad_binding(msg: impl Into<String>) -> Self {
    Self::new(StatusCode::NOT_ACCEPTABLE, CODE_BAD_BINDING, msg)
  }

  pub fn payload_too_large() -> Self {
    Self::new(
      StatusCode::PAYLOAD_TOO_LARGE,
      CODE_PAYLOAD_TOO_LARGE,
      StatusCode::PAYLOAD_TOO_LARGE.canonical_reason().unwrap_or_default(),
    )
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
      return Self::payload_too_large();
    }
    Self::bad_binding(rejection.body_text())
  }
}

/// Unclassified failures keep a 200 status and carry the general code.
impl From<anyhow::Error> for ApiError {
  fn from(err: anyhow::Error) -> Self {
    Self::new(StatusCode::OK, CODE_GENERAL_ERROR, format!("{:#}", err))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = Envelope::<()> {
      code: self.code,
      msg: self.msg,
      data: None,
    };
    (self.status, Json(body)).into_response()
  }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionInfo {
  pub name: String,
  pub version: String,
}

/// The full service router with its middleware stack.
pub fn router(config: &ServerConfig) -> Router {
  let routes = Router::new()
    .route("/robots.txt", get(robots).head(robots))
    .route("/api/hello", get(hello).head(hello))
    .route("/api/version", get(version_info));
  with_layers(routes, config)
}

fn with_layers(routes: Router, config: &ServerConfig) -> Router {
  let max_body_size = config.server.max_body_size;
  routes
    .fallback(|| async { ApiError::not_found() })
    .method_not_allowed_fallback(|| async { ApiError::method_not_allowed() })
    .layer(CatchPanicLayer::custom(panic_response))
    .layer(DefaultBodyLimit::max(max_body_size))
    .layer(middleware::from_fn_with_state(max_body_size, limit_body))
    .layer(middleware::from_fn(audit_log))
    .layer(CompressionLayer::new().gzip(true))
    .layer(cors_layer(&config.server.cors_origins))
}

/// Reject oversized bodies up front by `Content-Length`, and envelope the
/// plain-text 413 that body extractors produce for streamed bodies.
async fn limit_body(State(max_body_size): State<usize>, req: Request, next: Next) -> Response {
  let declared = req
    .headers()
    .get(header::CONTENT_LENGTH)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse::<u64>().ok());
  if declared.is_some_and(|len| len > max_body_size as u64) {
    return ApiError::payload_too_large().into_response();
  }

  let response = next.run(req).await;
  if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json(&response) {
    return ApiError::payload_too_large().into_response();
  }
  response
}

fn is_json(response: &Response) -> bool {
  response
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.starts_with("application/json"))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
  if origins.is_empty() || origins.iter().any(|o| o == "*") {
    return CorsLayer::permissive();
  }
  let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
  CorsLayer::new()
    .allow_origin(origins)
    .allow_methods(cors::Any)
    .allow_headers(cors::Any)
}

async fn hello(method: Method) -> Response {
  if method == Method::HEAD {
    return StatusCode::NO_CONTENT.into_response();
  }
  Json(Envelope::ok("hello world!")).into_response()
}

async fn robots(method: Method) -> Response {
  if method == Method::HEAD {
    return StatusCode::NO_CONTENT.into_response();
  }
  "User-agent: *\nDisallow: /".into_response()
}

async fn version_info() -> Json<Envelope<VersionInfo>> {
  Json(Envelope::ok(VersionInfo {
    name: version::NAME.into(),
    version: version::VERSION.into(),
  }))
}

async fn audit_log(req: Request, next: Next) -> Response {
  let method = req.method().clone();
  let path = req.uri().path().to_string();
  if QUIET_PATHS.contains(&path.as_str()) {
    return next.run(req).await;
  }

  let started = Instant::now();
  let response = next.run(req).await;
  let status = response.status();
  let lapse_ms = started.elapsed().as_millis() as u64;
  if status.is_server_error() {
    tracing::error!(%method, %path, status = status.as_u16(), lapse_ms, "request");
  } else {
    tracing::info!(%method, %path, status = status.as_u16(), lapse_ms, "request");
  }
  response
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
  let detail = if let Some(s) = err.downcast_ref::<String>() {
    s.clone()
  } else if let Some(s) = err.downcast_ref::<&str>() {
    s.to_string()
  } else {
    "unknown panic".to_string()
  };
  tracing::error!("Handler panicked: {}", detail);
  ApiError::internal().into_response()
}
