//! Request helpers and fixture data.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use tower::util::ServiceExt;

/// The admin token matching `AdminConfig::for_testing()`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Generate a valid PNG of the given size.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128, 255])
    });
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .expect("png encode failed");
    out
}

/// Send a request and return (status, raw body bytes, content-type).
#[allow(dead_code)]
pub async fn send_raw(
    router: &Router,
    request: Request<Body>,
) -> (StatusCode, Vec<u8>, Option<String>) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request failed");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body read failed")
        .to_bytes()
        .to_vec();
    (status, body, content_type)
}

/// Send a JSON request and parse the JSON response body.
#[allow(dead_code)]
pub async fn send_json(
    router: &Router,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request build failed");
    let (status, bytes, _) = send_raw(router, request).await;
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// Send an admin JSON request with the test bearer token.
#[allow(dead_code)]
pub async fn send_admin_json(
    router: &Router,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request build failed");
    let (status, bytes, _) = send_raw(router, request).await;
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// Upload artifact bytes via PUT /v1/artifacts/{name}.
#[allow(dead_code)]
pub async fn upload_artifact(router: &Router, name: &str, bytes: Vec<u8>) -> StatusCode {
    let request = Request::builder()
        .method(Method::PUT)
        .uri(format!("/v1/artifacts/{name}"))
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(bytes))
        .expect("request build failed");
    let (status, _, _) = send_raw(router, request).await;
    status
}

/// Upload an artifact and record a fulfillment for it.
/// Returns the new fulfillment id.
#[allow(dead_code)]
pub async fn record_fulfillment(router: &Router, session_token: &str, hd_name: &str) -> String {
    let status = upload_artifact(router, hd_name, png_bytes(64, 48)).await;
    assert_eq!(status, StatusCode::CREATED, "artifact upload failed");

    let (status, body) = send_json(
        router,
        Method::POST,
        "/v1/fulfillments",
        Some(serde_json::json!({
            "session_token": session_token,
            "hd_ref": hd_name,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "fulfillment record failed: {body}");
    body["fulfillment_id"]
        .as_str()
        .expect("missing fulfillment_id")
        .to_string()
}
