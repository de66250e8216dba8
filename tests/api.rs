mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::Engine;
use common::{encode, sample_image, test_registry};
use http_body_util::BodyExt;
use image::ImageFormat;
use orchid_vision::image::Annotator;
use orchid_vision::web::{create_app, AppState};
use orchid_vision::{Config, InferencePipeline};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "orchid-test-boundary";

fn app() -> Router {
    let config = Config::new("127.0.0.1:0".into(), "models.toml", Some(1), None, false).unwrap();
    let pipeline = InferencePipeline::new(Arc::new(test_registry()), Arc::new(Annotator::new()));
    create_app(AppState::new(pipeline, config))
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, filename, content_type, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn json_request(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn png() -> Vec<u8> {
    encode(&sample_image(1920, 1080), ImageFormat::Png)
}

#[tokio::test]
async fn hello_and_health() {
    let (status, body) = send(get("/api/v1/hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Hello, World!" }));

    let (status, body) = send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["models"], 3);
}

#[tokio::test]
async fn security_headers_are_set() {
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(
        response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
        "nosniff"
    );
}

#[tokio::test]
async fn detect_image_returns_detections_in_source_space() {
    let data = png();
    let request = multipart_request(
        "/api/v1/detectImage",
        &[
            Part::Text("detectType", "disease"),
            Part::File("imageFile", "leaf.png", "image/png", &data),
        ],
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["filename"], "leaf.png");
    // 0.45 低于默认门限 0.7
    assert_eq!(body["num_detections"], 2);
    assert_eq!(body["detections"][0]["class"], "black_rot");
    assert_eq!(body["detections"][0]["bbox"]["x1"], 300);
    assert_eq!(body["detections"][1]["class"], "leaf_spot");

    let image_b64 = body["image"].as_str().unwrap();
    let jpeg = base64::engine::general_purpose::STANDARD.decode(image_b64).unwrap();
    assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
}

#[tokio::test]
async fn detect_image_unknown_project_is_not_found() {
    let data = png();
    let request = multipart_request(
        "/api/v1/detectImage",
        &[
            Part::File("imageFile", "leaf.png", "image/png", &data),
            Part::Text("detectType", "bad_name"),
        ],
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ModelNotFoundError");
}

#[tokio::test]
async fn detect_image_requires_fields() {
    let data = png();
    let no_type = multipart_request(
        "/api/v1/detectImage",
        &[Part::File("imageFile", "leaf.png", "image/png", &data)],
    );
    let (status, body) = send(no_type).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInputError");

    let no_file = multipart_request("/api/v1/detectImage", &[Part::Text("detectType", "disease")]);
    let (status, _) = send(no_file).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn detect_image_rejects_non_image_uploads() {
    let request = multipart_request(
        "/api/v1/detectImage",
        &[
            Part::Text("detectType", "disease"),
            Part::File("imageFile", "notes.txt", "text/plain", b"hello"),
        ],
    );
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "UnsupportedFormatError");
}

#[tokio::test]
async fn detect_image_with_corrupt_bytes_is_decode_error() {
    let request = multipart_request(
        "/api/v1/detectImage",
        &[
            Part::Text("detectType", "disease"),
            Part::File("imageFile", "broken.png", "image/png", b"\x89PNG\r\n\x1a\nbroken"),
        ],
    );
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "DecodeError");
}

#[tokio::test]
async fn inference_failure_is_server_error() {
    let data = png();
    let request = multipart_request(
        "/api/v1/detectImage",
        &[
            Part::Text("detectType", "broken"),
            Part::File("imageFile", "leaf.png", "image/png", &data),
        ],
    );
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "InferenceError");
    assert!(body["message"].as_str().unwrap().contains("broken"));
}

#[tokio::test]
async fn json_detect_classifies() {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(encode(&sample_image(300, 200), ImageFormat::Jpeg));
    let request = json_request(
        "/api/v1/detect",
        json!({ "image": format!("data:image/jpeg;base64,{encoded}"), "project": "species" }),
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["primary_species"], "Cattleya");
    assert_eq!(body["is_orchid"], true);
    assert_eq!(body["all_predictions"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn json_detect_validation() {
    let (status, body) = send(json_request(
        "/api/v1/detect",
        json!({ "image": "", "project": "species" }),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInputError");

    let (status, body) = send(json_request(
        "/api/v1/detect",
        json!({ "image": "%%%", "project": "species" }),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "DecodeError");

    let (status, _) = send(json_request("/api/v1/detect", json!({ "project": "species" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_reports_per_file_results() {
    let data = png();
    let request = multipart_request(
        "/api/v1/detect/batch",
        &[
            Part::Text("detectType", "disease"),
            Part::File("files", "a.png", "image/png", &data),
            Part::File("files", "b.png", "image/png", b"garbage"),
        ],
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total"], 2);
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["results"][0]["filename"], "a.png");
    assert_eq!(body["results"][0]["num_detections"], 2);
    assert_eq!(body["results"][1]["error"], "DecodeError");
}

#[tokio::test]
async fn batch_unknown_project_fails_whole_request() {
    let data = png();
    let request = multipart_request(
        "/api/v1/detect/batch",
        &[
            Part::Text("detectType", "bad_name"),
            Part::File("files", "a.png", "image/png", &data),
        ],
    );
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn models_and_info_list_loaded_models() {
    let (status, body) = send(get("/api/v1/models")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_count"], 3);
    let names: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["broken", "disease", "species"]);
    assert_eq!(body["models"][1]["family"], "detector");

    let (status, body) = send(get("/api/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"]["model_count"], 3);
    assert_eq!(body["features"]["debug_image_sink"], false);
}
