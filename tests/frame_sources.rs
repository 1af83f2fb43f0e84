mod common;

use axum::{http::header, routing::get, Router};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::time::Duration;

use common::spawn;
use skywatch::config::FrameSourceConfig;
use skywatch::error::FrameError;
use skywatch::frame_source::{build_frame_source, CameraSource, FrameSource, ImageReference};

fn jpeg_bytes() -> Vec<u8> {
    let img = ImageBuffer::from_pixel(8, 8, Rgb([20u8, 40, 200]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg).unwrap();
    buffer
}

async fn camera_server() -> String {
    let jpeg = jpeg_bytes();
    let router = Router::new()
        .route(
            "/snapshot.jpg",
            get(move || {
                let jpeg = jpeg.clone();
                async move { ([(header::CONTENT_TYPE, "image/jpeg")], jpeg) }
            }),
        )
        .route("/offline", get(|| async { "<html>camera offline</html>" }));
    spawn(router).await
}

#[tokio::test]
async fn camera_frames_are_inlined_as_jpeg() {
    let base = camera_server().await;
    let mut camera = CameraSource::new(format!("{}/snapshot.jpg", base), Duration::from_secs(5)).unwrap();

    match camera.acquire().await.unwrap() {
        ImageReference::Inline { mime, data } => {
            assert_eq!(mime, "image/jpeg");
            assert!(data.starts_with("/9j/"));
        }
        other => panic!("expected inline frame, got {:?}", other),
    }
}

#[tokio::test]
async fn camera_rejects_non_image_payloads() {
    let base = camera_server().await;
    let mut camera = CameraSource::new(format!("{}/offline", base), Duration::from_secs(5)).unwrap();
    assert!(matches!(camera.acquire().await, Err(FrameError::NotAnImage { .. })));
}

#[tokio::test]
async fn camera_reports_http_status() {
    let base = camera_server().await;
    let mut camera = CameraSource::new(format!("{}/missing", base), Duration::from_secs(5)).unwrap();
    match camera.acquire().await {
        Err(FrameError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_camera_is_a_fetch_error() {
    // Bind then drop to get a port nobody is listening on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut camera = CameraSource::new(format!("http://{}/snapshot.jpg", addr), Duration::from_secs(2)).unwrap();
    assert!(matches!(camera.acquire().await, Err(FrameError::Fetch { .. })));
}

#[tokio::test]
async fn sources_are_built_from_config() {
    let snapshot = FrameSourceConfig::Snapshot {
        url: "https://cdn.example.com/live.jpg".to_string(),
    };
    let mut source = build_frame_source(&snapshot, Duration::from_secs(1)).unwrap();
    assert!(source.describe().starts_with("snapshot"));
    assert!(matches!(source.acquire().await.unwrap(), ImageReference::Remote(_)));

    let rotation = FrameSourceConfig::Rotation { images: vec![] };
    let mut source = build_frame_source(&rotation, Duration::from_secs(1)).unwrap();
    assert!(matches!(source.acquire().await, Err(FrameError::Empty)));
}
