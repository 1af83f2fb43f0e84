use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::FrameSourceConfig;
use crate::error::FrameError;

/// A frame ready to hand to the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "String")]
pub enum ImageReference {
    /// Fetched by the provider itself
    Remote(String),
    /// Base64 payload carried in the request
    Inline { mime: String, data: String },
}

impl ImageReference {
    pub fn to_url(&self) -> String {
        match self {
            ImageReference::Remote(url) => url.clone(),
            ImageReference::Inline { mime, data } => format!("data:{};base64,{}", mime, data),
        }
    }

    /// Sniffs the image format and inlines the bytes.
    pub fn inline(bytes: &[u8], origin: &str) -> Result<Self, FrameError> {
        let format = image::guess_format(bytes).map_err(|_| FrameError::NotAnImage {
            origin: origin.to_string(),
        })?;

        Ok(ImageReference::Inline {
            mime: format.to_mime_type().to_string(),
            data: general_purpose::STANDARD.encode(bytes),
        })
    }
}

impl From<ImageReference> for String {
    fn from(reference: ImageReference) -> Self {
        reference.to_url()
    }
}

/// Where the dispatcher gets its frames from.
#[async_trait]
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    async fn acquire(&mut self) -> Result<ImageReference, FrameError>;
}

pub fn build_frame_source(
    config: &FrameSourceConfig,
    timeout: Duration,
) -> Result<Box<dyn FrameSource>, FrameError> {
    let source: Box<dyn FrameSource> = match config {
        FrameSourceConfig::Camera { url } => Box::new(CameraSource::new(url.clone(), timeout)?),
        FrameSourceConfig::Rotation { images } => Box::new(RotationSource::new(images.clone())),
        FrameSourceConfig::Snapshot { url } => Box::new(SnapshotSource::new(url.clone())),
    };

    info!("📷 Frame source: {}", source.describe());
    Ok(source)
}

/// Polls a live camera endpoint that serves one still per request.
pub struct CameraSource {
    url: String,
    client: reqwest::Client,
}

impl CameraSource {
    pub fn new(url: String, timeout: Duration) -> Result<Self, FrameError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FrameError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        format!("camera {}", self.url)
    }

    async fn acquire(&mut self) -> Result<ImageReference, FrameError> {
        let fetch_error = |e: reqwest::Error| FrameError::Fetch {
            url: self.url.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&self.url).send().await.map_err(fetch_error)?;

        if !response.status().is_success() {
            return Err(FrameError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(fetch_error)?;
        debug!("📷 Captured {} bytes from {}", bytes.len(), self.url);
        ImageReference::inline(&bytes, &self.url)
    }
}

/// Cycles through a fixed list. URLs pass through, paths are read and
/// inlined.
pub struct RotationSource {
    images: Vec<String>,
    next: usize,
}

impl RotationSource {
    pub fn new(images: Vec<String>) -> Self {
        Self { images, next: 0 }
    }
}

#[async_trait]
impl FrameSource for RotationSource {
    fn describe(&self) -> String {
        format!("rotation of {} image(s)", self.images.len())
    }

    async fn acquire(&mut self) -> Result<ImageReference, FrameError> {
        if self.images.is_empty() {
            return Err(FrameError::Empty);
        }

        let entry = self.images[self.next % self.images.len()].clone();
        self.next = (self.next + 1) % self.images.len();

        if entry.starts_with("http://") || entry.starts_with("https://") {
            return Ok(ImageReference::Remote(entry));
        }

        let path = PathBuf::from(&entry);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| FrameError::Io { path, source })?;
        ImageReference::inline(&bytes, &entry)
    }
}

/// Capture from an embedded video player via its snapshot/thumbnail URL.
/// The provider fetches the image itself; a random token defeats caches
/// between cycles.
pub struct SnapshotSource {
    url: String,
}

impl SnapshotSource {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl FrameSource for SnapshotSource {
    fn describe(&self) -> String {
        format!("snapshot {}", self.url)
    }

    async fn acquire(&mut self) -> Result<ImageReference, FrameError> {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let token: u32 = rand::random();
        Ok(ImageReference::Remote(format!("{}{}t={}", self.url, separator, token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = ImageBuffer::from_pixel(4, 4, Rgb([200u8, 30, 30]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png).unwrap();
        buffer
    }

    #[test]
    fn inline_sniffs_mime_type() {
        let reference = ImageReference::inline(&png_bytes(), "test").unwrap();
        assert!(reference.to_url().starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn inline_rejects_non_images() {
        assert!(matches!(
            ImageReference::inline(b"<html>502</html>", "cam"),
            Err(FrameError::NotAnImage { .. })
        ));
    }

    #[test]
    fn reference_serializes_as_url() {
        let value = serde_json::to_value(ImageReference::Remote("https://a/b.jpg".to_string())).unwrap();
        assert_eq!(value, "https://a/b.jpg");
    }

    #[tokio::test]
    async fn rotation_cycles_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("frame.png");
        std::fs::write(&local, png_bytes()).unwrap();

        let mut source = RotationSource::new(vec![
            "https://example.com/a.jpg".to_string(),
            local.to_string_lossy().into_owned(),
        ]);

        assert_eq!(
            source.acquire().await.unwrap(),
            ImageReference::Remote("https://example.com/a.jpg".to_string())
        );
        assert!(matches!(source.acquire().await.unwrap(), ImageReference::Inline { .. }));
        assert_eq!(
            source.acquire().await.unwrap(),
            ImageReference::Remote("https://example.com/a.jpg".to_string())
        );
    }

    #[tokio::test]
    async fn rotation_failures_do_not_stall_the_rotation() {
        let mut source = RotationSource::new(vec![
            "/definitely/not/here.jpg".to_string(),
            "https://example.com/b.jpg".to_string(),
        ]);
        assert!(matches!(source.acquire().await, Err(FrameError::Io { .. })));
        assert!(source.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn empty_rotation_is_an_error() {
        let mut source = RotationSource::new(Vec::new());
        assert!(matches!(source.acquire().await, Err(FrameError::Empty)));
    }

    #[tokio::test]
    async fn snapshot_adds_cache_buster() {
        let mut plain = SnapshotSource::new("https://cdn.example.com/thumb.jpg".to_string());
        let url = plain.acquire().await.unwrap().to_url();
        assert!(url.starts_with("https://cdn.example.com/thumb.jpg?t="));

        let mut query = SnapshotSource::new("https://cdn.example.com/thumb.jpg?w=640".to_string());
        let url = query.acquire().await.unwrap().to_url();
        assert!(url.starts_with("https://cdn.example.com/thumb.jpg?w=640&t="));
    }
}
