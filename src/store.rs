//! Persistence seams: capture records and rendered artifacts

use crate::{ArtifactRef, CaptureError, CaptureRequest, OutputFormat, RenderedImage};
use async_trait::async_trait;
use dashmap::DashMap;
use image::codecs::webp::WebPEncoder;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Stores capture records
///
/// `save` is an idempotent upsert of the whole record.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    async fn save(&self, capture: &CaptureRequest) -> Result<(), CaptureError>;

    async fn get(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError>;

    /// Atomically move a `QUEUED` record to `STARTED` and return it
    ///
    /// At most one caller wins the claim for a given id; the others get
    /// `InvalidTransition`. `None` if the record does not exist.
    async fn claim(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError>;

    async fn remove(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, CaptureRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CaptureStore for MemoryStore {
    async fn save(&self, capture: &CaptureRequest) -> Result<(), CaptureError> {
        self.records.insert(capture.id, capture.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn claim(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError> {
        // The entry stays write-locked between the status check and the update.
        match self.records.get_mut(&id) {
            Some(mut entry) => {
                entry.mark_started()?;
                Ok(Some(entry.value().clone()))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<Option<CaptureRequest>, CaptureError> {
        Ok(self.records.remove(&id).map(|(_, capture)| capture))
    }
}

/// Persists rendered images and hands back a reference to them
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        capture: &CaptureRequest,
        rendered: &RenderedImage,
    ) -> Result<ArtifactRef, CaptureError>;
}

/// Writes artifacts as `<dir>/<capture id>.<ext>`
pub struct FileArtifactStore {
    dir: PathBuf,
    format: OutputFormat,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn put(
        &self,
        capture: &CaptureRequest,
        rendered: &RenderedImage,
    ) -> Result<ArtifactRef, CaptureError> {
        let data = encode_image(rendered, self.format)?;

        let path = self
            .dir
            .join(format!("{}.{}", capture.id, self.format.extension()));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CaptureError::ArtifactError(format!("{}: {e}", self.dir.display())))?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| CaptureError::ArtifactError(format!("{}: {e}", path.display())))?;

        debug!("Stored {} byte artifact at {}", data.len(), path.display());
        Ok(ArtifactRef(path.display().to_string()))
    }
}

pub fn encode_image(rendered: &RenderedImage, format: OutputFormat) -> Result<Vec<u8>, CaptureError> {
    let mut data = Vec::new();
    let result = match format {
        // JPEG has no alpha channel.
        OutputFormat::Jpeg => image::DynamicImage::ImageRgb8(rendered.image.to_rgb8())
            .write_to(&mut Cursor::new(&mut data), format.image_format()),
        OutputFormat::Webp => {
            let rgba = rendered.image.to_rgba8();
            WebPEncoder::new_lossless(&mut data).encode(
                &rgba,
                rgba.width(),
                rgba.height(),
                image::ColorType::Rgba8,
            )
        }
        OutputFormat::Png => rendered
            .image
            .write_to(&mut Cursor::new(&mut data), format.image_format()),
    };

    result.map_err(|e| CaptureError::EncodeError(e.to_string()))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn rendered() -> RenderedImage {
        RenderedImage {
            image: DynamicImage::ImageRgba8(image::RgbaImage::new(4, 3)),
            strategy: "wkhtml".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_is_idempotent_upsert() {
        let store = MemoryStore::new();
        let mut capture = CaptureRequest::new("user-1", "https://example.com");

        store.save(&capture).await.unwrap();
        capture.mark_queued().unwrap();
        store.save(&capture).await.unwrap();
        store.save(&capture).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(capture.id).await.unwrap(), Some(capture.clone()));

        assert_eq!(store.remove(capture.id).await.unwrap(), Some(capture.clone()));
        assert!(store.get(capture.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_starts_a_queued_record_once() {
        let store = MemoryStore::new();
        let mut capture = CaptureRequest::new("user-1", "https://example.com");
        assert!(store.claim(capture.id).await.unwrap().is_none());

        store.save(&capture).await.unwrap();
        assert!(matches!(
            store.claim(capture.id).await,
            Err(CaptureError::InvalidTransition { .. })
        ));

        capture.mark_queued().unwrap();
        store.save(&capture).await.unwrap();

        let claimed = store.claim(capture.id).await.unwrap().unwrap();
        assert_eq!(claimed.status(), crate::CaptureStatus::Started);
        assert!(claimed.started_at().is_some());
        assert_eq!(store.get(capture.id).await.unwrap(), Some(claimed));

        assert!(matches!(
            store.claim(capture.id).await,
            Err(CaptureError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_artifact_store_writes_encoded_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::new(dir.path(), OutputFormat::Jpeg);
        let capture = CaptureRequest::new("user-1", "https://example.com");

        let artifact = store.put(&capture, &rendered()).await.unwrap();
        assert!(artifact.0.ends_with(&format!("{}.jpg", capture.id)));

        let data = std::fs::read(&artifact.0).unwrap();
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_encode_webp() {
        let data = encode_image(&rendered(), OutputFormat::Webp).unwrap();
        assert_eq!(
            image::guess_format(&data).unwrap(),
            image::ImageFormat::WebP
        );
    }

    #[test]
    fn test_encode_png() {
        let data = encode_image(&rendered(), OutputFormat::Png).unwrap();
        assert_eq!(
            image::guess_format(&data).unwrap(),
            image::ImageFormat::Png
        );
    }
}
