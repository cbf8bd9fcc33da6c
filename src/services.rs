//! Collaborator interfaces: the document model and the pixel codec
//!
//! The scheduler never parses documents or pixels itself. Hosts plug in a
//! [`DocumentService`] for the object graph and an [`ImageCodec`] for
//! decode/encode.

use crate::error::Result;
use crate::method::Method;
use crate::settings::SettingsVector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Resolution assumed for images whose display size is unknown.
pub const ASSUMED_NATIVE_DPI: f64 = 300.0;
const POINTS_PER_INCH: f64 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Other,
}

/// How the image pipeline treats an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Already lossy; can be re-encoded at a lower quality.
    Reencodable,
    /// Lossless raster that may be converted to a lossy format.
    Convertible,
}

/// An embedded image as exposed by the document model.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub id: u32,
    pub format: ImageFormat,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    /// Largest on-page placement, in points.
    pub display_size: Option<(f64, f64)>,
}

impl ImageItem {
    pub fn original_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn kind(&self) -> Option<ItemKind> {
        match self.format {
            ImageFormat::Jpeg => Some(ItemKind::Reencodable),
            ImageFormat::Png => Some(ItemKind::Convertible),
            ImageFormat::Other => None,
        }
    }

    /// Longest pixel edge needed to render at `dpi`, never larger than the source.
    pub fn max_dimension_at(&self, dpi: u32) -> u32 {
        let native = self.width.max(self.height);
        let wanted = match self.display_size {
            Some((w, h)) if w > 0.0 && h > 0.0 => w.max(h) / POINTS_PER_INCH * dpi as f64,
            _ => native as f64 * dpi as f64 / ASSUMED_NATIVE_DPI,
        };
        (wanted.ceil() as u32).clamp(1, native.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    pub use_object_streams: bool,
}

/// Structured document model.
///
/// `load` and `save` failures are fatal to a job and must use the typed
/// variants of [`crate::error::CompressError`]. `apply_method` and
/// `replace_image` failures are absorbed by the caller.
#[async_trait]
pub trait DocumentService: Send + Sync {
    type Handle: Send + Sync;

    /// Confirms the service can be used at all.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, bytes: &[u8]) -> Result<Self::Handle>;

    async fn save(&self, handle: &Self::Handle, options: SaveOptions) -> Result<Vec<u8>>;

    /// Apply one structural method in place.
    async fn apply_method(
        &self,
        handle: &mut Self::Handle,
        method: Method,
        settings: &SettingsVector,
    ) -> anyhow::Result<()>;

    fn images(&self, handle: &Self::Handle) -> Vec<ImageItem>;

    async fn replace_image(
        &self,
        handle: &mut Self::Handle,
        id: u32,
        data: Vec<u8>,
        format: ImageFormat,
    ) -> anyhow::Result<()>;
}

/// Pixel codec. A `None` result means the item could not be processed.
#[async_trait]
pub trait ImageCodec: Send + Sync {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn decode(&self, bytes: &[u8], format: ImageFormat) -> Option<PixelBuffer>;

    async fn encode(
        &self,
        pixels: &PixelBuffer,
        format: ImageFormat,
        quality: u8,
        max_dimension: Option<u32>,
    ) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(width: u32, height: u32, display: Option<(f64, f64)>) -> ImageItem {
        ImageItem {
            id: 1,
            format: ImageFormat::Jpeg,
            data: vec![0; 10],
            width,
            height,
            has_alpha: false,
            display_size: display,
        }
    }

    #[test]
    fn test_max_dimension_from_display_size() {
        // 4 inches wide at 72 dpi
        let img = item(2400, 1200, Some((288.0, 144.0)));
        assert_eq!(img.max_dimension_at(72), 288);
        assert_eq!(img.max_dimension_at(150), 600);
    }

    #[test]
    fn test_max_dimension_without_display_size() {
        let img = item(3000, 2000, None);
        assert_eq!(img.max_dimension_at(150), 1500);
    }

    #[test]
    fn test_max_dimension_never_upscales() {
        let img = item(100, 50, Some((720.0, 360.0)));
        assert_eq!(img.max_dimension_at(300), 100);
    }

    #[test]
    fn test_kinds() {
        let mut img = item(10, 10, None);
        assert_eq!(img.kind(), Some(ItemKind::Reencodable));
        img.format = ImageFormat::Png;
        assert_eq!(img.kind(), Some(ItemKind::Convertible));
        img.format = ImageFormat::Other;
        assert_eq!(img.kind(), None);
    }
}
