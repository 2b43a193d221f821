//! Asset upload: canvas bitmap -> engine-side [`AssetHandle`].
//!
//! The stored filename is derived from the PNG bytes, and the upload asks
//! the engine to overwrite. Uploading the same canvas twice therefore
//! replaces one asset instead of accumulating copies.

use sha2::{Digest, Sha256};
use sketchforge_core::bitmap::Bitmap;
use sketchforge_core::error::CoreError;
use sketchforge_core::outcome::AssetHandle;

use crate::api::ComfyUIApiError;
use crate::engine::RenderEngine;

/// Prefix of every uploaded sketch filename.
pub const UPLOAD_PREFIX: &str = "sketch";

/// Hex characters of the content digest kept in the filename.
const DIGEST_CHARS: usize = 16;

/// Errors from the upload stage.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The bitmap could not be encoded for upload.
    #[error("{0}")]
    Encode(#[from] CoreError),

    /// The engine rejected the upload or the request failed.
    #[error("Upload failed: {0}")]
    Api(#[from] ComfyUIApiError),
}

/// Filename for an upload: `sketch_<digest>.png`, stable for identical bytes.
pub fn upload_filename(png: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(png));
    format!("{UPLOAD_PREFIX}_{}.png", &digest[..DIGEST_CHARS])
}

/// Encode `bitmap` as PNG and upload it.
pub async fn upload_bitmap(
    engine: &dyn RenderEngine,
    bitmap: &Bitmap,
) -> Result<AssetHandle, UploadError> {
    let png = bitmap.encode_png()?;
    let filename = upload_filename(&png);
    let size_bytes = png.len();

    let handle = engine.upload_image(&filename, png).await?;

    tracing::info!(
        filename = %handle.name,
        size_bytes,
        "Sketch uploaded",
    );
    Ok(handle)
}
