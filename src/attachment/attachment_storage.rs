use chrono::Utc;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use rand::RngCore;
use std::{
    io::Cursor,
    path::{Path, PathBuf},
};
use tokio::task;
use tracing::{debug, error, warn};

use super::attachment_models::{FileClass, StoredFile, ValidatedFile};
use crate::error::{AppError, Result};

const THUMBNAIL_DIR: &str = "thumbs";

/// Local-disk blob store for attachments. Paths handed out are relative to
/// `root` and double as the public URL suffix under `/uploads`.
#[derive(Debug, Clone)]
pub struct AttachmentStorage {
    root: PathBuf,
    max_dimension: u32,
    thumbnail_dimension: u32,
}

struct ProcessedImage {
    bytes: Vec<u8>,
    extension: &'static str,
    mime_type: &'static str,
    width: u32,
    height: u32,
    thumbnail: Vec<u8>,
    thumbnail_extension: &'static str,
}

impl AttachmentStorage {
    pub fn new(root: impl Into<PathBuf>, max_dimension: u32, thumbnail_dimension: u32) -> Self {
        Self {
            root: root.into(),
            max_dimension,
            thumbnail_dimension,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root.join(FileClass::Image.bucket()).join(THUMBNAIL_DIR)).await?;
        tokio::fs::create_dir_all(self.root.join(FileClass::Document.bucket())).await?;
        Ok(())
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Writes a validated file under a generated name. Images are downsized
    /// past `max_dimension` and get a thumbnail; if any write fails, whatever
    /// was already written is removed again.
    pub async fn ingest(&self, file: ValidatedFile) -> Result<StoredFile> {
        self.ensure_dirs().await?;
        let stem = generate_stem();

        match file.class {
            FileClass::Document => {
                let file_path = format!("{}/{}.{}", FileClass::Document.bucket(), stem, file.extension);
                let file_size = file.bytes.len() as i64;
                tokio::fs::write(self.absolute(&file_path), &file.bytes).await?;

                Ok(StoredFile {
                    class: FileClass::Document,
                    file_path,
                    file_size,
                    mime_type: file.mime_type,
                    original_name: file.original_name,
                    width: None,
                    height: None,
                    thumbnail_path: None,
                })
            }
            FileClass::Image => {
                let processed = self.process_image(file.bytes, file.extension.clone(), file.mime_type.clone()).await?;

                let bucket = FileClass::Image.bucket();
                let file_path = format!("{}/{}.{}", bucket, stem, processed.extension);
                let thumbnail_path = format!(
                    "{}/{}/{}_thumb.{}",
                    bucket, THUMBNAIL_DIR, stem, processed.thumbnail_extension
                );

                tokio::fs::write(self.absolute(&file_path), &processed.bytes).await?;
                if let Err(e) = tokio::fs::write(self.absolute(&thumbnail_path), &processed.thumbnail).await {
                    self.remove(&[file_path.as_str()]).await;
                    return Err(e.into());
                }

                debug!(path = %file_path, width = processed.width, height = processed.height, "image stored");

                Ok(StoredFile {
                    class: FileClass::Image,
                    file_path,
                    file_size: processed.bytes.len() as i64,
                    mime_type: processed.mime_type.to_string(),
                    original_name: file.original_name,
                    width: Some(processed.width as i32),
                    height: Some(processed.height as i32),
                    thumbnail_path: Some(thumbnail_path),
                })
            }
        }
    }

    /// Best-effort removal. Missing files are fine; other failures are logged.
    pub async fn remove(&self, relative_paths: &[&str]) {
        for relative in relative_paths {
            match tokio::fs::remove_file(self.absolute(relative)).await {
                Ok(()) => debug!(path = %relative, "attachment file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %relative, "failed to remove attachment file: {}", e),
            }
        }
    }

    pub async fn remove_stored(&self, stored: &StoredFile) {
        let mut paths = vec![stored.file_path.as_str()];
        if let Some(thumb) = stored.thumbnail_path.as_deref() {
            paths.push(thumb);
        }
        self.remove(&paths).await;
    }

    /// Passes `outcome` through, removing the stored files first when the
    /// write that was meant to reference them failed.
    pub async fn discard_on_error<T>(&self, stored: &StoredFile, outcome: Result<T>) -> Result<T> {
        if outcome.is_err() {
            self.remove_stored(stored).await;
        }
        outcome
    }

    async fn process_image(
        &self,
        bytes: Vec<u8>,
        extension: String,
        mime_type: String,
    ) -> Result<ProcessedImage> {
        let max_dimension = self.max_dimension;
        let thumbnail_dimension = self.thumbnail_dimension;

        task::spawn_blocking(move || {
            process_image_blocking(bytes, &extension, &mime_type, max_dimension, thumbnail_dimension)
        })
        .await
        .map_err(|e| {
            error!("image processing task failed: {}", e);
            AppError::InternalError
        })?
    }
}

fn process_image_blocking(
    bytes: Vec<u8>,
    extension: &str,
    mime_type: &str,
    max_dimension: u32,
    thumbnail_dimension: u32,
) -> Result<ProcessedImage> {
    let format = image::guess_format(&bytes)?;
    let img = image::load_from_memory_with_format(&bytes, format)?;
    let (width, height) = img.dimensions();
    let has_alpha = img.color().has_alpha();

    let thumbnail = encode(
        &img.thumbnail(thumbnail_dimension, thumbnail_dimension),
        thumbnail_format(has_alpha),
    )?;
    let thumbnail_extension = extension_for(thumbnail_format(has_alpha));

    if width <= max_dimension && height <= max_dimension {
        return Ok(ProcessedImage {
            bytes,
            extension: static_extension(extension),
            mime_type: static_mime(mime_type),
            width,
            height,
            thumbnail,
            thumbnail_extension,
        });
    }

    // JPEG stays JPEG; everything else is re-encoded as PNG so transparency survives.
    let output = if format == ImageFormat::Jpeg {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Png
    };
    let resized = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    let (width, height) = resized.dimensions();

    Ok(ProcessedImage {
        bytes: encode(&resized, output)?,
        extension: extension_for(output),
        mime_type: output.to_mime_type(),
        width,
        height,
        thumbnail,
        thumbnail_extension,
    })
}

fn thumbnail_format(has_alpha: bool) -> ImageFormat {
    if has_alpha {
        ImageFormat::Png
    } else {
        ImageFormat::Jpeg
    }
}

fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        _ => "png",
    }
}

fn static_extension(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "jpg",
        "gif" => "gif",
        "webp" => "webp",
        _ => "png",
    }
}

fn static_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "image/jpeg",
        "image/gif" => "image/gif",
        "image/webp" => "image/webp",
        _ => "image/png",
    }
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if format == ImageFormat::Jpeg && img.color().has_alpha() {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut Cursor::new(&mut buf), format)?;
    } else {
        img.write_to(&mut Cursor::new(&mut buf), format)?;
    }
    Ok(buf)
}

/// Millisecond timestamp plus 8 random bytes; never derived from the
/// uploaded name.
fn generate_stem() -> String {
    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);
    let hex: String = random.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S%3f"), hex)
}
