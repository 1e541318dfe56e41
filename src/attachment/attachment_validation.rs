use image::ImageFormat;

use super::attachment_models::{FileClass, IncomingFile, ValidatedFile};
use crate::error::{AppError, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "txt", "csv"];

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Per-class size ceilings, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    pub max_image_bytes: u64,
    pub max_file_bytes: u64,
}

impl SizeLimits {
    pub fn for_class(&self, class: FileClass) -> u64 {
        match class {
            FileClass::Image => self.max_image_bytes,
            FileClass::Document => self.max_file_bytes,
        }
    }
}

pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn classify(extension: &str) -> Option<FileClass> {
    if IMAGE_EXTENSIONS.contains(&extension) {
        Some(FileClass::Image)
    } else if DOCUMENT_EXTENSIONS.contains(&extension) {
        Some(FileClass::Document)
    } else {
        None
    }
}

/// Checks an upload before anything is stored: extension allow-list, the
/// size ceiling of its class, the actual content against the extension, and
/// the declared MIME type against both.
pub fn validate(file: IncomingFile, limits: &SizeLimits) -> Result<ValidatedFile> {
    let extension = extension_of(&file.original_name).ok_or_else(|| {
        AppError::UnsupportedMediaType("File must have an extension".to_string())
    })?;
    let class = classify(&extension).ok_or_else(|| {
        AppError::UnsupportedMediaType(format!("Files of type .{} are not allowed", extension))
    })?;

    if file.bytes.is_empty() {
        return Err(AppError::BadRequest("File is empty".to_string()));
    }
    let limit = limits.for_class(class);
    if file.size() > limit {
        return Err(AppError::PayloadTooLarge(format!(
            "{} exceeds the {} byte limit for {}",
            file.original_name,
            limit,
            class.bucket()
        )));
    }

    let mime_type = match class {
        FileClass::Image => sniff_image(&file.bytes, &extension)?,
        FileClass::Document => {
            sniff_document(&file.bytes, &extension)?;
            mime_guess::from_ext(&extension)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        }
    };

    if let Some(declared) = file.declared_mime.as_deref() {
        check_declared_mime(declared, &extension, &mime_type)?;
    }

    Ok(ValidatedFile {
        class,
        extension,
        mime_type,
        original_name: file.original_name,
        bytes: file.bytes,
    })
}

fn image_format_matches(format: ImageFormat, extension: &str) -> bool {
    matches!(
        (format, extension),
        (ImageFormat::Jpeg, "jpg" | "jpeg")
            | (ImageFormat::Png, "png")
            | (ImageFormat::Gif, "gif")
            | (ImageFormat::WebP, "webp")
    )
}

fn sniff_image(bytes: &[u8], extension: &str) -> Result<String> {
    let format = image::guess_format(bytes).map_err(|_| {
        AppError::UnsupportedMediaType("File content is not a recognized image".to_string())
    })?;
    if !image_format_matches(format, extension) {
        return Err(AppError::UnsupportedMediaType(format!(
            "File content does not match its .{} extension",
            extension
        )));
    }
    Ok(format.to_mime_type().to_string())
}

fn sniff_document(bytes: &[u8], extension: &str) -> Result<()> {
    let matches = match extension {
        "pdf" => bytes.starts_with(PDF_MAGIC),
        "docx" | "xlsx" => bytes.starts_with(ZIP_MAGIC),
        "doc" | "xls" => bytes.starts_with(OLE_MAGIC),
        "txt" | "csv" => !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok(),
        _ => false,
    };
    if !matches {
        return Err(AppError::UnsupportedMediaType(format!(
            "File content does not match its .{} extension",
            extension
        )));
    }
    Ok(())
}

/// Generic or missing declarations are accepted; anything specific must
/// agree with what the content turned out to be.
fn check_declared_mime(declared: &str, extension: &str, detected: &str) -> Result<()> {
    let declared = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if declared.is_empty() || declared == "application/octet-stream" {
        return Ok(());
    }
    let declared = if declared == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        declared
    };

    let known_for_extension = mime_guess::from_ext(extension)
        .iter()
        .any(|m| m.essence_str() == declared);
    if declared == detected || known_for_extension {
        Ok(())
    } else {
        Err(AppError::UnsupportedMediaType(format!(
            "Declared type {} does not match the uploaded file",
            declared
        )))
    }
}

#[cfg(test)]
pub(crate) mod samples {
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use std::io::Cursor;

    pub fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([200, 30, 30, 128]),
        ));
        let img = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(img.to_rgb8())
        } else {
            img
        };
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::samples::encoded;
    use super::*;

    const LIMITS: SizeLimits = SizeLimits {
        max_image_bytes: 1024 * 1024,
        max_file_bytes: 4 * 1024 * 1024,
    };

    fn incoming(name: &str, mime: Option<&str>, bytes: Vec<u8>) -> IncomingFile {
        IncomingFile {
            original_name: name.to_string(),
            declared_mime: mime.map(str::to_string),
            bytes,
        }
    }

    #[test]
    fn png_passes_and_gets_canonical_mime() {
        let file = incoming("Photo.PNG", Some("image/png"), encoded(4, 4, ImageFormat::Png));
        let validated = validate(file, &LIMITS).unwrap();
        assert_eq!(validated.class, FileClass::Image);
        assert_eq!(validated.extension, "png");
        assert_eq!(validated.mime_type, "image/png");
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let file = incoming("run.exe", None, b"MZ\x90\x00".to_vec());
        assert!(matches!(
            validate(file, &LIMITS),
            Err(AppError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn renamed_content_is_rejected() {
        let file = incoming("photo.jpg", None, encoded(4, 4, ImageFormat::Png));
        assert!(matches!(
            validate(file, &LIMITS),
            Err(AppError::UnsupportedMediaType(_))
        ));

        let file = incoming("invoice.pdf", None, b"just some text".to_vec());
        assert!(validate(file, &LIMITS).is_err());
    }

    #[test]
    fn size_ceiling_depends_on_class() {
        let big = vec![b'a'; 2 * 1024 * 1024];
        let as_text = incoming("notes.txt", None, big.clone());
        assert!(validate(as_text, &LIMITS).is_ok());

        let mut as_image = encoded(4, 4, ImageFormat::Png);
        as_image.resize(2 * 1024 * 1024, 0);
        let file = incoming("big.png", None, as_image);
        assert!(matches!(
            validate(file, &LIMITS),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn declared_mime_must_agree() {
        let file = incoming("photo.png", Some("application/pdf"), encoded(4, 4, ImageFormat::Png));
        assert!(validate(file, &LIMITS).is_err());

        let file = incoming("photo.jpg", Some("image/jpg"), encoded(4, 4, ImageFormat::Jpeg));
        assert!(validate(file, &LIMITS).is_ok());

        let pdf = incoming(
            "manual.pdf",
            Some("application/octet-stream"),
            b"%PDF-1.7\n...".to_vec(),
        );
        assert_eq!(validate(pdf, &LIMITS).unwrap().mime_type, "application/pdf");
    }

    #[test]
    fn extension_parsing() {
        assert_eq!(extension_of("a.b.JPEG").as_deref(), Some("jpeg"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("trailing."), None);
    }
}
