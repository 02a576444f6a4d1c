//! Image format detection and upload file naming.
//!
//! The image picker hands over raw bytes; the format is detected from the
//! leading magic bytes, not from any file extension the user typed.
//!
//! | Format | Magic bytes | Extension | MIME type |
//! |--------|-------------|-----------|-----------|
//! | JPEG | `FF D8 FF` | `jpg` | `image/jpeg` |
//! | PNG | `89 50 4E 47 0D 0A 1A 0A` | `png` | `image/png` |
//! | Other | anything else | none | `application/octet-stream` |

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Detected encoding of an upload payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Other,
}

impl ImageFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(JPEG_MAGIC) {
            ImageFormat::Jpeg
        } else if bytes.starts_with(PNG_MAGIC) {
            ImageFormat::Png
        } else {
            ImageFormat::Other
        }
    }

    /// File extension appended to the base name, if the format is uploadable.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            ImageFormat::Jpeg => Some("jpg"),
            ImageFormat::Png => Some("png"),
            ImageFormat::Other => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Other => "application/octet-stream",
        }
    }
}

/// Build the target file name from a base name and detected format.
///
/// Returns `None` unless the trimmed base name is non-empty and the format is
/// a known image format. Characters MediaWiki forbids in titles are replaced
/// with `-`.
pub fn upload_filename(base_name: &str, format: ImageFormat) -> Option<String> {
    let base = base_name.trim();
    if base.is_empty() {
        return None;
    }
    let ext = format.extension()?;
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '#' | '<' | '>' | '[' | ']' | '|' | '{' | '}' | '/' | ':' => '-',
            other => other,
        })
        .collect();
    Some(format!("{}.{}", cleaned, ext))
}
