//! Upload classification: extension, declared MIME type, and magic bytes.
//!
//! An upload is accepted only when all three signals name the same
//! [`FileCategory`]. Checks run in a fixed order so the caller always sees
//! the most specific client-facing message:
//!
//! 1. size limit (413)
//! 2. MIME allow-list (400)
//! 3. extension allow-list (400)
//! 4. MIME and extension agree (400)
//! 5. magic bytes match the category (400)

use serde::Serialize;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";

pub const ALLOWED_MIME_TYPES: &[&str] = &[MIME_PDF, MIME_DOCX, MIME_DOC];

/// Default upload size limit: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const ZIP_SIGNATURE: &[u8] = &[0x50, 0x4b, 0x03, 0x04];
const OLE2_SIGNATURE: &[u8] = &[0xd0, 0xcf, 0x11, 0xe0];

/// The document formats docrag can ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Pdf,
    Docx,
    Doc,
}

impl FileCategory {
    pub const ALL: [FileCategory; 3] = [FileCategory::Pdf, FileCategory::Docx, FileCategory::Doc];

    /// Category for a file name, by its final extension (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileCategory::Pdf),
            "docx" => Some(FileCategory::Docx),
            "doc" => Some(FileCategory::Doc),
            _ => None,
        }
    }

    /// Category for a MIME type. Parameters such as `; charset=` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match normalize_mime(mime).as_str() {
            MIME_PDF => Some(FileCategory::Pdf),
            MIME_DOCX => Some(FileCategory::Docx),
            MIME_DOC => Some(FileCategory::Doc),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileCategory::Pdf => MIME_PDF,
            FileCategory::Docx => MIME_DOCX,
            FileCategory::Doc => MIME_DOC,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileCategory::Pdf => "pdf",
            FileCategory::Docx => "docx",
            FileCategory::Doc => "doc",
        }
    }

    /// Leading bytes every file of this category starts with.
    pub fn signature(&self) -> &'static [u8] {
        match self {
            FileCategory::Pdf => PDF_SIGNATURE,
            FileCategory::Docx => ZIP_SIGNATURE,
            FileCategory::Doc => OLE2_SIGNATURE,
        }
    }

    pub fn matches_signature(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(self.signature())
    }

    /// Short uppercase name used in progress labels ("PDF", "DOCX", "DOC").
    pub fn label(&self) -> &'static str {
        match self {
            FileCategory::Pdf => "PDF",
            FileCategory::Docx => "DOCX",
            FileCategory::Doc => "DOC",
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Client-fixable upload rejection, reported before any state is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No file provided")]
    NoFile,

    #[error("File too large. Maximum size is {}MB", .max_bytes / 1024 / 1024)]
    TooLarge { size: usize, max_bytes: usize },

    #[error("Invalid file type. Only PDF, DOCX, and DOC files are allowed")]
    InvalidType(String),

    #[error("Invalid file extension. Only .pdf, .docx, and .doc files are allowed")]
    InvalidExtension(String),

    #[error("Invalid file type. The .{extension} extension does not match the declared type")]
    TypeMismatch {
        extension: FileCategory,
        declared: FileCategory,
    },

    #[error("Invalid file format")]
    InvalidFormat(FileCategory),
}

impl ValidationError {
    /// HTTP-style status code for the rejection.
    pub fn status_code(&self) -> u16 {
        match self {
            ValidationError::TooLarge { .. } => 413,
            _ => 400,
        }
    }
}

/// Classify an upload, checking size, MIME type, extension, and magic bytes.
///
/// `size` is the declared byte size of the upload and is checked before
/// anything else, so oversized uploads are rejected without inspecting
/// their content.
pub fn classify(
    file_name: &str,
    mime: &str,
    size: usize,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<FileCategory, ValidationError> {
    classify_with(file_name, mime, size, bytes, max_bytes, |category, bytes| {
        category.matches_signature(bytes)
    })
}

/// [`classify`] with the magic-byte check supplied by the caller, so format
/// handlers can own their signature test.
pub fn classify_with(
    file_name: &str,
    mime: &str,
    size: usize,
    bytes: &[u8],
    max_bytes: usize,
    signature_ok: impl Fn(FileCategory, &[u8]) -> bool,
) -> Result<FileCategory, ValidationError> {
    if size > max_bytes {
        return Err(ValidationError::TooLarge { size, max_bytes });
    }

    let declared =
        FileCategory::from_mime(mime).ok_or_else(|| ValidationError::InvalidType(mime.to_string()))?;

    let category = FileCategory::from_file_name(file_name)
        .ok_or_else(|| ValidationError::InvalidExtension(file_name.to_string()))?;

    if category != declared {
        return Err(ValidationError::TypeMismatch {
            extension: category,
            declared,
        });
    }

    if !signature_ok(category, bytes) {
        return Err(ValidationError::InvalidFormat(category));
    }

    Ok(category)
}
