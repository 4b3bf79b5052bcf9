use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Sniff a media type from leading magic bytes.
pub fn detect_media_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, 0x50, 0x4E, 0x47, ..] => "image/png",
        [0x47, 0x49, 0x46, 0x38, ..] => "image/gif",
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => "image/webp",
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x41, 0x56, 0x45, ..] => "audio/wav",
        [0x49, 0x44, 0x33, ..] | [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] => "audio/mpeg",
        [0x4F, 0x67, 0x67, 0x53, ..] => "audio/ogg",
        [0x66, 0x4C, 0x61, 0x43, ..] => "audio/flac",
        [0x1A, 0x45, 0xDF, 0xA3, ..] => "video/webm",
        [_, _, _, _, 0x66, 0x74, 0x79, 0x70, b'q', b't', b' ', b' ', ..] => "video/quicktime",
        [_, _, _, _, 0x66, 0x74, 0x79, 0x70, b'M', b'4', b'A', b' ', ..] => "audio/mp4",
        [_, _, _, _, 0x66, 0x74, 0x79, 0x70, ..] => "video/mp4",
        [0x25, 0x50, 0x44, 0x46, ..] => "application/pdf",
        _ => {
            tracing::warn!(
                "Unrecognized media format (first 4 bytes: {:02X?}), falling back to {}",
                &bytes[..bytes.len().min(4)],
                OCTET_STREAM
            );
            OCTET_STREAM
        }
    }
}

/// Guess a media type from a file extension.
pub fn mime_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}

/// Only images and audio are embedded inline; video always goes through an
/// upload.
pub fn is_inline_mime(mime_type: &str) -> bool {
    let mime_type = mime_type.trim().to_ascii_lowercase();
    !mime_type.starts_with("video/")
        && (mime_type.starts_with("image/") || mime_type.starts_with("audio/"))
}
