//! MIME detection and support filtering.
//!
//! The `file` tool is the primary source; when it is missing or confused the
//! lowercased extension decides. Only `image/*` and `video/*` flow onward;
//! editor and project formats are rejected even when they technically carry
//! an image MIME.

use std::path::Path;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::subprocess::run_tool;
use crate::tools::Toolchain;

/// Formats that look like images but are working documents, not media to
/// recompress.
const EDITOR_EXTENSIONS: &[&str] = &[
    "psd", "psb", "ico", "icns", "xcf", "ai", "sketch", "fig", "svg", "eps",
];

const MIME_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn extension_mime(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        "heic" | "heif" => "image/heic",
        "avif" => "image/avif",
        "jxl" => "image/jxl",
        "mp4" | "m4v" => "video/mp4",
        "mov" | "qt" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mpg" | "mpeg" => "video/mpeg",
        "ts" | "mts" | "m2ts" => "video/mp2t",
        "3gp" => "video/3gpp",
        _ => return None,
    })
}

/// Probe the MIME type, preferring the `file` tool.
pub fn probe_mime(tools: &Toolchain, path: &Path, cancel: &CancelToken) -> Option<String> {
    if let Some(ref file_tool) = tools.file {
        let args = vec![
            "-b".to_string(),
            "--mime-type".to_string(),
            path.display().to_string(),
        ];
        if let Ok(out) = run_tool(file_tool, &args, cancel, Some(MIME_PROBE_TIMEOUT)) {
            if out.success() {
                let mime = out.stdout.trim().to_string();
                // `file` reports octet-stream for formats its magic database
                // predates (jxl, some avif); let the extension refine those.
                if !mime.is_empty() && mime != "application/octet-stream" {
                    return Some(mime);
                }
            }
        }
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    extension_mime(&ext).map(|m| m.to_string())
}

/// True when the file should flow through the pipeline at all.
pub fn is_supported(mime: &str, ext: &str) -> bool {
    if EDITOR_EXTENSIONS.contains(&ext) {
        return false;
    }
    // image/vnd.adobe.photoshop and friends are editor containers too.
    if mime.contains("photoshop") || mime.contains("illustrator") {
        return false;
    }
    mime.starts_with("image/") || mime.starts_with("video/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_map_covers_common_media() {
        assert_eq!(extension_mime("jpg"), Some("image/jpeg"));
        assert_eq!(extension_mime("heic"), Some("image/heic"));
        assert_eq!(extension_mime("mov"), Some("video/quicktime"));
        assert_eq!(extension_mime("mkv"), Some("video/x-matroska"));
        assert_eq!(extension_mime("txt"), None);
        assert_eq!(extension_mime(""), None);
    }

    #[test]
    fn test_editor_formats_are_unsupported() {
        assert!(!is_supported("image/vnd.adobe.photoshop", "psd"));
        assert!(!is_supported("image/x-icon", "ico"));
        assert!(!is_supported("image/svg+xml", "svg"));
    }

    #[test]
    fn test_plain_media_is_supported() {
        assert!(is_supported("image/jpeg", "jpg"));
        assert!(is_supported("image/gif", "gif"));
        assert!(is_supported("video/quicktime", "mov"));
    }

    #[test]
    fn test_non_media_is_unsupported() {
        assert!(!is_supported("text/plain", "txt"));
        assert!(!is_supported("application/pdf", "pdf"));
        assert!(!is_supported("application/zip", "zip"));
    }

    #[test]
    fn test_probe_falls_back_to_extension_without_file_tool() {
        let tools = Toolchain::unavailable();
        let mime = probe_mime(&tools, Path::new("/media/photo.png"), &CancelToken::new());
        assert_eq!(mime.as_deref(), Some("image/png"));

        let none = probe_mime(&tools, Path::new("/media/notes.txt"), &CancelToken::new());
        assert!(none.is_none());
    }
}
