//! Static asset helpers.
//!
//! Extension classification, content types, emitted-name templates and
//! inline `data:` URIs for images and other binary files.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::Path;
use wirepack_util::hash::short_hash;

/// Extensions that are recognized as complete file names even when they are
/// not in the resolver's extension list.
pub const KNOWN_ASSET_EXTENSIONS: &[&str] = &[
    "css", "scss", "sass", "less", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "avif",
    "woff", "woff2", "ttf", "otf", "eot", "html", "txt", "wasm", "mp4", "webm", "mp3",
];

/// Default emitted-name template for images.
pub const DEFAULT_IMAGE_NAME: &str = "img/[name].[hash:7].[ext]";

/// Default emitted-name template for files that no rule matched.
pub const DEFAULT_ASSET_NAME: &str = "[name].[hash:7].[ext]";

/// Lowercase file extension, or empty.
#[must_use]
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Content type for a served file, by extension.
#[must_use]
pub fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map_or("", |(_, e)| e);
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Render an emitted-asset name template.
///
/// Supports `[name]` (file stem), `[ext]` (extension without dot), `[hash]`
/// (full content hash) and `[hash:N]` (first N hex digits).
#[must_use]
pub fn render_name(template: &str, path: &Path, bytes: &[u8]) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("asset");
    let ext = extension_of(path);

    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find(']') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = &rest[start + 1..start + len];
        match token {
            "name" => out.push_str(stem),
            "ext" => out.push_str(&ext),
            "hash" => out.push_str(&short_hash(bytes, 64)),
            _ => match token.strip_prefix("hash:").and_then(|n| n.parse::<usize>().ok()) {
                Some(n) => out.push_str(&short_hash(bytes, n)),
                None => out.push_str(&rest[start..=start + len]),
            },
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Inline `data:` URI for a file's bytes.
#[must_use]
pub fn data_uri(path: &Path, bytes: &[u8]) -> String {
    let mime = content_type(&path.to_string_lossy());
    let mime = mime.split(';').next().unwrap_or(mime);
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type("/main.js"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("img/logo.PNG"), "image/png");
        assert_eq!(content_type("/static/readme"), "application/octet-stream");
    }

    #[test]
    fn test_render_name_template() {
        let path = Path::new("/p/src/assets/logo.png");
        let name = render_name(DEFAULT_IMAGE_NAME, path, b"hello world");
        assert_eq!(name, "img/logo.d74981e.png");

        let full = render_name("[hash].[ext]", path, b"hello world");
        assert_eq!(full.len(), 64 + 4);

        let untouched = render_name("[name]-[unknown].[ext]", path, b"x");
        assert_eq!(untouched, "logo-[unknown].png");
    }

    #[test]
    fn test_data_uri() {
        let uri = data_uri(Path::new("a.gif"), b"GIF89a");
        assert_eq!(uri, "data:image/gif;base64,R0lGODlh");
    }
}
