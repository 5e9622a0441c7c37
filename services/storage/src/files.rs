/// Image formats accepted for upload
const VALID_IMAGE_FORMATS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Units for [`format_file_size`]. GB is the largest.
const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Case-insensitive check against the accepted image formats
pub fn validate_image_format(format: &str) -> bool {
    let format = format.to_lowercase();
    VALID_IMAGE_FORMATS.contains(&format.as_str())
}

/// Human readable size, e.g. `2048576` -> `"1.95 MB"`.
///
/// The quotient is rounded to two decimals with trailing zeros dropped.
/// Sizes of 1024 GB and above stay in GB.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let k = 1024f64;
    let bytes = bytes as f64;
    let index = ((bytes.ln() / k.ln()).floor() as usize).min(SIZE_UNITS.len() - 1);
    let value = bytes / k.powi(index as i32);
    let rounded = (value * 100.0).round() / 100.0;

    format!("{} {}", rounded, SIZE_UNITS[index])
}

/// `photo.png` -> `photo_thumbnail.png`; names without an extension get `.jpg`
pub fn generate_thumbnail_filename(original_filename: &str) -> String {
    match original_filename.rsplit_once('.') {
        Some((name, extension)) => format!("{name}_thumbnail.{extension}"),
        None => format!("{original_filename}_thumbnail.jpg"),
    }
}

/// Lowercased text after the last `.`, or empty
pub fn get_file_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
        .unwrap_or_default()
}

/// MIME type for an image format
pub fn content_type_for(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_image_format() {
        assert!(validate_image_format("jpg"));
        assert!(validate_image_format("JPEG"));
        assert!(validate_image_format("WebP"));
        assert!(!validate_image_format("tiff"));
        assert!(!validate_image_format(""));
        assert!(!validate_image_format(".png"));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(500), "500 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2048576), "1.95 MB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn test_format_file_size_rounds_half_up() {
        // 1152 / 1024 = 1.125 exactly
        assert_eq!(format_file_size(1152), "1.13 KB");
    }

    #[test]
    fn test_format_file_size_caps_at_gb() {
        assert_eq!(format_file_size(2 * 1024u64.pow(4)), "2048 GB");
    }

    #[test]
    fn test_generate_thumbnail_filename() {
        assert_eq!(generate_thumbnail_filename("photo.png"), "photo_thumbnail.png");
        assert_eq!(generate_thumbnail_filename("noext"), "noext_thumbnail.jpg");
        assert_eq!(
            generate_thumbnail_filename("archive.tar.gz"),
            "archive.tar_thumbnail.gz"
        );
        assert_eq!(generate_thumbnail_filename(".hidden"), "_thumbnail.hidden");
    }

    #[test]
    fn test_get_file_extension() {
        assert_eq!(get_file_extension("sample_image.JPG"), "jpg");
        assert_eq!(get_file_extension("archive.tar.gz"), "gz");
        assert_eq!(get_file_extension("noext"), "");
        assert_eq!(get_file_extension("trailing."), "");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("jpeg"), "image/jpeg");
        assert_eq!(content_type_for("JPG"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("unknown"), "application/octet-stream");
    }
}
