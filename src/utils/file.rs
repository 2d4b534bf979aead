//! Content hashing and file-type helpers for uploads.

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of uploaded bytes as lowercase hex.
pub fn calculate_checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Lowercased extension of a filename, if it has one.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Check if extension indicates a format the plain-text extractor cannot read.
pub fn is_binary_extension(ext: &str) -> bool {
    matches!(
        ext,
        "exe"
            | "dll"
            | "so"
            | "dylib"
            | "a"
            | "o"
            | "obj"
            | "png"
            | "jpg"
            | "jpeg"
            | "gif"
            | "bmp"
            | "ico"
            | "webp"
            | "tiff"
            | "mp3"
            | "mp4"
            | "avi"
            | "mkv"
            | "mov"
            | "wav"
            | "flac"
            | "zip"
            | "tar"
            | "gz"
            | "bz2"
            | "xz"
            | "7z"
            | "rar"
            | "pdf"
            | "doc"
            | "docx"
            | "xls"
            | "xlsx"
            | "ppt"
            | "pptx"
            | "odt"
            | "ods"
            | "odp"
            | "epub"
            | "woff"
            | "woff2"
            | "ttf"
            | "otf"
            | "class"
            | "jar"
            | "pyc"
            | "db"
            | "sqlite"
            | "sqlite3"
            | "bin"
            | "dat"
    )
}

/// Sanitize a filename for use inside a blob key.
///
/// Replaces characters that are not allowed in filenames on common operating
/// systems (Windows, macOS, Linux) with hyphens. Falls back to `upload` when
/// nothing usable is left.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect::<String>()
        .trim_matches(|c| c == '-' || c == '.' || c == ' ')
        .to_string();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_checksum() {
        let checksum = calculate_checksum(b"hello world");
        assert_eq!(checksum.len(), 64);
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("Report.PDF"), Some("pdf".to_string()));
        assert_eq!(file_extension("dir.v2/notes"), None);
        assert_eq!(file_extension(".bashrc"), None);
        assert_eq!(file_extension("archive.tar.gz"), Some("gz".to_string()));
    }

    #[test]
    fn test_is_binary_extension() {
        assert!(is_binary_extension("pdf"));
        assert!(is_binary_extension("png"));
        assert!(!is_binary_extension("md"));
        assert!(!is_binary_extension("txt"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_filename("q3: plan?.md"), "q3- plan-.md");
        assert_eq!(sanitize_filename("///"), "upload");
    }
}
