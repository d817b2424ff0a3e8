//! Filename and ordering helpers shared by the source scanner and the
//! packagers.

use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::path::Path;

lazy_static! {
    /// Matches numeric runs in filenames: "001", "1", "1.5".
    pub static ref NUMBER_REGEX: Regex = Regex::new(r"\d+\.?\d*").unwrap();
}

/// Replaces characters that are unsafe in output filenames.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' | ':' | '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// True when the path's filename starts with a dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Extracts the last numeric run from a filename, for natural ordering.
/// "page_012.jpg" → 12.0, "ch-2.5.png" → 2.5.
pub fn filename_number(path: &Path) -> Option<f64> {
    let file_name = path.file_name()?.to_string_lossy();
    NUMBER_REGEX
        .captures_iter(&file_name)
        .last()
        .and_then(|cap| cap.get(0)?.as_str().parse::<f64>().ok())
}

/// Orders paths by the numeric run in their filenames, falling back to
/// lexicographic order so the result is total and deterministic.
pub fn compare_numeric(a: &Path, b: &Path) -> Ordering {
    match (filename_number(a), filename_number(b)) {
        (Some(an), Some(bn)) => an.partial_cmp(&bn).unwrap_or(Ordering::Equal),
        _ => a.file_name().cmp(&b.file_name()),
    }
}

/// True when the extension is one of the supported page image formats.
pub fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png" | "webp" | "gif")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize_filename("vol: 1/2?"), "vol- 1-2-");
        assert_eq!(sanitize_filename("normal_file.cbz"), "normal_file.cbz");
    }

    #[test]
    fn extracts_last_number() {
        assert_eq!(filename_number(Path::new("page_012.jpg")), Some(12.0));
        assert_eq!(filename_number(Path::new("ch_2.5.png")), Some(2.5));
        assert_eq!(filename_number(Path::new("cover.png")), None);
    }

    #[test]
    fn numeric_ordering_sorts_naturally() {
        let mut names: Vec<PathBuf> = ["p10.jpg", "p2.jpg", "p1.jpg"]
            .iter()
            .map(PathBuf::from)
            .collect();
        names.sort_by(|a, b| compare_numeric(a, b));
        assert_eq!(names[0], PathBuf::from("p1.jpg"));
        assert_eq!(names[2], PathBuf::from("p10.jpg"));
    }

    #[test]
    fn detects_hidden_and_image_files() {
        assert!(is_hidden(Path::new(".DS_Store")));
        assert!(!is_hidden(Path::new("page.jpg")));
        assert!(is_image_file(Path::new("page.WEBP")));
        assert!(!is_image_file(Path::new("notes.txt")));
    }
}
