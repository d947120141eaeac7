use std::path::Path;

/// Extracts filesize from path, if file does not exist or read fails the function returns 0
pub async fn file_size(fpath: &Path) -> u64 {
    match tokio::fs::metadata(fpath).await {
        Ok(metadata) => metadata.len(),
        _ => 0,
    }
}
pub const HALF_SECOND: std::time::Duration = std::time::Duration::from_millis(500);
pub type TestResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const MAX_FILENAME_LEN: usize = 200;

/**
 * Makes a collection title safe to use as a directory name.
 * Illegal characters become '_', surrounding blanks and dots are stripped,
 * the result is capped at 200 characters.
 */
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == ' ' || c == '.');
    let capped: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    if capped.is_empty() {
        "Untitled".to_owned()
    } else {
        capped
    }
}

pub fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Clamps a percentage into 0..=100, NaN counts as 0.
pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}
