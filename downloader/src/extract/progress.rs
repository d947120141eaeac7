use serde::{Deserialize, Serialize};

/// Marker yt-dlp prefixes to progress lines, see `PROGRESS_TEMPLATE`.
pub const PROGRESS_PREFIX: &str = "PROGRESS|";
/// Progress template handed to yt-dlp. The filename goes last as it may contain '|'.
pub const PROGRESS_TEMPLATE: &str = "download:PROGRESS|%(progress.downloaded_bytes)s|%(progress.total_bytes,progress.total_bytes_estimate)s|%(progress.fragment_index)s|%(progress.fragment_count)s|%(progress.filename)s";

/// One progress report from an extractor while it downloads a single item.
/// A download may consist of several streams (video + audio) which are merged
/// afterwards, `stream_index`/`stream_count` place this report among them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub fragment_index: Option<u64>,
    pub fragment_count: Option<u64>,
    pub stream_index: u32,
    pub stream_count: u32,
}

impl ProgressEvent {
    pub fn new(bytes_downloaded: u64, bytes_total: Option<u64>) -> Self {
        Self {
            bytes_downloaded,
            bytes_total,
            fragment_index: None,
            fragment_count: None,
            stream_index: 0,
            stream_count: 1,
        }
    }

    /// Progress of the current stream in 0.0..=1.0, bytes take precedence over fragments.
    fn stream_fraction(&self) -> Option<f64> {
        match (self.bytes_total, self.fragment_index, self.fragment_count) {
            (Some(total), _, _) if total > 0 => {
                Some(self.bytes_downloaded as f64 / total as f64)
            }
            (_, Some(index), Some(count)) if count > 0 => Some(index as f64 / count as f64),
            _ => None,
        }
        .map(|value| value.clamp(0.0, 1.0))
    }

    /// Progress of the whole item in percent, `None` if the extractor could not tell.
    pub fn percent(&self) -> Option<f64> {
        let count = self.stream_count.max(1);
        let index = self.stream_index.min(count - 1);
        self.stream_fraction()
            .map(|fraction| (index as f64 + fraction) / count as f64 * 100.0)
    }
}

/// A parsed yt-dlp progress line, the filename tells streams and subtitle files apart.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub fragment_index: Option<u64>,
    pub fragment_count: Option<u64>,
    pub filename: String,
}

impl ProgressLine {
    /// Subtitle and thumbnail side files report progress too, they don't count for the item.
    pub fn is_side_file(&self) -> bool {
        let name = self.filename.to_lowercase();
        [".vtt", ".srt", ".ass", ".lrc", ".ttml", ".srv3", ".json3", ".jpg", ".webp", ".png"]
            .iter()
            .any(|ext| name.ends_with(ext))
    }

    pub fn into_event(self, stream_index: u32, stream_count: u32) -> ProgressEvent {
        ProgressEvent {
            bytes_downloaded: self.bytes_downloaded,
            bytes_total: self.bytes_total,
            fragment_index: self.fragment_index,
            fragment_count: self.fragment_count,
            stream_index,
            stream_count,
        }
    }
}

fn parse_field(field: &str) -> Option<u64> {
    match field.trim() {
        "" | "NA" | "None" => None,
        value => value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64),
    }
}

/// Parses a line printed through `PROGRESS_TEMPLATE`, anything else yields `None`.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let rest = line.trim_end().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.splitn(5, '|');
    let bytes_downloaded = parse_field(fields.next()?)?;
    let bytes_total = parse_field(fields.next()?);
    let fragment_index = parse_field(fields.next()?);
    let fragment_count = parse_field(fields.next()?);
    let filename = fields.next().unwrap_or_default().to_owned();
    Some(ProgressLine {
        bytes_downloaded,
        bytes_total,
        fragment_index,
        fragment_count,
        filename,
    })
}
