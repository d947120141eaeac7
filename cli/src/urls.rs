use std::path::Path;

use anyhow::Context;
use downloader::extract::is_supported_url;

pub const SAMPLE: &str = "# ytbatch - URLs file
# Add one YouTube URL per line
# Lines starting with # are comments and will be ignored
# Empty lines are also ignored

# Example single video (replace with actual URLs):
# https://www.youtube.com/watch?v=dQw4w9WgXcQ

# Example playlist (replace with actual URLs):
# https://www.youtube.com/playlist?list=PLrAXtmRdnEQy6nuLvzey9DAEdGjNMi56M

# Example short URL:
# https://youtu.be/dQw4w9WgXcQ

# Add your URLs below:

";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UrlList {
    pub urls: Vec<String>,
    /// Line number and content of lines that are not YouTube URLs.
    pub rejected: Vec<(usize, String)>,
}

pub fn parse_urls(content: &str) -> UrlList {
    let mut list = UrlList::default();
    for (index, line) in content.lines().enumerate() {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        if is_supported_url(url) {
            list.urls.push(url.to_owned());
        } else {
            log::warn!("Line {} - Invalid YouTube URL: {}", index + 1, url);
            list.rejected.push((index + 1, url.to_owned()));
        }
    }
    list
}

pub async fn read_url_file(path: &Path) -> anyhow::Result<UrlList> {
    let content = tokio::fs::read_to_string(path).await.with_context(|| {
        format!(
            "Could not read URL file {} (use --create-sample to create one)",
            path.to_string_lossy()
        )
    })?;
    Ok(parse_urls(&content))
}

/// Writes the sample URL file, an existing file is left alone.
pub async fn create_sample(path: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!("{} already exists, not overwriting it", path.to_string_lossy());
    }
    tokio::fs::write(path, SAMPLE)
        .await
        .with_context(|| format!("Could not create sample file {}", path.to_string_lossy()))?;
    log::info!("Sample URLs file created: {}", path.to_string_lossy());
    log::info!("Edit this file and add your YouTube URLs, then run ytbatch again.");
    Ok(())
}
