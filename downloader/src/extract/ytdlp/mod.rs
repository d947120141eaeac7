//! [`Extractor`] backed by the `yt-dlp` binary.
//!
//! yt-dlp does the site extraction, the network retries and (through ffmpeg)
//! the merging of separate video and audio streams. This module only builds
//! its command line, streams its progress output and interprets its exit.

pub mod config;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::progress::{parse_progress_line, PROGRESS_TEMPLATE};
use super::{
    watch_url, Collection, CollectionEntry, DownloadRequest, Error, Extractor, ProgressEvent,
    Result,
};
use crate::util::{file_size, mb, sanitize_filename};

use self::config::YtDlpConfig;

const FILEPATH_PREFIX: &str = "FILEPATH|";
const FILEPATH_TEMPLATE: &str = "after_move:FILEPATH|%(filepath)s";
const FORMAT_PREFIX: &str = "FORMAT|";
const FORMAT_TEMPLATE: &str = "before_dl:FORMAT|%(format_id)s";
const SINGLE_VIDEOS_DIR: &str = "Single Videos";
const COLLECTIONS_DIR: &str = "Playlists";
const SUBTITLE_FORMAT: &str = "srt/vtt/best";
const UNKNOWN_COLLECTION: &str = "Unknown Playlist";
const STDERR_TAIL: usize = 20;
/// How long the output readers may take once yt-dlp is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    title: Option<String>,
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

impl FlatEntry {
    fn into_entry(self) -> Option<CollectionEntry> {
        let url = match (self.url, self.id) {
            (Some(url), _) if url.starts_with("http") => url,
            (_, Some(id)) if !id.is_empty() => watch_url(&id),
            _ => return None,
        };
        Some(CollectionEntry {
            url,
            title: self.title,
        })
    }
}

/// Parses the output of `--flat-playlist --dump-single-json`.
pub fn parse_flat_playlist(json: &[u8]) -> Result<Collection> {
    let playlist: FlatPlaylist = serde_json::from_slice(json)?;
    let listed = playlist.entries.len();
    let entries: Vec<CollectionEntry> = playlist
        .entries
        .into_iter()
        .flatten()
        .filter_map(FlatEntry::into_entry)
        .collect();
    Ok(Collection {
        title: playlist
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_COLLECTION.to_owned()),
        unavailable: listed - entries.len(),
        entries,
    })
}

/// A format expression asking for `video+audio` is downloaded as two streams.
/// Only a first guess: the expression may fall back to a single stream, which
/// the `FORMAT|` line printed before the download corrects.
fn expected_streams(format_expression: &str) -> u32 {
    if format_expression.contains('+') {
        2
    } else {
        1
    }
}

/// Merged downloads have a `format_id` like `137+140`.
fn streams_of_format(format_id: &str) -> u32 {
    format_id
        .split('+')
        .filter(|part| !part.trim().is_empty())
        .count()
        .max(1) as u32
}

fn is_merge_failure(error_line: &str) -> bool {
    let line = error_line.to_lowercase();
    ["postprocessing", "ffmpeg", "merger", "merging"]
        .iter()
        .any(|marker| line.contains(marker))
}

/// Turns a failed run into an error, using the last `ERROR:` line yt-dlp printed.
fn classify_failure(stderr: &[String], status: ExitStatus) -> Error {
    let error_line = stderr
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .map(|line| line.trim_start_matches("ERROR:").trim().to_owned());
    match error_line {
        Some(line) if is_merge_failure(&line) => Error::Merge(line),
        Some(line) => Error::Extraction(line),
        None => Error::Extraction(format!("yt-dlp exited with {}", status)),
    }
}

/// Reads one line, decoding it lossily so a stray byte does not end the
/// stream. `None` at the end of the output.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => Some(
            String::from_utf8_lossy(buf)
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        ),
        Err(e) => {
            log::debug!("Reading yt-dlp output failed: {}", e);
            None
        }
    }
}

/// Forwards progress and returns the reported output file. Each stream
/// counts for an equal share of the item, `stream_count` is corrected by the
/// `FORMAT|` line and grows if more files show up than announced.
async fn read_stdout(
    stdout: ChildStdout,
    progress: mpsc::Sender<ProgressEvent>,
    mut stream_count: u32,
) -> Option<PathBuf> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut output = None;
    let mut current_file: Option<String> = None;
    let mut stream_index = 0u32;
    while let Some(line) = next_line(&mut reader, &mut buf).await {
        if let Some(path) = line.strip_prefix(FILEPATH_PREFIX) {
            output = Some(PathBuf::from(path.trim()));
            continue;
        }
        if let Some(format_id) = line.strip_prefix(FORMAT_PREFIX) {
            stream_count = streams_of_format(format_id);
            continue;
        }
        let Some(parsed) = parse_progress_line(&line) else {
            log::debug!("yt-dlp: {}", line);
            continue;
        };
        if parsed.is_side_file() {
            continue;
        }
        if current_file.as_deref() != Some(parsed.filename.as_str()) {
            if current_file.is_some() {
                stream_index += 1;
            }
            current_file = Some(parsed.filename.clone());
        }
        let event = parsed.into_event(stream_index, stream_count.max(stream_index + 1));
        if progress.send(event).await.is_err() {
            log::debug!("Progress receiver dropped, discarding yt-dlp progress");
        }
    }
    output
}

async fn read_stderr(stderr: ChildStderr) -> Vec<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Some(line) = next_line(&mut reader, &mut buf).await {
        log::debug!("yt-dlp stderr: {}", line);
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect()
}

/// Joins an output reader. Processes that inherited the pipe may keep it
/// open, the reader is abandoned after [`READER_GRACE`].
async fn join_reader<T: Default>(mut task: JoinHandle<T>, stream: &str) -> T {
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            log::error!("yt-dlp {} reader failed: {}", stream, e);
            T::default()
        }
        Err(_) => {
            log::warn!("yt-dlp {} is still held open, abandoning it", stream);
            task.abort();
            T::default()
        }
    }
}

/// Kills yt-dlp together with everything it started (ffmpeg, the python
/// launcher). The child leads its own process group, see [`YtDlp::command`].
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // SAFETY: killpg has no memory effects, a stale group only yields ESRCH
    let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::error!("Failed to kill yt-dlp process group {}: {}", pid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[derive(Debug, Clone, Default)]
pub struct YtDlp {
    config: YtDlpConfig,
}

impl YtDlp {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YtDlpConfig {
        &self.config
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .args(&self.config.launcher_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    fn spawn_error(&self, err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound(self.config.binary.to_string_lossy().to_string())
        } else {
            Error::Io(err)
        }
    }

    /// Single videos land in `Single Videos/`, collection entries in a numbered
    /// folder per collection under `Playlists/`.
    pub fn output_template(request: &DownloadRequest) -> PathBuf {
        match &request.collection {
            None => request
                .destination
                .join(SINGLE_VIDEOS_DIR)
                .join("%(title)s.%(ext)s"),
            Some(collection) => request
                .destination
                .join(COLLECTIONS_DIR)
                .join(sanitize_filename(&collection.title))
                .join(format!("{:02} - %(title)s.%(ext)s", collection.index)),
        }
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "--socket-timeout".to_owned(),
            self.config.socket_timeout_secs.to_string(),
            "--extractor-retries".to_owned(),
            self.config.extractor_retries.to_string(),
        ]
    }

    pub fn build_listing_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--flat-playlist".to_owned(),
            "--dump-single-json".to_owned(),
            "--no-warnings".to_owned(),
        ];
        args.extend(self.common_args());
        args.extend(self.config.extra_args.iter().cloned());
        args.push("--".to_owned());
        args.push(url.to_owned());
        args
    }

    pub fn build_download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let mut args = vec![
            "-f".to_owned(),
            request.format_expression.clone(),
            "--newline".to_owned(),
            "--progress".to_owned(),
            "--progress-template".to_owned(),
            PROGRESS_TEMPLATE.to_owned(),
            "--print".to_owned(),
            FORMAT_TEMPLATE.to_owned(),
            "--print".to_owned(),
            FILEPATH_TEMPLATE.to_owned(),
            "--no-playlist".to_owned(),
            "--restrict-filenames".to_owned(),
            "--retries".to_owned(),
            self.config.retries.to_string(),
            "--fragment-retries".to_owned(),
            self.config.fragment_retries.to_string(),
            "--sleep-interval".to_owned(),
            self.config.sleep_interval_secs.to_string(),
            "--max-sleep-interval".to_owned(),
            self.config.max_sleep_interval_secs.to_string(),
        ];
        args.extend(self.common_args());
        args.push("-o".to_owned());
        args.push(
            Self::output_template(request)
                .to_string_lossy()
                .to_string(),
        );

        let subtitles = &request.subtitles;
        if subtitles.download {
            args.extend([
                "--write-subs".to_owned(),
                "--write-auto-subs".to_owned(),
                "--sub-langs".to_owned(),
                subtitles.languages.join(","),
                "--sub-format".to_owned(),
                SUBTITLE_FORMAT.to_owned(),
            ]);
            if subtitles.embed {
                args.push("--embed-subs".to_owned());
            }
        }

        args.extend(self.config.extra_args.iter().cloned());
        args.push("--".to_owned());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn list_collection(&self, url: &str) -> Result<Collection> {
        log::info!("Listing collection: {}", url);
        let child = self
            .command()
            .args(self.build_listing_args(url))
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let pid = child.id();
        // the child is killed on drop if the timeout fires first
        let output = tokio::time::timeout(self.config.listing_timeout(), child.wait_with_output())
            .await
            .map_err(|_| {
                kill_process_group(pid);
                Error::Extraction(format!(
                    "Timed out listing collection after {}s",
                    self.config.listing_timeout_secs
                ))
            })??;
        if !output.status.success() {
            let stderr: Vec<String> = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_owned)
                .collect();
            return Err(classify_failure(&stderr, output.status));
        }
        let collection = parse_flat_playlist(&output.stdout)?;
        if collection.unavailable > 0 {
            log::warn!(
                "{} videos in '{}' are unavailable (private/deleted)",
                collection.unavailable,
                collection.title
            );
        }
        log::info!(
            "Collection '{}': {} videos ready for download",
            collection.title,
            collection.entries.len()
        );
        Ok(collection)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(parent) = Self::output_template(request).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args = self.build_download_args(request);
        log::info!(
            "Spawning {} for {}",
            self.config.binary.to_string_lossy(),
            request.url
        );
        log::debug!("yt-dlp arguments: {:?}", args);
        let mut child = self
            .command()
            .args(&args)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Extraction("yt-dlp stdout was not captured".to_owned()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Extraction("yt-dlp stderr was not captured".to_owned()))?;
        let stream_count = expected_streams(&request.format_expression);
        let stdout_task = tokio::spawn(read_stdout(stdout, progress, stream_count));
        let stderr_task = tokio::spawn(read_stderr(stderr));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                log::info!("Cancellation requested, killing yt-dlp for {}", request.url);
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    log::error!("Failed to kill yt-dlp for {}: {}", request.url, e);
                }
                join_reader(stdout_task, "stdout").await;
                join_reader(stderr_task, "stderr").await;
                return Err(Error::Cancelled);
            }
        };

        let output = join_reader(stdout_task, "stdout").await;
        let stderr = join_reader(stderr_task, "stderr").await;
        if !status.success() {
            let err = classify_failure(&stderr, status);
            log::error!("yt-dlp failed for {}: {}", request.url, err);
            return Err(err);
        }
        let path = output.ok_or_else(|| {
            Error::Extraction("yt-dlp finished without reporting an output file".to_owned())
        })?;
        log::info!(
            "Download completed successfully: {}, {:.1}MB",
            path.to_string_lossy(),
            mb(file_size(&path).await)
        );
        Ok(path)
    }
}
