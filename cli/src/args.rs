use std::path::PathBuf;

use clap::Parser;
use downloader::catalog::CUSTOM_KEY;

use crate::settings::Settings;

/// Command line options, anything given here overrides the settings file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ytbatch")]
#[command(version)]
#[command(about = "Batch YouTube downloader, processes URLs from a file", long_about = None)]
pub struct Args {
    /// Text file with one YouTube URL per line, lines starting with '#' are ignored
    #[arg(required_unless_present = "list_qualities")]
    pub file: Option<PathBuf>,

    /// Output directory for downloads
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Quality key or label, see --list-qualities
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Raw yt-dlp format expression, implies quality 'custom'
    #[arg(long)]
    pub custom_format: Option<String>,

    /// Skip downloading subtitles
    #[arg(long)]
    pub no_subtitles: bool,

    /// Embed subtitles in the video files instead of separate files
    #[arg(long)]
    pub embed_subtitles: bool,

    /// Subtitle languages, comma separated (e.g. "en,de")
    #[arg(long, value_delimiter = ',')]
    pub sub_langs: Option<Vec<String>>,

    /// Path of the yt-dlp executable
    #[arg(long = "yt-dlp")]
    pub yt_dlp: Option<PathBuf>,

    /// Settings file (default: ~/.ytbatch/settings.yaml)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Store the effective options in the settings file
    #[arg(long)]
    pub save_settings: bool,

    /// Create a sample URL file at FILE and exit
    #[arg(long)]
    pub create_sample: bool,

    /// List the available qualities and exit
    #[arg(long)]
    pub list_qualities: bool,
}

impl Args {
    pub fn apply(&self, settings: &mut Settings) {
        let download = &mut settings.download;
        if let Some(output) = &self.output {
            download.destination = output.clone();
        }
        if let Some(quality) = &self.quality {
            download.quality = quality.clone();
        }
        if let Some(expression) = &self.custom_format {
            download.quality = CUSTOM_KEY.to_owned();
            download.custom_format = Some(expression.clone());
        }
        if self.no_subtitles {
            download.download_subtitles = false;
        }
        if self.embed_subtitles {
            download.embed_subtitles = true;
        }
        if let Some(langs) = &self.sub_langs {
            download.subtitle_languages = langs.clone();
        }
        if let Some(binary) = &self.yt_dlp {
            settings.ytdlp.binary = binary.clone();
            settings.ytdlp.launcher_args.clear();
        }
    }
}
