pub mod args;
pub mod observer;
pub mod settings;
pub mod urls;

use anyhow::Context;
use downloader::catalog::{self, CUSTOM_KEY};
use downloader::extract::ytdlp::YtDlp;
use downloader::session::{ItemState, SessionState};

use self::args::Args;
use self::observer::LoggingObserver;
use self::settings::SettingManager;

fn print_qualities() {
    for quality in catalog::entries() {
        println!("{:<8} {:<32} {}", quality.key, quality.label, quality.expression);
    }
    println!("{:<8} {:<32} --custom-format <EXPR>", CUSTOM_KEY, "Custom format");
}

/// Runs one batch. Returns `Ok(true)` when every item was downloaded.
pub async fn run(args: Args) -> anyhow::Result<bool> {
    if args.list_qualities {
        print_qualities();
        return Ok(true);
    }
    let file = args
        .file
        .clone()
        .context("No URL file given, see --help")?;
    if args.create_sample {
        urls::create_sample(&file).await?;
        return Ok(true);
    }

    let setting_manager = SettingManager::load(args.settings.clone()).await?;
    let mut settings = setting_manager.read().await.clone();
    args.apply(&mut settings);
    if args.save_settings {
        // only settings a session would accept are persisted
        settings.download.format_expression()?;
        setting_manager.write(settings.clone()).await?;
    }

    log::info!("Reading URLs from {}", file.to_string_lossy());
    let list = urls::read_url_file(&file).await?;
    if list.urls.is_empty() {
        anyhow::bail!(
            "No valid YouTube URLs found in {}",
            file.to_string_lossy()
        );
    }
    log::info!("Found {} valid YouTube URLs", list.urls.len());

    let config = settings.download;
    let subtitles = config.subtitle_options();
    log::info!(
        "Output directory: {}, subtitles: {}",
        config.destination.to_string_lossy(),
        match (subtitles.download, subtitles.embed) {
            (false, _) => "no".to_owned(),
            (true, true) => format!("embedded ({})", subtitles.languages.join(",")),
            (true, false) => format!("separate files ({})", subtitles.languages.join(",")),
        }
    );
    tokio::fs::create_dir_all(&config.destination)
        .await
        .with_context(|| {
            format!(
                "Could not create output directory {}",
                config.destination.to_string_lossy()
            )
        })?;

    let (orchestrator, tracker) = downloader::init(YtDlp::new(settings.ytdlp));
    tracker.add_observer(LoggingObserver::default()).await;
    orchestrator.start(list.urls, config).await?;

    let canceller = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Batch processing interrupted by user, cancelling...");
                orchestrator.cancel().await;
            }
        })
    };
    let view = orchestrator.wait().await;
    canceller.abort();

    let summary = view.summary();
    for item in view.items.iter().filter(|i| i.state == ItemState::Failed) {
        log::error!(
            "Failed: {} ({})",
            item.url,
            item.error.as_deref().unwrap_or("unknown error")
        );
    }
    log::info!("Final summary: {}", summary);
    let success = view.state == SessionState::Completed && summary.all_succeeded();
    if success {
        log::info!("All downloads completed successfully!");
    }
    Ok(success)
}
