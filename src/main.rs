//! Bazaar Assistant - command line entry point
//!
//! Runs the live scan loop or the offline detector / matcher tools.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bazaar_assistant::capture::frame::CapturedFrame;
use bazaar_assistant::config::{self, AppConfig};
use bazaar_assistant::scan::{load_detector, open_matcher};
use bazaar_assistant::vision::{FeatureMatcher, MatchResult, SizeCategory};

/// Bazaar Assistant - real-time item and monster recognition
#[derive(Parser, Debug)]
#[command(name = "bazaar-assistant")]
#[command(about = "Read-only recognition of The Bazaar items and monsters")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scan loop and print events
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Rebuild the item and monster descriptor caches
    BuildCache,
    /// Run the detector on an image file
    Detect { image: PathBuf },
    /// Match a cropped card or monster image against the library
    Match {
        image: PathBuf,
        /// Size bucket to search (Small, Medium, Large)
        #[arg(long, default_value = "Medium", conflicts_with = "monster")]
        size: String,
        /// Search the monster library instead
        #[arg(long)]
        monster: bool,
    },
    /// Teach the matcher a new crop for a catalog id
    Remember { id: String, image: PathBuf },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let app_config = config::load_or_default(&config_path)?;

    match args.command.unwrap_or(Command::Run { seconds: None }) {
        Command::Run { seconds } => run(app_config, config_path, seconds),
        Command::BuildCache => build_cache(&app_config),
        Command::Detect { image } => detect(&app_config, &image),
        Command::Match { image, size, monster } => match_image(&app_config, &image, &size, monster),
        Command::Remember { id, image } => remember(&app_config, &id, &image),
    }
}

#[cfg(feature = "desktop")]
fn run(app_config: AppConfig, config_path: PathBuf, seconds: Option<u64>) -> Result<()> {
    use bazaar_assistant::platform::desktop::DesktopFactory;
    use bazaar_assistant::scan::ScanCoordinator;
    use crossbeam_channel::RecvTimeoutError;
    use std::time::{Duration, Instant};

    info!("Starting Bazaar Assistant...");

    let config_path = config_path.exists().then_some(config_path);
    let mut coordinator = ScanCoordinator::start(DesktopFactory, app_config.into_shared(), config_path)?;
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match coordinator.events().recv_timeout(Duration::from_millis(250)) {
            Ok(event) => {
                let line = serde_json::to_string(&event).context("Failed to serialize event")?;
                info!("{}: {}", event.name(), line);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    coordinator.stop();
    let stats = coordinator.stats();
    info!(
        "Processed {} frames, {} recognition attempts",
        stats.frames_processed, stats.recognition_attempts
    );
    Ok(())
}

#[cfg(not(feature = "desktop"))]
fn run(_app_config: AppConfig, _config_path: PathBuf, _seconds: Option<u64>) -> Result<()> {
    bail!("The scan loop needs desktop adapters; rebuild with `--features desktop`")
}

fn build_cache(app_config: &AppConfig) -> Result<()> {
    let matcher = FeatureMatcher::open_rebuilt(app_config.library_paths(), app_config.matcher.clone())
        .context("Failed to rebuild descriptor caches")?;
    info!(
        "Rebuilt descriptor cache: {} items, {} monsters",
        matcher.item_count(),
        matcher.monster_count()
    );
    Ok(())
}

fn detect(app_config: &AppConfig, image_path: &Path) -> Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("Failed to open {:?}", image_path))?
        .to_rgba8();
    let mut detector = load_detector(app_config)?;
    let report = detector.detect(&CapturedFrame::from_rgba(image));

    for det in &report.detections {
        println!(
            "{:<12} {:.3}  x={} y={} w={} h={}",
            det.class.label(),
            det.confidence,
            det.bbox.x,
            det.bbox.y,
            det.bbox.width,
            det.bbox.height
        );
    }
    println!(
        "{} detections: pre {:?}, infer {:?}, post {:?}, total {:?}",
        report.detections.len(),
        report.timings.preprocess,
        report.timings.inference,
        report.timings.postprocess,
        report.timings.total()
    );
    Ok(())
}

fn match_image(app_config: &AppConfig, image_path: &Path, size: &str, monster: bool) -> Result<()> {
    let crop = image::open(image_path)
        .with_context(|| format!("Failed to open {:?}", image_path))?
        .to_rgb8();
    let matcher = open_matcher(app_config)?;

    let results = if monster {
        matcher.match_monster_character(&crop)
    } else {
        let Some(size) = SizeCategory::from_name(size) else {
            bail!("Unknown size category {:?} (expected Small, Medium or Large)", size);
        };
        matcher.match_item(&crop, size)
    };

    print_matches(&results, |id| matcher.catalog().name_of(id).map(str::to_string));
    Ok(())
}

fn print_matches(results: &[MatchResult], name_of: impl Fn(&str) -> Option<String>) {
    if results.is_empty() {
        println!("No match");
        return;
    }
    for result in results {
        let name = name_of(&result.id).unwrap_or_default();
        println!("{:<24} {:.3}  {}", result.id, result.score, name);
    }
}

fn remember(app_config: &AppConfig, id: &str, image_path: &Path) -> Result<()> {
    let crop = image::open(image_path)
        .with_context(|| format!("Failed to open {:?}", image_path))?
        .to_rgb8();
    let mut matcher = open_matcher(app_config)?;
    matcher
        .remember(id, &crop)
        .with_context(|| format!("Failed to remember {:?}", id))?;
    info!("Remembered {} from {:?}", id, image_path);
    Ok(())
}
