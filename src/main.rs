//! keytally CLI
//!
//! Privacy-first keystroke metrics.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use keytally::{
    collector::{Collector, CollectorConfig},
    config::Config,
    core::snapshot::StatsSnapshot,
    engine::{Engine, EngineSettings},
    store::{Store, StoreSettings},
    transparency::{create_shared_log_with_persistence, SharedDiagnostics},
    Timeframe, PRIVACY_DECLARATION, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "keytally")]
#[command(version = VERSION)]
#[command(about = "Privacy-first keystroke metrics", long_about = None)]
struct Cli {
    /// Log filter (tracing EnvFilter syntax); overrides RUST_LOG
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest key events (one JSON object per line) until input ends or Ctrl+C
    Start {
        /// Read events from this file instead of standard input
        #[arg(long, short)]
        input: Option<PathBuf>,
    },

    /// Show typing statistics
    Stats {
        /// Timeframe: 1h, 12h, 24h, 7d, 30d or all
        #[arg(long, short, default_value = "24h")]
        timeframe: Timeframe,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all stored statistics
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    /// Pause data collection
    Pause,

    /// Resume data collection
    Resume,

    /// Show current collection status
    Status,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref());

    let result = match cli.command {
        Commands::Start { input } => cmd_start(input),
        Commands::Stats { timeframe, json } => cmd_stats(timeframe, json),
        Commands::Reset { yes } => cmd_reset(yes),
        Commands::Pause => cmd_pause(),
        Commands::Resume => cmd_resume(),
        Commands::Status => cmd_status(),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
        Commands::Config => cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so `stats --json` output stays clean.
fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            eprintln!("Warning: Invalid log filter '{directives}': {e}");
            EnvFilter::new("keytally=info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keytally=info")),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_engine(config: &Config, diagnostics: SharedDiagnostics) -> Result<Engine> {
    config
        .ensure_directories()
        .context("failed to create data directory")?;
    let store = Store::open(
        config.database_path(),
        StoreSettings::from_config(config)?,
        diagnostics.clone(),
    )
    .context("failed to open aggregate store")?;
    let settings = EngineSettings::from_config(config)?;
    Ok(Engine::new(settings, Arc::new(store), diagnostics))
}

fn cmd_start(input: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;

    println!("keytally v{VERSION}");
    println!();

    let transparency_log = create_shared_log_with_persistence(config.transparency_path());
    let diagnostics: SharedDiagnostics = transparency_log.clone();
    let engine = open_engine(&config, diagnostics)?;

    let collector_config = CollectorConfig::default();
    let mut collector = match &input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Collector::new(std::io::BufReader::new(file), collector_config)
        }
        None => Collector::stdin(collector_config),
    };

    println!("Database: {}", config.database_path().display());
    println!(
        "Input: {}",
        input
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    );
    println!("Flush every {}s or {} events", config.flush_interval.as_secs(), config.flush_threshold);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    // `keytally pause/resume` from another process flips the config file.
    let mut paused = config.paused;
    let mut last_config_check = Instant::now();
    if paused {
        println!("Collection is currently paused.");
        println!("Run `keytally resume` to start collecting.");
        println!();
    }

    collector.start().context("failed to start collector")?;
    engine.start().context("failed to start flush timer")?;
    info!("collection started");

    let receiver = collector.receiver().clone();
    while running.load(Ordering::SeqCst) {
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;
                    if paused {
                        info!("collection paused");
                        // Count what was typed before the pause.
                        if let Err(e) = engine.flush() {
                            warn!(error = %e, "flush on pause failed");
                        }
                    } else {
                        info!("collection resumed");
                    }
                }
            }
            last_config_check = Instant::now();
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                // Events that arrive while paused are discarded.
                if !paused {
                    engine.ingest(event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("input closed");
                break;
            }
        }
    }

    println!();
    println!("Stopping collection...");
    collector.stop();
    if collector.skipped_lines() > 0 {
        warn!(skipped = collector.skipped_lines(), "malformed input lines were skipped");
    }

    if let Err(e) = engine.stop() {
        error!(error = %e, "final flush failed; unflushed events were lost");
    }
    if let Err(e) = transparency_log.save() {
        warn!("Could not save transparency stats: {e}");
    }

    println!();
    println!("{}", transparency_log.summary());
    Ok(())
}

fn cmd_stats(timeframe: Timeframe, json: bool) -> Result<()> {
    let config = load_config()?;
    let diagnostics: SharedDiagnostics = Arc::new(keytally::transparency::NoopDiagnostics);
    let engine = open_engine(&config, diagnostics)?;
    let snapshot = engine
        .snapshot(timeframe)
        .context("failed to query statistics")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &StatsSnapshot) {
    let heading = format!("Typing statistics ({})", snapshot.timeframe);
    println!("{heading}");
    println!("{}", "=".repeat(heading.chars().count()));
    println!();
    println!("Keystrokes:        {}", snapshot.total_keystrokes);
    println!("Words:             {}", snapshot.total_words);
    println!("  typed:           {}", snapshot.typed_words);
    println!("  pasted (est.):   {}", snapshot.pasted_words_est);
    println!("Paste events:      {}", snapshot.paste_events);
    println!("Edit events:       {}", snapshot.edit_events);
    println!(
        "Active time:       {:.0}s flow / {:.0}s skill",
        snapshot.active_seconds_flow, snapshot.active_seconds_skill
    );
    println!("Flow WPM:          {}", format_wpm(snapshot.flow_wpm));
    println!("Skill WPM:         {}", format_wpm(snapshot.skill_wpm));
    println!();

    let devices = &snapshot.device_breakdown;
    println!("Devices:");
    println!("  Built-in: {}", devices.built_in);
    println!("  External: {}", devices.external);
    println!("  Unknown:  {}", devices.unknown);
    println!();

    if !snapshot.top_keys.is_empty() {
        println!("Top keys:");
        for key in &snapshot.top_keys {
            println!(
                "  code {:>3}: {:>8} ({:.1}%)",
                key.key_code,
                key.count,
                key.share * 100.0
            );
        }
        println!();
    }

    if !snapshot.top_apps.is_empty() {
        println!("Top apps:");
        for app in &snapshot.top_apps {
            let name = app.app_name.as_deref().unwrap_or(&app.app_bundle_id);
            println!("  {name}: {} words", app.words);
        }
        println!();
    }
}

fn format_wpm(wpm: Option<f64>) -> String {
    wpm.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

fn cmd_reset(yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to delete all statistics without --yes");
    }
    let config = load_config()?;
    let diagnostics: SharedDiagnostics = Arc::new(keytally::transparency::NoopDiagnostics);
    let engine = open_engine(&config, diagnostics)?;
    engine
        .reset_all_data()
        .context("failed to delete statistics")?;
    println!("All statistics deleted.");
    Ok(())
}

fn cmd_pause() -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.paused = true;
    config.save().context("failed to save config")?;
    println!("Collection paused. Use 'keytally resume' to continue.");
    Ok(())
}

fn cmd_resume() -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.paused = false;
    config.save().context("failed to save config")?;
    println!("Collection resumed.");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("keytally Status");
    println!("===============");
    println!();
    println!("Configuration:");
    println!("  Timezone: {}", config.timezone);
    println!("  Session timeout: {}s", config.session_timeout.as_secs());
    println!("  Retention: {} days", config.retention_days);
    println!("  Paused: {}", config.paused);
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let log = keytally::TransparencyLog::with_persistence(stats_path);
        let stats = log.stats();
        println!("Cumulative Statistics:");
        println!("  Key events ingested: {}", stats.keys_ingested);
        println!("  Key events persisted: {}", stats.keys_persisted);
        println!("  Words persisted: {}", stats.words_persisted);
        println!("  Flushes: {} ({} failed)", stats.flushes, stats.failed_flushes);
    } else {
        println!("No previous session data found.");
    }

    let db_path = config.database_path();
    if db_path.exists() {
        let store = Store::open(
            &db_path,
            StoreSettings::from_config(&config)?,
            Arc::new(keytally::transparency::NoopDiagnostics),
        )
        .context("failed to open aggregate store")?;
        println!();
        println!("Database: {}", db_path.display());
        for (table, count) in store.row_counts()? {
            println!("  {table}: {count} rows");
        }
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
