use clap::{Arg, ArgMatches, Command};
use log::LevelFilter;
use roll_history::{
    persistence, Config, HistoryCheckpointer, HistoryError, HistoryRecorder, RingBuffer, Row,
    ScanEvent, ScanResult, Symbol,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

const DEMO_SYMBOLS: [&str; 8] = [
    "BAYES_SPAM",
    "R_DKIM_REJECT",
    "MIME_HTML_ONLY",
    "FROM_NEQ_ENVFROM",
    "RBL_SPAMHAUS_XBL",
    "URIBL_BLACK",
    "SUBJ_ALL_CAPS",
    "FORGED_SENDER",
];

fn cli() -> Command {
    Command::new("roll-history")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rolling history of scanned messages with on-disk checkpoints")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/roll-history.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("show")
                .long("show")
                .help("Show the stored history")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the stored history as JSON instead of a table (implies --show)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("reset")
                .long("reset")
                .help("Replace the stored history with an empty one")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .value_name("COUNT")
                .help("Record COUNT simulated scans from several threads, then save")
                .value_parser(clap::value_parser!(usize))
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Level used until the configuration has been read.
fn startup_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn configured_level(verbose: bool, config: &Config) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        config.log_level()
    }
}

fn wants_listing(matches: &ArgMatches) -> bool {
    matches.get_flag("show") || matches.get_flag("json") || matches.contains_id("demo")
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let verbose = matches.get_flag("verbose");
    init_logging(startup_level(verbose));

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "/etc/roll-history.yaml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    log::set_max_level(configured_level(verbose, &config));

    let buffer = match RingBuffer::new(config.history.rows) {
        Ok(buffer) => Arc::new(buffer),
        Err(e) => {
            eprintln!("❌ {e}");
            process::exit(1);
        }
    };
    let history_file = PathBuf::from(&config.history.file);

    restore_history(&buffer, &history_file);

    if matches.get_flag("reset") {
        let dropped = buffer.completed_count();
        buffer.reset();
        match persistence::save(&buffer, &history_file) {
            Ok(_) => println!(
                "✅ History reset: {} ({dropped} rows removed)",
                history_file.display()
            ),
            Err(e) => {
                eprintln!("❌ Failed to reset history: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(count) = matches.get_one::<usize>("demo").copied() {
        run_demo(&config, buffer.clone(), history_file.clone(), count).await;
    }

    if wants_listing(&matches) {
        let rows = buffer.snapshot();
        if matches.get_flag("json") {
            match serde_json::to_string_pretty(&rows) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("❌ Failed to encode history: {e}");
                    process::exit(1);
                }
            }
        } else {
            print_table(&rows, buffer.capacity());
        }
        return;
    }

    println!("Nothing to do. Use --show, --reset or --demo COUNT (see --help).");
}

// The logger accepts every level; `log::set_max_level` picks the effective
// one so the configured level can apply after the config file is read.
fn init_logging(level: LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Trace)
        .init();
    log::set_max_level(level);
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

fn restore_history(buffer: &RingBuffer, path: &Path) {
    match persistence::load(buffer, path) {
        Ok(rows) => log::info!("Restored {rows} history rows"),
        Err(HistoryError::LegacyFormat { .. }) => {
            log::info!("Starting with empty history, old format file will be replaced")
        }
        Err(e) => log::info!("Starting with empty history: {e}"),
    }
}

async fn run_demo(config: &Config, buffer: Arc<RingBuffer>, history_file: PathBuf, count: usize) {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Received shutdown signal, stopping demo...");
            stop.store(true, Ordering::SeqCst);
        }) {
            log::warn!("Failed to install signal handler: {e}");
        }
    }

    let checkpointer = HistoryCheckpointer::spawn(
        buffer.clone(),
        history_file.clone(),
        Duration::from_secs(config.history.checkpoint_interval_seconds),
    );
    let recorder = Arc::new(HistoryRecorder::new(
        buffer.clone(),
        Arc::new(config.thresholds.clone()),
    ));

    let threads = 4;
    let started = Instant::now();
    let workers = tokio::task::spawn_blocking(move || {
        std::thread::scope(|scope| {
            for worker in 0..threads {
                let recorder = recorder.clone();
                let stop = stop.clone();
                scope.spawn(move || {
                    for n in (worker..count).step_by(threads) {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        recorder.record(&demo_event(n));
                    }
                });
            }
        });
    });

    if let Err(e) = workers.await {
        log::error!("Demo workers failed: {e}");
    }
    log::info!(
        "Recorded up to {count} scans in {:.3}s",
        started.elapsed().as_secs_f64()
    );

    checkpointer.shutdown().await;
    println!("💾 History saved to {}", history_file.display());
}

fn demo_event(n: usize) -> ScanEvent {
    let fired = n % (DEMO_SYMBOLS.len() + 1);
    let symbols: Vec<Symbol> = DEMO_SYMBOLS
        .iter()
        .take(fired)
        .map(|name| Symbol::new(*name, 2.5))
        .collect();
    let score: f64 = symbols.iter().map(|s| s.score).sum();

    ScanEvent {
        received_at: SystemTime::now(),
        started: Instant::now(),
        from_address: if n % 5 == 0 {
            None
        } else {
            Some(format!("192.0.2.{}", n % 250 + 1))
        },
        message_id: format!("<demo-{n}@roll-history.invalid>"),
        user: (n % 3 == 0).then(|| format!("user{}", n % 7)),
        length: 1024 + (n as u64 % 64) * 512,
        result: (n % 11 != 0).then_some(ScanResult { score, symbols }),
    }
}

fn print_table(rows: &[Row], capacity: usize) {
    println!("📜 Roll History ({} of {} rows)", rows.len(), capacity);
    println!("═══════════════════════════════════════");
    if rows.is_empty() {
        println!("📭 No history recorded yet");
        return;
    }

    println!(
        "{:<19} │ {:<15} │ {:<28} │ {:>6} │ {:>6} │ {:<15} │ {:>8}",
        "Time", "From", "Message-ID", "Score", "Req", "Action", "Scan ms"
    );
    for row in rows {
        let time = row
            .received_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<19} │ {:<15} │ {:<28} │ {:>6.2} │ {:>6.2} │ {:<15} │ {:>8.3}",
            time,
            truncate_string(&row.from_address, 15),
            truncate_string(&row.message_id, 28),
            row.score,
            row.required_score,
            row.action,
            row.scan_time * 1000.0
        );
        if !row.symbols.is_empty() {
            println!("    └─ {}", row.symbols);
        }
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
