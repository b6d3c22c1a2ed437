//! hearing-threshold - console front end for the staircase engine.
//!
//! Runs one test session, either answering on the console (`y` / `n` lines
//! on stdin) or against a simulated listener, and prints the session report
//! as JSON on stdout. Ctrl+C or SIGTERM aborts the session.

use clap::Parser;
use hearing_threshold::config::ConfigManager;
use hearing_threshold::error::EngineError;
use hearing_threshold::logging;
use hearing_threshold::random::SeededRandom;
use hearing_threshold::runner::{abort_channel, AbortHandle};
use hearing_threshold::sequencer::{SessionObserver, SessionProgress, TestSequencer};
use hearing_threshold::simulation::{simulated_subject, HearingProfile};
use hearing_threshold::staircase::RunSummary;
use hearing_threshold::stimulus::{
    response_channel, ChannelResponses, LoggingPlayer, ResponseSender, ResponseSource,
};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "hearing-threshold",
    about = "Adaptive pure-tone hearing threshold test"
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Answer with a simulated listener instead of the console
    #[arg(long)]
    simulate: bool,
    /// Simulated left-ear hearing level (dB)
    #[arg(long, default_value_t = -35.0, allow_negative_numbers = true)]
    left_db: f64,
    /// Simulated right-ear hearing level (dB)
    #[arg(long, default_value_t = -35.0, allow_negative_numbers = true)]
    right_db: f64,
    /// Random seed, overriding the configured one
    #[arg(long)]
    seed: Option<u64>,
    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    let cli = Cli::parse();

    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("hearing-threshold starting");

    let result = run(cli).await;

    match &result {
        Ok(()) => info!("hearing-threshold finished"),
        Err(e) => error!("hearing-threshold error: {}", e),
    }

    result
}

async fn run(cli: Cli) -> Result<(), EngineError> {
    let config_path = cli.config.unwrap_or_else(ConfigManager::default_path);
    let config_manager = ConfigManager::load_or_default(&config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    if cli.save_config {
        config_manager.save()?;
        info!("Configuration written to {:?}", config_manager.path());
        return Ok(());
    }

    let config = config_manager.get();
    let seed = cli.seed.or(config.seed);
    let sequencer = TestSequencer::new(config.session, new_rng(seed))?;

    let (abort_handle, abort) = abort_channel();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(abort_handle).await {
            error!("Signal handler error: {}", e);
        }
    });

    let mut observer = ProgressLog;
    let report = if cli.simulate {
        let profile = HearingProfile::new(cli.left_db, cli.right_db);
        info!(
            left_db = profile.left_db,
            right_db = profile.right_db,
            "Running against a simulated listener"
        );
        let (mut player, mut responses) = simulated_subject(profile, new_rng(seed));
        sequencer
            .run(&mut player, &mut responses, &mut observer, abort)
            .await?
    } else {
        let (sender, responses) = response_channel();
        spawn_console_reader(sender);
        let mut responses = ConsoleResponses { inner: responses };
        sequencer
            .run(&mut LoggingPlayer, &mut responses, &mut observer, abort)
            .await?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn new_rng(seed: Option<u64>) -> SeededRandom {
    match seed {
        Some(seed) => SeededRandom::from_seed(seed),
        None => SeededRandom::from_entropy(),
    }
}

/// Logs each completed pair.
struct ProgressLog;

impl SessionObserver for ProgressLog {
    fn on_pair_complete(&mut self, summary: &RunSummary, progress: SessionProgress) {
        info!(
            frequency_hz = summary.frequency_hz,
            ear = %summary.ear,
            threshold_db = summary.threshold_db,
            inconclusive = summary.inconclusive,
            "Test {}/{} complete ({:.0}%)",
            progress.test_number,
            progress.total_tests,
            progress.percent
        );
    }
}

/// Prompts on stderr before each response window.
struct ConsoleResponses {
    inner: ChannelResponses,
}

impl ResponseSource for ConsoleResponses {
    fn discard_pending(&mut self) {
        self.inner.discard_pending();
    }

    async fn next_response(&mut self) -> Option<bool> {
        eprint!("Did you hear a tone? [y/n] ");
        self.inner.next_response().await
    }
}

/// Forward y/n answers from stdin. Runs on a plain thread because blocking
/// stdin reads cannot be cancelled.
fn spawn_console_reader(sender: ResponseSender) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            match parse_answer(&line) {
                Some(heard) => {
                    if !sender.send(heard) {
                        break;
                    }
                }
                None => warn!(input = %line.trim(), "Expected y or n"),
            }
        }
    });
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Set up signal handlers that abort the session.
/// Handles SIGTERM and SIGINT.
#[cfg(unix)]
async fn setup_signal_handlers(
    abort: AbortHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    abort.abort();
    Ok(())
}

/// Ctrl+C only on non-Unix platforms
#[cfg(not(unix))]
async fn setup_signal_handlers(
    abort: AbortHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    abort.abort();
    Ok(())
}
