//! pawnbot - plays chess on a live browser page with a UCI engine.
//!
//! `pawnbot run` attaches to an existing WebDriver session, reads the board
//! from the page and waits for operator keys. Logs go to
//! `logs/pawnbot.YYYY-MM-DD` so the terminal stays free for status lines.

mod hotkeys;
mod settings;
mod webdriver;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bot::executor::pointer::shared_pointer;
use bot::{spawn_bot, BotConfig, BotDeps, BotEvent, ExecutionMode, SessionLifecycle, Site};
use clap::{Args, Parser, Subcommand};
use engine::{Depth, StockfishLauncher};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webdriver::{PageOverlay, WebDriverClient, WebDriverPointer};

#[derive(Parser)]
#[command(name = "pawnbot", about = "Chess automation on a live browser page")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a browser session and wait for operator keys.
    Run(RunArgs),
    /// Manage the settings file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default settings file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective settings.
    Show,
    /// Print where the settings file lives.
    Path,
}

/// Flags override the settings file for this run only.
#[derive(Args)]
struct RunArgs {
    /// WebDriver endpoint the browser session belongs to.
    #[arg(long, default_value = "http://localhost:9515")]
    webdriver: String,
    /// Id of the existing WebDriver session.
    #[arg(long)]
    session: String,
    /// `chesscom` or `lichess`; detected from the page URL when omitted.
    #[arg(long)]
    site: Option<Site>,
    /// `auto`, `manual` or `mouseless`.
    #[arg(long)]
    mode: Option<ExecutionMode>,
    #[arg(long)]
    engine_path: Option<PathBuf>,
    /// Search depth, or `unbounded` to search by move time.
    #[arg(long)]
    depth: Option<Depth>,
    #[arg(long)]
    skill: Option<u8>,
    /// Enable the human-like delay before each move.
    #[arg(long)]
    delay: bool,
    #[arg(long)]
    non_stop_puzzles: bool,
    #[arg(long)]
    non_stop_matches: bool,
    #[arg(long)]
    bongcloud: bool,
    /// Start playing right away instead of waiting for `1`.
    #[arg(long)]
    autostart: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut BotConfig) {
        if let Some(site) = self.site {
            config.site = site;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(path) = &self.engine_path {
            config.engine_path = Some(path.clone());
        }
        if let Some(depth) = self.depth {
            config.engine.depth = depth;
        }
        if let Some(skill) = self.skill {
            config.engine.skill_level = skill;
        }
        config.delay.enabled |= self.delay;
        config.non_stop_puzzles |= self.non_stop_puzzles;
        config.non_stop_matches |= self.non_stop_matches;
        config.bongcloud |= self.bongcloud;
    }
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = "logs";
    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "pawnbot");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Config { action } => config_command(action),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let path = settings::config_path()?;
    let mut config = settings::load_from(&path)?;

    let client = WebDriverClient::attach(&args.webdriver, &args.session)?;
    let url = client
        .current_url()
        .await
        .context("cannot reach the browser session")?;
    tracing::info!(%url, "Attached to browser session");
    if args.site.is_none() {
        if let Some(site) = detect_site(&url) {
            config.site = site;
        }
    }
    args.apply(&mut config);
    config.validate().context("invalid settings")?;

    let launcher = StockfishLauncher {
        path: config.engine_path.clone(),
        ..Default::default()
    };
    let deps = BotDeps::for_page(
        Arc::new(client.clone()),
        shared_pointer(WebDriverPointer::new(client.clone())),
        Arc::new(PageOverlay::new(client)),
        Arc::new(launcher),
    );

    say(&format!(
        "pawnbot on {} ({} mode). Keys: 1 start, 2 stop, 3 confirm move, q quit",
        config.site, config.mode
    ));
    let handle = spawn_bot(config, deps);
    let events = handle.subscribe().await?;
    let printer = tokio::spawn(print_events(events));

    if args.autostart {
        handle.start().await?;
    }
    let keys = hotkeys::run(&handle).await;

    handle.shutdown().await;
    printer.abort();
    tracing::info!("pawnbot shutting down");
    keys
}

fn config_command(action: ConfigAction) -> anyhow::Result<()> {
    let path = settings::config_path()?;
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            settings::save_to(&path, &BotConfig::default())?;
            println!("Wrote {}", path.display());
        }
        ConfigAction::Show => {
            let config = settings::load_from(&path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn detect_site(url: &str) -> Option<Site> {
    if url.contains("chess.com") {
        Some(Site::ChessCom)
    } else if url.contains("lichess.org") {
        Some(Site::Lichess)
    } else {
        None
    }
}

/// Print a line; the terminal is in raw mode while keys are read.
fn say(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{}\r\n", line);
    let _ = out.flush();
}

async fn print_events(mut events: broadcast::Receiver<BotEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    say(&line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Status output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe(event: &BotEvent) -> Option<String> {
    let line = match event {
        BotEvent::Lifecycle(lifecycle) => match lifecycle {
            SessionLifecycle::Idle => return None,
            SessionLifecycle::Running => "running".to_string(),
            SessionLifecycle::Stopping => "stopping...".to_string(),
            SessionLifecycle::Stopped => "stopped".to_string(),
            SessionLifecycle::Error => "stopped on error (press 1 to restart)".to_string(),
        },
        BotEvent::GameStarted { site, player, ply } => {
            format!("game on {} as {:?} at ply {}", site, player, ply)
        }
        BotEvent::Restarted => "new game".to_string(),
        BotEvent::MovePlayed { mv, by_self } => format!(
            "{:>3}. {} {}",
            mv.ply,
            mv.san,
            if *by_self { "(bot)" } else { "" }
        ),
        BotEvent::Recommendation { uci, score } => {
            format!("engine: {} {}", uci, score.as_deref().unwrap_or(""))
        }
        BotEvent::Report(report) => {
            let mut line = format!("eval {} material {}", report.score.as_deref().unwrap_or("-"), report.material);
            if let Some(wdl) = &report.wdl {
                line.push_str(&format!(" wdl {}", wdl));
            }
            if let Some(accuracy) = report.bot_accuracy {
                line.push_str(&format!(" accuracy {:.0}%", accuracy));
            }
            if let Some(prediction) = report.opponent_prediction {
                line.push_str(&format!(" predicted {:.0}%", prediction));
            }
            line
        }
        BotEvent::Resynced { previous_ply, ply } => {
            format!("resynchronised from ply {} to {}", previous_ply, ply)
        }
        BotEvent::GameOver { reason, pgn } => {
            tracing::info!(%reason, "PGN:\n{}", pgn);
            format!("game over: {}", reason)
        }
        BotEvent::NextGame(action) => format!("next: {:?}", action),
        BotEvent::Warning(message) => format!("warning: {}", message),
        BotEvent::Fatal(message) => format!("error: {}", message),
    };
    Some(line)
}
