//! Binary entry point: CLI, logging, config and the operator console.

use crate::config::{load_config_or_default, AppConfig};
use crate::export::DirectorySink;
use crate::feed::{FeedContext, FeedController};
use crate::grid::{FeedGrid, GridStatus, SlotView};
use crate::media::{MediaPlatform, SimulatedMedia};
use crate::recognition::recognizer_from_config;
use argh::FromArgs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Staggered multi-camera acquisition and gauge reading
#[derive(FromArgs, Debug)]
pub struct CliArgs {
    /// path to YAML configuration file
    #[argh(option, short = 'c', default = "String::from(\"gaugewatch.yaml\")")]
    pub config: String,

    /// directory exported stills are written to
    #[argh(option)]
    pub export_dir: Option<PathBuf>,
}

/// Initialize logging with env_logger.
///
/// Respects RUST_LOG environment variable. Defaults to "info" level.
pub fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// One line typed at the operator console. Feed numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Toggle(usize),
    On(usize),
    Off(usize),
    Inspect(usize),
    Capture(usize),
    Refresh,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| "empty command".to_string())?
            .to_ascii_lowercase();
        let position = |words: &mut std::str::SplitWhitespace<'_>| -> Result<usize, String> {
            let raw = words
                .next()
                .ok_or_else(|| format!("'{}' needs a feed number", verb))?;
            match raw.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n - 1),
                _ => Err(format!("invalid feed number '{}'", raw)),
            }
        };

        let command = match verb.as_str() {
            "toggle" | "t" => ConsoleCommand::Toggle(position(&mut words)?),
            "on" => ConsoleCommand::On(position(&mut words)?),
            "off" => ConsoleCommand::Off(position(&mut words)?),
            "inspect" | "ocr" | "i" => ConsoleCommand::Inspect(position(&mut words)?),
            "capture" | "c" => ConsoleCommand::Capture(position(&mut words)?),
            "refresh" | "r" => ConsoleCommand::Refresh,
            "status" | "s" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command '{}'", other)),
        };
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument '{}'", extra));
        }
        Ok(command)
    }
}

const HELP: &str = "commands: toggle N | on N | off N | inspect N | capture N | refresh | status | quit";

/// Run the dashboard until Ctrl+C, `quit` or end of input.
pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    setup_logging();

    log::info!("Starting gaugewatch v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Loading config from: {}", args.config);
    let config: AppConfig = load_config_or_default(&args.config)?;
    config.validate()?;

    let export_dir = args
        .export_dir
        .or_else(|| config.export.directory.clone())
        .unwrap_or_else(DirectorySink::default_dir);
    log::info!("Exported stills go to {}", export_dir.display());

    let ctx = FeedContext {
        platform: Arc::new(SimulatedMedia::from_config(&config.simulation)),
        recognizer: recognizer_from_config(&config.recognition),
        sink: Arc::new(DirectorySink::new(export_dir)),
        profile: config.grid.profile,
    };

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    })?;

    let mut grid = FeedGrid::start(ctx, config.grid.clone()).await;
    print_status(&grid);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => execute(&mut grid, command).await,
                    Err(e) => println!("{} ({})", e, HELP),
                }
            }
        }
    }

    grid.shutdown().await;
    log::info!("Dashboard stopped");
    Ok(())
}

async fn execute(grid: &mut FeedGrid<SimulatedMedia>, command: ConsoleCommand) {
    let outcome = match command {
        ConsoleCommand::Toggle(i) => feed_at(grid, i).map(FeedController::toggle),
        ConsoleCommand::On(i) => feed_at(grid, i).map(|f| f.set_power(true)),
        ConsoleCommand::Off(i) => feed_at(grid, i).map(|f| f.set_power(false)),
        ConsoleCommand::Inspect(i) => feed_at(grid, i).map(FeedController::inspect),
        ConsoleCommand::Capture(i) => match feed_at(grid, i) {
            Some(f) => Some(f.export().await.map(|name| println!("Saved {}", name))),
            None => None,
        },
        ConsoleCommand::Refresh => {
            grid.refresh().await;
            None
        }
        ConsoleCommand::Status => None,
        ConsoleCommand::Help => {
            println!("{}", HELP);
            return;
        }
        ConsoleCommand::Quit => return,
    };
    if let Some(Err(e)) = outcome {
        println!("{}", e);
    }
    print_status(grid);
}

fn feed_at<P: MediaPlatform>(grid: &FeedGrid<P>, index: usize) -> Option<&FeedController> {
    let controller = grid.controller_at(index);
    if controller.is_none() {
        println!("Camera {} is offline", index + 1);
    }
    controller
}

fn print_status<P: MediaPlatform>(grid: &FeedGrid<P>) {
    if let GridStatus::Failed(e) = grid.status() {
        println!("{}", e);
        return;
    }
    for view in grid.views() {
        let marker = match &view {
            SlotView::Live { state, .. } => state.lifecycle.as_str(),
            SlotView::Placeholder { .. } => "-",
        };
        println!(
            "{:>2}  {:<24} {:<13} {}",
            view.index() + 1,
            view.title(),
            marker,
            view.status_line()
        );
    }
}
