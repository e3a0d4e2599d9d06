use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use server_warden::config::validate_config;
use server_warden::{ApiResult, Caller, Config, ServerPanel};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Supervise a game server and manage its worlds, backups and properties.
///
/// Lines typed on standard input are forwarded to the server console.
/// Lines starting with `:` are panel commands (`:help` lists them). Ctrl-C
/// takes effect once the command in progress has finished.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Args {
    /// Path to a JSON or YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start the server immediately
    #[arg(long)]
    start: bool,
}

/// Console output plus a daily-rotated JSON file when `log_dir` is set.
fn setup_logging(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let console_layer = fmt::layer().with_target(true).with_level(true);

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(7)
                .filename_prefix("warden")
                .filename_suffix("log")
                .build(dir)
                .context("Failed to create log file appender")?;
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(appender),
            )
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    validate_config(&config)?;
    Ok(config)
}

fn print_result<T: Serialize>(result: &ApiResult<T>) {
    if result.success {
        println!("ok: {}", result.message);
    } else {
        println!("error: {}", result.message);
    }
    if let Some(data) = &result.data {
        match serde_json::to_string_pretty(data) {
            Ok(json) if json != "null" => println!("{}", json),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to render result"),
        }
    }
}

const HELP: &str = "\
:status             show server status
:start [memory]     start the server
:stop               stop the server
:restart            restart the server
:health             show CPU and memory usage
:backup [name]      back up the active world
:backups            list backups
:restore <name>     restore a backup
:world <name>       set the active world
:events             show recent lifecycle events
:help               show this help
anything else       sent to the server console";

async fn handle_line(panel: &ServerPanel, operator: &Caller, line: &str) {
    let Some(command) = line.strip_prefix(':') else {
        let result = panel.send_command(operator, line).await;
        if !result.success {
            print_result(&result);
        }
        return;
    };

    let mut parts = command.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let argument = parts.next();
    match verb {
        "status" => print_result(&panel.get_status().await),
        "start" => print_result(&panel.start_with_memory(operator, argument).await),
        "stop" => print_result(&panel.stop(operator).await),
        "restart" => print_result(&panel.restart(operator).await),
        "health" => print_result(&ApiResult::ok("Health sampled", panel.get_health().await)),
        "backup" => print_result(&panel.create_backup(operator, argument).await),
        "backups" => print_result(&panel.list_backups().await),
        "restore" => match argument {
            Some(name) => print_result(&panel.restore_backup(operator, name).await),
            None => println!("usage: :restore <name>"),
        },
        "world" => match argument {
            Some(name) => print_result(&panel.set_active_world(operator, name).await),
            None => println!("usage: :world <name>"),
        },
        "events" => print_result(&ApiResult::ok(
            "Recent lifecycle events",
            panel.lifecycle_events(Some(20)),
        )),
        _ => println!("{}", HELP),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    setup_logging(config.log_dir.as_deref())?;

    tracing::info!(
        server_dir = %config.server_dir.display(),
        backup_dir = %config.backup_dir.display(),
        "Starting warden"
    );
    let panel = ServerPanel::new(config);
    let operator = Caller::new("console");

    if args.start {
        print_result(&panel.start(&operator).await);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    // A command runs to completion before Ctrl-C is looked at again, so a
    // restore or a stop is never cut off halfway.
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        handle_line(&panel, &operator, line).await;
                    }
                }
                Ok(None) => {
                    tracing::debug!("Standard input closed");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read standard input");
                    stdin_open = false;
                }
            },
        }
    }

    tracing::info!("Shutting down");
    panel.shutdown().await;
    Ok(())
}
