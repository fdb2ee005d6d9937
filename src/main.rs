mod app;
mod channel;
mod config;
mod delivery;
mod error;
mod manager;
mod models;
mod terminal;
mod worker;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use app::commands::CommandRouter;
use app::{cli, BotContext};
use channel::console::ConsoleChannel;
use channel::telegram::TelegramChannel;
use config::{Config, DEFAULT_CONFIG_PATH};
use error::{AppError, ConfigError};

const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Run shell commands from a Telegram chat and watch their output live.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Drive the bot from this terminal instead of Telegram.
    #[arg(long)]
    console: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), AppError> {
    if args.console {
        return run_console(&args.config);
    }

    let config = Config::load(&args.config)?;
    let channel = Arc::new(TelegramChannel::new(config.bot_token()?, POLL_TIMEOUT)?);
    info!("loaded config from {}", args.config.display());

    let router = CommandRouter::new(Arc::new(BotContext::new(config, channel.clone())));
    router.refresh_commands();
    app::serve_telegram(&channel, &router);
    Ok(())
}

fn run_console(path: &Path) -> Result<(), AppError> {
    let mut config = match Config::load(path) {
        Ok(config) => config,
        Err(ConfigError::Read { .. }) => {
            warn!("no config at {}, using defaults", path.display());
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };
    // Whoever sits at this terminal is the operator.
    config.users.clear();

    let router = CommandRouter::new(Arc::new(BotContext::new(
        config,
        Arc::new(ConsoleChannel::stdout()),
    )));
    cli::run_console(&router)?;
    Ok(())
}
