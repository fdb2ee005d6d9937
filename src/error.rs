use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::models::task::TaskId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("reached max task id limit ({limit})")]
    Exhausted { limit: TaskId },
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no command found")]
    EmptyCommand,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Terminal error of a supervised process, delivered through its done signal.
#[derive(Debug, Error)]
pub enum ExitError {
    #[error("failed to start: {0}")]
    Start(#[source] io::Error),
    #[error("failed to wait: {0}")]
    Wait(#[source] io::Error),
    #[error("{}", describe_status(.0))]
    Status(ExitStatus),
}

fn describe_status(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status: {code}"),
        (None, Some(libc::SIGKILL)) => "signal: 9 (killed)".to_string(),
        (None, Some(signal)) => format!("signal: {signal}"),
        (None, None) => status.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script name: {0}")]
    InvalidName(String),
    #[error("{0}")]
    Syntax(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
