#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Client(#[from] ntfy_subscriber::Error),
}

pub type CliResult<T> = Result<T, CliError>;
