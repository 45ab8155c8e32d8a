use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    /// The batch scheduler task has shut down and no longer accepts commands.
    #[error("batch scheduler is no longer running")]
    SchedulerClosed,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CadenceError>;
