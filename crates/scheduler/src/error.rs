use thiserror::Error;

/// Errors that can occur in the fahrplan scheduling layer.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid task request: {0}")]
    Validation(String),

    #[error("task '{0}' was already submitted")]
    DuplicateTask(String),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("scheduler is shut down")]
    Shutdown,
}
