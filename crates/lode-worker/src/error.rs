use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("output sink failed: {0}")]
    Sink(String),

    #[error("registry error: {0}")]
    Persist(#[from] lode_lease::PersistError),

    #[error("scheduler error: {0}")]
    Sched(#[from] lode_sched::SchedError),

    #[error("read error: {0}")]
    Reader(#[from] lode_reader::ReaderError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
