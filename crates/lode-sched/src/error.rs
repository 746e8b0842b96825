use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("registry error: {0}")]
    Persist(#[from] lode_lease::PersistError),

    #[error("store error: {0}")]
    Store(#[from] lode_store::StoreError),
}

pub type SchedResult<T> = Result<T, SchedError>;
