use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("reading buffer lock poisoned")]
    BufferLock,
}
