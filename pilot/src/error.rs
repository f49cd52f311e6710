use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] backend::error::Error),
    #[error("could not write the handshake: {0}")]
    Handshake(backend::error::Error),
}
