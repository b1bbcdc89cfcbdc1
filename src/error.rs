use thiserror::Error;

/// Everything that can go wrong inside the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A store or client directory could not be initialised.
    #[error("setup failed: {0}")]
    Setup(String),

    /// An I/O operation on the store or a key file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A store transaction could not be committed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Persisted key material could not be parsed.
    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    /// The on-disk store does not look like one of ours.
    #[error("corrupt store: {0}")]
    Store(String),

    /// A wire message could not be parsed.
    #[error("could not parse message: {0}")]
    Parse(String),
}
