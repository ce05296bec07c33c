#[derive(Debug, thiserror::Error)]
pub enum GalickError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
