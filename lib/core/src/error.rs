use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Country not loaded: {0}")]
    CountryNotLoaded(String),

    #[error("Model {model} not loaded for country {country}")]
    ModelNotLoaded { country: String, model: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Model corrupt: {0}")]
    ModelCorrupt(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Dimension mismatch found while building a store or index
    pub fn dimension_mismatch(what: impl std::fmt::Display, expected: usize, actual: usize) -> Self {
        Error::IndexCorrupt(format!(
            "{}: expected dimension {}, got {}",
            what, expected, actual
        ))
    }
}
