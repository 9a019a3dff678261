use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("config error: {0}")]
    Config(String),
    #[error("resource error: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, MatchError>;
