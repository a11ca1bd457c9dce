use std::io;

use thiserror::Error;

/// Every way an ingestion run can fail. All of them are fatal to the run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Type coercion error: {0}")]
    TypeCoercion(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Invalid run state: {0}")]
    State(String),
}

impl IngestError {
    /// Taxonomy name reported on exit.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Config(_) => "ConfigError",
            IngestError::Transport(_) => "TransportError",
            IngestError::Decode(_) => "DecodeError",
            IngestError::Parse(_) => "ParseError",
            IngestError::SchemaMismatch(_) => "SchemaMismatch",
            IngestError::TypeCoercion(_) => "TypeCoercionError",
            IngestError::Connection(_) => "ConnectionError",
            IngestError::Load(_) => "LoadError",
            IngestError::State(_) => "StateError",
        }
    }

    /// Classify an I/O failure raised while pulling bytes through the decoder.
    ///
    /// Corrupt or truncated compressed data surfaces as `InvalidData`,
    /// `InvalidInput` or `UnexpectedEof`; anything else came from the
    /// underlying transport.
    pub fn from_stream_io(err: io::Error) -> Self {
        let from_http = err
            .get_ref()
            .map(|inner| inner.is::<reqwest::Error>())
            .unwrap_or(false);
        if from_http {
            return IngestError::Transport(err.to_string());
        }
        match err.kind() {
            io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof => IngestError::Decode(err.to_string()),
            _ => IngestError::Transport(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        IngestError::Transport(e.to_string())
    }
}

impl From<postgres::Error> for IngestError {
    fn from(e: postgres::Error) -> Self {
        if e.as_db_error().is_some() {
            return IngestError::Load(e.to_string());
        }
        let io_failure = std::error::Error::source(&e)
            .map(|src| src.is::<io::Error>())
            .unwrap_or(false);
        if e.is_closed() || io_failure {
            IngestError::Connection(e.to_string())
        } else {
            IngestError::Load(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for IngestError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                IngestError::Connection(e.to_string())
            }
            other => IngestError::Load(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
