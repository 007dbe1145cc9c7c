use std::error::Error;
use std::fmt;

/// Crate error type for document operations.
#[derive(Debug)]
pub enum TileDocError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// A caller-supplied value is malformed: unknown dimension, incomplete
    /// coordinate, non-finite position, unsupported data/storage type.
    InvalidArgument(String),
    /// Lookup on a tile (or brick) primary key that does not exist.
    NonExistingTile {
        pk: i64,
    },
    /// Path lookup on a metadata item that does not exist.
    NonExistingMetadataItem {
        path: String,
    },
    /// Nested `BEGIN`, or `COMMIT`/`ROLLBACK` without a pending transaction.
    TransactionMisuse(String),
    /// The database contradicts an internal invariant (schema mismatch on
    /// open, multiple blob rows for one key).
    InvariantViolation(String),
    /// Programmer error in call sequencing, e.g. blob-sink misuse or a
    /// getter for a schema role the document was not configured with.
    LogicError(String),
    /// Write operation attempted on a read-only document.
    ReadOnly,
}

impl TileDocError {
    /// The native SQLite extended result code, when this error carries one.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Self::Sql(rusqlite::Error::SqliteFailure(err, _)) => Some(err.extended_code),
            _ => None,
        }
    }
}

impl fmt::Display for TileDocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NonExistingTile { pk } => write!(f, "no tile with pk {pk}"),
            Self::NonExistingMetadataItem { path } => {
                write!(f, "no metadata item at path '{path}'")
            }
            Self::TransactionMisuse(msg) => write!(f, "transaction misuse: {msg}"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            Self::LogicError(msg) => write!(f, "logic error: {msg}"),
            Self::ReadOnly => write!(f, "operation not allowed on read-only document"),
        }
    }
}

impl Error for TileDocError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TileDocError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

pub type Result<T> = std::result::Result<T, TileDocError>;
